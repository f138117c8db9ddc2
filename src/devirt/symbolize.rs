//! Binding of the two function inputs to symbolic variables.

use crate::{
    devirt::config::SymbolWidth,
    engine::{GpRegister, SymbolicEngine, SymbolicExpr, SymbolicVariable},
    Error, Result,
};

/// The symbolic inputs of a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inputs {
    /// Input held in the destination-index register.
    pub x: SymbolicVariable,
    /// Input held in the source-index register.
    pub y: SymbolicVariable,
    /// Whether the variables were created by this call (first replay).
    pub created: bool,
}

/// Symbolizes the inputs before the first instruction of a replay.
///
/// Without existing variables, fresh `x` and `y` variables are bound to the `width`-sized
/// slices of `rdi` and `rsi`. Otherwise the existing pair is reseeded with the current
/// concrete `rdi`/`rsi` values and bound, zero-extended, to the full registers.
///
/// # Errors
///
/// Returns [`Error::Engine`] if the engine holds a number of variables other than 0 or 2,
/// or if binding fails.
pub fn symbolize_inputs<E: SymbolicEngine + ?Sized>(
    engine: &mut E,
    width: SymbolWidth,
) -> Result<Inputs> {
    match engine.variables() {
        [] => {
            let (x_slice, y_slice) = width.input_slices();
            let x = engine.symbolize_register(x_slice, "x")?;
            let y = engine.symbolize_register(y_slice, "y")?;
            log::info!("Symbolized inputs: x = {x_slice}, y = {y_slice} ({width})");
            Ok(Inputs { x, y, created: true })
        }
        [x, y] => {
            let (x, y) = (x.clone(), y.clone());
            let x = rebind(engine, x, GpRegister::Rdi)?;
            let y = rebind(engine, y, GpRegister::Rsi)?;
            log::info!(
                "Reseeded inputs: x = 0x{:x}, y = 0x{:x}",
                x.value,
                y.value
            );
            Ok(Inputs {
                x,
                y,
                created: false,
            })
        }
        other => Err(Error::Engine(format!(
            "Expected two symbolic inputs, the engine holds {}",
            other.len()
        ))),
    }
}

fn rebind<E: SymbolicEngine + ?Sized>(
    engine: &mut E,
    variable: SymbolicVariable,
    reg: GpRegister,
) -> Result<SymbolicVariable> {
    let seed = engine.concrete_register(reg);
    engine.set_variable_value(variable.id, seed)?;
    engine.assign_register_expr(reg, SymbolicExpr::zero_extend(variable.expr(), 64))?;

    engine
        .variables()
        .get(variable.id)
        .cloned()
        .ok_or(Error::UnboundVariable(variable.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::X86Engine;

    #[test]
    fn first_call_creates_variables() -> Result<()> {
        let mut engine = X86Engine::new();
        engine.set_concrete_register(GpRegister::Rdi, 0x1122);
        engine.set_concrete_register(GpRegister::Rsi, 0x3344);

        let inputs = symbolize_inputs(&mut engine, SymbolWidth::Byte)?;
        assert!(inputs.created);
        assert_eq!((inputs.x.id, inputs.x.alias.as_str()), (0, "x"));
        assert_eq!((inputs.y.id, inputs.y.alias.as_str()), (1, "y"));
        assert_eq!((inputs.x.value, inputs.y.value), (0x22, 0x44));
        assert_eq!(inputs.x.bits, 8);
        // upper bits of rdi stay concrete
        assert_eq!(engine.concrete_register(GpRegister::Rdi), 0x1122);
        Ok(())
    }

    #[test]
    fn second_call_reseeds_and_binds() -> Result<()> {
        let mut engine = X86Engine::new();
        symbolize_inputs(&mut engine, SymbolWidth::Word)?;

        engine.reset_concrete_state();
        engine.set_concrete_register(GpRegister::Rdi, 0xffff_0007);
        engine.set_concrete_register(GpRegister::Rsi, 9);
        let inputs = symbolize_inputs(&mut engine, SymbolWidth::Word)?;

        assert!(!inputs.created);
        assert_eq!(engine.variables().len(), 2);
        assert_eq!(inputs.x.value, 7);
        assert_eq!(inputs.y.value, 9);
        assert_eq!(
            engine.register_expr(GpRegister::Rdi.full()),
            SymbolicExpr::zero_extend(inputs.x.expr(), 64)
        );
        // the binding replaces the register, so rdi now holds the truncated seed
        assert_eq!(engine.concrete_register(GpRegister::Rdi), 7);
        Ok(())
    }

    #[test]
    fn unexpected_variable_count() -> Result<()> {
        let mut engine = X86Engine::new();
        engine.symbolize_register(GpRegister::Rax.low(32), "z")?;
        assert!(matches!(
            symbolize_inputs(&mut engine, SymbolWidth::Dword),
            Err(Error::Engine(_))
        ));
        Ok(())
    }
}
