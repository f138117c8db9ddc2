//! Translation of formulas to LLVM IR text.
//!
//! The lifted module contains a single function, `@__vmscope`, with one integer parameter
//! per referenced symbolic variable (`%SymVar_<id>`, in id order) and the formula as its
//! return value. Every unique DAG node becomes one SSA instruction; 1-bit nodes map to `i1`.

use std::fmt::Write;

use rustc_hash::FxHashMap;

use crate::{
    engine::{
        expr::{ExprKind, SymbolicExpr},
        ops::SymbolicOp,
    },
    Error, Result,
};

/// Name of the lifted function.
pub const LIFTED_FUNCTION: &str = "__vmscope";

/// Lifts `expr` into a textual LLVM IR module.
///
/// # Errors
///
/// Returns [`Error::Engine`] if the formula is malformed (a node references a child that was
/// never emitted).
pub fn lift_to_llvm(expr: &SymbolicExpr) -> Result<String> {
    let mut body = String::new();
    let mut names: FxHashMap<usize, String> = FxHashMap::default();
    let mut intrinsics: Vec<String> = Vec::new();
    let mut next = 0usize;

    for node in expr.post_order() {
        let ty = int_type(node.bits());
        let operand = |e: &SymbolicExpr| -> Result<String> {
            names
                .get(&e.node_id())
                .cloned()
                .ok_or_else(|| Error::Engine("lifting visited a node before its operands".into()))
        };

        let value = match node.kind() {
            ExprKind::Constant(value) => value.to_string(),
            ExprKind::Variable(id) => format!("%SymVar_{id}"),
            _ => {
                let dst = format!("%{next}");
                next += 1;
                let line = match node.kind() {
                    ExprKind::Unary { op, operand: x } => {
                        let x = operand(x)?;
                        match op {
                            SymbolicOp::Not => format!("{dst} = xor {ty} {x}, -1"),
                            _ => format!("{dst} = sub {ty} 0, {x}"),
                        }
                    }
                    ExprKind::Binary { op, left, right } => {
                        let arg_ty = int_type(left.bits());
                        let (l, r) = (operand(left)?, operand(right)?);
                        match op {
                            SymbolicOp::Rotl | SymbolicOp::Rotr => {
                                let name = if *op == SymbolicOp::Rotl { "fshl" } else { "fshr" };
                                let intrinsic = format!("llvm.{name}.{arg_ty}");
                                let decl = format!(
                                    "declare {arg_ty} @{intrinsic}({arg_ty}, {arg_ty}, {arg_ty})"
                                );
                                if !intrinsics.contains(&decl) {
                                    intrinsics.push(decl);
                                }
                                format!(
                                    "{dst} = call {arg_ty} @{intrinsic}({arg_ty} {l}, {arg_ty} {l}, {arg_ty} {r})"
                                )
                            }
                            _ => format!("{dst} = {} {arg_ty} {l}, {r}", llvm_opcode(*op)),
                        }
                    }
                    ExprKind::Extract {
                        low,
                        operand: x,
                        ..
                    } => {
                        let src_ty = int_type(x.bits());
                        let x = operand(x)?;
                        if *low == 0 {
                            format!("{dst} = trunc {src_ty} {x} to {ty}")
                        } else {
                            let shifted = format!("{dst}.shr");
                            format!(
                                "{shifted} = lshr {src_ty} {x}, {low}\n  {dst} = trunc {src_ty} {shifted} to {ty}"
                            )
                        }
                    }
                    ExprKind::ZeroExtend(x) => {
                        let src_ty = int_type(x.bits());
                        format!("{dst} = zext {src_ty} {} to {ty}", operand(x)?)
                    }
                    ExprKind::SignExtend(x) => {
                        let src_ty = int_type(x.bits());
                        format!("{dst} = sext {src_ty} {} to {ty}", operand(x)?)
                    }
                    ExprKind::Concat { high, low } => {
                        let (h, l) = (operand(high)?, operand(low)?);
                        let (h_ty, l_ty) = (int_type(high.bits()), int_type(low.bits()));
                        format!(
                            "{dst}.hi = zext {h_ty} {h} to {ty}\n  \
                             {dst}.shl = shl {ty} {dst}.hi, {}\n  \
                             {dst}.lo = zext {l_ty} {l} to {ty}\n  \
                             {dst} = or {ty} {dst}.shl, {dst}.lo",
                            low.bits()
                        )
                    }
                    ExprKind::Ite {
                        cond,
                        then,
                        otherwise,
                    } => format!(
                        "{dst} = select i1 {}, {ty} {}, {ty} {}",
                        operand(cond)?,
                        operand(then)?,
                        operand(otherwise)?
                    ),
                    ExprKind::Constant(_) | ExprKind::Variable(_) => {
                        return Err(Error::Engine("leaf node lifted as an instruction".into()))
                    }
                };
                let _ = writeln!(body, "  {line}");
                dst
            }
        };
        names.insert(node.node_id(), value);
    }

    let result = names
        .get(&expr.node_id())
        .cloned()
        .ok_or_else(|| Error::Engine("lifting produced no result value".into()))?;

    let params: Vec<String> = expr
        .variables()
        .iter()
        .map(|(id, bits)| format!("{} %SymVar_{id}", int_type(*bits)))
        .collect();

    let mut module = String::new();
    let _ = writeln!(module, "; ModuleID = 'vmscope'");
    let _ = writeln!(module, "source_filename = \"vmscope\"");
    let _ = writeln!(module);
    let _ = writeln!(
        module,
        "define {} @{LIFTED_FUNCTION}({}) {{",
        int_type(expr.bits()),
        params.join(", ")
    );
    let _ = writeln!(module, "entry:");
    module.push_str(&body);
    let _ = writeln!(module, "  ret {} {result}", int_type(expr.bits()));
    let _ = writeln!(module, "}}");
    for decl in intrinsics {
        let _ = writeln!(module);
        let _ = writeln!(module, "{decl}");
    }
    Ok(module)
}

fn int_type(bits: u32) -> String {
    format!("i{bits}")
}

fn llvm_opcode(op: SymbolicOp) -> &'static str {
    match op {
        SymbolicOp::Add => "add",
        SymbolicOp::Sub => "sub",
        SymbolicOp::Mul => "mul",
        SymbolicOp::And => "and",
        SymbolicOp::Or => "or",
        SymbolicOp::Xor => "xor",
        SymbolicOp::Shl => "shl",
        SymbolicOp::ShrU => "lshr",
        SymbolicOp::ShrS => "ashr",
        SymbolicOp::Eq => "icmp eq",
        SymbolicOp::Ne => "icmp ne",
        SymbolicOp::LtU => "icmp ult",
        SymbolicOp::LeU => "icmp ule",
        SymbolicOp::LtS => "icmp slt",
        SymbolicOp::LeS => "icmp sle",
        SymbolicOp::Neg | SymbolicOp::Not | SymbolicOp::Rotl | SymbolicOp::Rotr => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifts_two_argument_function() -> Result<()> {
        let x = SymbolicExpr::variable(0, 32);
        let y = SymbolicExpr::variable(1, 32);
        let expr = SymbolicExpr::binary(SymbolicOp::Add, x, y);

        let ir = lift_to_llvm(&expr)?;
        assert!(ir.contains("define i32 @__vmscope(i32 %SymVar_0, i32 %SymVar_1) {"));
        assert!(ir.contains("  %0 = add i32 %SymVar_0, %SymVar_1\n"));
        assert!(ir.contains("  ret i32 %0\n"));
        Ok(())
    }

    #[test]
    fn lifts_constants_and_casts() -> Result<()> {
        let x = SymbolicExpr::variable(0, 8);
        let wide = SymbolicExpr::zero_extend(x, 32);
        let expr = SymbolicExpr::binary(SymbolicOp::Xor, wide, SymbolicExpr::constant(0x55, 32));

        let ir = lift_to_llvm(&expr)?;
        assert!(ir.contains("%0 = zext i8 %SymVar_0 to i32"));
        assert!(ir.contains("%1 = xor i32 %0, 85"));
        assert!(ir.contains("ret i32 %1"));
        Ok(())
    }

    #[test]
    fn lifts_select_and_compare() -> Result<()> {
        let x = SymbolicExpr::variable(0, 32);
        let y = SymbolicExpr::variable(1, 32);
        let cond = SymbolicExpr::binary(SymbolicOp::LtU, x.clone(), y.clone());
        let expr = SymbolicExpr::ite(cond, x, y);

        let ir = lift_to_llvm(&expr)?;
        assert!(ir.contains("%0 = icmp ult i32 %SymVar_0, %SymVar_1"));
        assert!(ir.contains("%1 = select i1 %0, i32 %SymVar_0, i32 %SymVar_1"));
        Ok(())
    }

    #[test]
    fn rotate_declares_intrinsic() -> Result<()> {
        let x = SymbolicExpr::variable(0, 16);
        let expr = SymbolicExpr::binary(SymbolicOp::Rotl, x, SymbolicExpr::constant(3, 16));

        let ir = lift_to_llvm(&expr)?;
        assert!(ir.contains("call i16 @llvm.fshl.i16(i16 %SymVar_0, i16 %SymVar_0, i16 3)"));
        assert!(ir.contains("declare i16 @llvm.fshl.i16(i16, i16, i16)"));
        Ok(())
    }

    #[test]
    fn constant_formula_returns_literal() -> Result<()> {
        let ir = lift_to_llvm(&SymbolicExpr::constant(42, 32))?;
        assert!(ir.contains("define i32 @__vmscope() {"));
        assert!(ir.contains("ret i32 42"));
        Ok(())
    }
}
