//! Concrete state synchronization with trace snapshots.
//!
//! The engine's concrete state drifts from ground truth whenever an instruction is not
//! modeled exactly, or when the trace observes memory the engine never wrote. Snapshot events
//! correct that drift. Values are written only when they differ, so locations that already
//! agree keep their symbolic formulas.

use crate::{
    engine::{RegisterFile, SymbolicEngine, SymbolicExpr},
    Result,
};

/// Writes every register whose concrete value differs from the snapshot.
///
/// A register with a formula keeps it for the low bits that still agree with the snapshot.
/// Only the bits from the lowest differing one upwards become concrete, so an input bound to
/// the low half of a register survives a snapshot that disagrees on the upper half.
///
/// # Returns
///
/// The number of registers written.
///
/// # Errors
///
/// Fails only if the engine cannot evaluate a register's existing formula.
pub fn sync_registers<E: SymbolicEngine + ?Sized>(
    engine: &mut E,
    values: &RegisterFile<u64>,
) -> Result<usize> {
    let mut writes = 0;
    for (reg, &expected) in values.iter() {
        let current = engine.concrete_register(reg);
        if current == expected {
            continue;
        }
        writes += 1;

        let agreeing = (current ^ expected).trailing_zeros();
        let formula = engine.register_expr(reg.full());
        if agreeing == 0 || formula.variables().is_empty() {
            log::debug!("Sync {reg}: 0x{current:x} -> 0x{expected:x}");
            engine.set_concrete_register(reg, expected);
            continue;
        }

        let low = SymbolicExpr::extract(agreeing - 1, 0, formula);
        if low.variables().is_empty() {
            log::debug!("Sync {reg}: 0x{current:x} -> 0x{expected:x}");
            engine.set_concrete_register(reg, expected);
            continue;
        }
        log::debug!(
            "Sync {reg}: 0x{current:x} -> 0x{expected:x}, keeping formula of bits {}..0",
            agreeing - 1
        );
        let high = SymbolicExpr::constant(expected >> agreeing, 64 - agreeing);
        engine.assign_register_expr(reg, SymbolicExpr::concat(high, low))?;
    }
    Ok(writes)
}

/// Writes `size` bytes at `address` if their concrete value differs from `value`.
///
/// # Returns
///
/// 1 if memory was written, 0 otherwise.
pub fn sync_memory<E: SymbolicEngine + ?Sized>(
    engine: &mut E,
    address: u64,
    size: usize,
    value: u64,
) -> usize {
    let current = engine.concrete_memory(address, size);
    if current == value {
        return 0;
    }
    log::debug!("Sync [0x{address:x}; {size}]: 0x{current:x} -> 0x{value:x}");
    engine.set_concrete_memory(address, size, value);
    1
}
