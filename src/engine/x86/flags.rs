//! Status flag formulas for arithmetic and logic results.

use crate::engine::{
    ops::SymbolicOp,
    registers::Flag,
    x86::{state::MachineState, state::Tracked, types::X86Condition},
};

/// Sets ZF, SF, and PF from a result.
pub fn set_result_flags(state: &mut MachineState, result: &Tracked) {
    state.set_flag(Flag::Zf, result.binary(SymbolicOp::Eq, &result.same_width(0)));
    state.set_flag(Flag::Sf, result.msb());
    state.set_flag(Flag::Pf, parity(result));
}

/// PF: set when the low byte of `result` has an even number of set bits.
pub fn parity(result: &Tracked) -> Tracked {
    let mut byte = result.extract(7, 0);
    for shift in [4, 2, 1] {
        let shifted = byte.binary(SymbolicOp::ShrU, &byte.same_width(shift));
        byte = byte.binary(SymbolicOp::Xor, &shifted);
    }
    byte.bit_at(0).unary(SymbolicOp::Not)
}

/// AF: carry or borrow out of bit 3.
pub fn adjust(a: &Tracked, b: &Tracked, result: &Tracked) -> Tracked {
    a.binary(SymbolicOp::Xor, b)
        .binary(SymbolicOp::Xor, result)
        .bit_at(4)
}

/// Flags of `result = a + b + carry_in`.
pub fn set_add_flags(
    state: &mut MachineState,
    a: &Tracked,
    b: &Tracked,
    carry_in: Option<&Tracked>,
    result: &Tracked,
) {
    let mut carry = result.binary(SymbolicOp::LtU, a);
    if let Some(cin) = carry_in {
        let wrapped = cin.binary(SymbolicOp::And, &result.binary(SymbolicOp::Eq, a));
        carry = carry.binary(SymbolicOp::Or, &wrapped);
    }
    let overflow = a
        .binary(SymbolicOp::Xor, result)
        .binary(SymbolicOp::And, &b.binary(SymbolicOp::Xor, result))
        .msb();

    state.set_flag(Flag::Cf, carry);
    state.set_flag(Flag::Of, overflow);
    state.set_flag(Flag::Af, adjust(a, b, result));
    set_result_flags(state, result);
}

/// Flags of `result = a - b - borrow_in`.
pub fn set_sub_flags(
    state: &mut MachineState,
    a: &Tracked,
    b: &Tracked,
    borrow_in: Option<&Tracked>,
    result: &Tracked,
) {
    let mut borrow = a.binary(SymbolicOp::LtU, b);
    if let Some(bin) = borrow_in {
        let wrapped = bin.binary(SymbolicOp::And, &a.binary(SymbolicOp::Eq, b));
        borrow = borrow.binary(SymbolicOp::Or, &wrapped);
    }
    let overflow = a
        .binary(SymbolicOp::Xor, b)
        .binary(SymbolicOp::And, &a.binary(SymbolicOp::Xor, result))
        .msb();

    state.set_flag(Flag::Cf, borrow);
    state.set_flag(Flag::Of, overflow);
    state.set_flag(Flag::Af, adjust(a, b, result));
    set_result_flags(state, result);
}

/// Flags of `and`/`or`/`xor`/`test`: CF, OF, and AF cleared.
pub fn set_logic_flags(state: &mut MachineState, result: &Tracked) {
    state.set_flag(Flag::Cf, Tracked::bit(false));
    state.set_flag(Flag::Of, Tracked::bit(false));
    state.set_flag(Flag::Af, Tracked::bit(false));
    set_result_flags(state, result);
}

/// Evaluates a condition code against the current flags.
pub fn condition(state: &MachineState, cond: X86Condition) -> Tracked {
    let cf = || state.flag(Flag::Cf);
    let zf = || state.flag(Flag::Zf);
    let less = || state.flag(Flag::Sf).binary(SymbolicOp::Xor, &state.flag(Flag::Of));
    let base = match cond {
        X86Condition::E | X86Condition::Ne => zf(),
        X86Condition::B | X86Condition::Ae => cf(),
        X86Condition::Be | X86Condition::A => cf().binary(SymbolicOp::Or, &zf()),
        X86Condition::S | X86Condition::Ns => state.flag(Flag::Sf),
        X86Condition::O | X86Condition::No => state.flag(Flag::Of),
        X86Condition::P | X86Condition::Np => state.flag(Flag::Pf),
        X86Condition::L | X86Condition::Ge => less(),
        X86Condition::Le | X86Condition::G => zf().binary(SymbolicOp::Or, &less()),
    };
    if cond.is_negated() {
        base.unary(SymbolicOp::Not)
    } else {
        base
    }
}

/// Flags a condition reads.
pub fn condition_flags(cond: X86Condition) -> &'static [Flag] {
    match cond {
        X86Condition::E | X86Condition::Ne => &[Flag::Zf],
        X86Condition::B | X86Condition::Ae => &[Flag::Cf],
        X86Condition::Be | X86Condition::A => &[Flag::Cf, Flag::Zf],
        X86Condition::S | X86Condition::Ns => &[Flag::Sf],
        X86Condition::O | X86Condition::No => &[Flag::Of],
        X86Condition::P | X86Condition::Np => &[Flag::Pf],
        X86Condition::L | X86Condition::Ge => &[Flag::Sf, Flag::Of],
        X86Condition::Le | X86Condition::G => &[Flag::Zf, Flag::Sf, Flag::Of],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::SymbolicExpr;

    fn flags_after_sub(a: u64, b: u64, bits: u32) -> MachineState {
        let mut state = MachineState::new();
        let (a, b) = (Tracked::concrete(a, bits), Tracked::concrete(b, bits));
        let result = a.binary(SymbolicOp::Sub, &b);
        set_sub_flags(&mut state, &a, &b, None, &result);
        state
    }

    #[test]
    fn subtraction_flags() {
        let state = flags_after_sub(3, 5, 32);
        assert_eq!(state.flag(Flag::Cf).value(), 1);
        assert_eq!(state.flag(Flag::Sf).value(), 1);
        assert_eq!(state.flag(Flag::Zf).value(), 0);
        assert_eq!(state.flag(Flag::Of).value(), 0);

        let state = flags_after_sub(7, 7, 32);
        assert_eq!(state.flag(Flag::Zf).value(), 1);
        assert_eq!(state.flag(Flag::Cf).value(), 0);
        assert_eq!(state.flag(Flag::Pf).value(), 1);

        // 0x80 - 1 overflows in 8 bits
        let state = flags_after_sub(0x80, 1, 8);
        assert_eq!(state.flag(Flag::Of).value(), 1);
        // 0x10 - 1 borrows from bit 4
        let state = flags_after_sub(0x10, 1, 8);
        assert_eq!(state.flag(Flag::Af).value(), 1);
    }

    #[test]
    fn addition_with_carry_in() {
        let mut state = MachineState::new();
        let a = Tracked::concrete(5, 8);
        let b = Tracked::concrete(0xff, 8);
        let cin = Tracked::bit(true);
        let result = a
            .binary(SymbolicOp::Add, &b)
            .binary(SymbolicOp::Add, &cin.zero_extend(8));
        assert_eq!(result.value(), 5);
        set_add_flags(&mut state, &a, &b, Some(&cin), &result);
        assert_eq!(state.flag(Flag::Cf).value(), 1);
    }

    #[test]
    fn parity_of_low_byte() {
        assert_eq!(parity(&Tracked::concrete(0x0, 32)).value(), 1);
        assert_eq!(parity(&Tracked::concrete(0x1, 32)).value(), 0);
        assert_eq!(parity(&Tracked::concrete(0x103, 32)).value(), 1);
    }

    #[test]
    fn symbolic_condition() {
        let mut state = MachineState::new();
        let x = Tracked::symbolic(SymbolicExpr::variable(0, 32), 4);
        let y = Tracked::concrete(4, 32);
        let result = x.binary(SymbolicOp::Sub, &y);
        set_sub_flags(&mut state, &x, &y, None, &result);

        let ne = condition(&state, X86Condition::Ne);
        assert!(ne.is_symbolic());
        assert_eq!(ne.value(), 0);
        assert_eq!(condition(&state, X86Condition::E).value(), 1);
        assert_eq!(condition_flags(X86Condition::G), &[Flag::Zf, Flag::Sf, Flag::Of]);
    }
}
