//! Arithmetic/comparison unit.
//!
//! The ALU performs the three register-to-register operations of the
//! Octet: add, multiply, and three-way compare. Arithmetic wraps
//! modulo 256, matching the fixed-width registers. The operation
//! selector is a closed enum, so an unsupported operation cannot be
//! expressed, let alone dispatched.

use crate::cpu::registers::Flags;

/// The operations the ALU can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Mul,
    Cmp,
}

/// What an ALU operation produced: either a value destined for the
/// first operand's register, or a new flags state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOutput {
    Value(u8),
    Flags(Flags),
}

/// Perform an ALU operation on two register values.
pub fn apply(op: AluOp, x: u8, y: u8) -> AluOutput {
    match op {
        AluOp::Add => AluOutput::Value(x.wrapping_add(y)),
        AluOp::Mul => AluOutput::Value(x.wrapping_mul(y)),
        AluOp::Cmp => AluOutput::Flags(Flags::from_ordering(x.cmp(&y))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_basic() {
        assert_eq!(apply(AluOp::Add, 100, 50), AluOutput::Value(150));
    }

    #[test]
    fn test_add_wraps() {
        assert_eq!(apply(AluOp::Add, 200, 100), AluOutput::Value(44));
        assert_eq!(apply(AluOp::Add, 255, 1), AluOutput::Value(0));
    }

    #[test]
    fn test_mul_basic() {
        assert_eq!(apply(AluOp::Mul, 8, 9), AluOutput::Value(72));
    }

    #[test]
    fn test_mul_wraps() {
        assert_eq!(apply(AluOp::Mul, 16, 16), AluOutput::Value(0));
        assert_eq!(apply(AluOp::Mul, 100, 3), AluOutput::Value(44));
    }

    #[test]
    fn test_cmp_relations() {
        assert_eq!(apply(AluOp::Cmp, 5, 5), AluOutput::Flags(Flags::Equal));
        assert_eq!(apply(AluOp::Cmp, 9, 5), AluOutput::Flags(Flags::Greater));
        assert_eq!(apply(AluOp::Cmp, 5, 9), AluOutput::Flags(Flags::Less));
    }

    proptest! {
        #[test]
        fn prop_add_mod_256(x: u8, y: u8) {
            let expected = ((x as u16 + y as u16) % 256) as u8;
            prop_assert_eq!(apply(AluOp::Add, x, y), AluOutput::Value(expected));
        }

        #[test]
        fn prop_mul_mod_256(x: u8, y: u8) {
            let expected = ((x as u16 * y as u16) % 256) as u8;
            prop_assert_eq!(apply(AluOp::Mul, x, y), AluOutput::Value(expected));
        }

        #[test]
        fn prop_cmp_sets_exactly_one_relation(x: u8, y: u8) {
            let flags = match apply(AluOp::Cmp, x, y) {
                AluOutput::Flags(fl) => fl,
                AluOutput::Value(_) => unreachable!(),
            };
            let expected = if x == y {
                Flags::Equal
            } else if x > y {
                Flags::Greater
            } else {
                Flags::Less
            };
            prop_assert_eq!(flags, expected);
            prop_assert_eq!(flags.bits().count_ones(), 1);
        }
    }
}
