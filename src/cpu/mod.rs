//! CPU emulation for the Octet computer.
//!
//! This module implements the complete Octet architecture:
//! - 256 byte-wide memory cells
//! - 8 general-purpose byte registers, with R7 reserved as the stack
//!   pointer (initialized to 0xF4, growing downward)
//! - an 11-instruction set whose opcodes encode their own width

pub mod memory;
pub mod registers;
pub mod alu;
pub mod decode;
pub mod execute;

pub use memory::Memory;
pub use registers::{Registers, Flags};
pub use decode::{Instruction, DecodeError};
pub use execute::{Cpu, CpuError, CpuState};
