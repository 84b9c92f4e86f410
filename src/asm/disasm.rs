//! Disassembler for Octet programs.
//!
//! Converts image bytes back to readable assembly, walking the
//! program by instruction widths.

use crate::cpu::decode::{decode, width, Instruction};

/// Disassemble a single instruction to text.
///
/// Both operand bytes must be supplied; instructions that encode
/// fewer ignore the extras.
pub fn disassemble_instruction(opcode: u8, a: u8, b: u8) -> String {
    match decode(opcode, a, b) {
        Ok(decoded) => format_instruction(&decoded),
        Err(_) => format!("??? # {:08b}", opcode),
    }
}

/// Disassemble a program image.
pub fn disassemble(bytes: &[u8]) -> String {
    let mut output = String::new();
    output.push_str("# Octet disassembly\n");
    output.push_str("# -----------------\n\n");

    for (addr, line) in walk(bytes) {
        output.push_str(&format!("{:03}: {}\n", addr, line));
    }

    output
}

/// Walk an image by instruction widths, yielding one entry per
/// decoded instruction. Undecodable bytes consume a single address.
pub fn walk(bytes: &[u8]) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut addr = 0;

    while addr < bytes.len() {
        let opcode = bytes[addr];
        let a = bytes.get(addr + 1).copied().unwrap_or(0);
        let b = bytes.get(addr + 2).copied().unwrap_or(0);

        match decode(opcode, a, b) {
            Ok(instr) => {
                lines.push((addr, format_instruction(&instr)));
                addr += width(opcode) as usize;
            }
            Err(_) => {
                lines.push((addr, format!("??? # {:08b}", opcode)));
                addr += 1;
            }
        }
    }

    lines
}

/// Format a decoded instruction as assembly text.
fn format_instruction(instr: &Instruction) -> String {
    match *instr {
        Instruction::Ldi { reg, value } => format!("LDI R{},{}", reg, value),
        Instruction::Prn { reg } => format!("PRN R{}", reg),
        Instruction::Add { a, b } => format!("ADD R{},R{}", a, b),
        Instruction::Mul { a, b } => format!("MUL R{},R{}", a, b),
        Instruction::Cmp { a, b } => format!("CMP R{},R{}", a, b),
        Instruction::Push { reg } => format!("PUSH R{}", reg),
        Instruction::Pop { reg } => format!("POP R{}", reg),
        Instruction::Call { reg } => format!("CALL R{}", reg),
        Instruction::Ret => "RET".to_string(),
        Instruction::Jmp { reg } => format!("JMP R{}", reg),
        Instruction::Hlt => "HLT".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assembler::assemble;

    #[test]
    fn test_disassemble_hlt() {
        let result = disassemble_instruction(0b0000_0001, 0, 0);
        assert_eq!(result, "HLT");
    }

    #[test]
    fn test_disassemble_ldi() {
        let result = disassemble_instruction(0b1000_0010, 0, 8);
        assert_eq!(result, "LDI R0,8");
    }

    #[test]
    fn test_disassemble_unknown() {
        let result = disassemble_instruction(0b1111_1111, 0, 0);
        assert_eq!(result, "??? # 11111111");
    }

    #[test]
    fn test_walk_widths() {
        let bytes = assemble("LDI R0,8\nPRN R0\nHLT\n").unwrap();
        let lines = walk(&bytes);

        assert_eq!(
            lines,
            vec![
                (0, "LDI R0,8".to_string()),
                (3, "PRN R0".to_string()),
                (5, "HLT".to_string()),
            ]
        );
    }

    #[test]
    fn test_disassemble_inverts_assembler() {
        let source = "LDI R0,8\nLDI R1,9\nMUL R0,R1\nPRN R0\nHLT\n";
        let bytes = assemble(source).unwrap();
        let listing = disassemble(&bytes);

        for line in source.lines() {
            assert!(listing.contains(line), "missing {:?} in {:?}", line, listing);
        }
    }
}
