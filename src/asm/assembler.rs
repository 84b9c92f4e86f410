//! Simple assembler for Octet programs.
//!
//! Syntax:
//! ```text
//! # Comment
//! LABEL:          # Define a label
//!     LDI R0,8    # Load immediate into a register
//!     LDI R1,SUB  # Labels are immediates (addresses go in registers)
//!     CALL R1     # Control transfers target a register
//!     MUL R0,R1
//!     PRN R0
//!     HLT
//!
//!     DAT 42      # Define a raw data byte
//! ```

use crate::cpu::decode::{Instruction, encode};
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to program bytes.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> address).
    symbols: HashMap<String, usize>,
    /// Pending references: (output byte index, label, source line).
    pending: Vec<(usize, String, usize)>,
    /// Output bytes.
    output: Vec<u8>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u8>, AssemblerError> {
        // Pass 1: collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve forward references
        self.resolve_references()?;

        Ok(self.output.clone())
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Strip comments, then whitespace
        let line = line.split('#').next().unwrap_or("").trim();

        if line.is_empty() {
            return Ok(());
        }

        // Check for label definition
        if let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim().to_uppercase();
            if !label.is_empty() {
                self.symbols.insert(label, self.output.len());
            }

            // Process rest of line if any
            let rest = line[colon_idx + 1..].trim();
            if !rest.is_empty() {
                return self.process_instruction(rest, line_num);
            }
            return Ok(());
        }

        self.process_instruction(line, line_num)
    }

    fn process_instruction(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let mut parts = line.split_whitespace();
        let mnemonic = match parts.next() {
            Some(m) => m.to_uppercase(),
            None => return Ok(()),
        };

        // Rejoin so "R0, 8" and "R0,8" parse the same
        let rest: String = parts.collect::<Vec<_>>().join("");
        let operands: Vec<&str> = rest.split(',').filter(|s| !s.is_empty()).collect();

        match mnemonic.as_str() {
            // Directives
            "DAT" | "DATA" => {
                self.expect_operands(&mnemonic, &operands, 1, line_num)?;
                let value = self.parse_value(operands[0], 0, line_num)?;
                self.output.push(value);
            }

            // Instructions
            _ => {
                let instr = self.parse_instruction(&mnemonic, &operands, line_num)?;
                self.output.extend(encode(&instr));
            }
        }

        Ok(())
    }

    fn parse_instruction(
        &mut self,
        mnemonic: &str,
        operands: &[&str],
        line_num: usize,
    ) -> Result<Instruction, AssemblerError> {
        let instr = match mnemonic {
            "LDI" => {
                self.expect_operands(mnemonic, operands, 2, line_num)?;
                let reg = self.parse_register(operands[0], line_num)?;
                // The immediate lands two bytes past the opcode
                let value = self.parse_value(operands[1], 2, line_num)?;
                Instruction::Ldi { reg, value }
            }

            "ADD" | "MUL" | "CMP" => {
                self.expect_operands(mnemonic, operands, 2, line_num)?;
                let a = self.parse_register(operands[0], line_num)?;
                let b = self.parse_register(operands[1], line_num)?;
                match mnemonic {
                    "ADD" => Instruction::Add { a, b },
                    "MUL" => Instruction::Mul { a, b },
                    _ => Instruction::Cmp { a, b },
                }
            }

            "PRN" | "PUSH" | "POP" | "CALL" | "JMP" => {
                self.expect_operands(mnemonic, operands, 1, line_num)?;
                let reg = self.parse_register(operands[0], line_num)?;
                match mnemonic {
                    "PRN" => Instruction::Prn { reg },
                    "PUSH" => Instruction::Push { reg },
                    "POP" => Instruction::Pop { reg },
                    "CALL" => Instruction::Call { reg },
                    _ => Instruction::Jmp { reg },
                }
            }

            "RET" => {
                self.expect_operands(mnemonic, operands, 0, line_num)?;
                Instruction::Ret
            }

            "HLT" | "HALT" => {
                self.expect_operands(mnemonic, operands, 0, line_num)?;
                Instruction::Hlt
            }

            _ => {
                return Err(AssemblerError::UnknownMnemonic {
                    line: line_num,
                    mnemonic: mnemonic.to_string(),
                })
            }
        };

        Ok(instr)
    }

    fn expect_operands(
        &self,
        mnemonic: &str,
        operands: &[&str],
        count: usize,
        line_num: usize,
    ) -> Result<(), AssemblerError> {
        if operands.len() != count {
            return Err(AssemblerError::Syntax {
                line: line_num,
                message: format!(
                    "{} takes {} operand(s), found {}",
                    mnemonic,
                    count,
                    operands.len()
                ),
            });
        }
        Ok(())
    }

    fn parse_register(&self, token: &str, line_num: usize) -> Result<u8, AssemblerError> {
        let digits = token
            .strip_prefix('R')
            .or_else(|| token.strip_prefix('r'));

        if let Some(Ok(index)) = digits.map(str::parse::<u8>) {
            if index < 8 {
                return Ok(index);
            }
        }

        Err(AssemblerError::Syntax {
            line: line_num,
            message: format!("expected register R0-R7, found {:?}", token),
        })
    }

    /// Parse an immediate value: decimal, `0x` hex, `0b` binary, or a
    /// label reference. Label references emit a placeholder and are
    /// patched in pass 2; `byte_offset` locates the placeholder byte
    /// relative to the current end of output.
    fn parse_value(
        &mut self,
        token: &str,
        byte_offset: usize,
        line_num: usize,
    ) -> Result<u8, AssemblerError> {
        let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()
        } else if let Some(bin) = token.strip_prefix("0b").or_else(|| token.strip_prefix("0B")) {
            i64::from_str_radix(bin, 2).ok()
        } else if token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            token.parse::<i64>().ok()
        } else {
            // A label reference: emit a placeholder for pass 2
            self.pending
                .push((self.output.len() + byte_offset, token.to_uppercase(), line_num));
            return Ok(0);
        };

        match parsed {
            Some(value @ 0..=255) => Ok(value as u8),
            Some(value) => Err(AssemblerError::ValueOutOfRange { line: line_num, value }),
            None => Err(AssemblerError::Syntax {
                line: line_num,
                message: format!("invalid value {:?}", token),
            }),
        }
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (byte_idx, label, line_num) in &self.pending {
            let addr = *self.symbols.get(label).ok_or_else(|| {
                AssemblerError::UndefinedLabel {
                    line: *line_num,
                    label: label.clone(),
                }
            })?;

            if addr > 255 {
                return Err(AssemblerError::ValueOutOfRange {
                    line: *line_num,
                    value: addr as i64,
                });
            }

            self.output[*byte_idx] = addr as u8;
        }
        Ok(())
    }
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            # Multiply and print
            LDI R0,8
            LDI R1,9
            MUL R0,R1
            PRN R0
            HLT
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(
            result,
            vec![
                0b10000010, 0, 8,
                0b10000010, 1, 9,
                0b10100010, 0, 1,
                0b01000111, 0,
                0b00000001,
            ]
        );
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
            LDI R1,SUB
            CALL R1
            HLT
        SUB:
            LDI R0,7
            RET
        "#;

        let result = assemble(source).unwrap();
        // The label lands after LDI (3) + CALL (2) + HLT (1).
        assert_eq!(result[2], 6);
        assert_eq!(result.len(), 10);
    }

    #[test]
    fn test_assemble_forward_and_backward_labels() {
        let source = r#"
        TOP:
            LDI R0,TOP
            LDI R1,END
            JMP R1
        END:
            HLT
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result[2], 0); // TOP
        assert_eq!(result[5], 8); // END: after two LDI + JMP
    }

    #[test]
    fn test_assemble_data() {
        let source = r#"
            DAT 42
            DAT 0x2A
            DAT 0b101010
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result, vec![42, 42, 42]);
    }

    #[test]
    fn test_assemble_case_and_spacing() {
        let result = assemble("ldi r0, 8\nhlt\n").unwrap();
        assert_eq!(result, vec![0b10000010, 0, 8, 0b00000001]);
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = assemble("FROB R0\n").unwrap_err();
        assert!(matches!(err, AssemblerError::UnknownMnemonic { line: 1, .. }));
    }

    #[test]
    fn test_undefined_label() {
        let err = assemble("LDI R0,NOWHERE\nHLT\n").unwrap_err();
        assert!(matches!(err, AssemblerError::UndefinedLabel { line: 1, .. }));
    }

    #[test]
    fn test_register_out_of_range() {
        let err = assemble("PRN R9\n").unwrap_err();
        assert!(matches!(err, AssemblerError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_value_out_of_range() {
        let err = assemble("LDI R0,300\n").unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::ValueOutOfRange { line: 1, value: 300 }
        ));
    }

    #[test]
    fn test_wrong_operand_count() {
        let err = assemble("LDI R0\n").unwrap_err();
        assert!(matches!(err, AssemblerError::Syntax { line: 1, .. }));
    }
}
