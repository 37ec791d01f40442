//! Program assembler
//!
//! Turns an assembly listing into versioned program bytecode, and back.

use crate::contract::opcodes::{OpCode, TxnField, PROGRAM_VERSION};
use std::collections::HashMap;
use thiserror::Error;

/// Largest program the assembler will emit, version byte included
pub const MAX_PROGRAM_SIZE: usize = 8192;

/// Assembler errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblerError {
    #[error("line {0}: unknown instruction {1}")]
    UnknownInstruction(usize, String),
    #[error("line {0}: invalid argument: {1}")]
    InvalidArgument(usize, String),
    #[error("undefined label: {0}")]
    UndefinedLabel(String),
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("line {0}: invalid number: {1}")]
    InvalidNumber(usize, String),
    #[error("program is {0} bytes, limit is {max}", max = MAX_PROGRAM_SIZE)]
    ProgramTooLarge(usize),
}

/// Two-pass assembler for application programs
pub struct Assembler {
    /// Output bytecode
    code: Vec<u8>,
    /// Label positions
    labels: HashMap<String, u32>,
    /// Pending label references (position, label_name)
    label_refs: Vec<(usize, String)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            labels: HashMap::new(),
            label_refs: Vec::new(),
        }
    }

    /// Assemble a listing into bytecode
    pub fn assemble(&mut self, source: &str) -> Result<Vec<u8>, AssemblerError> {
        self.code.clear();
        self.labels.clear();
        self.label_refs.clear();
        self.code.push(PROGRAM_VERSION);

        // First pass: emit code, record labels and forward references
        for (index, line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(label) = line.strip_prefix(':') {
                let label = label.trim().to_string();
                if self.labels.insert(label.clone(), self.code.len() as u32).is_some() {
                    return Err(AssemblerError::DuplicateLabel(label));
                }
                continue;
            }

            self.assemble_instruction(line_no, line)?;

            if self.code.len() > MAX_PROGRAM_SIZE {
                return Err(AssemblerError::ProgramTooLarge(self.code.len()));
            }
        }

        // Second pass: resolve label references
        for (pos, label) in &self.label_refs {
            let addr = self
                .labels
                .get(label)
                .ok_or_else(|| AssemblerError::UndefinedLabel(label.clone()))?;
            self.code[*pos..*pos + 4].copy_from_slice(&addr.to_be_bytes());
        }

        Ok(std::mem::take(&mut self.code))
    }

    fn assemble_instruction(&mut self, line_no: usize, line: &str) -> Result<(), AssemblerError> {
        let (mnemonic, operand) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, Some(rest.trim())),
            None => (line, None),
        };

        let opcode = OpCode::from_mnemonic(mnemonic)
            .ok_or_else(|| AssemblerError::UnknownInstruction(line_no, mnemonic.to_uppercase()))?;
        self.code.push(opcode as u8);

        let require = |what: &str| {
            operand
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    AssemblerError::InvalidArgument(
                        line_no,
                        format!("{} requires {}", opcode.name(), what),
                    )
                })
        };

        match opcode {
            OpCode::Push => {
                let value = parse_number(line_no, require("a number")?)?;
                self.code.extend_from_slice(&value.to_be_bytes());
            }
            OpCode::PushBytes => {
                let bytes = parse_bytes(line_no, require("a byte string")?)?;
                let len = u16::try_from(bytes.len()).map_err(|_| {
                    AssemblerError::InvalidArgument(line_no, "byte string too long".to_string())
                })?;
                self.code.extend_from_slice(&len.to_be_bytes());
                self.code.extend_from_slice(&bytes);
            }
            OpCode::Jump | OpCode::JumpIf => {
                let label = require("a label")?;
                self.label_refs.push((self.code.len(), label.to_string()));
                self.code.extend_from_slice(&[0, 0, 0, 0]);
            }
            OpCode::Txn => {
                let name = require("a field name")?;
                let field = TxnField::from_name(name).ok_or_else(|| {
                    AssemblerError::InvalidArgument(line_no, format!("unknown field {}", name))
                })?;
                self.code.push(field as u8);
            }
            OpCode::TxnArg => {
                let raw = require("an index")?;
                let index = raw
                    .parse::<u8>()
                    .map_err(|_| AssemblerError::InvalidNumber(line_no, raw.to_string()))?;
                self.code.push(index);
            }
            _ => {
                if let Some(extra) = operand.filter(|s| !s.is_empty()) {
                    return Err(AssemblerError::InvalidArgument(
                        line_no,
                        format!("{} takes no operand, got {}", opcode.name(), extra),
                    ));
                }
            }
        }

        Ok(())
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a number (decimal or hex)
fn parse_number(line_no: usize, s: &str) -> Result<u64, AssemblerError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|_| AssemblerError::InvalidNumber(line_no, s.to_string()))
}

/// Parse a `0x`-prefixed hex string or a double-quoted string without escapes
fn parse_bytes(line_no: usize, s: &str) -> Result<Vec<u8>, AssemblerError> {
    if let Some(hex_digits) = s.strip_prefix("0x") {
        return hex::decode(hex_digits)
            .map_err(|_| AssemblerError::InvalidArgument(line_no, format!("bad hex {}", s)));
    }
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return Ok(s[1..s.len() - 1].as_bytes().to_vec());
    }
    Err(AssemblerError::InvalidArgument(
        line_no,
        format!("expected 0x-hex or quoted string, got {}", s),
    ))
}

/// Disassemble bytecode to a readable listing
pub fn disassemble(code: &[u8]) -> String {
    let mut output = String::new();
    let Some((&version, _)) = code.split_first() else {
        return output;
    };
    output.push_str(&format!("; version {}\n", version));

    let mut pc = 1;
    while pc < code.len() {
        let opcode_byte = code[pc];
        let Some(opcode) = OpCode::from_byte(opcode_byte) else {
            output.push_str(&format!("{:04x}: UNKNOWN 0x{:02x}\n", pc, opcode_byte));
            pc += 1;
            continue;
        };

        output.push_str(&format!("{:04x}: {}", pc, opcode.name()));
        pc += 1;

        match opcode {
            OpCode::Push if pc + 8 <= code.len() => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&code[pc..pc + 8]);
                output.push_str(&format!(" {}", u64::from_be_bytes(bytes)));
                pc += 8;
            }
            OpCode::PushBytes if pc + 2 <= code.len() => {
                let len = u16::from_be_bytes([code[pc], code[pc + 1]]) as usize;
                pc += 2;
                let end = (pc + len).min(code.len());
                output.push_str(&format!(" 0x{}", hex::encode(&code[pc..end])));
                pc = end;
            }
            OpCode::Jump | OpCode::JumpIf if pc + 4 <= code.len() => {
                let addr = u32::from_be_bytes([code[pc], code[pc + 1], code[pc + 2], code[pc + 3]]);
                output.push_str(&format!(" 0x{:04x}", addr));
                pc += 4;
            }
            OpCode::Txn if pc < code.len() => {
                match TxnField::from_byte(code[pc]) {
                    Some(field) => output.push_str(&format!(" {}", field.name())),
                    None => output.push_str(&format!(" ?{}", code[pc])),
                }
                pc += 1;
            }
            OpCode::TxnArg if pc < code.len() => {
                output.push_str(&format!(" {}", code[pc]));
                pc += 1;
            }
            _ => {}
        }

        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_simple() {
        let code = Assembler::new().assemble("PUSH 1\nRETURN\n").unwrap();
        assert_eq!(code[0], PROGRAM_VERSION);
        assert_eq!(code[1], OpCode::Push as u8);
        assert_eq!(&code[2..10], &1u64.to_be_bytes());
        assert_eq!(code[10], OpCode::Return as u8);
    }

    #[test]
    fn test_assemble_resolves_forward_labels() {
        let code = Assembler::new()
            .assemble(
                "
            PUSH 1
            JUMPI done
            ERR
            :done
            PUSH 1
            RETURN
        ",
            )
            .unwrap();

        // version(1) + PUSH(9) + JUMPI(5) + ERR(1) = 16
        assert_eq!(code[10], OpCode::JumpIf as u8);
        assert_eq!(&code[11..15], &16u32.to_be_bytes());
        assert_eq!(code[16], OpCode::Push as u8);
    }

    #[test]
    fn test_assemble_bytes_and_fields() {
        let code = Assembler::new()
            .assemble("PUSHB \"value\"\nTXNA 0\nAPPPUT\nTXN Sender\nPOP\n")
            .unwrap();
        assert_eq!(code[1], OpCode::PushBytes as u8);
        assert_eq!(&code[2..4], &5u16.to_be_bytes());
        assert_eq!(&code[4..9], b"value");
        assert_eq!(code[9], OpCode::TxnArg as u8);
        assert_eq!(code[10], 0);
        assert_eq!(code[11], OpCode::AppPut as u8);
        assert_eq!(code[12], OpCode::Txn as u8);
        assert_eq!(code[13], TxnField::Sender as u8);
    }

    #[test]
    fn test_assemble_errors() {
        let mut asm = Assembler::new();
        assert!(matches!(
            asm.assemble("FROB"),
            Err(AssemblerError::UnknownInstruction(1, _))
        ));
        assert!(matches!(
            asm.assemble("JUMP nowhere"),
            Err(AssemblerError::UndefinedLabel(_))
        ));
        assert!(matches!(
            asm.assemble(":a\n:a\n"),
            Err(AssemblerError::DuplicateLabel(_))
        ));
        assert!(matches!(
            asm.assemble("PUSH"),
            Err(AssemblerError::InvalidArgument(1, _))
        ));
        assert!(matches!(
            asm.assemble("ADD 3"),
            Err(AssemblerError::InvalidArgument(1, _))
        ));
        assert!(matches!(
            asm.assemble("TXN Balance"),
            Err(AssemblerError::InvalidArgument(1, _))
        ));
    }

    #[test]
    fn test_program_size_limit() {
        let listing = "PUSH 1\n".repeat(MAX_PROGRAM_SIZE / 9 + 1);
        assert!(matches!(
            Assembler::new().assemble(&listing),
            Err(AssemblerError::ProgramTooLarge(_))
        ));
    }

    #[test]
    fn test_disassemble() {
        let code = Assembler::new()
            .assemble("PUSHB 0x6869\nPUSH 42\nAPPPUT\nPUSH 1\nRETURN\n")
            .unwrap();

        let listing = disassemble(&code);
        assert!(listing.starts_with("; version 1"));
        assert!(listing.contains("PUSHB 0x6869"));
        assert!(listing.contains("PUSH 42"));
        assert!(listing.contains("APPPUT"));
        assert!(listing.contains("RETURN"));
    }
}
