//! Text instruction decoding.
//!
//! Instructions are stored as text (`MOV AX,555`); decoding turns them into a
//! closed [`Instruction`] enum so execution is an exhaustive match.

use super::registers::Register;
use crate::interrupts::InterruptCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty instruction")]
    Empty,

    #[error("Unknown instruction: {0}")]
    UnknownMnemonic(String),

    #[error("Unknown register: {0}")]
    UnknownRegister(String),

    #[error("Invalid number: {0}")]
    InvalidImmediate(String),

    #[error("Unknown interrupt: {0}")]
    UnknownInterrupt(String),

    #[error("{mnemonic} expects {expected} operand(s), found {found}")]
    OperandCount {
        mnemonic: &'static str,
        expected: &'static str,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Immediate(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Mov(Register, Operand),
    Load(Register),
    Store(Register),
    Add(Register),
    Sub(Register),
    Inc(Option<Register>),
    Dec(Option<Register>),
    Swap(Register, Register),
    Cmp(Register, Register),
    Je(i32),
    Jne(i32),
    Jmp(i32),
    Push(Register),
    Pop(Register),
    Param(Vec<i32>),
    Int(InterruptCode),
}

fn register(operand: &str) -> Result<Register, DecodeError> {
    operand
        .parse()
        .map_err(|_| DecodeError::UnknownRegister(operand.to_string()))
}

fn immediate(operand: &str) -> Result<i32, DecodeError> {
    operand
        .parse()
        .map_err(|_| DecodeError::InvalidImmediate(operand.to_string()))
}

fn operand(operand: &str) -> Result<Operand, DecodeError> {
    match register(operand) {
        Ok(reg) => Ok(Operand::Register(reg)),
        Err(_) => immediate(operand)
            .map(Operand::Immediate)
            .map_err(|_| DecodeError::InvalidImmediate(operand.to_string())),
    }
}

fn expect<'a, const N: usize>(
    mnemonic: &'static str,
    operands: &[&'a str],
) -> Result<[&'a str; N], DecodeError> {
    operands.try_into().map_err(|_| DecodeError::OperandCount {
        mnemonic,
        expected: match N {
            0 => "0",
            1 => "1",
            2 => "2",
            _ => "3",
        },
        found: operands.len(),
    })
}

impl Instruction {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }

        let (mnemonic, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let operands: Vec<&str> = rest
            .split(',')
            .map(str::trim)
            .filter(|op| !op.is_empty())
            .collect();

        let instruction = match mnemonic.to_ascii_uppercase().as_str() {
            "MOV" => {
                let [dst, src] = expect::<2>("MOV", &operands)?;
                Self::Mov(register(dst)?, operand(src)?)
            }
            "LOAD" => Self::Load(register(expect::<1>("LOAD", &operands)?[0])?),
            "STORE" => Self::Store(register(expect::<1>("STORE", &operands)?[0])?),
            "ADD" => Self::Add(register(expect::<1>("ADD", &operands)?[0])?),
            "SUB" => Self::Sub(register(expect::<1>("SUB", &operands)?[0])?),
            "INC" | "DEC" => {
                let reg = match operands.as_slice() {
                    [] => None,
                    [reg] => Some(register(reg)?),
                    _ => {
                        return Err(DecodeError::OperandCount {
                            mnemonic: if mnemonic.eq_ignore_ascii_case("INC") { "INC" } else { "DEC" },
                            expected: "0 or 1",
                            found: operands.len(),
                        });
                    }
                };

                if mnemonic.eq_ignore_ascii_case("INC") {
                    Self::Inc(reg)
                } else {
                    Self::Dec(reg)
                }
            }
            "SWAP" => {
                let [a, b] = expect::<2>("SWAP", &operands)?;
                Self::Swap(register(a)?, register(b)?)
            }
            "CMP" => {
                let [a, b] = expect::<2>("CMP", &operands)?;
                Self::Cmp(register(a)?, register(b)?)
            }
            "JE" => Self::Je(immediate(expect::<1>("JE", &operands)?[0])?),
            "JNE" => Self::Jne(immediate(expect::<1>("JNE", &operands)?[0])?),
            "JMP" => Self::Jmp(immediate(expect::<1>("JMP", &operands)?[0])?),
            "PUSH" => Self::Push(register(expect::<1>("PUSH", &operands)?[0])?),
            "POP" => Self::Pop(register(expect::<1>("POP", &operands)?[0])?),
            "PARAM" => {
                if operands.is_empty() || operands.len() > 3 {
                    return Err(DecodeError::OperandCount {
                        mnemonic: "PARAM",
                        expected: "1 to 3",
                        found: operands.len(),
                    });
                }

                Self::Param(
                    operands
                        .iter()
                        .map(|op| immediate(op))
                        .collect::<Result<_, _>>()?,
                )
            }
            "INT" => {
                let [code] = expect::<1>("INT", &operands)?;
                Self::Int(
                    code.parse()
                        .map_err(|_| DecodeError::UnknownInterrupt(code.to_string()))?,
                )
            }
            _ => return Err(DecodeError::UnknownMnemonic(mnemonic.to_string())),
        };

        Ok(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(
            Instruction::decode("MOV AX,555"),
            Ok(Instruction::Mov(Register::AX, Operand::Immediate(555)))
        );
        assert_eq!(
            Instruction::decode("mov bx, ax"),
            Ok(Instruction::Mov(Register::BX, Operand::Register(Register::AX)))
        );
        assert_eq!(Instruction::decode("INC"), Ok(Instruction::Inc(None)));
        assert_eq!(
            Instruction::decode("DEC CX"),
            Ok(Instruction::Dec(Some(Register::CX)))
        );
        assert_eq!(Instruction::decode("JMP -1"), Ok(Instruction::Jmp(-1)));
        assert_eq!(
            Instruction::decode("PARAM 1, -2, 3"),
            Ok(Instruction::Param(vec![1, -2, 3]))
        );
        assert_eq!(
            Instruction::decode("INT _20H"),
            Ok(Instruction::Int(InterruptCode::Terminate))
        );
        assert_eq!(
            Instruction::decode("  SWAP AX , DX  "),
            Ok(Instruction::Swap(Register::AX, Register::DX))
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Instruction::decode("   "), Err(DecodeError::Empty));
        assert_eq!(
            Instruction::decode("NOP"),
            Err(DecodeError::UnknownMnemonic("NOP".to_string()))
        );
        assert_eq!(
            Instruction::decode("LOAD EX"),
            Err(DecodeError::UnknownRegister("EX".to_string()))
        );
        assert_eq!(
            Instruction::decode("JE x"),
            Err(DecodeError::InvalidImmediate("x".to_string()))
        );
        assert_eq!(
            Instruction::decode("INT _99H"),
            Err(DecodeError::UnknownInterrupt("_99H".to_string()))
        );
        assert!(matches!(
            Instruction::decode("MOV AX"),
            Err(DecodeError::OperandCount { found: 1, .. })
        ));
        assert!(matches!(
            Instruction::decode("PARAM 1,2,3,4"),
            Err(DecodeError::OperandCount { found: 4, .. })
        ));
        assert!(matches!(
            Instruction::decode("INC AX,BX"),
            Err(DecodeError::OperandCount { found: 2, .. })
        ));
    }
}
