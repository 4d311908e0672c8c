//! Instruction decoding
//!
//! This is where a u32 instruction word is converted into the Instr
//! enum, which holds the instruction fields in a more easily
//! accessible format ready for execution.
//!
//! Only RV32IM and the ecall encoding are recognised. Anything else
//! (including fence, ebreak and the CSR instructions) decodes to an
//! error, which the simulator treats as a terminal condition.

use thiserror::Error;

use super::fields::*;
use super::opcodes::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("got invalid or unimplemented opcode 0x{0:x}")]
    InvalidOpcode(u32),
    #[error("got invalid or unimplemented instruction 0x{0:x}")]
    InvalidInstruction(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Branch {
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Load {
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Store {
    Sb,
    Sh,
    Sw,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegImm {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
}

/// Register-register operations, including the M extension
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegReg {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

/// A decoded RV32IM instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    Lui {
        dest: u8,
        u_immediate: u32,
    },
    Auipc {
        dest: u8,
        u_immediate: u32,
    },
    Jal {
        dest: u8,
        offset: i32,
    },
    Jalr {
        dest: u8,
        base: u8,
        offset: i32,
    },
    Branch {
        mnemonic: Branch,
        src1: u8,
        src2: u8,
        offset: i32,
    },
    Load {
        mnemonic: Load,
        dest: u8,
        base: u8,
        offset: i32,
    },
    Store {
        mnemonic: Store,
        src: u8,
        base: u8,
        offset: i32,
    },
    RegImm {
        mnemonic: RegImm,
        dest: u8,
        src: u8,
        immediate: i32,
    },
    RegReg {
        mnemonic: RegReg,
        dest: u8,
        src1: u8,
        src2: u8,
    },
    Ecall,
}

fn decode_branch(instr: u32) -> Result<Instr, DecodeError> {
    let mnemonic = match funct3(instr) {
        FUNCT3_BEQ => Branch::Beq,
        FUNCT3_BNE => Branch::Bne,
        FUNCT3_BLT => Branch::Blt,
        FUNCT3_BGE => Branch::Bge,
        FUNCT3_BLTU => Branch::Bltu,
        FUNCT3_BGEU => Branch::Bgeu,
        _ => return Err(DecodeError::InvalidInstruction(instr)),
    };
    Ok(Instr::Branch {
        mnemonic,
        src1: rs1(instr),
        src2: rs2(instr),
        offset: imm_btype(instr),
    })
}

fn decode_load(instr: u32) -> Result<Instr, DecodeError> {
    let mnemonic = match funct3(instr) {
        FUNCT3_B => Load::Lb,
        FUNCT3_H => Load::Lh,
        FUNCT3_W => Load::Lw,
        FUNCT3_BU => Load::Lbu,
        FUNCT3_HU => Load::Lhu,
        _ => return Err(DecodeError::InvalidInstruction(instr)),
    };
    Ok(Instr::Load {
        mnemonic,
        dest: rd(instr),
        base: rs1(instr),
        offset: imm_itype(instr),
    })
}

fn decode_store(instr: u32) -> Result<Instr, DecodeError> {
    let mnemonic = match funct3(instr) {
        FUNCT3_B => Store::Sb,
        FUNCT3_H => Store::Sh,
        FUNCT3_W => Store::Sw,
        _ => return Err(DecodeError::InvalidInstruction(instr)),
    };
    Ok(Instr::Store {
        mnemonic,
        src: rs2(instr),
        base: rs1(instr),
        offset: imm_stype(instr),
    })
}

fn decode_reg_imm(instr: u32) -> Result<Instr, DecodeError> {
    // The shift instructions keep the shift amount in the rs2 slot
    // and distinguish logical/arithmetic via bit 30 (funct7)
    let (mnemonic, immediate) = match funct3(instr) {
        FUNCT3_ADDI => (RegImm::Addi, imm_itype(instr)),
        FUNCT3_SLTI => (RegImm::Slti, imm_itype(instr)),
        FUNCT3_SLTIU => (RegImm::Sltiu, imm_itype(instr)),
        FUNCT3_XORI => (RegImm::Xori, imm_itype(instr)),
        FUNCT3_ORI => (RegImm::Ori, imm_itype(instr)),
        FUNCT3_ANDI => (RegImm::Andi, imm_itype(instr)),
        FUNCT3_SLLI => match funct7(instr) {
            FUNCT7_BASE => (RegImm::Slli, i32::from(rs2(instr))),
            _ => return Err(DecodeError::InvalidInstruction(instr)),
        },
        FUNCT3_SRLI => match funct7(instr) {
            FUNCT7_BASE => (RegImm::Srli, i32::from(rs2(instr))),
            FUNCT7_SRA => (RegImm::Srai, i32::from(rs2(instr))),
            _ => return Err(DecodeError::InvalidInstruction(instr)),
        },
        _ => return Err(DecodeError::InvalidInstruction(instr)),
    };
    Ok(Instr::RegImm {
        mnemonic,
        dest: rd(instr),
        src: rs1(instr),
        immediate,
    })
}

fn decode_reg_reg(instr: u32) -> Result<Instr, DecodeError> {
    let mnemonic = match (funct7(instr), funct3(instr)) {
        (FUNCT7_BASE, FUNCT3_ADD) => RegReg::Add,
        (FUNCT7_BASE, FUNCT3_SLL) => RegReg::Sll,
        (FUNCT7_BASE, FUNCT3_SLT) => RegReg::Slt,
        (FUNCT7_BASE, FUNCT3_SLTU) => RegReg::Sltu,
        (FUNCT7_BASE, FUNCT3_XOR) => RegReg::Xor,
        (FUNCT7_BASE, FUNCT3_SRL) => RegReg::Srl,
        (FUNCT7_BASE, FUNCT3_OR) => RegReg::Or,
        (FUNCT7_BASE, FUNCT3_AND) => RegReg::And,
        (FUNCT7_SUB, FUNCT3_SUB) => RegReg::Sub,
        (FUNCT7_SRA, FUNCT3_SRA) => RegReg::Sra,
        (FUNCT7_MULDIV, FUNCT3_MUL) => RegReg::Mul,
        (FUNCT7_MULDIV, FUNCT3_MULH) => RegReg::Mulh,
        (FUNCT7_MULDIV, FUNCT3_MULHSU) => RegReg::Mulhsu,
        (FUNCT7_MULDIV, FUNCT3_MULHU) => RegReg::Mulhu,
        (FUNCT7_MULDIV, FUNCT3_DIV) => RegReg::Div,
        (FUNCT7_MULDIV, FUNCT3_DIVU) => RegReg::Divu,
        (FUNCT7_MULDIV, FUNCT3_REM) => RegReg::Rem,
        (FUNCT7_MULDIV, FUNCT3_REMU) => RegReg::Remu,
        _ => return Err(DecodeError::InvalidInstruction(instr)),
    };
    Ok(Instr::RegReg {
        mnemonic,
        dest: rd(instr),
        src1: rs1(instr),
        src2: rs2(instr),
    })
}

impl Instr {
    pub fn decode(instr: u32) -> Result<Self, DecodeError> {
        match opcode(instr) {
            OP_LUI => Ok(Self::Lui {
                dest: rd(instr),
                u_immediate: imm_utype(instr),
            }),
            OP_AUIPC => Ok(Self::Auipc {
                dest: rd(instr),
                u_immediate: imm_utype(instr),
            }),
            OP_JAL => Ok(Self::Jal {
                dest: rd(instr),
                offset: imm_jtype(instr),
            }),
            OP_JALR => {
                if funct3(instr) != 0 {
                    return Err(DecodeError::InvalidInstruction(instr));
                }
                Ok(Self::Jalr {
                    dest: rd(instr),
                    base: rs1(instr),
                    offset: imm_itype(instr),
                })
            }
            OP_BRANCH => decode_branch(instr),
            OP_LOAD => decode_load(instr),
            OP_STORE => decode_store(instr),
            OP_IMM => decode_reg_imm(instr),
            OP => decode_reg_reg(instr),
            OP_SYSTEM => {
                if instr == INSTR_ECALL {
                    Ok(Self::Ecall)
                } else {
                    Err(DecodeError::InvalidInstruction(instr))
                }
            }
            op => Err(DecodeError::InvalidOpcode(op)),
        }
    }
}
