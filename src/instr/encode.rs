//! Instruction-word encoders
//!
//! Builders for every RV32IM instruction the decoder accepts. The
//! tests use these to assemble guest programs directly into simulated
//! memory. Register arguments are the 5-bit register indices;
//! immediates are signed and truncated to the width of their field.

use crate::utils::extract_field;

use super::opcodes::*;

/// Make an I-type instruction. Only produces a valid I-type
/// instruction if the arguments are in range.
pub fn itype(imm: i32, rs1: u8, funct3: u32, rd: u8, opcode: u32) -> u32 {
    (imm as u32) << 20 | u32::from(rs1) << 15 | funct3 << 12 | u32::from(rd) << 7 | opcode
}

/// Make a U- or J-type instruction (if you are making a J-type
/// instruction, make sure to construct the immediate field first
/// using jtype_imm_field)
pub fn ujtype(imm: u32, rd: u8, opcode: u32) -> u32 {
    imm << 12 | u32::from(rd) << 7 | opcode
}

/// Make an R- or S-type instruction. These instructions have the
/// same number of fields of the same size. The meaning of a and b is:
///
/// R-type: a = funct7, b = rd
/// S-type: a = imm[11:5], b = imm[4:0]
pub fn rstype(a: u32, rs2: u8, rs1: u8, funct3: u32, b: u32, opcode: u32) -> u32 {
    a << 25 | u32::from(rs2) << 20 | u32::from(rs1) << 15 | funct3 << 12 | b << 7 | opcode
}

/// Takes an immediate and shuffles it into the format required for
/// the 20-bit field of the U-type instruction (making it J-type)
pub fn jtype_imm_field(imm: i32) -> u32 {
    let imm = imm as u32;
    let imm20 = extract_field(imm, 20, 20);
    let imm19_12 = extract_field(imm, 19, 12);
    let imm11 = extract_field(imm, 11, 11);
    let imm10_1 = extract_field(imm, 10, 1);
    (imm20 << 19) | (imm10_1 << 9) | (imm11 << 8) | imm19_12
}

/// Returns (a, b) suitable for use with rstype for the conditional
/// branch instructions (B-type)
pub fn btype_imm_fields(imm: i32) -> (u32, u32) {
    let imm = imm as u32;
    let imm12 = extract_field(imm, 12, 12);
    let imm11 = extract_field(imm, 11, 11);
    let imm10_5 = extract_field(imm, 10, 5);
    let imm4_1 = extract_field(imm, 4, 1);
    let a = (imm12 << 6) | imm10_5;
    let b = (imm4_1 << 1) | imm11;
    (a, b)
}

fn btype(rs1: u8, rs2: u8, offset: i32, funct3: u32) -> u32 {
    let (a, b) = btype_imm_fields(offset);
    rstype(a, rs2, rs1, funct3, b, OP_BRANCH)
}

fn stype(src: u8, base: u8, offset: i32, funct3: u32) -> u32 {
    let imm = offset as u32;
    let imm11_5 = extract_field(imm, 11, 5);
    let imm4_0 = extract_field(imm, 4, 0);
    rstype(imm11_5, src, base, funct3, imm4_0, OP_STORE)
}

/// The shift-by-immediate instructions use I-type, but with the lower
/// 5 bits of the immediate field holding the shift amount (shamt) and
/// the upper 7 bits distinguishing arithmetical from logical right
/// shift
fn shift_imm(rd: u8, rs1: u8, shamt: u32, funct3: u32, upper: u32) -> u32 {
    let imm = (upper << 5) | extract_field(shamt, 4, 0);
    itype(imm as i32, rs1, funct3, rd, OP_IMM)
}

// In lui and auipc, the immediate is already the upper 20 bits that
// will be loaded; it will not be shifted up here.

pub fn lui(rd: u8, imm: u32) -> u32 {
    ujtype(imm, rd, OP_LUI)
}

pub fn auipc(rd: u8, imm: u32) -> u32 {
    ujtype(imm, rd, OP_AUIPC)
}

pub fn jal(rd: u8, offset: i32) -> u32 {
    ujtype(jtype_imm_field(offset), rd, OP_JAL)
}

pub fn jalr(rd: u8, rs1: u8, offset: i32) -> u32 {
    itype(offset, rs1, 0b000, rd, OP_JALR)
}

pub fn beq(rs1: u8, rs2: u8, offset: i32) -> u32 {
    btype(rs1, rs2, offset, FUNCT3_BEQ)
}

pub fn bne(rs1: u8, rs2: u8, offset: i32) -> u32 {
    btype(rs1, rs2, offset, FUNCT3_BNE)
}

pub fn blt(rs1: u8, rs2: u8, offset: i32) -> u32 {
    btype(rs1, rs2, offset, FUNCT3_BLT)
}

pub fn bge(rs1: u8, rs2: u8, offset: i32) -> u32 {
    btype(rs1, rs2, offset, FUNCT3_BGE)
}

pub fn bltu(rs1: u8, rs2: u8, offset: i32) -> u32 {
    btype(rs1, rs2, offset, FUNCT3_BLTU)
}

pub fn bgeu(rs1: u8, rs2: u8, offset: i32) -> u32 {
    btype(rs1, rs2, offset, FUNCT3_BGEU)
}

pub fn lb(rd: u8, base: u8, offset: i32) -> u32 {
    itype(offset, base, FUNCT3_B, rd, OP_LOAD)
}

pub fn lh(rd: u8, base: u8, offset: i32) -> u32 {
    itype(offset, base, FUNCT3_H, rd, OP_LOAD)
}

pub fn lw(rd: u8, base: u8, offset: i32) -> u32 {
    itype(offset, base, FUNCT3_W, rd, OP_LOAD)
}

pub fn lbu(rd: u8, base: u8, offset: i32) -> u32 {
    itype(offset, base, FUNCT3_BU, rd, OP_LOAD)
}

pub fn lhu(rd: u8, base: u8, offset: i32) -> u32 {
    itype(offset, base, FUNCT3_HU, rd, OP_LOAD)
}

pub fn sb(src: u8, base: u8, offset: i32) -> u32 {
    stype(src, base, offset, FUNCT3_B)
}

pub fn sh(src: u8, base: u8, offset: i32) -> u32 {
    stype(src, base, offset, FUNCT3_H)
}

pub fn sw(src: u8, base: u8, offset: i32) -> u32 {
    stype(src, base, offset, FUNCT3_W)
}

pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(imm, rs1, FUNCT3_ADDI, rd, OP_IMM)
}

pub fn slti(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(imm, rs1, FUNCT3_SLTI, rd, OP_IMM)
}

pub fn sltiu(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(imm, rs1, FUNCT3_SLTIU, rd, OP_IMM)
}

pub fn xori(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(imm, rs1, FUNCT3_XORI, rd, OP_IMM)
}

pub fn ori(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(imm, rs1, FUNCT3_ORI, rd, OP_IMM)
}

pub fn andi(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(imm, rs1, FUNCT3_ANDI, rd, OP_IMM)
}

pub fn slli(rd: u8, rs1: u8, shamt: u32) -> u32 {
    shift_imm(rd, rs1, shamt, FUNCT3_SLLI, FUNCT7_BASE)
}

pub fn srli(rd: u8, rs1: u8, shamt: u32) -> u32 {
    shift_imm(rd, rs1, shamt, FUNCT3_SRLI, FUNCT7_BASE)
}

pub fn srai(rd: u8, rs1: u8, shamt: u32) -> u32 {
    shift_imm(rd, rs1, shamt, FUNCT3_SRAI, FUNCT7_SRA)
}

fn rtype(rd: u8, rs1: u8, rs2: u8, funct3: u32, funct7: u32) -> u32 {
    rstype(funct7, rs2, rs1, funct3, u32::from(rd), OP)
}

pub fn add(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_ADD, FUNCT7_BASE)
}

pub fn sub(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_SUB, FUNCT7_SUB)
}

pub fn sll(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_SLL, FUNCT7_BASE)
}

pub fn slt(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_SLT, FUNCT7_BASE)
}

pub fn sltu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_SLTU, FUNCT7_BASE)
}

pub fn xor(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_XOR, FUNCT7_BASE)
}

pub fn srl(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_SRL, FUNCT7_BASE)
}

pub fn sra(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_SRA, FUNCT7_SRA)
}

pub fn or(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_OR, FUNCT7_BASE)
}

pub fn and(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_AND, FUNCT7_BASE)
}

pub fn mul(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_MUL, FUNCT7_MULDIV)
}

pub fn mulh(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_MULH, FUNCT7_MULDIV)
}

pub fn mulhsu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_MULHSU, FUNCT7_MULDIV)
}

pub fn mulhu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_MULHU, FUNCT7_MULDIV)
}

pub fn div(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_DIV, FUNCT7_MULDIV)
}

pub fn divu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_DIVU, FUNCT7_MULDIV)
}

pub fn rem(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_REM, FUNCT7_MULDIV)
}

pub fn remu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    rtype(rd, rs1, rs2, FUNCT3_REMU, FUNCT7_MULDIV)
}

pub fn ecall() -> u32 {
    INSTR_ECALL
}
