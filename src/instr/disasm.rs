//! Human-readable instruction rendering
//!
//! Produces the assembly text shown in disassembly listings and trace
//! lines: mnemonic, tab, ABI register names, decimal offsets for
//! register-relative addressing and hexadecimal absolute targets for
//! control flow. When the symbol table knows a function at a branch
//! or jump target, its name is appended.

use crate::elf_utils::SymbolTable;

use super::decode::{Branch, Instr, Load, RegImm, RegReg, Store};

/// ABI names of the integer registers, indexed by register number
pub const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

fn reg(n: u8) -> &'static str {
    ABI_NAMES[usize::from(n)]
}

impl Branch {
    fn mnemonic(&self) -> &'static str {
        match self {
            Branch::Beq => "beq",
            Branch::Bne => "bne",
            Branch::Blt => "blt",
            Branch::Bge => "bge",
            Branch::Bltu => "bltu",
            Branch::Bgeu => "bgeu",
        }
    }
}

impl Load {
    fn mnemonic(&self) -> &'static str {
        match self {
            Load::Lb => "lb",
            Load::Lh => "lh",
            Load::Lw => "lw",
            Load::Lbu => "lbu",
            Load::Lhu => "lhu",
        }
    }
}

impl Store {
    fn mnemonic(&self) -> &'static str {
        match self {
            Store::Sb => "sb",
            Store::Sh => "sh",
            Store::Sw => "sw",
        }
    }
}

impl RegImm {
    fn mnemonic(&self) -> &'static str {
        match self {
            RegImm::Addi => "addi",
            RegImm::Slti => "slti",
            RegImm::Sltiu => "sltiu",
            RegImm::Xori => "xori",
            RegImm::Ori => "ori",
            RegImm::Andi => "andi",
            RegImm::Slli => "slli",
            RegImm::Srli => "srli",
            RegImm::Srai => "srai",
        }
    }
}

impl RegReg {
    fn mnemonic(&self) -> &'static str {
        match self {
            RegReg::Add => "add",
            RegReg::Sub => "sub",
            RegReg::Sll => "sll",
            RegReg::Slt => "slt",
            RegReg::Sltu => "sltu",
            RegReg::Xor => "xor",
            RegReg::Srl => "srl",
            RegReg::Sra => "sra",
            RegReg::Or => "or",
            RegReg::And => "and",
            RegReg::Mul => "mul",
            RegReg::Mulh => "mulh",
            RegReg::Mulhsu => "mulhsu",
            RegReg::Mulhu => "mulhu",
            RegReg::Div => "div",
            RegReg::Divu => "divu",
            RegReg::Rem => "rem",
            RegReg::Remu => "remu",
        }
    }
}

fn target_label(target: u32, symbols: &SymbolTable) -> String {
    match symbols.lookup(target) {
        Some(name) => format!(" <{name}>"),
        None => String::new(),
    }
}

/// Render the instruction word at addr as assembly text. Words that
/// do not decode render as "unknown".
pub fn disassemble(addr: u32, word: u32, symbols: &SymbolTable) -> String {
    let Ok(instr) = Instr::decode(word) else {
        return "unknown".to_string();
    };
    match instr {
        Instr::Lui { dest, u_immediate } => {
            format!("lui\t{},0x{:x}", reg(dest), u_immediate)
        }
        Instr::Auipc { dest, u_immediate } => {
            format!("auipc\t{},0x{:x}", reg(dest), u_immediate)
        }
        Instr::Jal { dest, offset } => {
            let target = addr.wrapping_add(offset as u32);
            format!(
                "jal\t{},{:x}{}",
                reg(dest),
                target,
                target_label(target, symbols)
            )
        }
        Instr::Jalr { dest, base, offset } => {
            format!("jalr\t{},{}({})", reg(dest), offset, reg(base))
        }
        Instr::Branch {
            mnemonic,
            src1,
            src2,
            offset,
        } => {
            let target = addr.wrapping_add(offset as u32);
            format!(
                "{}\t{},{},{:x}{}",
                mnemonic.mnemonic(),
                reg(src1),
                reg(src2),
                target,
                target_label(target, symbols)
            )
        }
        Instr::Load {
            mnemonic,
            dest,
            base,
            offset,
        } => {
            format!("{}\t{},{}({})", mnemonic.mnemonic(), reg(dest), offset, reg(base))
        }
        Instr::Store {
            mnemonic,
            src,
            base,
            offset,
        } => {
            format!("{}\t{},{}({})", mnemonic.mnemonic(), reg(src), offset, reg(base))
        }
        Instr::RegImm {
            mnemonic,
            dest,
            src,
            immediate,
        } => {
            format!(
                "{}\t{},{},{}",
                mnemonic.mnemonic(),
                reg(dest),
                reg(src),
                immediate
            )
        }
        Instr::RegReg {
            mnemonic,
            dest,
            src1,
            src2,
        } => {
            format!(
                "{}\t{},{},{}",
                mnemonic.mnemonic(),
                reg(dest),
                reg(src1),
                reg(src2)
            )
        }
        Instr::Ecall => "ecall".to_string(),
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::instr::encode;

    fn no_symbols() -> SymbolTable {
        SymbolTable::default()
    }

    #[test]
    fn check_reg_reg_rendering() {
        assert_eq!(
            disassemble(0, encode::add(10, 11, 12), &no_symbols()),
            "add\ta0,a1,a2"
        );
        assert_eq!(
            disassemble(0, encode::remu(5, 6, 7), &no_symbols()),
            "remu\tt0,t1,t2"
        );
    }

    #[test]
    fn check_reg_imm_rendering() {
        assert_eq!(
            disassemble(0, encode::addi(1, 0, -5), &no_symbols()),
            "addi\tra,zero,-5"
        );
        assert_eq!(
            disassemble(0, encode::srai(1, 2, 3), &no_symbols()),
            "srai\tra,sp,3"
        );
    }

    #[test]
    fn check_load_store_rendering() {
        assert_eq!(
            disassemble(0, encode::lw(10, 2, 4), &no_symbols()),
            "lw\ta0,4(sp)"
        );
        assert_eq!(
            disassemble(0, encode::sb(10, 2, -1), &no_symbols()),
            "sb\ta0,-1(sp)"
        );
    }

    #[test]
    fn check_branch_renders_absolute_target() {
        // Branch at 0x1c, offset -8 -> target 0x14
        assert_eq!(
            disassemble(0x1c, encode::beq(1, 2, -8), &no_symbols()),
            "beq\tra,sp,14"
        );
    }

    #[test]
    fn check_jal_renders_absolute_target() {
        assert_eq!(
            disassemble(0x10, encode::jal(1, 16), &no_symbols()),
            "jal\tra,20"
        );
    }

    #[test]
    fn check_target_symbol_appended() {
        let mut symbols = SymbolTable::default();
        symbols.insert(0x14, "loop".to_string());
        assert_eq!(
            disassemble(0x1c, encode::beq(1, 2, -8), &symbols),
            "beq\tra,sp,14 <loop>"
        );
    }

    #[test]
    fn check_upper_immediate_rendering() {
        assert_eq!(
            disassemble(0, encode::lui(3, 0xabcde), &no_symbols()),
            "lui\tgp,0xabcde"
        );
        assert_eq!(
            disassemble(0, encode::auipc(3, 0x1), &no_symbols()),
            "auipc\tgp,0x1"
        );
    }

    #[test]
    fn check_unknown_word() {
        assert_eq!(disassemble(0, 0xffff_ffff, &no_symbols()), "unknown");
        assert_eq!(disassemble(0, 0, &no_symbols()), "unknown");
    }

    #[test]
    fn check_ecall_rendering() {
        assert_eq!(disassemble(0, encode::ecall(), &no_symbols()), "ecall");
    }
}
