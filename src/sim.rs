//! The simulation driver
//!
//! Owns the fetch/decode/execute loop: per step it fetches the word
//! at pc, decodes it, dispatches to the executor, feeds retired
//! conditional branches to the predictor, and renders one trace line
//! from the recorded side effects. The loop ends on the exit system
//! call, an instruction that does not decode, an unknown system call,
//! or the runaway instruction ceiling.

use std::collections::VecDeque;
use std::io::{Read, Write};

use itertools::Itertools;
use log::error;
use queues::{IsQueue, Queue};

use crate::elf_utils::SymbolTable;
use crate::hart::{Hart, StepEffects};
use crate::instr::decode::Instr;
use crate::instr::disasm::disassemble;
use crate::predictor::BranchPredictor;

/// Runaway guard: a run never retires more instructions than this
/// unless the limit is overridden on the command line
pub const INSTRUCTION_LIMIT: u64 = 100_000_000;

/// Host services available to the guest through ecall
pub trait GuestIo {
    /// Read one byte from the guest's input; -1 on end of input
    fn getchar(&mut self) -> i32;
    /// Write one byte to the guest's output
    fn putchar(&mut self, byte: u8);
}

/// Pass-through to the process stdin/stdout. Output is flushed after
/// every byte, per the ecall contract; write failures are not
/// propagated.
#[derive(Debug, Default)]
pub struct HostIo;

impl GuestIo for HostIo {
    fn getchar(&mut self) -> i32 {
        let mut buf = [0u8; 1];
        match std::io::stdin().read(&mut buf) {
            Ok(1) => i32::from(buf[0]),
            _ => -1,
        }
    }

    fn putchar(&mut self, byte: u8) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(&[byte]);
        let _ = stdout.flush();
    }
}

/// Captive guest console: a preset input string and a buffered output
/// that the embedder drains with take_output()
pub struct CapturedIo {
    input: VecDeque<u8>,
    output: Queue<char>,
}

impl CapturedIo {
    pub fn new() -> Self {
        Self::with_input("")
    }

    pub fn with_input(input: &str) -> Self {
        Self {
            input: input.bytes().collect(),
            output: Queue::new(),
        }
    }

    /// Return the buffered output so far and clear the buffer
    pub fn take_output(&mut self) -> String {
        let mut output = String::new();
        while let Ok(ch) = self.output.remove() {
            output.push(ch);
        }
        output
    }
}

impl Default for CapturedIo {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestIo for CapturedIo {
    fn getchar(&mut self) -> i32 {
        match self.input.pop_front() {
            Some(byte) => i32::from(byte),
            None => -1,
        }
    }

    fn putchar(&mut self, byte: u8) {
        self.output
            .add(byte as char)
            .expect("insert into queue should work");
    }
}

/// Why the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The guest requested termination via ecall 3 or 93
    GuestExit,
    /// The guest issued an ecall with an unrecognised number
    UnknownSyscall(i32),
    /// The fetched word did not decode
    UnknownInstruction { pc: u32, word: u32 },
    /// The instruction ceiling was hit
    InstructionLimit,
}

/// Result of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Retired instruction count
    pub insns: u64,
    pub exit: ExitReason,
}

enum EcallOutcome {
    Handled,
    Exit,
    Unknown(i32),
}

/// Dispatch on the system-call number in x17 (a7)
fn handle_ecall(hart: &mut Hart, io: &mut dyn GuestIo) -> EcallOutcome {
    let syscall = hart.registers.read(17) as i32;
    match syscall {
        1 => {
            let c = io.getchar();
            hart.registers.write(10, c as u32);
            EcallOutcome::Handled
        }
        2 => {
            io.putchar(hart.registers.read(10) as u8);
            EcallOutcome::Handled
        }
        3 | 93 => EcallOutcome::Exit,
        other => EcallOutcome::Unknown(other),
    }
}

/// One line of the instruction trace
#[derive(Debug)]
pub struct StepRecord<'a> {
    /// Retired-instruction ordinal (1-based)
    pub ordinal: u64,
    /// True when this pc is the target of the most recent taken
    /// branch or jump
    pub at_jump_target: bool,
    pub pc: u32,
    pub word: u32,
    pub disasm: &'a str,
    pub effects: &'a StepEffects,
}

/// Render one trace line: ordinal, arrival marker, pc, raw word,
/// disassembly, then the side-effect annotations in fixed order
pub fn render_step(record: &StepRecord) -> String {
    let marker = if record.at_jump_target { " =>" } else { "   " };
    let mut line = format!(
        "| {}{} | {:08x} : {:08x} | {:<20} |",
        record.ordinal, marker, record.pc, record.word, record.disasm
    );
    let mut annotations = Vec::new();
    if let Some((reg, value)) = record.effects.reg_write {
        annotations.push(format!("R[{reg:2}] <- {value:08x}"));
    }
    if let Some((addr, value)) = record.effects.mem_write {
        annotations.push(format!("M[{addr:08x}] <- {value:08x}"));
    }
    if let Some(branch) = record.effects.branch {
        annotations.push(format!("{{{}}}", if branch.taken { 'T' } else { 'N' }));
    }
    if !annotations.is_empty() {
        line.push(' ');
        line.push_str(&annotations.iter().join(" | "));
    }
    line
}

/// Trace writes are best-effort; a failed write is not retried
fn emit_step(trace: &mut Option<&mut dyn Write>, record: &StepRecord) {
    if let Some(out) = trace.as_deref_mut() {
        let _ = writeln!(out, "{}", render_step(record));
    }
}

/// Run the guest program on the hart until a terminal condition.
///
/// The memory must already hold the program image and pc the entry
/// address. The predictor, trace sink and symbols are optional; when
/// no trace sink is configured, disassembly is skipped entirely.
pub fn run(
    hart: &mut Hart,
    io: &mut dyn GuestIo,
    symbols: &SymbolTable,
    mut predictor: Option<&mut BranchPredictor>,
    mut trace: Option<&mut dyn Write>,
    limit: u64,
) -> RunStats {
    let mut insns: u64 = 0;
    let mut jump_target: u32 = 0;

    loop {
        let current_pc = hart.pc;
        let word = hart.fetch_current_instruction();
        let at_jump_target = current_pc == jump_target;

        insns += 1;

        let disasm = if trace.is_some() {
            disassemble(current_pc, word, symbols)
        } else {
            String::new()
        };

        let instr = match Instr::decode(word) {
            Ok(instr) => instr,
            Err(_) => {
                emit_step(
                    &mut trace,
                    &StepRecord {
                        ordinal: insns,
                        at_jump_target,
                        pc: current_pc,
                        word,
                        disasm: &disasm,
                        effects: &StepEffects::default(),
                    },
                );
                error!("Unknown instruction: 0x{word:08x} at PC=0x{current_pc:08x}");
                return RunStats {
                    insns,
                    exit: ExitReason::UnknownInstruction {
                        pc: current_pc,
                        word,
                    },
                };
            }
        };

        let effects = hart.execute(&instr);

        let ecall_exit = if let Instr::Ecall = instr {
            match handle_ecall(hart, io) {
                EcallOutcome::Handled => None,
                EcallOutcome::Exit => Some(ExitReason::GuestExit),
                EcallOutcome::Unknown(number) => Some(ExitReason::UnknownSyscall(number)),
            }
        } else {
            None
        };

        if let Some(result) = effects.branch {
            if let Some(predictor) = predictor.as_deref_mut() {
                predictor.update(current_pc, result.target, result.taken);
            }
        }
        if let Some(target) = effects.jump_target {
            jump_target = target;
        }

        emit_step(
            &mut trace,
            &StepRecord {
                ordinal: insns,
                at_jump_target,
                pc: current_pc,
                word,
                disasm: &disasm,
                effects: &effects,
            },
        );

        if let Some(exit) = ecall_exit {
            if let ExitReason::UnknownSyscall(number) = exit {
                error!("Unknown systemcall: {number}");
            }
            return RunStats { insns, exit };
        }

        if insns > limit {
            error!("Instruction limit reached");
            return RunStats {
                insns,
                exit: ExitReason::InstructionLimit,
            };
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::hart::memory::{Memory, Wordsize};
    use crate::instr::encode::*;
    use crate::predictor::PredictorKind;

    /// Place a program in memory word by word, starting at addr 0
    fn load_program(memory: &mut Memory, words: &[u32]) {
        for (n, word) in words.iter().enumerate() {
            memory.write(4 * n as u32, *word, Wordsize::Word);
        }
    }

    fn run_program(words: &[u32]) -> (Hart, RunStats) {
        let mut hart = Hart::default();
        load_program(&mut hart.memory, words);
        let mut io = CapturedIo::new();
        let stats = run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            None,
            INSTRUCTION_LIMIT,
        );
        (hart, stats)
    }

    /// Exit block: a7 = 93, ecall
    fn exit_sequence() -> Vec<u32> {
        vec![addi(17, 0, 93), ecall()]
    }

    #[test]
    fn check_add_program_terminates_after_four_instructions() {
        // addi x1, x0, 5; addi x2, x0, 7; add x3, x1, x2; ecall
        // with a7 already holding the exit number
        let program = vec![addi(1, 0, 5), addi(2, 0, 7), add(3, 1, 2), ecall()];
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        hart.registers.write(17, 93);
        let mut io = CapturedIo::new();
        let stats = run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            None,
            INSTRUCTION_LIMIT,
        );
        assert_eq!(stats.exit, ExitReason::GuestExit);
        assert_eq!(stats.insns, 4);
        assert_eq!(hart.registers.read(3), 12);
    }

    #[test]
    fn check_lui_addi_sign_extension_program() {
        let mut program = vec![lui(1, 0xabcde), addi(1, 1, -1)];
        program.extend(exit_sequence());
        let (hart, stats) = run_program(&program);
        assert_eq!(stats.exit, ExitReason::GuestExit);
        assert_eq!(hart.registers.read(1), 0xabcd_dfff);
    }

    #[test]
    fn check_load_sign_and_zero_extension_program() {
        // x2 points at a byte 0xff planted in memory
        let mut program = vec![
            addi(2, 0, 0x100),
            lb(1, 2, 0),
            lbu(3, 2, 0),
        ];
        program.extend(exit_sequence());
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        hart.memory.write(0x100, 0xff, Wordsize::Byte);
        let mut io = CapturedIo::new();
        let stats = run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            None,
            INSTRUCTION_LIMIT,
        );
        assert_eq!(stats.exit, ExitReason::GuestExit);
        assert_eq!(hart.registers.read(1), 0xffff_ffff);
        assert_eq!(hart.registers.read(3), 0x0000_00ff);
    }

    #[test]
    fn check_putchar_writes_one_byte() {
        // a0 = 'A', a7 = 2, ecall; then exit
        let program = vec![
            addi(10, 0, 65),
            addi(17, 0, 2),
            ecall(),
            addi(17, 0, 93),
            ecall(),
        ];
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        let mut io = CapturedIo::new();
        let stats = run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            None,
            INSTRUCTION_LIMIT,
        );
        assert_eq!(stats.exit, ExitReason::GuestExit);
        assert_eq!(io.take_output(), "A");
    }

    #[test]
    fn check_getchar_reads_input_and_eof() {
        // Read two characters; input holds only one, so the second
        // read returns -1
        let program = vec![
            addi(17, 0, 1),
            ecall(),
            add(5, 10, 0), // stash first read in t0
            ecall(),
            addi(17, 0, 93),
            ecall(),
        ];
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        let mut io = CapturedIo::with_input("Z");
        run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            None,
            INSTRUCTION_LIMIT,
        );
        assert_eq!(hart.registers.read(5), u32::from(b'Z'));
        assert_eq!(hart.registers.read(10), (-1i32) as u32);
    }

    #[test]
    fn check_unknown_syscall_terminates() {
        let program = vec![addi(17, 0, 4), ecall()];
        let (_, stats) = run_program(&program);
        assert_eq!(stats.exit, ExitReason::UnknownSyscall(4));
        assert_eq!(stats.insns, 2);
    }

    #[test]
    fn check_unknown_instruction_terminates() {
        let program = vec![addi(1, 0, 1), 0xffff_ffff];
        let (_, stats) = run_program(&program);
        assert_eq!(
            stats.exit,
            ExitReason::UnknownInstruction {
                pc: 4,
                word: 0xffff_ffff
            }
        );
        assert_eq!(stats.insns, 2);
    }

    #[test]
    fn check_instruction_limit_stops_runaway_loop() {
        // jal x0, 0 spins forever
        let program = vec![jal(0, 0)];
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        let mut io = CapturedIo::new();
        let stats = run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            None,
            1000,
        );
        assert_eq!(stats.exit, ExitReason::InstructionLimit);
        assert_eq!(stats.insns, 1001);
    }

    /// Countdown loop: x1 = n; loop { x1 -= 1 } while x1 != 0, then
    /// exit. The backward bne is taken n-1 times and falls through
    /// once.
    fn countdown_program(n: i32) -> Vec<u32> {
        let mut program = vec![
            addi(1, 0, n),
            addi(1, 1, -1),  // 0x04 <- loop top
            bne(1, 0, -4),   // 0x08, target 0x04
        ];
        program.extend(exit_sequence());
        program
    }

    fn run_with_predictor(words: &[u32], kind: PredictorKind) -> BranchPredictor {
        let mut hart = Hart::default();
        load_program(&mut hart.memory, words);
        let mut io = CapturedIo::new();
        let mut predictor = BranchPredictor::new(kind);
        run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            Some(&mut predictor),
            None,
            INSTRUCTION_LIMIT,
        );
        predictor
    }

    #[test]
    fn check_bimodal_loop_statistics() {
        // Eleven decrements: the branch is taken 10 times, then falls
        // through. The counter starts weakly taken, so only the final
        // fall-through mispredicts.
        let predictor = run_with_predictor(&countdown_program(11), PredictorKind::Bimodal256);
        let stats = predictor.report();
        assert_eq!(stats.total_branches, 11);
        assert_eq!(stats.mispredictions, 1);
    }

    #[test]
    fn check_nt_mispredicts_each_taken_branch() {
        let predictor = run_with_predictor(&countdown_program(11), PredictorKind::Nt);
        let stats = predictor.report();
        assert_eq!(stats.total_branches, 11);
        assert_eq!(stats.mispredictions, 10);
    }

    #[test]
    fn check_btfnt_mispredicts_only_the_fall_through() {
        let predictor = run_with_predictor(&countdown_program(11), PredictorKind::Btfnt);
        let stats = predictor.report();
        assert_eq!(stats.total_branches, 11);
        assert_eq!(stats.mispredictions, 1);
    }

    #[test]
    fn check_gshare_converges_on_countdown_loop() {
        let predictor = run_with_predictor(&countdown_program(11), PredictorKind::Gshare256);
        let stats = predictor.report();
        assert_eq!(stats.total_branches, 11);
        // The first few iterations walk fresh table slots as the
        // history fills; the weakly-taken initialisation still
        // predicts them correctly, so only the exit mispredicts.
        assert!(stats.mispredictions <= 2);
    }

    #[test]
    fn check_trace_lines_for_short_program() {
        let program = vec![
            addi(1, 0, 5),
            addi(17, 0, 93),
            ecall(),
        ];
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        let mut io = CapturedIo::new();
        let mut trace: Vec<u8> = Vec::new();
        run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            Some(&mut trace),
            INSTRUCTION_LIMIT,
        );
        let text = String::from_utf8(trace).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        // Entry at 0 is the initial jump target (both start at zero)
        assert_eq!(
            lines[0],
            "| 1 => | 00000000 : 00500093 | addi\tra,zero,5       | R[ 1] <- 00000005"
        );
        assert_eq!(
            lines[1],
            "| 2    | 00000004 : 05d00893 | addi\ta7,zero,93      | R[17] <- 0000005d"
        );
        assert_eq!(lines[2], "| 3    | 00000008 : 00000073 | ecall                |");
    }

    #[test]
    fn check_trace_branch_and_store_annotations() {
        let program = vec![
            addi(2, 0, 0x100), // x2 = 0x100
            addi(5, 0, 0x7f),  // x5 = 0x7f
            sb(5, 2, 0),       // M[100] <- 7f
            beq(0, 0, 8),      // taken, to 0x14
            0,                 // skipped
            addi(17, 0, 93),   // 0x14
            ecall(),
        ];
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        let mut io = CapturedIo::new();
        let mut trace: Vec<u8> = Vec::new();
        run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            Some(&mut trace),
            INSTRUCTION_LIMIT,
        );
        let text = String::from_utf8(trace).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[2].ends_with("| M[00000100] <- 0000007f"));
        assert!(lines[3].ends_with("| {T}"));
        // The instruction after the taken branch carries the arrival
        // marker
        assert!(lines[4].starts_with("| 5 => |"));
    }

    #[test]
    fn check_not_taken_branch_annotation() {
        let mut program = vec![
            addi(1, 0, 1),
            bne(1, 1, 8), // never taken
        ];
        program.extend(exit_sequence());
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        let mut io = CapturedIo::new();
        let mut trace: Vec<u8> = Vec::new();
        run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            Some(&mut trace),
            INSTRUCTION_LIMIT,
        );
        let text = String::from_utf8(trace).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].ends_with("| {N}"));
    }

    #[test]
    fn check_runs_are_deterministic() {
        let program = countdown_program(5);
        let mut traces = Vec::new();
        let mut counts = Vec::new();
        for _ in 0..2 {
            let mut hart = Hart::default();
            load_program(&mut hart.memory, &program);
            let mut io = CapturedIo::new();
            let mut trace: Vec<u8> = Vec::new();
            let stats = run(
                &mut hart,
                &mut io,
                &SymbolTable::default(),
                None,
                Some(&mut trace),
                INSTRUCTION_LIMIT,
            );
            traces.push(trace);
            counts.push(stats.insns);
        }
        assert_eq!(traces[0], traces[1]);
        assert_eq!(counts[0], counts[1]);
    }

    #[test]
    fn check_trace_written_through_a_file_sink() {
        use std::io::Seek;

        let program = countdown_program(3);
        let mut hart = Hart::default();
        load_program(&mut hart.memory, &program);
        let mut io = CapturedIo::new();
        let mut file = tempfile::tempfile().unwrap();
        run(
            &mut hart,
            &mut io,
            &SymbolTable::default(),
            None,
            Some(&mut file),
            INSTRUCTION_LIMIT,
        );
        file.rewind().unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert!(text.lines().count() > 3);
        assert!(text.contains("bne\tra,zero,4"));
    }
}
