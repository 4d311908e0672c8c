use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::error::ErrorKind;
use clap::Parser;
use clap_num::maybe_hex;

use rvsim::elf_utils::{load_elf, read_symbols, SymbolTable};
use rvsim::hart::memory::{Memory, Wordsize};
use rvsim::hart::Hart;
use rvsim::instr::disasm::disassemble;
use rvsim::predictor::{BranchPredictor, PredictorKind};
use rvsim::sim::{run, HostIo, INSTRUCTION_LIMIT};

/// Where the guest's argc/argv block is marshalled
const GUEST_ARGS_ADDR: u32 = 0x0100_0000;

/// Simulate a 32-bit RISC-V (RV32IM) executable
///
/// Interprets the program one instruction at a time until it exits
/// through ecall, hits an instruction that does not decode, or
/// reaches the instruction ceiling. Optionally collects branch
/// misprediction statistics against the recorded execution.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the RISC-V ELF executable
    elf: String,

    /// Disassemble the text segment to stdout and exit
    #[arg(short, long)]
    disassemble: bool,

    /// Simulate and log each instruction to this file
    #[arg(short, long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Simulate and write only the summary line to this file
    #[arg(short, long, value_name = "FILE")]
    summary: Option<PathBuf>,

    /// Enable a branch predictor: NT, BTFNT, bimodal-256, bimodal-1K,
    /// bimodal-4K, bimodal-16K, gshare-256, gshare-1K, gshare-4K,
    /// gshare-16K
    #[arg(short, long, value_name = "TYPE")]
    predictor: Option<PredictorKind>,

    /// Override the runaway instruction ceiling (use 0x prefix for
    /// hexadecimal)
    #[arg(long, value_name = "N", value_parser = maybe_hex::<u64>,
          default_value_t = INSTRUCTION_LIMIT)]
    max_insns: u64,

    /// Arguments passed to the simulated program through its argv
    /// (argv[0] is the literal "--")
    #[arg(last = true)]
    guest_args: Vec<String>,
}

fn terminate(error: &str) -> ! {
    println!("{error}");
    std::process::exit(-1);
}

/// Place the guest program's arguments in simulated memory: a word
/// holding argc, then the argv pointer array, then the NUL-terminated
/// strings themselves
fn pass_args_to_program(memory: &mut Memory, argv: &[String]) {
    let count_addr = GUEST_ARGS_ADDR;
    let argv_addr = count_addr + 4;
    let mut str_addr = argv_addr + 4 * argv.len() as u32;
    memory.write(count_addr, argv.len() as u32, Wordsize::Word);
    for (index, arg) in argv.iter().enumerate() {
        memory.write(argv_addr + 4 * index as u32, str_addr, Wordsize::Word);
        for byte in arg.bytes() {
            memory.write(str_addr, byte.into(), Wordsize::Byte);
            str_addr += 1;
        }
        memory.write(str_addr, 0, Wordsize::Byte);
        str_addr += 1;
    }
}

/// Print the disassembly of the text segment
fn disassemble_to_stdout(memory: &Memory, text_start: u32, text_end: u32, symbols: &SymbolTable) {
    for addr in (text_start..text_end).step_by(4) {
        let word = memory.read(addr, Wordsize::Word);
        println!("{addr:8x} : {word:08X}       {}", disassemble(addr, word, symbols));
    }
}

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => terminate(&e.to_string()),
    };

    let mut hart = Hart::default();

    // The guest sees its arguments only when the separator was given
    // on the command line; argv[0] is the separator itself
    if std::env::args().any(|arg| arg == "--") {
        let mut argv = vec!["--".to_string()];
        argv.extend(args.guest_args.iter().cloned());
        pass_args_to_program(&mut hart.memory, &argv);
    }

    let info = match load_elf(&mut hart.memory, &args.elf) {
        Ok(info) => info,
        Err(e) => terminate(&format!("Could not load {}: {e}", args.elf)),
    };
    // Symbols only make the disassembly nicer; missing ones are fine
    let symbols = read_symbols(&args.elf).unwrap_or_default();

    if args.disassemble {
        disassemble_to_stdout(&hart.memory, info.text_start, info.text_end, &symbols);
        return;
    }

    let mut log_file = match &args.log {
        Some(path) => match File::create(path) {
            Ok(file) => Some(LineWriter::new(file)),
            Err(_) => terminate("Could not open logfile, terminating."),
        },
        None => None,
    };

    let mut predictor = args.predictor.map(BranchPredictor::new);

    hart.pc = info.entry;
    let mut io = HostIo;

    let before = Instant::now();
    let stats = run(
        &mut hart,
        &mut io,
        &symbols,
        predictor.as_mut(),
        log_file.as_mut().map(|file| file as &mut dyn Write),
        args.max_insns,
    );
    let elapsed = before.elapsed();

    let ticks = elapsed.as_micros();
    let mips = if ticks > 0 {
        stats.insns as f64 / elapsed.as_secs_f64() / 1_000_000.0
    } else {
        0.0
    };
    let summary = format!(
        "Simulated {} instructions in {} host ticks ({:.6} MIPS)",
        stats.insns, ticks, mips
    );

    if let Some(log_file) = log_file.as_mut() {
        let _ = writeln!(log_file, "\n{summary}");
    } else if let Some(path) = &args.summary {
        match File::create(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{summary}");
            }
            Err(_) => terminate("Could not open summary file, terminating."),
        }
    } else {
        println!("\n{summary}");
    }

    if let Some(predictor) = &predictor {
        println!();
        println!("{}", predictor.report());
        println!();
    }
}
