//! Octet Emulator - CLI Entry Point
//!
//! The plain form runs a program image:
//! - `octet-emu <program>` - Run an image (or .asm source) until halt
//!
//! Subcommands:
//! - `octet-emu run <program>` - Same, with --max-cycles/--trace/--dump-state
//! - `octet-emu debug <program>` - Interactive debugger
//! - `octet-emu asm <source>` - Assemble to a program image
//! - `octet-emu disasm <image>` - Disassemble an image
//!
//! PRN output goes to stdout, one decimal value per line; trace and
//! diagnostics go to stderr. Exit codes: 1 for usage errors and fatal
//! runtime errors, 2 for a missing program file.

use clap::{Parser, Subcommand};
use clap::error::ErrorKind;

use octet::{Cpu, load_image, assemble};
use octet::asm::image::{self, ImageError};
use octet::cpu::{CpuError, DecodeError};

#[derive(Parser)]
#[command(name = "octet-emu")]
#[command(version = "0.1.0")]
#[command(about = "An emulator of the Octet, a minimal 8-bit educational computer")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Program image (or .asm source) to run
    program: Option<String>,

    /// Maximum number of cycles to run
    #[arg(short, long, default_value = "100000")]
    max_cycles: u64,

    /// Print a trace of each executed instruction to stderr
    #[arg(short, long)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the image or .asm file to execute
        program: String,
        /// Maximum number of cycles to run
        #[arg(short, long, default_value = "100000")]
        max_cycles: u64,
        /// Print a trace of each executed instruction to stderr
        #[arg(short, long)]
        trace: bool,
        /// Write the final machine state to a JSON file
        #[arg(long)]
        dump_state: Option<String>,
    },
    /// Interactive debugger
    Debug {
        /// Path to the image or .asm file to debug
        program: String,
    },
    /// Assemble source to a program image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble an image to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
}

fn main() {
    // clap exits with 2 on its own; the usage-error contract here is
    // exit 1, so parse failures are mapped by hand.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace, dump_state }) => {
            run_program(&program, max_cycles, trace, dump_state.as_deref());
        }
        Some(Commands::Debug { program }) => {
            debug_program(&program);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        None => match cli.program {
            Some(program) => run_program(&program, cli.max_cycles, cli.trace, None),
            None => {
                eprintln!("usage: octet-emu <program>");
                eprintln!("       octet-emu <COMMAND> (see --help)");
                std::process::exit(1);
            }
        },
    }
}

/// Load program bytes from an image file, assembling first if the
/// path points at assembly source.
fn load_program_bytes(path: &str) -> Vec<u8> {
    if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!("octet-emu: {}: not found", path);
                std::process::exit(2);
            }
            Err(e) => {
                eprintln!("octet-emu: failed to read {}: {}", path, e);
                std::process::exit(1);
            }
        };

        match assemble(&source) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("octet-emu: assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_image(path) {
            Ok(image) => image.bytes,
            Err(e @ ImageError::NotFound(_)) => {
                eprintln!("octet-emu: {}", e);
                std::process::exit(2);
            }
            Err(e) => {
                eprintln!("octet-emu: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_program(path: &str, max_cycles: u64, trace: bool, dump_state: Option<&str>) {
    let bytes = load_program_bytes(path);

    if bytes.is_empty() {
        eprintln!("octet-emu: no bytes to execute");
        std::process::exit(1);
    }

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_program(&bytes) {
        eprintln!("octet-emu: {}", e);
        std::process::exit(1);
    }

    let mut cycles = 0u64;
    while cpu.is_running() && cycles < max_cycles {
        if trace {
            eprintln!("{}", cpu.trace());
        }

        match cpu.step() {
            Ok(_) => {
                for value in cpu.take_output() {
                    println!("{}", value);
                }
                cycles += 1;
            }
            Err(CpuError::Decode(DecodeError::UnknownOpcode(opcode))) => {
                println!("Unknown Instruction {:08b}", opcode);
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("octet-emu: CPU error at PC={:02X}: {}", cpu.regs.pc, e);
                std::process::exit(1);
            }
        }
    }

    if trace {
        eprintln!();
        eprintln!("cycles: {}", cpu.cycles);
        eprintln!("state:  {:?}", cpu.state);
        eprintln!("{}", cpu.trace());
    }

    if cycles >= max_cycles && cpu.is_running() {
        eprintln!(
            "octet-emu: reached max cycles limit ({}). Use --max-cycles to raise it.",
            max_cycles
        );
    }

    if let Some(out_path) = dump_state {
        let json = match serde_json::to_string_pretty(&cpu) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("octet-emu: failed to serialize state: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = std::fs::write(out_path, json) {
            eprintln!("octet-emu: failed to write {}: {}", out_path, e);
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str) {
    use octet::run_debugger;

    let bytes = load_program_bytes(path);

    if bytes.is_empty() {
        eprintln!("octet-emu: no bytes to execute");
        std::process::exit(1);
    }

    if let Err(e) = run_debugger(bytes) {
        eprintln!("octet-emu: debugger error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str) {
    eprintln!("octet-emu: built without the `tui` feature");
    std::process::exit(1);
}

fn assemble_file(source_path: &str, output: Option<String>) {
    let out_path = output.unwrap_or_else(|| {
        source_path.replace(".asm", ".oct")
    });

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("octet-emu: failed to read {}: {}", source_path, e);
            std::process::exit(1);
        }
    };

    let bytes = match assemble(&source) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("octet-emu: assembly error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = image::save_bytes(&out_path, &bytes) {
        eprintln!("octet-emu: failed to save {}: {}", out_path, e);
        std::process::exit(1);
    }

    println!("Assembled {} bytes: {} -> {}", bytes.len(), source_path, out_path);
}

fn disassemble_file(image_path: &str) {
    let bytes = load_program_bytes(image_path);
    print!("{}", octet::disassemble(&bytes));
}
