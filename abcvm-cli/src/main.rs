use clap::{Parser, Subcommand, ValueEnum};
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use abcvm_interp::{
    Code, Interpreter, InterpreterConfig, LocalRuntime, ManagedThread, Method, MethodFlags, Outcome,
    RuntimeInterface, TryBlock, VRegister,
};
use abcvm_isa::{BytecodeCursor, EcmaOpcode, Opcode, PandaOpcode, SafeCursor};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(target_env = "msvc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "abcvm", about = "ArkCompiler bytecode disassembler and interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Isa {
    /// Dynamic instruction set
    Ecma,
    /// Static instruction set run by the interpreter
    Panda,
}

#[derive(Subcommand)]
enum Commands {
    /// Disassemble a raw instruction stream
    Disasm {
        /// Path to the bytecode file
        input: PathBuf,
        /// Instruction set to decode with
        #[arg(long, value_enum, default_value_t = Isa::Panda)]
        isa: Isa,
        /// Byte offset of the first instruction (decimal or 0x-prefixed)
        #[arg(short, long, value_parser = parse_number, default_value = "0")]
        offset: usize,
        /// Number of bytes to disassemble (default: to end of file)
        #[arg(short, long, value_parser = parse_number)]
        len: Option<usize>,
    },
    /// Parse a code item and list its instructions and try blocks
    Code {
        /// Path to the file holding the code item
        input: PathBuf,
        /// Byte offset of the code item (decimal or 0x-prefixed)
        #[arg(short, long, value_parser = parse_number, default_value = "0")]
        offset: usize,
    },
    /// Execute a code item as a static method
    Run {
        /// Path to the file holding the code item
        input: PathBuf,
        /// Byte offset of the code item (decimal or 0x-prefixed)
        #[arg(short, long, value_parser = parse_number, default_value = "0")]
        offset: usize,
        /// Interpreter configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Trace every instruction through the debug dispatch loop
        #[arg(short, long)]
        debug: bool,
        /// Integer argument, repeat for each declared argument
        #[arg(long = "arg", allow_negative_numbers = true)]
        args: Vec<i64>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Disasm {
            input,
            isa,
            offset,
            len,
        } => cmd_disasm(&input, isa, offset, len),
        Commands::Code { input, offset } => cmd_code(&input, offset),
        Commands::Run {
            input,
            offset,
            config,
            debug,
            args,
        } => cmd_run(&input, offset, config.as_deref(), debug, &args),
    }
}

fn parse_number(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number `{s}`: {e}"))
}

fn or_exit<T, E: fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn map_file(path: &Path) -> Mmap {
    let file = or_exit(File::open(path));
    // SAFETY: the mapping is read-only and dropped before the command returns.
    or_exit(unsafe { Mmap::map(&file) })
}

fn cmd_disasm(path: &Path, isa: Isa, offset: usize, len: Option<usize>) {
    let data = map_file(path);
    let end = match len {
        Some(len) => offset.saturating_add(len),
        None => data.len(),
    };
    if offset >= end || end > data.len() {
        eprintln!(
            "Error: range {offset:#x}..{end:#x} is empty or outside the file ({:#x} bytes)",
            data.len()
        );
        std::process::exit(1);
    }

    match isa {
        Isa::Ecma => disasm_range::<EcmaOpcode>(&data, offset, end),
        Isa::Panda => disasm_range::<PandaOpcode>(&data, offset, end),
    }
}

fn disasm_range<O: Opcode>(data: &[u8], from: usize, to: usize) {
    println!("# {} bytecode {from:#x}..{to:#x}", O::ISA);
    println!();
    list_instructions::<O>(data, from, to, "");
}

/// Print every instruction in `code[from..to]`, stopping at the first
/// illegal or truncated one.
fn list_instructions<O: Opcode>(code: &[u8], from: usize, to: usize, indent: &str) {
    let mut cursor = SafeCursor::<O>::new(code, from, from, to);
    while cursor.is_valid() {
        let pc = cursor.offset();
        if cursor.opcode().is_none() {
            println!("{indent}{pc:#06x}  .byte {:#04x}  # illegal opcode", code[pc]);
            return;
        }
        if pc + cursor.size() > to {
            println!("{indent}{pc:#06x}  # truncated {}", cursor.info().map_or("?", |i| i.mnemonic));
            return;
        }
        println!("{indent}{pc:#06x}  {cursor}");
        cursor = cursor.next();
    }
}

fn parse_code(path: &Path, offset: usize) -> Code {
    let data = map_file(path);
    let Ok(offset) = u32::try_from(offset) else {
        eprintln!("Error: offset {offset:#x} does not fit a code item offset");
        std::process::exit(1);
    };
    or_exit(Code::parse(&data, offset))
}

fn cmd_code(path: &Path, offset: usize) {
    let code = parse_code(path, offset);

    println!(".code {offset:#x} {{");
    println!(
        "    # vregs: {}, args: {}, code_size: {}",
        code.num_vregs,
        code.num_args,
        code.instructions.len()
    );
    if !code.instructions.is_empty() {
        list_instructions::<PandaOpcode>(&code.instructions, 0, code.instructions.len(), "    ");
    }

    for tb in &code.try_blocks {
        println!("    # try [{:#x}..{:#x}]", tb.start_pc, try_end(tb));
        for cb in &tb.catch_blocks {
            if cb.is_catch_all() {
                println!("    #   catch_all -> {:#x}", cb.handler_pc);
            } else {
                println!("    #   catch type={} -> {:#x}", cb.type_idx, cb.handler_pc);
            }
        }
    }
    println!("}}");
}

/// End of a try range, clamped for ranges a crafted code item overflows.
fn try_end(tb: &TryBlock) -> u32 {
    tb.start_pc.saturating_add(tb.length)
}

fn cmd_run(path: &Path, offset: usize, config: Option<&Path>, debug: bool, args: &[i64]) {
    let code = parse_code(path, offset);

    let mut config = match config {
        Some(path) => or_exit(InterpreterConfig::from_yaml_file(path)),
        None => InterpreterConfig::default(),
    };
    config.debug |= debug;

    let mut runtime = LocalRuntime::new();
    let mut thread = ManagedThread::new();
    let num_args = code.num_args;
    let main = Arc::new(
        Method::new(0, "main", runtime.object_class(), num_args)
            .with_flags(MethodFlags::STATIC)
            .with_code(code),
    );
    runtime.register_method(0, Arc::clone(&main));

    let args: Vec<VRegister> = args.iter().copied().map(VRegister::from_i64).collect();
    let interp = Interpreter::new(config);
    let outcome = or_exit(interp.invoke(&mut runtime, &mut thread, &main, &args));
    log::debug!(
        "hotness {}, cache hits {}, misses {}",
        main.hotness(),
        thread.cache().hits(),
        thread.cache().misses()
    );

    match outcome {
        Outcome::Returned(value) => println!("{value:?}"),
        Outcome::Exception(exception) => {
            let class = runtime.class_of(exception);
            match runtime
                .last_thrown()
                .filter(|kind| runtime.exception_class(kind) == class)
            {
                Some(kind) => eprintln!("Uncaught {kind}"),
                None => eprintln!("Uncaught {}", runtime.class_name(class)),
            }
            std::process::exit(1);
        }
        Outcome::Terminated => println!("terminated"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("16"), Ok(16));
        assert_eq!(parse_number("0x10"), Ok(16));
        assert!(parse_number("0xzz").is_err());
    }

    #[test]
    fn test_try_end_saturates() {
        let tb = |start_pc, length| TryBlock {
            start_pc,
            length,
            catch_blocks: Vec::new(),
        };
        assert_eq!(try_end(&tb(4, 6)), 10);
        assert_eq!(try_end(&tb(u32::MAX - 1, 8)), u32::MAX);
    }
}
