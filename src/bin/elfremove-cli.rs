//! Thin CLI wrapper over the `elfremove` library: parses arguments, drives
//! one collect/remove pass, and prints the same kind of summary the original
//! project's `print_info.py`/`elf_remove_class.py` scripts produced. Carries
//! no cascade logic of its own.

use clap::Parser;
use elfremove::{Config, ElfFile, SymbolQuery};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

/// Remove unused function symbols from a shared ELF library in place.
#[derive(Parser, Debug)]
#[command(name = "elfremove-cli", version, about)]
struct Args {
    /// Path to the shared library to edit.
    library: PathBuf,

    /// Name of a function symbol to remove from .dynsym. Repeatable.
    #[arg(long = "remove-name")]
    remove_name: Vec<String>,

    /// Address (hex, e.g. 0x1040) of a function symbol to remove. Repeatable.
    #[arg(long = "remove-addr")]
    remove_addr: Vec<String>,

    /// Invert the selection: remove every function symbol NOT named/addressed above.
    #[arg(long)]
    complement: bool,

    /// Don't overwrite removed functions' code bytes with 0xCC.
    #[arg(long = "no-overwrite")]
    no_overwrite: bool,

    /// Path to a companion file carrying a .symtab, tried before any directory search.
    #[arg(long = "external-symtab")]
    external_symtab: Option<PathBuf>,

    /// A local (non-exported) function to overwrite, as `ADDR:SIZE` (both hex or decimal). Repeatable.
    #[arg(long = "local-function")]
    local_function: Vec<String>,

    /// Print the dynsym collection and removed-byte summary.
    #[arg(long = "print-info")]
    print_info: bool,

    /// Print the table of removed functions.
    #[arg(long = "print-removed")]
    print_removed: bool,
}

fn parse_int(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn run(args: Args) -> elfremove::Result<()> {
    let config = if let Some(path) = args.external_symtab.clone() {
        Config::builder()
            .overwrite_code(!args.no_overwrite)
            .external_symtab_path(path)
            .build()
    } else {
        Config::builder().overwrite_code(!args.no_overwrite).build()
    };

    let overwrite = config.overwrite_code;
    let mut file = ElfFile::open(&args.library, config)?;

    if !args.remove_name.is_empty() {
        let names: HashSet<String> = args.remove_name.iter().cloned().collect();
        file.collect_symbols_in_dynsym(&SymbolQuery::Names(&names), args.complement)?;
    } else if !args.remove_addr.is_empty() {
        let addrs: HashSet<u64> = args
            .remove_addr
            .iter()
            .filter_map(|s| parse_int(s))
            .collect();
        file.collect_symbols_in_dynsym(&SymbolQuery::Addresses(&addrs), args.complement)?;
    }

    if args.print_info {
        println!("collected {} symbol(s) from .dynsym:", file.collection_dynsym.len());
        for sym in &file.collection_dynsym {
            println!("  {:#x}  {:6} bytes  {}", sym.value, sym.size, sym.name);
        }
    }

    if !file.collection_dynsym.is_empty() {
        let removed = file.remove_symbols_from_dynsym(overwrite)?;
        log::info!("removed {removed} symbol(s) from .dynsym");
    }

    for spec in &args.local_function {
        let Some((addr_s, size_s)) = spec.split_once(':') else {
            log::warn!("ignoring malformed --local-function {spec:?}, expected ADDR:SIZE");
            continue;
        };
        if let (Some(addr), Some(size)) = (parse_int(addr_s), parse_int(size_s)) {
            file.local_functions.insert((addr, size));
        } else {
            log::warn!("ignoring malformed --local-function {spec:?}");
        }
    }
    if !file.local_functions.is_empty() {
        file.overwrite_local_functions()?;
    }

    if args.print_removed {
        println!("removed functions:");
        for sym in &file.collection_dynsym {
            println!("  {:#x}  {:6} bytes  {}", sym.value, sym.size, sym.name);
        }
        for &(addr, size) in &file.local_functions {
            println!("  {addr:#x}  {size:6} bytes  <local>");
        }
    }

    if args.print_removed || args.print_info {
        println!("removed {} byte(s) of code total", file.removed_bytes());
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("elfremove-cli: {e}");
            ExitCode::FAILURE
        }
    }
}
