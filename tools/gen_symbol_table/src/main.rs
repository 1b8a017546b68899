//! Generates the static symbol table that the fault handler resolves backtraces with.
//!
//! Takes the output of `nm --print-size --numeric-sort --defined-only FIRMWARE_ELF`
//! (from a file, or from stdin if no file or "-" is given)
//! and prints Rust source defining `pub static SYMBOLS: &[symbol_table::SymbolEntry]`,
//! unless a "-o OUTPUT_FILE" argument is given.
//! The firmware `include!`s that file and passes `SYMBOLS` to `symbol_table::init()`.

mod parse;

use getopts::Options;
use std::env;
use std::fs;
use std::io::{self, Read};
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut opts = Options::new();
    opts.optopt("o", "", "set output file path", "OUTPUT_PATH");
    opts.optflag("", "no-demangle", "keep symbol names exactly as nm printed them");
    opts.optflag("v", "verbose", "report how many symbols were kept and dropped");
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage("gen_symbol_table", opts);
            process::exit(-1);
        }
    };

    if matches.opt_present("h") {
        print_usage("gen_symbol_table", opts);
        process::exit(0);
    }

    let input = match matches.free.len() {
        0 => None,
        1 if matches.free[0] == "-" => None,
        1 => Some(matches.free[0].clone()),
        _ => {
            eprintln!("Too many arguments entered");
            process::exit(-1);
        }
    };

    if let Err(e) = run(input, matches.opt_str("o"), !matches.opt_present("no-demangle"), matches.opt_present("v")) {
        eprintln!("Error: {}", e);
        process::exit(-1);
    }
}

fn run(input: Option<String>, output: Option<String>, demangle: bool, verbose: bool) -> Result<(), String> {
    let text = match &input {
        Some(path) => fs::read_to_string(path).map_err(|e| format!("couldn't read {:?}: {}", path, e))?,
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).map_err(|e| format!("couldn't read stdin: {}", e))?;
            text
        }
    };

    let symbols = parse::parse_nm_output(&text, demangle)?;
    let (table, dropped) = parse::build_table(symbols);
    if verbose {
        eprintln!("gen_symbol_table: {} symbols kept, {} dropped", table.len(), dropped);
    }
    let source = parse::render_rust(&table);

    match output {
        Some(path) => fs::write(&path, source).map_err(|e| format!("couldn't write {:?}: {}", path, e)),
        None => {
            print!("{}", source);
            Ok(())
        }
    }
}

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options] [NM_OUTPUT_FILE]", program);
    print!("{}", opts.usage(&brief));
}
