use std::cmp::Reverse;
use std::fmt::Write;

/// One code symbol read from `nm` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmSymbol {
    pub start: u64,
    pub size: u64,
    pub name: String,
}

impl NmSymbol {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }
}

/// Splits off the first whitespace-separated field of `s`.
fn split_field(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(end) => (&s[..end], s[end..].trim_start()),
        None => (s, ""),
    }
}

/// Parses the output of `nm --print-size --numeric-sort --defined-only`.
///
/// Only text (code) symbols are kept: types `t`, `T`, `w`, and `W`.
/// Lines without a size column are skipped, since the end of such a symbol is unknown.
/// If `demangle` is set, Rust symbol names are demangled without their trailing hash.
pub fn parse_nm_output(text: &str, demangle: bool) -> Result<Vec<NmSymbol>, String> {
    let mut symbols = Vec::new();
    for (line_num, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // "ADDRESS SIZE TYPE NAME", where a name demangled by `nm -C` may contain spaces
        let (addr, rest) = split_field(line);
        let (size, rest) = split_field(rest);
        if size.len() == 1 {
            // no size column, e.g. "0000000000401000 T _start"
            continue;
        }
        let (ty, name) = split_field(rest);
        if ty.len() != 1 || name.is_empty() {
            return Err(format!("line {}: unrecognized nm output: {:?}", line_num + 1, line));
        }
        if !matches!(ty, "t" | "T" | "w" | "W") {
            continue;
        }
        let start = u64::from_str_radix(addr, 16)
            .map_err(|e| format!("line {}: bad address {:?}: {}", line_num + 1, addr, e))?;
        let size = u64::from_str_radix(size, 16)
            .map_err(|e| format!("line {}: bad size {:?}: {}", line_num + 1, size, e))?;
        let name = if demangle {
            format!("{:#}", rustc_demangle::demangle(name))
        } else {
            name.to_string()
        };
        symbols.push(NmSymbol { start, size, name });
    }
    Ok(symbols)
}

/// Turns parsed symbols into a valid symbol table: sorted by start address,
/// with no empty ranges and no overlaps.
///
/// Of several symbols at the same address (aliases), the largest one is kept.
/// A symbol that starts inside the previously kept one is dropped.
/// Returns the table and the number of dropped symbols.
pub fn build_table(mut symbols: Vec<NmSymbol>) -> (Vec<NmSymbol>, usize) {
    let total = symbols.len();
    symbols.retain(|s| s.size != 0);
    symbols.sort_by(|a, b| {
        (a.start, Reverse(a.size), &a.name).cmp(&(b.start, Reverse(b.size), &b.name))
    });

    let mut table: Vec<NmSymbol> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        match table.last() {
            Some(prev) if symbol.start < prev.end() => continue,
            _ => table.push(symbol),
        }
    }
    let dropped = total - table.len();
    (table, dropped)
}

/// Renders the table as Rust source that defines `SYMBOLS`,
/// meant to be `include!`d by the firmware and passed to `symbol_table::init()`.
pub fn render_rust(table: &[NmSymbol]) -> String {
    let mut out = String::new();
    out.push_str("// Generated by gen_symbol_table. Do not edit.\n");
    out.push_str("pub static SYMBOLS: &[symbol_table::SymbolEntry] = &[\n");
    for symbol in table {
        // `{:?}` escapes the name into a valid Rust string literal
        let _ = writeln!(
            out,
            "    symbol_table::SymbolEntry::new({:#x}, {:#x}, {:?}),",
            symbol.start,
            symbol.end(),
            symbol.name,
        );
    }
    out.push_str("];\n");
    out
}
