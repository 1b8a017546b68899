//! Resolves code addresses to the function that contains them.
//!
//! The table is generated at build time from the firmware image
//! (see the `gen_symbol_table` tool), handed to [`init()`] once during startup,
//! and only read afterwards. Lookups are a binary search and never allocate,
//! so they are safe to perform from within a fault handler.

#![no_std]

use core::fmt;
use log::{debug, error};
use spin::Once;
use stack_trace_frame_pointers::StackFrame;

/// One function's address range `[start, end)` and its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry {
    pub start: usize,
    pub end: usize,
    /// Empty if the symbol was stripped.
    pub name: &'static str,
}

impl SymbolEntry {
    pub const fn new(start: usize, end: usize, name: &'static str) -> SymbolEntry {
        SymbolEntry { start, end, name }
    }
}

/// The function enclosing an address, and how far into that function the address is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo<'t> {
    pub name: Option<&'t str>,
    pub offset: usize,
}

impl<'t> fmt::Display for SymbolInfo<'t> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "{} + {:#X}", name, self.offset),
            None => write!(f, "?? + {:#X}", self.offset),
        }
    }
}

/// A borrowed, validated view of symbol entries sorted by ascending start address.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable<'t> {
    entries: &'t [SymbolEntry],
}

impl<'t> SymbolTable<'t> {
    /// Checks that `entries` are non-empty ranges, sorted by start address, and non-overlapping.
    pub fn new(entries: &'t [SymbolEntry]) -> Result<SymbolTable<'t>, &'static str> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.start >= entry.end {
                debug!("SymbolTable::new(): entry {} {:?} has an empty range", i, entry.name);
                return Err("symbol entry has an empty or inverted address range");
            }
            if let Some(next) = entries.get(i + 1) {
                if entry.end > next.start {
                    debug!("SymbolTable::new(): entry {} {:?} overlaps {:?}", i, entry.name, next.name);
                    return Err("symbol entries are unsorted or overlapping");
                }
            }
        }
        Ok(SymbolTable { entries })
    }

    /// Creates a table containing no symbols; every lookup misses.
    pub const fn empty() -> SymbolTable<'t> {
        SymbolTable { entries: &[] }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the entry whose range contains `addr`.
    pub fn entry_containing(&self, addr: usize) -> Option<&'t SymbolEntry> {
        // index of the first entry starting past `addr`
        let idx = self.entries.partition_point(|e| e.start <= addr);
        let entry = self.entries.get(idx.checked_sub(1)?)?;
        (addr < entry.end).then_some(entry)
    }

    /// Returns the function containing `addr` and the offset of `addr` within it,
    /// or `None` if no range covers it (e.g., stripped or dynamically loaded code).
    pub fn lookup(&self, addr: usize) -> Option<SymbolInfo<'t>> {
        self.entry_containing(addr).map(|entry| SymbolInfo {
            name: (!entry.name.is_empty()).then_some(entry.name),
            offset: addr - entry.start,
        })
    }

    /// Resolves one unwound frame.
    ///
    /// The search uses the frame's call site, so a call placed at the very end of a function
    /// still resolves to that function; the offset is relative to the frame's own address.
    pub fn resolve(&self, frame: &StackFrame) -> Option<SymbolInfo<'t>> {
        let entry = self.entry_containing(frame.call_site_address())?;
        Some(SymbolInfo {
            name: (!entry.name.is_empty()).then_some(entry.name),
            offset: frame.return_address() - entry.start,
        })
    }
}

/// The system-wide symbol table, set once by [`init()`].
static SYMBOL_TABLE: Once<SymbolTable<'static>> = Once::new();

/// Installs the system-wide symbol table.
///
/// Must be called once, before any fault may occur.
/// Returns an error if the entries are invalid or if a table was already installed.
pub fn init(entries: &'static [SymbolEntry]) -> Result<(), &'static str> {
    let table = SymbolTable::new(entries)?;
    let mut installed = false;
    SYMBOL_TABLE.call_once(|| {
        installed = true;
        table
    });
    if installed {
        debug!("symbol_table::init(): installed {} symbols", table.len());
        Ok(())
    } else {
        error!("symbol_table::init(): symbol table was already initialized");
        Err("symbol table was already initialized")
    }
}

/// Returns the system-wide symbol table, if [`init()`] has been called.
pub fn get() -> Option<&'static SymbolTable<'static>> {
    SYMBOL_TABLE.get()
}

/// Resolves `frame` against the system-wide symbol table.
/// Returns `None` if the table was never initialized or nothing covers the frame.
pub fn resolve(frame: &StackFrame) -> Option<SymbolInfo<'static>> {
    get()?.resolve(frame)
}
