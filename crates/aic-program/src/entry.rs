//! Entry point resolution.
//!
//! Every thread of a program starts at the runtime's start routine. Its
//! address is read from the symbol table of the linked binary.

use std::fs;
use std::path::Path;

use goblin::elf::Elf;
use tracing::debug;

use crate::error::{PlanError, Result};

/// Function symbol threads start at.
pub const START_SYMBOL: &str = "_qaic_start";

/// Address of [`START_SYMBOL`] in an ELF image.
///
/// # Errors
///
/// Returns [`PlanError::EntryPoint`] if the image is not an ELF file or has
/// no function symbol of that name.
pub fn resolve_entry_point(elf_data: &[u8]) -> Result<u64> {
    let elf = Elf::parse(elf_data)
        .map_err(|e| PlanError::entry_point(format!("failed to parse ELF: {e}")))?;

    let addr = elf
        .syms
        .iter()
        .find(|sym| sym.is_function() && elf.strtab.get_at(sym.st_name) == Some(START_SYMBOL))
        .map(|sym| sym.st_value)
        .ok_or_else(|| PlanError::entry_point(format!("no function symbol {START_SYMBOL}")))?;

    debug!(symbol = START_SYMBOL, addr = %format_args!("0x{addr:x}"), "entry point");
    Ok(addr)
}

/// Read an ELF file and resolve its entry point.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no start symbol.
pub fn resolve_entry_point_file<P: AsRef<Path>>(path: P) -> Result<u64> {
    resolve_entry_point(&fs::read(path.as_ref())?)
}
