//! Program packaging.
//!
//! Bundles a linked device binary with the artifacts planned for it into a
//! single container, checked before it is handed back.

use std::fs;
use std::path::Path;

use aic_format::Container;
use bytes::Bytes;
use tracing::info;

use crate::config::ProgramConfig;
use crate::entry::resolve_entry_point;
use crate::error::Result;
use crate::planner::{ComputeProgram, Program};

/// Package `program` with its linked binary.
///
/// # Errors
///
/// Returns an error if the program cannot be generated or the container
/// fails validation.
pub fn package<P: Program + ?Sized>(program: &P, elf: Bytes) -> Result<Container> {
    let artifacts = program.generate()?;
    let container = artifacts.container_builder(elf)?.finalize();
    program.validate_container(&container)?;
    info!(
        name = program.name(),
        images = container.len(),
        "program packaged"
    );
    Ok(container)
}

/// Plan `config` against the binary `elf` and package both.
///
/// The thread entry point is read from the binary's symbol table.
///
/// # Errors
///
/// Returns an error if the binary has no start symbol, the configuration
/// cannot be planned or the container fails validation.
pub fn package_config(config: ProgramConfig, elf: Bytes) -> Result<Container> {
    let entry_point = resolve_entry_point(&elf)?;
    package(&ComputeProgram::new(config, entry_point), elf)
}

/// File-based [`package_config`]: read the configuration and binary, write
/// the container to `output`.
///
/// # Errors
///
/// Returns an error if an input cannot be read, packaging fails or the
/// output cannot be written.
pub fn package_files<P, Q, R>(config_path: P, elf_path: Q, output: R) -> Result<Container>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let config = ProgramConfig::from_file(config_path)?;
    let elf = Bytes::from(fs::read(elf_path.as_ref())?);
    let container = package_config(config, elf)?;
    container.write_to_file(output)?;
    Ok(container)
}
