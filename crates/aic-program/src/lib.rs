#![deny(unsafe_code)]

//! Resource planner for AIC compute programs
//!
//! Takes a [`ProgramConfig`] describing the buffers a program exchanges with
//! the host and the cores it spans, and produces the artifacts the runtime
//! loads with it.
//!
//! # Pipeline
//!
//! ```text
//! ProgramConfig
//!   → layout      place buffers in L2TCM / VTCM / DDR
//!   → multicast   group ids, per-core and host tables
//!   → sync        semaphores, doorbell slots, init words
//!   → dma         one request per input/output
//!   → planner     program descriptor + metadata document
//!   → package     container with the linked binary
//! ```
//!
//! # Example
//!
//! ```no_run
//! use aic_program::{ComputeProgram, Program, ProgramConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProgramConfig::from_file("program.json")?;
//! let program = ComputeProgram::new(config, 0x1000);
//! let artifacts = program.generate()?;
//! artifacts.write_to_dir("out")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod dma;
pub mod entry;
mod error;
pub mod layout;
pub mod multicast;
pub mod netdesc;
pub mod package;
pub mod planner;
pub mod sync;

pub use config::{BufferSpec, DataType, Destination, ProgramConfig, ThreadPlan};
pub use entry::{resolve_entry_point, resolve_entry_point_file, START_SYMBOL};
pub use error::{PlanError, Result};
pub use layout::{L2tcmReservation, PlannedBuffer, ResourcePlan};
pub use netdesc::NetworkDescriptor;
pub use package::{package, package_config, package_files};
pub use planner::{ComputeProgram, Program, ProgramArtifacts, ProgramPlan};
