#![deny(unsafe_code)]

//! Artifact formats for AIC compute programs
//!
//! This crate builds, encodes and reads the files a compute program ships
//! with. It knows nothing about planning: the planner fills a
//! [`MetadataWriter`] and a [`ProgramDesc`], and this crate turns them into
//! bytes.
//!
//! # Artifacts
//!
//! - **Metadata document**: versioned, self-describing record of memory
//!   sizes, multicast tables, DMA requests and the execution-context
//!   contract, verified against a schema on read
//! - **Program descriptor** (`constants.bin`): fixed-layout buffer table for
//!   the on-device loader
//! - **Constants descriptor** (`constantsdesc.bin`): sizes of the constants
//!   segment
//! - **Container**: the bundle of all images plus the compiled binary
//!
//! # Example
//!
//! ```no_run
//! use aic_format::{read_metadata, MetadataWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = MetadataWriter::new(2, 0);
//! writer.set_num_nsps(4);
//! writer.set_vtcm_size(1);
//! writer.set_l2tcm_size(4096);
//! let doc = writer.finalize()?;
//!
//! let md = read_metadata(doc.as_bytes())?;
//! println!("{} needs {} bytes of DDR", md.network_name, md.total_required_memory());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod constants_desc;
pub mod container;
mod error;
mod exec_context;
pub mod init_state;
pub mod metadata;
pub mod program_desc;
mod reader;
pub mod schema;
pub mod wire;
mod writer;

pub use constants_desc::ConstantsDesc;
pub use container::{Container, ContainerBuilder, Image};
pub use error::{FormatError, Result};
pub use exec_context::default_exec_context;
pub use metadata::Metadata;
pub use program_desc::{BufferDesc, MemLocation, ProgramDesc, Usage};
pub use reader::{
    read_metadata, read_metadata_file, unsupported_fields, verify_payload, MAGIC, TERMINATOR,
};
pub use writer::{MetadataDocument, MetadataWriter, DEFAULT_NETWORK_NAME};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::metadata::{
        DmaAddrSpace, DmaDirection, DmaRequest, DoorbellOp, DoorbellWidth, HostMulticastEntry,
        McAddrSpace, NspMulticastEntry, Port, PortType, SemaphoreOp, SemaphoreOpcode, SyncPoint,
        ThreadDescriptor,
    };
    pub use crate::{
        Container, ContainerBuilder, Metadata, MetadataDocument, MetadataWriter, ProgramDesc,
        Result,
    };
}
