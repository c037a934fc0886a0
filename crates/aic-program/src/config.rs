//! Program configuration.
//!
//! A [`ProgramConfig`] describes the buffers a compute program exchanges
//! with the host and the cores and threads it runs on. It is loaded from
//! JSON:
//!
//! ```json
//! {
//!   "name": "conv_tail",
//!   "hwVersionMajor": 2, "hwVersionMinor": 0,
//!   "numNSPs": 4, "numThreads": 0, "numHMXThreads": 1,
//!   "inputs":  [{ "type": "Int8Ty", "dims": [1024], "dest": "DDR" }],
//!   "outputs": [{ "type": "FloatTy", "dims": [16], "dest": "L2TCM",
//!                 "nsps": [0], "baseAddrOffset": 1040384, "devOffset": 4096 }]
//! }
//! ```
//!
//! Unknown keys are rejected so that typos do not silently change a plan.

use std::fs;
use std::path::Path;

use aic_chip::memory::AddressSpace;
use aic_chip::topology::{DEFAULT_HVX_THREADS, MAX_NUM_THREADS};
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};

/// Element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit float
    #[serde(rename = "FloatTy")]
    Float,
    /// 16-bit float
    #[serde(rename = "Float16Ty")]
    Float16,
    /// Quantized signed 8-bit
    #[serde(rename = "Int8QTy")]
    Int8Q,
    /// Quantized unsigned 8-bit
    #[serde(rename = "UInt8QTy")]
    UInt8Q,
    /// Quantized signed 16-bit
    #[serde(rename = "Int16QTy")]
    Int16Q,
    /// Quantized signed 32-bit
    #[serde(rename = "Int32QTy")]
    Int32Q,
    /// Signed 32-bit index
    #[serde(rename = "Int32ITy")]
    Int32I,
    /// Signed 64-bit index
    #[serde(rename = "Int64ITy")]
    Int64I,
    /// Plain signed 8-bit
    #[serde(rename = "Int8Ty")]
    Int8,
}

impl DataType {
    /// Bytes per element.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::Int8Q | Self::UInt8Q | Self::Int8 => 1,
            Self::Float16 | Self::Int16Q => 2,
            Self::Float | Self::Int32Q | Self::Int32I => 4,
            Self::Int64I => 8,
        }
    }
}

/// Memory a buffer is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Core-local scratch
    #[serde(rename = "L2TCM")]
    L2tcm,
    /// Core-local vector memory
    #[serde(rename = "VTCM")]
    Vtcm,
    /// Shared off-chip memory
    #[serde(rename = "DDR")]
    Ddr,
}

impl From<Destination> for AddressSpace {
    fn from(d: Destination) -> Self {
        match d {
            Destination::L2tcm => Self::L2tcm,
            Destination::Vtcm => Self::Vtcm,
            Destination::Ddr => Self::Ddr,
        }
    }
}

/// One buffer of the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BufferSpec {
    /// Element type
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Shape; the byte size is the product times the element size
    pub dims: Vec<u64>,
    /// Offset in the host buffer
    #[serde(default)]
    pub host_offset: u64,
    /// Offset inside the base group
    #[serde(default)]
    pub dev_offset: u64,
    /// Start of the base group; page aligned on chip, 0 in DDR
    #[serde(default)]
    pub base_addr_offset: u64,
    /// Target memory
    pub dest: Destination,
    /// Cores holding the buffer; empty means every core
    #[serde(default)]
    pub nsps: Vec<u32>,
    /// Fence before the transfer's semaphore op (0 or 1)
    #[serde(default)]
    pub in_sync_fence: u32,
    /// Fence after the transfer's semaphore op (0 or 1)
    #[serde(default)]
    pub out_sync_fence: u32,
    /// Host may transfer a prefix of the buffer
    #[serde(default)]
    pub allow_partial: bool,
}

impl BufferSpec {
    /// Describe a buffer of `dims` elements placed in `dest`.
    #[must_use]
    pub fn new(data_type: DataType, dims: Vec<u64>, dest: Destination) -> Self {
        Self {
            data_type,
            dims,
            host_offset: 0,
            dev_offset: 0,
            base_addr_offset: 0,
            dest,
            nsps: Vec::new(),
            in_sync_fence: 0,
            out_sync_fence: 0,
            allow_partial: false,
        }
    }

    /// Set the device offset
    #[must_use]
    pub fn with_dev_offset(mut self, offset: u64) -> Self {
        self.dev_offset = offset;
        self
    }

    /// Set the base group offset
    #[must_use]
    pub fn with_base_offset(mut self, offset: u64) -> Self {
        self.base_addr_offset = offset;
        self
    }

    /// Restrict the buffer to some cores
    #[must_use]
    pub fn with_nsps(mut self, nsps: Vec<u32>) -> Self {
        self.nsps = nsps;
        self
    }

    /// Allow partial transfers
    #[must_use]
    pub fn with_partial(mut self, allow: bool) -> Self {
        self.allow_partial = allow;
        self
    }

    /// Bytes occupied, `None` on overflow.
    #[must_use]
    pub fn byte_size(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(self.data_type.size(), |acc, &d| acc.checked_mul(d))
    }
}

/// Whole-program configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProgramConfig {
    /// Network name
    #[serde(default)]
    pub name: String,
    /// Hardware major version
    pub hw_version_major: u32,
    /// Hardware minor version
    pub hw_version_minor: u32,
    /// Cores used
    #[serde(rename = "numNSPs")]
    pub num_nsps: u32,
    /// Threads per core; 0 picks the default
    #[serde(default)]
    pub num_threads: u32,
    /// Threads per core that drive the matrix unit
    #[serde(default, rename = "numHMXThreads")]
    pub num_hmx_threads: u32,
    /// Network heap bytes
    #[serde(default)]
    pub heap_size: u64,
    /// VTCM must be a single page
    #[serde(default, rename = "singleVTCMPage")]
    pub single_vtcm_page: bool,
    /// Buffers written by the host
    #[serde(default)]
    pub inputs: Vec<BufferSpec>,
    /// Buffers read by the host
    #[serde(default)]
    pub outputs: Vec<BufferSpec>,
    /// Device-private buffers
    #[serde(default)]
    pub internal_buffers: Vec<BufferSpec>,
}

/// Threads started on every core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPlan {
    /// All threads
    pub total: u32,
    /// Matrix-unit threads
    pub hmx: u32,
}

impl ThreadPlan {
    /// Vector-unit threads.
    #[must_use]
    pub const fn hvx(&self) -> u32 {
        self.total - self.hmx
    }
}

impl ProgramConfig {
    /// Parse a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Json`] for malformed JSON, unknown keys or
    /// missing required keys.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            inputs = config.inputs.len(),
            outputs = config.outputs.len(),
            internal = config.internal_buffers.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Resolve the thread counts.
    ///
    /// A thread count of 0 means the default HVX threads plus the requested
    /// HMX threads.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] if the counts exceed the hardware or
    /// ask for more HMX threads than threads.
    pub fn thread_plan(&self) -> Result<ThreadPlan> {
        let total = if self.num_threads == 0 {
            DEFAULT_HVX_THREADS.checked_add(self.num_hmx_threads)
        } else {
            Some(self.num_threads)
        }
        .filter(|&total| total <= MAX_NUM_THREADS)
        .ok_or_else(|| {
            PlanError::config(format!(
                "numThreads {} with {} HMX threads exceeds the {MAX_NUM_THREADS} threads of a core",
                self.num_threads, self.num_hmx_threads
            ))
        })?;
        if self.num_hmx_threads > total {
            return Err(PlanError::config(format!(
                "{} HMX threads exceed {total} threads",
                self.num_hmx_threads
            )));
        }
        Ok(ThreadPlan {
            total,
            hmx: self.num_hmx_threads,
        })
    }
}
