//! Network descriptor (`networkdesc.bin`).
//!
//! Host-side view of a program: the tensors it exchanges, how each maps
//! onto a DMA buffer, and how many threads of each kind it runs. Encoded
//! as compact JSON.

use serde::{Deserialize, Serialize};

use crate::config::{BufferSpec, DataType, ProgramConfig};
use crate::error::{PlanError, Result};

/// Descriptor major version.
pub const MAJOR_VERSION: u32 = 1;

/// Descriptor minor version.
pub const MINOR_VERSION: u32 = 0;

/// Thread group names, indexed by group id.
pub const THREAD_GROUP_NAMES: [&str; 2] = ["HVX", "HMX"];

/// Memory layout of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// Dense, innermost dimension last
    #[serde(rename = "FlatNXYD")]
    FlatNxyd,
}

/// Direction of a DMA buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device
    In,
    /// Device to host
    Out,
}

/// Kind of a transform step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformKind {
    /// Copy straight into a DMA buffer
    #[serde(rename = "CopyDMABufferTransform")]
    CopyDmaBuffer,
}

/// Shape and type of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorShape {
    /// Element type
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Dimensions
    pub dims: Vec<u64>,
    /// Layout
    pub layout: Layout,
}

/// Target of a copy transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyDmaBuffer {
    /// Direction
    pub dir: Direction,
    /// Offset in the DMA buffer
    pub offset: u64,
    /// Index into [`NetworkDescriptor::dma_buffers`]
    pub buffer_num: u32,
}

/// One step of a tensor's transform sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Kind
    pub kind: TransformKind,
    /// Element type
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Quantization scale
    pub scale: f32,
    /// Quantization offset
    pub offset: i32,
    /// Dimensions
    pub dims: Vec<u64>,
    /// Layout
    pub layout: Layout,
    /// Copy target
    pub copy_dma_buffer: CopyDmaBuffer,
}

/// A tensor the host reads or writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoTensor {
    /// Name
    pub name: String,
    /// Host may transfer a prefix (inputs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_partial_allowed: Option<bool>,
    /// Alignment in bytes (inputs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<u64>,
    /// Shape as the host provides it
    pub io_initial: TensorShape,
    /// Shape after the transform sequence
    pub io_transformed: TensorShape,
    /// Transform steps
    #[serde(rename = "transformseq")]
    pub transform_seq: Vec<Transform>,
}

/// A buffer the host DMAs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmaBuffer {
    /// Bytes
    pub size: u64,
    /// Direction
    pub dir: Direction,
}

/// The network descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Major version
    pub major_version: u32,
    /// Minor version
    pub minor_version: u32,
    /// Network name
    pub network_name: String,
    /// Cores
    pub num_cores: u32,
    /// Threads per core
    pub num_threads: u32,
    /// HVX threads per core
    pub num_hvx_threads: u32,
    /// Group id of each thread
    pub thread_groups: Vec<u32>,
    /// Groups issuing concurrently
    pub thread_group_issue_count: u32,
    /// Group names
    pub thread_group_names: Vec<String>,
    /// Batch size
    pub batch_size: u32,
    /// Offsets of the clusters the program is loaded at
    pub cluster_offsets: Vec<u64>,
    /// Inputs
    pub inputs: Vec<IoTensor>,
    /// Outputs
    pub outputs: Vec<IoTensor>,
    /// DMA buffers, inputs first
    pub dma_buffers: Vec<DmaBuffer>,
}

fn shape(spec: &BufferSpec) -> TensorShape {
    TensorShape {
        data_type: spec.data_type,
        dims: spec.dims.clone(),
        layout: Layout::FlatNxyd,
    }
}

fn tensor(name: String, spec: &BufferSpec, dir: Direction, buffer_num: u32) -> IoTensor {
    IoTensor {
        name,
        is_partial_allowed: None,
        align: None,
        io_initial: shape(spec),
        io_transformed: shape(spec),
        transform_seq: vec![Transform {
            kind: TransformKind::CopyDmaBuffer,
            data_type: spec.data_type,
            scale: 1.0,
            offset: 0,
            dims: spec.dims.clone(),
            layout: Layout::FlatNxyd,
            copy_dma_buffer: CopyDmaBuffer {
                dir,
                offset: 0,
                buffer_num,
            },
        }],
    }
}

fn dma_size(spec: &BufferSpec, name: &str) -> Result<u64> {
    spec.byte_size()
        .ok_or_else(|| PlanError::config(format!("{name}: size overflows")))
}

impl NetworkDescriptor {
    /// Describe the I/O of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] for invalid thread counts, a partial
    /// input with more than one dimension, or an oversized buffer.
    pub fn from_config(config: &ProgramConfig) -> Result<Self> {
        let threads = config.thread_plan()?;
        let mut desc = Self {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            network_name: config.name.clone(),
            num_cores: config.num_nsps,
            num_threads: threads.total,
            num_hvx_threads: threads.hvx(),
            thread_groups: (0..threads.total).map(|t| u32::from(t >= threads.hvx())).collect(),
            thread_group_issue_count: THREAD_GROUP_NAMES.len() as u32,
            thread_group_names: THREAD_GROUP_NAMES.iter().map(|&n| n.to_owned()).collect(),
            batch_size: 1,
            cluster_offsets: vec![0],
            inputs: Vec::with_capacity(config.inputs.len()),
            outputs: Vec::with_capacity(config.outputs.len()),
            dma_buffers: Vec::with_capacity(config.inputs.len() + config.outputs.len()),
        };

        let mut buffer_num = 0u32;
        for (i, spec) in config.inputs.iter().enumerate() {
            let name = format!("inputBuff_{i}");
            if spec.allow_partial && spec.dims.len() != 1 {
                return Err(PlanError::config(format!(
                    "{name}: partial buffers must have exactly one dimension, found {}",
                    spec.dims.len()
                )));
            }
            let size = dma_size(spec, &name)?;
            let mut t = tensor(name, spec, Direction::In, buffer_num);
            t.is_partial_allowed = Some(spec.allow_partial);
            t.align = Some(spec.data_type.size());
            desc.inputs.push(t);
            desc.dma_buffers.push(DmaBuffer { size, dir: Direction::In });
            buffer_num += 1;
        }
        for (i, spec) in config.outputs.iter().enumerate() {
            let name = format!("outputBuff_{i}");
            let size = dma_size(spec, &name)?;
            desc.outputs.push(tensor(name, spec, Direction::Out, buffer_num));
            desc.dma_buffers.push(DmaBuffer { size, dir: Direction::Out });
            buffer_num += 1;
        }
        Ok(desc)
    }

    /// Encode as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Json`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Json`] for malformed input.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(buf)?)
    }
}
