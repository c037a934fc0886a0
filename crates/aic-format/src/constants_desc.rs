//! Constants descriptor (`constantsdesc.bin`).

use crate::error::{FormatError, Result};
use crate::wire::Cursor;

/// Encoded size, trailing padding included.
pub const ENCODED_SIZE: usize = 24;

/// Sizes and ECC flags of the constants segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstantsDesc {
    /// Bytes loaded once per program
    pub static_size: u64,
    /// Bytes loaded per activation
    pub dynamic_size: u64,
    /// Static constants have ECC
    pub static_ecc: bool,
    /// Dynamic constants have ECC
    pub dynamic_ecc: bool,
}

impl ConstantsDesc {
    /// Encode as `{u64, u64, u8, u8}` padded to 8-byte alignment.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ENCODED_SIZE] {
        let mut out = [0u8; ENCODED_SIZE];
        out[0..8].copy_from_slice(&self.static_size.to_le_bytes());
        out[8..16].copy_from_slice(&self.dynamic_size.to_le_bytes());
        out[16] = u8::from(self.static_ecc);
        out[17] = u8::from(self.dynamic_ecc);
        out
    }

    /// Decode.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Malformed`] for a short buffer or a flag
    /// other than 0 or 1.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        const WHAT: &str = "constants descriptor";
        if buf.len() != ENCODED_SIZE {
            return Err(FormatError::malformed(
                WHAT,
                format!("{} bytes, expected {ENCODED_SIZE}", buf.len()),
            ));
        }
        let mut c = Cursor::of(WHAT, buf);
        let static_size = c.u64()?;
        let dynamic_size = c.u64()?;
        let flags = c.take(2)?;
        if flags.iter().any(|&f| f > 1) {
            return Err(FormatError::malformed(WHAT, "ECC flag out of range"));
        }
        Ok(Self {
            static_size,
            dynamic_size,
            static_ecc: flags[0] == 1,
            dynamic_ecc: flags[1] == 1,
        })
    }
}
