//! Metadata document reader.
//!
//! Reading is the runtime's side of the contract: verify the buffer, check
//! the format revision, then refuse any document that requires a field this
//! reader does not know.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{FormatError, Result};
use crate::metadata::{Metadata, VERSION_MAJOR};
use crate::schema;
use crate::wire::Record;

/// Magic at the start of every payload.
pub const MAGIC: &[u8; 4] = b"AICM";

/// Header older loaders expect in front of the payload: a version pair of
/// `0xffff.0xffff` that marks the end of the legacy structured metadata.
pub const TERMINATOR: [u8; 4] = [0xff; 4];

const WHAT: &str = "metadata";

/// Verify a payload (no terminator header) and return its root record.
///
/// # Errors
///
/// Returns [`FormatError::BadMagic`] or [`FormatError::Malformed`].
pub fn verify_payload(buf: &[u8]) -> Result<Record<'_>> {
    let body = buf
        .strip_prefix(MAGIC.as_slice())
        .ok_or(FormatError::BadMagic { what: WHAT })?;
    let record = Record::parse(body)?;
    schema::verify(&record, schema::METADATA, schema::ROOT)?;
    Ok(record)
}

/// Return the payload, dropping the terminator header when present.
///
/// A buffer that already verifies is returned unchanged, so payloads whose
/// first bytes happen to look like the header are never damaged.
fn strip_terminator(buf: &[u8]) -> &[u8] {
    if verify_payload(buf).is_err() {
        if let Some(rest) = buf.strip_prefix(TERMINATOR.as_slice()) {
            return rest;
        }
    }
    buf
}

/// Required fields of `md` this reader does not know.
#[must_use]
pub fn unsupported_fields(md: &Metadata) -> Vec<String> {
    md.required_fields
        .iter()
        .filter(|f| !schema::is_known_field(f))
        .cloned()
        .collect()
}

/// Read, verify and decode a metadata document.
///
/// # Errors
///
/// - [`FormatError::Malformed`] / [`FormatError::BadMagic`] if the buffer
///   does not verify
/// - [`FormatError::VersionMismatch`] for another major revision
/// - [`FormatError::UnsupportedFeatures`] if the document requires fields
///   this reader does not know
pub fn read_metadata(buf: &[u8]) -> Result<Metadata> {
    let payload = strip_terminator(buf);
    let record = verify_payload(payload)?;

    let (major, minor) = schema::version_of(&record)?;
    if major != VERSION_MAJOR {
        return Err(FormatError::VersionMismatch {
            what: WHAT,
            found: u32::from(major),
            expected: u32::from(VERSION_MAJOR),
        });
    }

    let md = schema::decode(&record)?;
    let unsupported = unsupported_fields(&md);
    if !unsupported.is_empty() {
        return Err(FormatError::UnsupportedFeatures {
            fields: unsupported,
        });
    }
    debug!(
        name = %md.network_name,
        version = %format_args!("{major}.{minor}"),
        "metadata verified"
    );
    Ok(md)
}

/// Read a metadata document from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not verify.
pub fn read_metadata_file<P: AsRef<Path>>(path: P) -> Result<Metadata> {
    let data = fs::read(path.as_ref())?;
    read_metadata(&data)
}
