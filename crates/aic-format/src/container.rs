//! Program container.
//!
//! Bundles the compiled binary with the artifacts the planner produces.
//! Images are stored in name order behind a fixed header and an image
//! table; each table entry records where the image's data starts in the
//! file.
//!
//! ```text
//! magic "AICQPC1\0" | version u32 | image count u32
//! image table: name [u8; 64] | offset u64 | size u64 | data position u64
//! image data, each 8-byte aligned
//! ```

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{FormatError, Result};
use crate::wire::Cursor;

/// Container magic.
pub const MAGIC: [u8; 8] = *b"AICQPC1\0";

/// Container layout revision.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header bytes.
pub const HEADER_SIZE: usize = 16;

/// Bytes reserved for an image name, NUL padding included.
pub const NAME_SIZE: usize = 64;

/// Bytes per image table entry.
pub const ENTRY_SIZE: usize = NAME_SIZE + 24;

const DATA_ALIGN: usize = 8;

const WHAT: &str = "container";

/// Well-known image names.
pub mod segment {
    /// Linked device binary
    pub const NETWORK_ELF: &str = "network.elf";
    /// Host-facing network descriptor
    pub const NETWORK_DESC: &str = "networkdesc.bin";
    /// Program descriptor and other constants
    pub const CONSTANTS: &str = "constants.bin";
    /// Constants sizes
    pub const CONSTANTS_DESC: &str = "constantsdesc.bin";
    /// Metadata document
    pub const METADATA: &str = "metadata.bin";
}

/// One named image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Name
    pub name: String,
    /// Load offset the consumer applies to this image
    pub offset: u64,
    /// Contents
    pub data: Bytes,
}

/// A parsed or freshly built container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    images: Vec<Image>,
}

fn align(n: usize) -> usize {
    n.div_ceil(DATA_ALIGN) * DATA_ALIGN
}

impl Container {
    /// Images in storage order.
    #[must_use]
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// Image named `name`.
    #[must_use]
    pub fn image(&self, name: &str) -> Option<&Image> {
        self.images.iter().find(|i| i.name == name)
    }

    /// True if an image named `name` exists.
    #[must_use]
    pub fn has_image(&self, name: &str) -> bool {
        self.image(name).is_some()
    }

    /// Number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// True if the container holds no image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Check the images a loader needs are present.
    ///
    /// A container needs at least two images, must hold the binary and the
    /// network descriptor, and carries either both constants images or
    /// neither.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Malformed`] for fewer than two images and
    /// [`FormatError::MissingSegments`] naming every absent image.
    pub fn validate(&self) -> Result<()> {
        if self.images.len() < 2 {
            return Err(FormatError::malformed(
                WHAT,
                format!("{} images, at least 2 required", self.images.len()),
            ));
        }
        let mut missing: Vec<String> = [segment::NETWORK_ELF, segment::NETWORK_DESC]
            .into_iter()
            .filter(|n| !self.has_image(n))
            .map(str::to_owned)
            .collect();
        match (
            self.has_image(segment::CONSTANTS),
            self.has_image(segment::CONSTANTS_DESC),
        ) {
            (true, false) => missing.push(segment::CONSTANTS_DESC.to_owned()),
            (false, true) => missing.push(segment::CONSTANTS.to_owned()),
            _ => {}
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FormatError::MissingSegments { names: missing })
        }
    }

    /// Encode.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let table_end = HEADER_SIZE + self.images.len() * ENTRY_SIZE;
        let mut positions = Vec::with_capacity(self.images.len());
        let mut pos = align(table_end);
        for img in &self.images {
            positions.push(pos);
            pos = align(pos + img.data.len());
        }

        let mut out = Vec::with_capacity(pos);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&u32::try_from(self.images.len()).unwrap_or(u32::MAX).to_le_bytes());
        for (img, &at) in self.images.iter().zip(&positions) {
            let mut name = [0u8; NAME_SIZE];
            name[..img.name.len()].copy_from_slice(img.name.as_bytes());
            out.extend_from_slice(&name);
            out.extend_from_slice(&img.offset.to_le_bytes());
            out.extend_from_slice(&(img.data.len() as u64).to_le_bytes());
            out.extend_from_slice(&(at as u64).to_le_bytes());
        }
        for (img, &at) in self.images.iter().zip(&positions) {
            out.resize(at, 0);
            out.extend_from_slice(&img.data);
        }
        out.resize(pos, 0);
        out
    }

    /// Decode a container.
    ///
    /// Image data is sliced out of `buf` without copying.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::BadMagic`] if the header is wrong and
    /// [`FormatError::Malformed`] if an image lies outside the buffer.
    pub fn from_bytes(buf: Bytes) -> Result<Self> {
        if buf.len() < MAGIC.len() || buf[..MAGIC.len()] != MAGIC {
            return Err(FormatError::BadMagic { what: WHAT });
        }
        let mut c = Cursor::of(WHAT, &buf);
        c.take(MAGIC.len())?;
        let version = c.u32()?;
        if version != FORMAT_VERSION {
            return Err(FormatError::VersionMismatch {
                what: WHAT,
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        let count = c.u32()? as usize;
        if count > c.remaining() / ENTRY_SIZE {
            return Err(FormatError::malformed(
                WHAT,
                format!("{count} images cannot fit in {} bytes", buf.len()),
            ));
        }

        let mut images = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = c.take(NAME_SIZE)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
            let name = std::str::from_utf8(&raw[..end])
                .map_err(|e| FormatError::malformed(WHAT, format!("image name: {e}")))?
                .to_owned();
            let offset = c.u64()?;
            let size = c.u64()?;
            let at = c.u64()?;
            let range = usize::try_from(at)
                .ok()
                .zip(usize::try_from(size).ok())
                .and_then(|(at, size)| Some(at..at.checked_add(size)?))
                .filter(|r| r.end <= buf.len());
            let Some(range) = range else {
                return Err(FormatError::malformed(
                    WHAT,
                    format!("image {name} at {at}+{size} exceeds {} bytes", buf.len()),
                ));
            };
            images.push(Image {
                name,
                offset,
                data: buf.slice(range),
            });
        }
        Ok(Self { images })
    }

    /// Read a container file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not decode.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        Self::from_bytes(Bytes::from(data))
    }

    /// Write the encoding to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_bytes())?;
        info!(path = %path.as_ref().display(), images = self.images.len(), "container written");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Segment {
    data: Bytes,
    offset: u64,
}

/// Collects named segments into a [`Container`].
///
/// Segments are kept sorted by name. The builder is consumed by
/// [`finalize`](Self::finalize).
#[derive(Debug, Clone, Default)]
pub struct ContainerBuilder {
    segments: BTreeMap<String, Segment>,
}

impl ContainerBuilder {
    /// Start an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a segment. A name can be added once; remove it to replace it.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidEntry`] if the name is empty, contains
    /// a NUL byte, does not fit the image table or is already present.
    pub fn add_segment(
        &mut self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
        offset: u64,
    ) -> Result<()> {
        let name = name.into();
        if name.is_empty() || name.len() >= NAME_SIZE || name.contains('\0') {
            return Err(FormatError::invalid_entry(format!(
                "segment name {name:?} must be 1 to {} bytes without NUL",
                NAME_SIZE - 1
            )));
        }
        let data = data.into();
        match self.segments.entry(name) {
            Entry::Occupied(e) => Err(FormatError::invalid_entry(format!(
                "segment {:?} already added",
                e.key()
            ))),
            Entry::Vacant(e) => {
                debug!(segment = %e.key(), bytes = data.len(), offset, "segment added");
                e.insert(Segment { data, offset });
                Ok(())
            }
        }
    }

    /// Add a segment from a file.
    ///
    /// The constants segment gets an offset equal to its own size: that is
    /// where the dynamic constants that follow it begin.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the name is invalid.
    pub fn add_segment_from_file<P: AsRef<Path>>(
        &mut self,
        name: impl Into<String>,
        path: P,
    ) -> Result<()> {
        let name = name.into();
        let data = fs::read(path.as_ref())?;
        let offset = if name == segment::CONSTANTS {
            data.len() as u64
        } else {
            0
        };
        self.add_segment(name, data, offset)
    }

    /// Remove a segment; true if it existed.
    pub fn remove_segment(&mut self, name: &str) -> bool {
        self.segments.remove(name).is_some()
    }

    /// True if a segment named `name` exists.
    #[must_use]
    pub fn has_segment(&self, name: &str) -> bool {
        self.segments.contains_key(name)
    }

    /// Offset of a segment, 0 if absent.
    #[must_use]
    pub fn segment_offset(&self, name: &str) -> u64 {
        self.segments.get(name).map_or(0, |s| s.offset)
    }

    /// Contents of a segment, empty if absent.
    #[must_use]
    pub fn segment_data(&self, name: &str) -> Bytes {
        self.segments
            .get(name)
            .map(|s| s.data.clone())
            .unwrap_or_default()
    }

    /// Number of segments.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Drop every segment.
    pub fn reset(&mut self) {
        self.segments.clear();
    }

    /// Build the container.
    #[must_use]
    pub fn finalize(self) -> Container {
        Container {
            images: self
                .segments
                .into_iter()
                .map(|(name, s)| Image {
                    name,
                    offset: s.offset,
                    data: s.data,
                })
                .collect(),
        }
    }

    /// Build and encode the container.
    #[must_use]
    pub fn finalize_to_bytes(self) -> Vec<u8> {
        self.finalize().to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ContainerBuilder {
        let mut b = ContainerBuilder::new();
        b.add_segment(segment::NETWORK_ELF, &b"\x7fELF...."[..], 0)
            .unwrap();
        b.add_segment(segment::NETWORK_DESC, &b"{}"[..], 0).unwrap();
        b
    }

    #[test]
    fn builder_queries() {
        let mut b = builder();
        assert_eq!(b.num_segments(), 2);
        assert!(b.has_segment(segment::NETWORK_ELF));
        assert_eq!(b.segment_offset("missing"), 0);
        assert!(b.segment_data("missing").is_empty());
        assert_eq!(&b.segment_data(segment::NETWORK_DESC)[..], b"{}");
        assert!(b.remove_segment(segment::NETWORK_DESC));
        assert!(!b.remove_segment(segment::NETWORK_DESC));
        b.reset();
        assert_eq!(b.num_segments(), 0);
    }

    #[test]
    fn names_are_checked() {
        let mut b = ContainerBuilder::new();
        assert!(b.add_segment("", Bytes::new(), 0).is_err());
        assert!(b.add_segment("x".repeat(NAME_SIZE), Bytes::new(), 0).is_err());
    }

    #[test]
    fn duplicate_segments_keep_the_first() {
        let mut b = builder();
        let err = b
            .add_segment(segment::NETWORK_DESC, &b"[]"[..], 8)
            .unwrap_err();
        assert!(matches!(err, FormatError::InvalidEntry { .. }));
        assert_eq!(&b.segment_data(segment::NETWORK_DESC)[..], b"{}");
        assert_eq!(b.segment_offset(segment::NETWORK_DESC), 0);

        assert!(b.remove_segment(segment::NETWORK_DESC));
        b.add_segment(segment::NETWORK_DESC, &b"[]"[..], 0).unwrap();
        assert_eq!(&b.segment_data(segment::NETWORK_DESC)[..], b"[]");
    }

    #[test]
    fn encodes_and_parses() {
        let mut b = builder();
        b.add_segment(segment::CONSTANTS, vec![1u8, 2, 3], 3).unwrap();
        b.add_segment(segment::CONSTANTS_DESC, vec![0u8; 24], 0)
            .unwrap();
        let c = b.finalize();
        let bytes = c.to_bytes();
        assert_eq!(&bytes[..8], &MAGIC);
        assert_eq!(bytes.len() % 8, 0);
        let back = Container::from_bytes(Bytes::from(bytes)).unwrap();
        assert_eq!(back, c);
        // Sorted by name.
        let names: Vec<_> = back.images().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["constants.bin", "constantsdesc.bin", "network.elf", "networkdesc.bin"]
        );
        assert_eq!(back.image(segment::CONSTANTS).unwrap().offset, 3);
        back.validate().unwrap();
    }

    #[test]
    fn validation_rules() {
        let mut b = builder();
        b.add_segment(segment::CONSTANTS, vec![1u8], 1).unwrap();
        let err = b.clone().finalize().validate().unwrap_err();
        assert!(matches!(&err, FormatError::MissingSegments { names } if names == &["constantsdesc.bin"]));

        b.remove_segment(segment::NETWORK_DESC);
        b.remove_segment(segment::CONSTANTS);
        let err = b.finalize().validate().unwrap_err();
        assert!(matches!(err, FormatError::Malformed { .. }));
    }

    #[test]
    fn bad_magic_and_truncation() {
        let bytes = builder().finalize_to_bytes();
        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(
            Container::from_bytes(Bytes::from(bad)),
            Err(FormatError::BadMagic { .. })
        ));
        let short = Bytes::from(bytes[..bytes.len() - 8].to_vec());
        assert!(Container::from_bytes(short).is_err());
    }

    #[test]
    fn constants_from_file_get_trailing_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constants.bin");
        std::fs::write(&path, [0u8; 40]).unwrap();
        let mut b = builder();
        b.add_segment_from_file(segment::CONSTANTS, &path).unwrap();
        b.add_segment_from_file("extra.bin", &path).unwrap();
        assert_eq!(b.segment_offset(segment::CONSTANTS), 40);
        assert_eq!(b.segment_offset("extra.bin"), 0);
    }
}
