//! The certified-file container header.
//!
//! Segments such as `ps3swu.self` are certified files carrying their own
//! 4-byte magic and a big-endian version, followed by category-specific
//! extended headers. Only the common header is decoded; signature material
//! is carried by the surrounding container and not checked.

use std::fmt;
use std::io::SeekFrom;

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, big_endian as be};

use crate::error::ErrorInner;
use crate::stream::RangeStream;
use crate::Result;

/// The 4-byte certified-file magic.
pub const CERT_MAGIC: [u8; 4] = *b"SCE\0";

/// The common certified-file header.
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct CertFileHeader {
    /// Must match [`CERT_MAGIC`].
    pub magic: [u8; 4],
    /// Header format version.
    pub version: be::U32,
}

impl fmt::Debug for CertFileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertFileHeader")
            .field("magic", &format_args!("b\"{}\"", self.magic.escape_ascii()))
            .field("version", &self.version.get())
            .finish()
    }
}

/// A certified file with its header decoded.
#[derive(Debug)]
pub struct CertifiedFile {
    header: CertFileHeader,
}

impl CertifiedFile {
    /// Decode the header from the start of `stream`, restoring the cursor
    /// afterwards.
    pub fn parse<S: RangeStream>(stream: &mut S) -> Result<Self> {
        let header = stream.with_pos(SeekFrom::Start(0), |s| {
            let mut header = CertFileHeader::new_zeroed();
            s.read_exact(header.as_mut_bytes())?;
            Ok(header)
        })?;
        if header.magic != CERT_MAGIC {
            bail!(ErrorInner::InvalidCertMagic(header.magic));
        }
        Ok(Self { header })
    }

    #[must_use]
    pub fn header(&self) -> &CertFileHeader {
        &self.header
    }

    /// The header format version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.header.version.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemStream;
    use crate::ErrorKind;

    #[test]
    fn parses_header() {
        let mut raw = CERT_MAGIC.to_vec();
        raw.extend_from_slice(&2u32.to_be_bytes());
        raw.extend_from_slice(b"trailing payload");
        let mut stream = MemStream::new(raw);
        stream.seek(SeekFrom::Start(5)).unwrap();

        let cert = CertifiedFile::parse(&mut stream).unwrap();
        assert_eq!(cert.version(), 2);
        assert_eq!(cert.header().magic, CERT_MAGIC);
        // Parsing used a scoped cursor.
        assert_eq!(stream.tell(), 5);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut raw = b"ELF\0".to_vec();
        raw.extend_from_slice(&2u32.to_be_bytes());
        let err = CertifiedFile::parse(&mut MemStream::new(raw)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }
}
