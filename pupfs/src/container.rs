//! The low-level container layout and the index built from it.
//!
//! A firmware-update container starts with a fixed 48-byte [`Header`],
//! followed by `segment_num` 32-byte [`SegmentEntry`]s, `segment_num`
//! 32-byte [`DigestEntry`]s and one trailing 20-byte [`HeaderDigest`].
//! All integers are big-endian. Segment payloads live in the data region
//! declared by the header; digests are carried as-is and never verified
//! here.
//!
//! [`ContainerIndex::parse`] decodes the tables in one pass and projects
//! each segment onto a regular-file node under a root directory; see
//! [`crate::tree`].

use std::fmt;

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, big_endian as be};

use crate::error::ErrorInner;
use crate::stream::RangeStream;
use crate::tree::{FsTree, NodeKind, NodeRef};
use crate::Result;

/// The 7-byte container magic.
pub const MAGIC: [u8; 7] = *b"SCEUF\0\0";

pub const HEADER_SIZE: u64 = size_of::<Header>() as u64;
pub const SEGMENT_ENTRY_SIZE: u64 = size_of::<SegmentEntry>() as u64;
pub const DIGEST_ENTRY_SIZE: u64 = size_of::<DigestEntry>() as u64;
pub const HEADER_DIGEST_SIZE: u64 = size_of::<HeaderDigest>() as u64;

/// The fixed container header.
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Header {
    /// Must match [`MAGIC`].
    pub magic: [u8; 7],
    /// Format flag byte.
    pub format_flag: u8,
    /// Package version counter.
    pub package_version: be::U64,
    /// Image version counter.
    pub image_version: be::U64,
    /// The number of entries in the segment and digest tables.
    pub segment_num: be::U64,
    /// Declared length of the header region (header plus tables).
    pub header_length: be::U64,
    /// Declared length of the data region following the header region.
    pub data_length: be::U64,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("magic", &format_args!("b\"{}\"", self.magic.escape_ascii()))
            .field("format_flag", &self.format_flag)
            .field("package_version", &self.package_version.get())
            .field("image_version", &self.image_version.get())
            .field("segment_num", &self.segment_num.get())
            .field("header_length", &format_args!("{:#x}", self.header_length.get()))
            .field("data_length", &format_args!("{:#x}", self.data_length.get()))
            .finish()
    }
}

impl Header {
    /// Validate the magic.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            bail!(ErrorInner::InvalidMagic(self.magic));
        }
        Ok(())
    }
}

/// The signing algorithm tag carried by a segment entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SignAlgorithm(pub be::U32);

macro_rules! impl_open_enum {
    ($name:ident; $ctor:path; $($(#[$meta:meta])* $variant:ident = $value:expr,)*) => {
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(match *self {
                    $(Self::$variant => stringify!($variant),)*
                    _ => return f
                        .debug_tuple(stringify!($name))
                        .field(&self.0.get())
                        .finish(),
                })
            }
        }

        impl $name {
            $(
                $(#[$meta])*
                pub const $variant: Self = Self($ctor($value));
            )*
        }
    };
}

impl_open_enum! {
    SignAlgorithm; be::U32::new;

    /// HMAC-SHA1.
    HMAC_SHA1 = 0,
    /// HMAC-SHA256.
    HMAC_SHA256 = 1,
}

/// An entry in the segment table.
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SegmentEntry {
    /// The segment identifier. Not guaranteed unique by the format.
    pub id: be::U64,
    /// Absolute offset of the segment payload in the container.
    pub offset: be::U64,
    /// Length of the segment payload in bytes.
    pub size: be::U64,
    /// The signing algorithm tag.
    pub sign_algorithm: SignAlgorithm,
    pub padding: [u8; 4],
}

impl fmt::Debug for SegmentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentEntry")
            .field("id", &format_args!("{:#x}", self.id.get()))
            .field("offset", &format_args!("{:#x}", self.offset.get()))
            .field("size", &format_args!("{:#x}", self.size.get()))
            .field("sign_algorithm", &self.sign_algorithm)
            .finish()
    }
}

/// An entry in the digest table.
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct DigestEntry {
    /// The index of the segment this digest covers.
    pub segment_index: be::U64,
    /// The 20-byte digest, carried but not verified.
    pub digest: [u8; 20],
    pub padding: [u8; 4],
}

impl fmt::Debug for DigestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestEntry")
            .field("segment_index", &self.segment_index.get())
            .field("digest", &format_args!("{:02x?}", self.digest))
            .finish()
    }
}

/// The trailing header digest.
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct HeaderDigest {
    /// The 20-byte digest, carried but not verified.
    pub digest: [u8; 20],
}

impl fmt::Debug for HeaderDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderDigest")
            .field("digest", &format_args!("{:02x?}", self.digest))
            .finish()
    }
}

/// Well-known segment identifiers and their file names.
static SEGMENT_NAMES: &[(u64, &str)] = &[
    (0x100, "version.txt"),
    (0x101, "license.xml"),
    (0x102, "promo_flags.txt"),
    (0x103, "update_flags.txt"),
    (0x104, "patch_build.txt"),
    (0x200, "ps3swu.self"),
    (0x201, "vsh.tar"),
    (0x202, "dots.txt"),
    (0x203, "patch_data.pkg"),
    (0x300, "update_files.tar"),
    (0x501, "spkg_hdr.tar"),
    (0x601, "ps3swu2.self"),
];

/// The file name a segment id projects to.
///
/// Unknown ids get a synthesized `seg_<id-hex>.bin` name.
#[must_use]
pub fn segment_name(id: u64) -> String {
    match SEGMENT_NAMES.iter().find(|(known, _)| *known == id) {
        Some((_, name)) => (*name).to_owned(),
        None => format!("seg_{id:x}.bin"),
    }
}

/// The decoded container: header, tables and the projected tree.
///
/// Produced by one parse pass and immutable afterwards.
pub struct ContainerIndex {
    header: Header,
    segments: Box<[SegmentEntry]>,
    digests: Box<[DigestEntry]>,
    header_digest: HeaderDigest,
    tree: FsTree,
}

impl fmt::Debug for ContainerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerIndex")
            .field("header", &self.header)
            .field("segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}

impl ContainerIndex {
    /// Decode the header and tables from the start of `stream` and build
    /// the directory tree. The cursor is restored afterwards.
    ///
    /// The only integrity check performed is the magic comparison; digest
    /// bytes are carried without verification.
    pub fn parse<S: RangeStream>(stream: &mut S) -> Result<Self> {
        trace_time!("parse container index");
        stream.with_pos(std::io::SeekFrom::Start(0), Self::parse_at_cursor)
    }

    fn parse_at_cursor<S: RangeStream>(stream: &mut S) -> Result<Self> {
        let mut header = Header::new_zeroed();
        stream.read_exact(header.as_mut_bytes())?;
        header.validate()?;

        let n = header.segment_num.get();
        let header_length = header.header_length.get();

        // The declared header region must hold the header, both tables and
        // the trailing digest, and must itself fit in the stream.
        let need = u128::from(HEADER_SIZE)
            + u128::from(n) * u128::from(SEGMENT_ENTRY_SIZE + DIGEST_ENTRY_SIZE)
            + u128::from(HEADER_DIGEST_SIZE);
        if need > u128::from(header_length) {
            bail!(ErrorInner::TruncatedHeader {
                declared: header_length,
                need: u64::try_from(need).unwrap_or(u64::MAX),
            });
        }
        if header_length > stream.size() {
            bail!(ErrorInner::HeaderOverrunsStream {
                declared: header_length,
                stream_len: stream.size(),
            });
        }

        let n = usize::try_from(n).map_err(|_| ErrorInner::OffsetOverflow)?;
        let mut segments = SegmentEntry::new_vec_zeroed(n).expect("alloc failed");
        stream.read_exact(segments.as_mut_bytes())?;
        let mut digests = DigestEntry::new_vec_zeroed(n).expect("alloc failed");
        stream.read_exact(digests.as_mut_bytes())?;
        let mut header_digest = HeaderDigest::new_zeroed();
        stream.read_exact(header_digest.as_mut_bytes())?;

        // Every segment payload must lie within the declared data region.
        let data_start = header_length;
        let data_end = data_start
            .checked_add(header.data_length.get())
            .ok_or(ErrorInner::OffsetOverflow)?;
        for (index, seg) in segments.iter().enumerate() {
            let offset = seg.offset.get();
            let size = seg.size.get();
            let ok = offset
                .checked_add(size)
                .is_some_and(|end| offset >= data_start && end <= data_end);
            if !ok {
                bail!(ErrorInner::SegmentOutOfRange { index, offset, size });
            }
        }

        trace!(
            "container: {} segments, data region [{data_start:#x}, {data_end:#x})",
            segments.len()
        );

        let mut tree = FsTree::new();
        let root = tree.root().ino();
        for seg in &segments {
            tree.push_child(
                root,
                segment_name(seg.id.get()),
                NodeKind::Regular,
                seg.size.get(),
                Some(seg.offset.get()),
            );
        }

        Ok(Self {
            header,
            segments: segments.into_boxed_slice(),
            digests: digests.into_boxed_slice(),
            header_digest,
            tree,
        })
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn segments(&self) -> &[SegmentEntry] {
        &self.segments
    }

    #[must_use]
    pub fn digests(&self) -> &[DigestEntry] {
        &self.digests
    }

    #[must_use]
    pub fn header_digest(&self) -> &HeaderDigest {
        &self.header_digest
    }

    /// The projected directory tree.
    #[must_use]
    pub fn tree(&self) -> &FsTree {
        &self.tree
    }

    /// Resolve a slash-delimited path; `None` on a miss.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<NodeRef<'_>> {
        self.tree.lookup(path)
    }
}
