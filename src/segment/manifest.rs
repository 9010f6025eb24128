//! Per-segment manifest
//!
//! The manifest is the commit point of a segment: it is written last, to a
//! temp file that is fsynced and atomically renamed into place. A segment
//! directory without a manifest is garbage from an aborted commit.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Manifest file name within a segment directory
pub const MANIFEST_FILE: &str = "manifest";

/// Identity of the posting-list codec a segment was written with.
///
/// The manifest persists the raw numeric tag rather than this enum, so a
/// segment written by a newer build with a codec this build does not know
/// is refused with the offending tag instead of failing deserialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecKind {
    /// Block-structured varint codec with inline per-chunk skiplists
    Block,
}

impl CodecKind {
    /// Stable on-disk tag for this codec
    pub const fn tag(self) -> u32 {
        match self {
            CodecKind::Block => 1,
        }
    }

    /// Resolve a stored tag; tags this build does not implement are refused
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            1 => Ok(CodecKind::Block),
            other => Err(StrataError::UnsupportedCodec(other)),
        }
    }
}

/// Segment manifest, bincode-encoded on disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// Manifest format version
    pub version: u32,
    /// Raw codec tag; resolve with [`SegmentManifest::codec`]
    pub codec_tag: u32,
    /// Number of terms in the dictionary
    pub term_count: u64,
    /// Size of the posting file in bytes
    pub postings_bytes: u64,
    /// crc32 over `index`, `terms.data`, `terms.idx`, in that order
    pub checksum: u64,
}

impl SegmentManifest {
    /// Current manifest format version
    pub const VERSION: u32 = 1;

    /// The codec this segment's postings were written with
    pub fn codec(&self) -> Result<CodecKind> {
        CodecKind::from_tag(self.codec_tag)
    }

    /// Write the manifest into `dir` via temp file + fsync + rename
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;

        let tmp_path = dir.join(format!("{}.tmp", MANIFEST_FILE));
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, dir.join(MANIFEST_FILE))?;
        if let Ok(dir_handle) = File::open(dir) {
            let _ = dir_handle.sync_all();
        }

        Ok(())
    }

    /// Read the manifest from `dir`, refusing unknown versions and codec
    /// tags
    pub fn read_from(dir: &Path) -> Result<Self> {
        let bytes = fs::read(dir.join(MANIFEST_FILE))?;
        let manifest: SegmentManifest = bincode::deserialize(&bytes)?;

        if manifest.version != Self::VERSION {
            return Err(StrataError::UnsupportedVersion(manifest.version));
        }
        manifest.codec()?;

        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();

        let manifest = SegmentManifest {
            version: SegmentManifest::VERSION,
            codec_tag: CodecKind::Block.tag(),
            term_count: 42,
            postings_bytes: 1024,
            checksum: 0xC0FFEE,
        };
        manifest.write_to(dir.path()).unwrap();

        // no temp file left behind
        assert!(!dir.path().join("manifest.tmp").exists());

        let reread = SegmentManifest::read_from(dir.path()).unwrap();
        assert_eq!(reread.codec().unwrap(), CodecKind::Block);
        assert_eq!(reread.term_count, 42);
        assert_eq!(reread.postings_bytes, 1024);
        assert_eq!(reread.checksum, 0xC0FFEE);
    }

    #[test]
    fn test_unknown_codec_tag_refused() {
        let dir = TempDir::new().unwrap();

        let manifest = SegmentManifest {
            version: SegmentManifest::VERSION,
            codec_tag: 99,
            term_count: 0,
            postings_bytes: 0,
            checksum: 0,
        };
        manifest.write_to(dir.path()).unwrap();

        assert!(matches!(
            SegmentManifest::read_from(dir.path()),
            Err(StrataError::UnsupportedCodec(99))
        ));
    }

    #[test]
    fn test_unknown_version_refused() {
        let dir = TempDir::new().unwrap();

        let manifest = SegmentManifest {
            version: 7,
            codec_tag: CodecKind::Block.tag(),
            term_count: 0,
            postings_bytes: 0,
            checksum: 0,
        };
        manifest.write_to(dir.path()).unwrap();

        assert!(matches!(
            SegmentManifest::read_from(dir.path()),
            Err(StrataError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(SegmentManifest::read_from(dir.path()).is_err());
    }
}
