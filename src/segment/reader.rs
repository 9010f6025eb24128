//! Read-only binding of a committed segment directory
//!
//! Maps the posting and terms files and parses the terms skiplist at open
//! time. Decoders and cursors borrow the mappings, so they must not
//! outlive the source; the mappings are released when the source drops.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::error::{Result, StrataError};

use super::manifest::{CodecKind, SegmentManifest};
use super::postings::PostingsDecoder;
use super::session::{POSTINGS_FILE, TERMS_DATA_FILE, TERMS_INDEX_FILE};
use super::term_dict::{
    lookup_term, unpack_terms_skiplist, PrefixCompressedTermsCursor, TermsSkiplistEntry,
};
use super::types::TermCtx;

/// One committed, immutable segment opened for reading
pub struct SegmentSource {
    dir: PathBuf,
    manifest: SegmentManifest,
    postings: Option<Mmap>,
    terms_data: Option<Mmap>,
    skiplist: Vec<TermsSkiplistEntry>,
}

impl SegmentSource {
    /// Open a segment directory, verifying its manifest and checksum
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest = SegmentManifest::read_from(dir)?;
        // pick the decoder implementation for the recorded codec; tags this
        // build does not know were already refused by read_from
        match manifest.codec()? {
            CodecKind::Block => {}
        }

        let postings = map_file(&dir.join(POSTINGS_FILE))?;
        let terms_data = map_file(&dir.join(TERMS_DATA_FILE))?;
        let terms_index = std::fs::read(dir.join(TERMS_INDEX_FILE))?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(postings.as_deref().unwrap_or(&[]));
        hasher.update(terms_data.as_deref().unwrap_or(&[]));
        hasher.update(&terms_index);
        let actual = hasher.finalize() as u64;
        if actual != manifest.checksum {
            return Err(StrataError::ChecksumMismatch {
                expected: manifest.checksum,
                actual,
            });
        }

        let skiplist = unpack_terms_skiplist(&terms_index)?;

        debug!(
            path = %dir.display(),
            terms = manifest.term_count,
            postings_bytes = manifest.postings_bytes,
            "opened segment"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            postings,
            terms_data,
            skiplist,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &SegmentManifest {
        &self.manifest
    }

    pub fn term_count(&self) -> u64 {
        self.manifest.term_count
    }

    /// The segment's full posting stream, consumed by decoders and merges
    pub fn postings_data(&self) -> &[u8] {
        self.postings.as_deref().unwrap_or(&[])
    }

    fn terms_data(&self) -> &[u8] {
        self.terms_data.as_deref().unwrap_or(&[])
    }

    /// Point lookup; `None` means the term does not occur in this segment
    pub fn lookup(&self, term: &[u8]) -> Result<Option<TermCtx>> {
        lookup_term(self.terms_data(), term, &self.skiplist)
    }

    /// Ascending cursor over all terms, for merging
    pub fn terms_cursor(&self) -> Result<PrefixCompressedTermsCursor<'_>> {
        PrefixCompressedTermsCursor::new(self.terms_data())
    }

    /// Decoder over one term's posting list
    pub fn decoder(&self, tctx: TermCtx) -> Result<PostingsDecoder<'_>> {
        PostingsDecoder::new(tctx, self.postings_data())
    }
}

fn map_file(path: &Path) -> Result<Option<Mmap>> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }

    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Some(mmap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::postings::PostingsEncoder;
    use crate::segment::session::IndexSession;
    use crate::segment::term_dict::TermsCursor;
    use crate::segment::types::DocId;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn build_segment(dir: &Path, terms: &[(&str, &[u32])]) {
        let mut session = IndexSession::new();
        let mut encoder = PostingsEncoder::new();

        for (term, docs) in terms {
            encoder.begin_term();
            for &doc in *docs {
                encoder.begin_document(DocId(doc), 1);
                encoder.new_position(1);
                encoder.end_document();
            }
            let tctx = encoder.end_term(&mut session);
            session.push_term(term.as_bytes(), tctx);
        }

        session.commit(dir).unwrap();
    }

    #[test]
    fn test_open_lookup_decode() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("segment_1");
        build_segment(&dir, &[("apple", &[1, 5, 9]), ("pear", &[2, 5])]);

        let source = SegmentSource::open(&dir).unwrap();
        assert_eq!(source.term_count(), 2);

        let tctx = source.lookup(b"apple").unwrap().unwrap();
        assert_eq!(tctx.documents, 3);

        let mut decoder = source.decoder(tctx).unwrap();
        assert_eq!(decoder.begin().unwrap(), DocId(1));
        assert!(decoder.next().unwrap());
        assert_eq!(decoder.current_document(), DocId(5));
        assert!(decoder.next().unwrap());
        assert_eq!(decoder.current_document(), DocId(9));
        assert!(!decoder.next().unwrap());

        assert!(source.lookup(b"missing").unwrap().is_none());
    }

    #[test]
    fn test_terms_cursor_over_segment() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("segment_1");
        build_segment(&dir, &[("pear", &[2]), ("apple", &[1]), ("mango", &[3])]);

        let source = SegmentSource::open(&dir).unwrap();
        let mut cursor = source.terms_cursor().unwrap();

        let mut terms = Vec::new();
        while !cursor.done() {
            terms.push(cursor.current().0.to_vec());
            cursor.next().unwrap();
        }
        assert_eq!(
            terms,
            vec![b"apple".to_vec(), b"mango".to_vec(), b"pear".to_vec()]
        );
    }

    #[test]
    fn test_open_empty_segment() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("segment_empty");
        build_segment(&dir, &[]);

        let source = SegmentSource::open(&dir).unwrap();
        assert_eq!(source.term_count(), 0);
        assert!(source.lookup(b"anything").unwrap().is_none());
        assert!(source.terms_cursor().unwrap().done());
    }

    #[test]
    fn test_checksum_mismatch() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("segment_1");
        build_segment(&dir, &[("apple", &[1, 2, 3])]);

        // flip one posting byte behind the manifest's back
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(dir.join(POSTINGS_FILE))
            .unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        drop(file);

        assert!(matches!(
            SegmentSource::open(&dir),
            Err(StrataError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_codec_refused_at_open() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("segment_1");
        build_segment(&dir, &[("apple", &[1])]);

        // doctor the manifest to carry a codec tag this build lacks
        let mut manifest = SegmentManifest::read_from(&dir).unwrap();
        manifest.codec_tag = 7;
        manifest.write_to(&dir).unwrap();

        assert!(matches!(
            SegmentSource::open(&dir),
            Err(StrataError::UnsupportedCodec(7))
        ));
    }

    #[test]
    fn test_open_missing_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(SegmentSource::open(&tmp.path().join("nope")).is_err());
    }
}
