//! Index session: accumulates one segment's posting stream and terms table,
//! then commits them as an immutable segment directory
//!
//! A session owns the growing posting byte stream. Encoders append finished
//! term chunks through `PostingsEncoder::end_term`; whole chunks from other
//! segments can be transplanted verbatim with [`IndexSession::append_chunk`].
//! `commit` packs the accumulated `{term -> TermCtx}` table and writes the
//! segment files:
//!
//! - `index` — concatenated posting chunks
//! - `terms.data` — front-coded term records
//! - `terms.idx` — sparse terms index
//! - `manifest` — codec tag, counts, checksum (written atomically, last)
//!
//! An aborted commit may leave partial files behind; cleaning them up is
//! the caller's responsibility. Nothing references a segment directory
//! until its manifest exists.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, StrataError};

use super::manifest::{CodecKind, SegmentManifest};
use super::term_dict::pack_terms;
use super::types::{ChunkRange, TermCtx};
use super::varint::Writer;

/// File names within a segment directory
pub const POSTINGS_FILE: &str = "index";
pub const TERMS_DATA_FILE: &str = "terms.data";
pub const TERMS_INDEX_FILE: &str = "terms.idx";

/// A single-segment indexing session.
///
/// Only one encoder may be active between a `begin_term`/`end_term` pair;
/// the session itself is single-threaded.
pub struct IndexSession {
    index_out: Writer,
    terms: Vec<(Vec<u8>, TermCtx)>,
}

impl IndexSession {
    pub fn new() -> Self {
        Self {
            index_out: Writer::new(),
            terms: Vec::new(),
        }
    }

    /// The posting stream accumulated so far
    pub fn postings_data(&self) -> &[u8] {
        self.index_out.data()
    }

    /// Number of terms recorded so far
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Terms recorded so far, in insertion order
    pub fn terms(&self) -> &[(Vec<u8>, TermCtx)] {
        &self.terms
    }

    /// Record a term's posting-list locator for the commit-time terms table
    pub fn push_term(&mut self, term: &[u8], tctx: TermCtx) {
        self.terms.push((term.to_vec(), tctx));
    }

    /// Transplant a term's chunk verbatim from another segment's posting
    /// stream. Valid because chunk-internal offsets are chunk-relative.
    pub fn append_chunk(&mut self, src_postings: &[u8], src: TermCtx) -> Result<TermCtx> {
        let offset = src.chunk.offset as usize;
        let length = src.chunk.length as usize;
        let bytes =
            src_postings
                .get(offset..offset + length)
                .ok_or(StrataError::ChunkOutOfBounds {
                    offset: src.chunk.offset as u64,
                    len: src.chunk.length as u64,
                    stream_len: src_postings.len() as u64,
                })?;

        let out_offset = self.index_out.len() as u32;
        self.index_out.put_bytes(bytes);

        Ok(TermCtx::new(
            src.documents,
            ChunkRange::new(out_offset, src.chunk.length),
        ))
    }

    /// Append a finished term chunk (inline skiplist, then blocks) to the
    /// posting stream. Called by `PostingsEncoder::end_term`.
    pub(crate) fn append_term_chunk(&mut self, skiplist: &[(u32, u32)], blocks: &[u8]) -> ChunkRange {
        let offset = self.index_out.len() as u32;

        for &(prev_last_doc, block_offset) in skiplist {
            self.index_out.put_u32_le(prev_last_doc);
            self.index_out.put_u32_le(block_offset);
        }
        self.index_out.put_bytes(blocks);

        ChunkRange::new(offset, self.index_out.len() as u32 - offset)
    }

    /// Pack the terms table and write the segment directory. The manifest
    /// is written last, via a temp file and atomic rename.
    pub fn commit(self, dir: &Path) -> Result<SegmentManifest> {
        fs::create_dir_all(dir)?;

        let mut terms_data = Writer::new();
        let mut terms_index = Writer::new();
        let term_count = self.terms.len() as u64;
        pack_terms(self.terms, &mut terms_data, &mut terms_index)?;

        write_file(&dir.join(POSTINGS_FILE), self.index_out.data())?;
        write_file(&dir.join(TERMS_DATA_FILE), terms_data.data())?;
        write_file(&dir.join(TERMS_INDEX_FILE), terms_index.data())?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.index_out.data());
        hasher.update(terms_data.data());
        hasher.update(terms_index.data());

        let manifest = SegmentManifest {
            version: SegmentManifest::VERSION,
            codec_tag: CodecKind::Block.tag(),
            term_count,
            postings_bytes: self.index_out.len() as u64,
            checksum: hasher.finalize() as u64,
        };
        manifest.write_to(dir)?;

        debug!(
            path = %dir.display(),
            terms = term_count,
            postings_bytes = manifest.postings_bytes,
            "committed segment"
        );

        Ok(manifest)
    }
}

impl Default for IndexSession {
    fn default() -> Self {
        Self::new()
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
