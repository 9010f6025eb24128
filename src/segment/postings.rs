//! Block-structured posting-list codec
//!
//! Each term's posting list is a chunk in the segment's posting file:
//!
//! ```text
//! chunk:
//!     entry[E]  inline skiplist, E = (ceil(documents / 128)) / SKIPLIST_STEP
//!               entry = (u32 LE prev_block_last_doc, u32 LE block_offset)
//!     block[..] posting blocks
//! block:
//!     varint  delta from previous block's last docID to this block's last
//!     varint  body length in bytes (doc deltas + freqs + position deltas)
//!     u8      n, number of documents in the block (1..=128)
//!     varint[n-1]      doc deltas; the last doc is recovered from the header
//!     varint[n]        frequencies
//!     varint[sum(freq)] position deltas, restarting at zero per document
//! ```
//!
//! Skiplist offsets are relative to the end of the skiplist region, so a
//! chunk stays valid when transplanted verbatim into another posting file.
//! Document IDs are strictly increasing within a chunk; positions are
//! strictly increasing within a document.

use crate::error::{Result, StrataError};

use super::session::IndexSession;
use super::types::{
    DocId, Position, TermCtx, TermHit, TermId, WordSpace, BLOCK_SIZE, SKIPLIST_STEP,
};
use super::varint::{decode_varint, Writer};

/// Bytes per inline skiplist entry
pub(crate) const SKIPLIST_ENTRY_BYTES: usize = 8;

/// Number of inline skiplist entries for a posting list of `documents` docs.
/// Deterministic, so the chunk layout needs no extra framing.
pub(crate) fn skiplist_entry_count(documents: u32) -> usize {
    let blocks = (documents as usize + BLOCK_SIZE - 1) / BLOCK_SIZE;
    blocks / SKIPLIST_STEP
}

/// Bytes occupied by the inline skiplist region of a chunk
pub(crate) fn skiplist_region_len(documents: u32) -> usize {
    skiplist_entry_count(documents) * SKIPLIST_ENTRY_BYTES
}

/// Encoder for posting lists.
///
/// Usage per term: `begin_term`, then for each document in ascending docID
/// order `begin_document` / `new_position`* / `end_document`, then
/// `end_term` which appends the finished chunk to the session's posting
/// stream and returns its [`TermCtx`].
///
/// Monotonicity violations are programmer errors and panic; the encoder
/// makes no attempt to recover.
pub struct PostingsEncoder {
    /// Encoded blocks of the current term
    blocks: Writer,
    /// Skiplist entries gathered for the current term
    skiplist: Vec<(u32, u32)>,
    /// Scratch for the block being flushed (doc deltas + freqs)
    block: Writer,
    /// Position deltas of the block being built
    hits: Writer,
    doc_deltas: [u32; BLOCK_SIZE],
    block_freqs: [u32; BLOCK_SIZE],
    /// Documents accumulated since the last block flush
    block_len: usize,
    /// Last docID passed to `begin_document` (0 before the first)
    cur_doc: u32,
    prev_block_last_doc: u32,
    last_position: Position,
    /// Declared frequency of the open document
    cur_doc_freq: u32,
    /// Positions added to the open document so far
    cur_doc_hits: u32,
    term_documents: u32,
    skiplist_countdown: usize,
}

impl PostingsEncoder {
    pub fn new() -> Self {
        Self {
            blocks: Writer::new(),
            skiplist: Vec::new(),
            block: Writer::new(),
            hits: Writer::new(),
            doc_deltas: [0; BLOCK_SIZE],
            block_freqs: [0; BLOCK_SIZE],
            block_len: 0,
            cur_doc: 0,
            prev_block_last_doc: 0,
            last_position: 0,
            cur_doc_freq: 0,
            cur_doc_hits: 0,
            term_documents: 0,
            skiplist_countdown: SKIPLIST_STEP,
        }
    }

    /// Open a new term's posting list, resetting all per-term state
    pub fn begin_term(&mut self) {
        self.blocks.clear();
        self.skiplist.clear();
        self.block.clear();
        self.hits.clear();
        self.block_len = 0;
        self.cur_doc = 0;
        self.prev_block_last_doc = 0;
        self.last_position = 0;
        self.cur_doc_freq = 0;
        self.cur_doc_hits = 0;
        self.term_documents = 0;
        self.skiplist_countdown = SKIPLIST_STEP;
    }

    /// Open a document. `doc` must be greater than the previous document's
    /// ID within this term (docID 0 is reserved) and `frequency >= 1`.
    pub fn begin_document(&mut self, doc: DocId, frequency: u32) {
        assert!(
            doc.0 > self.cur_doc,
            "documents must be added in strictly ascending order ({} after {})",
            doc.0,
            self.cur_doc
        );
        assert!(frequency >= 1, "document frequency must be at least 1");

        self.doc_deltas[self.block_len] = doc.0 - self.cur_doc;
        self.block_freqs[self.block_len] = frequency;
        self.cur_doc = doc.0;
        self.cur_doc_freq = frequency;
        self.cur_doc_hits = 0;
        self.last_position = 0;
    }

    /// Record an occurrence. Positions must be strictly increasing within
    /// the document.
    pub fn new_position(&mut self, position: Position) {
        assert!(
            self.cur_doc_hits == 0 || position > self.last_position,
            "positions must be strictly increasing ({} after {})",
            position,
            self.last_position
        );
        assert!(
            self.cur_doc_hits < self.cur_doc_freq,
            "more positions than the declared frequency"
        );

        self.hits.put_varint(position - self.last_position);
        self.last_position = position;
        self.cur_doc_hits += 1;
    }

    /// Close the current document, flushing a block once `BLOCK_SIZE`
    /// documents have accumulated
    pub fn end_document(&mut self) {
        assert!(
            self.cur_doc_hits == self.cur_doc_freq,
            "document closed with {} positions, {} declared",
            self.cur_doc_hits,
            self.cur_doc_freq
        );

        self.block_len += 1;
        self.term_documents += 1;

        if self.block_len == BLOCK_SIZE {
            self.commit_block();
        }
    }

    /// Flush any partial block and append the finished chunk to the
    /// session's posting stream, returning the term's locator
    pub fn end_term(&mut self, session: &mut IndexSession) -> TermCtx {
        if self.block_len > 0 {
            self.commit_block();
        }

        let chunk = session.append_term_chunk(&self.skiplist, self.blocks.data());
        TermCtx::new(self.term_documents, chunk)
    }

    fn commit_block(&mut self) {
        let n = self.block_len;
        let delta = self.cur_doc - self.prev_block_last_doc;

        // The last document is not delta-encoded in the body; it is
        // recovered from the header delta.
        self.block.clear();
        for i in 0..n - 1 {
            self.block.put_varint(self.doc_deltas[i]);
        }
        for i in 0..n {
            self.block.put_varint(self.block_freqs[i]);
        }

        let body_len = self.block.len() + self.hits.len();

        self.skiplist_countdown -= 1;
        if self.skiplist_countdown == 0 {
            // Keyed by the previous block's last docID: unpacking a block
            // requires that reference point.
            self.skiplist
                .push((self.prev_block_last_doc, self.blocks.len() as u32));
            self.skiplist_countdown = SKIPLIST_STEP;
        }

        self.blocks.put_varint(delta);
        self.blocks.put_varint(body_len as u32);
        self.blocks.put_u8(n as u8);
        self.blocks.put_bytes(self.block.data());
        self.blocks.put_bytes(self.hits.data());
        self.hits.clear();

        self.prev_block_last_doc = self.cur_doc;
        self.block_len = 0;
    }
}

impl Default for PostingsEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder cursor over one term's posting chunk.
///
/// Borrows the segment's posting bytes; it must not outlive the mapping
/// that owns them. Exhaustion is signaled by [`DocId::MAX`].
pub struct PostingsDecoder<'a> {
    /// Block region of the chunk (past the inline skiplist)
    blocks: &'a [u8],
    pos: usize,
    skiplist: Vec<(u32, u32)>,
    skiplist_idx: usize,
    documents: [u32; BLOCK_SIZE],
    freqs: [u32; BLOCK_SIZE],
    block_doc_idx: usize,
    /// Last docID of the currently loaded block; `u32::MAX` once exhausted
    block_last_doc: u32,
}

impl<'a> PostingsDecoder<'a> {
    /// Bind a decoder to `tctx.chunk` within `postings`. An empty chunk
    /// yields a decoder that is already exhausted.
    pub fn new(tctx: TermCtx, postings: &'a [u8]) -> Result<Self> {
        let offset = tctx.chunk.offset as usize;
        let length = tctx.chunk.length as usize;
        let chunk = postings
            .get(offset..offset + length)
            .ok_or(StrataError::ChunkOutOfBounds {
                offset: tctx.chunk.offset as u64,
                len: tctx.chunk.length as u64,
                stream_len: postings.len() as u64,
            })?;

        let mut skiplist = Vec::new();
        let mut blocks: &[u8] = chunk;

        if !chunk.is_empty() {
            let region = skiplist_region_len(tctx.documents);
            if region > chunk.len() {
                return Err(StrataError::CorruptBlock("skiplist region exceeds chunk"));
            }

            let (head, rest) = chunk.split_at(region);
            for entry in head.chunks_exact(SKIPLIST_ENTRY_BYTES) {
                let prev_last = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
                let block_offset = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
                skiplist.push((prev_last, block_offset));
            }
            blocks = rest;
        }

        let mut decoder = Self {
            blocks,
            pos: 0,
            skiplist,
            skiplist_idx: 0,
            documents: [0; BLOCK_SIZE],
            freqs: [0; BLOCK_SIZE],
            block_doc_idx: 0,
            block_last_doc: 0,
        };

        if decoder.blocks.is_empty() {
            decoder.finalize();
        }

        Ok(decoder)
    }

    /// Unpack the first block and return its first document, or
    /// [`DocId::MAX`] for an empty posting list
    pub fn begin(&mut self) -> Result<DocId> {
        if self.pos != self.blocks.len() {
            self.unpack_next_block()?;
        } else {
            self.finalize();
        }

        Ok(self.current_document())
    }

    /// Current document, [`DocId::MAX`] iff exhausted
    pub fn current_document(&self) -> DocId {
        DocId(self.documents[self.block_doc_idx])
    }

    /// Frequency of the current document. Zeroed by `materialize_hits`, so
    /// only valid before hits are materialized for this document.
    pub fn current_frequency(&self) -> u32 {
        self.freqs[self.block_doc_idx]
    }

    /// Number of skiplist entries parsed from the chunk head
    pub fn skiplist_len(&self) -> usize {
        self.skiplist.len()
    }

    /// Skiplist cursor; advances monotonically as seeks consume entries
    pub fn skiplist_idx(&self) -> usize {
        self.skiplist_idx
    }

    /// Decode the current document's positions into `out[..freq]` and the
    /// word space. Resets the slot's frequency to zero so subsequent
    /// advancement does not re-skip the consumed bytes.
    pub fn materialize_hits<W: WordSpace>(
        &mut self,
        term: TermId,
        wordspace: &mut W,
        out: &mut [TermHit],
    ) -> Result<()> {
        let freq = self.freqs[self.block_doc_idx] as usize;
        assert!(out.len() >= freq, "output slice shorter than frequency");

        let mut position: Position = 0;
        for hit in out.iter_mut().take(freq) {
            position += decode_varint(self.blocks, &mut self.pos)?;
            wordspace.set(term, position);
            *hit = TermHit {
                payload: 0,
                position,
                flags: 0,
            };
        }

        self.freqs[self.block_doc_idx] = 0;
        Ok(())
    }

    /// Advance to the next document; `false` on exhaustion
    pub fn next(&mut self) -> Result<bool> {
        if self.documents[self.block_doc_idx] == self.block_last_doc {
            // last document of the loaded block
            self.skip_block_doc()?;

            if self.pos != self.blocks.len() {
                self.unpack_next_block()?;
            } else {
                self.finalize();
                return Ok(false);
            }
        } else {
            self.skip_block_doc()?;
        }

        Ok(true)
    }

    /// Position at the smallest document `>= target`; `true` iff equal.
    /// Targets must be non-decreasing across calls.
    pub fn seek(&mut self, target: DocId) -> Result<bool> {
        let target = target.0;

        if target > self.block_last_doc {
            self.skip_remaining_block_documents()?;

            if self.pos == self.blocks.len() {
                self.finalize();
                return Ok(false);
            }

            if self.skiplist_idx != self.skiplist.len() {
                if let Some(idx) = self.skiplist_search(target) {
                    self.block_last_doc = self.skiplist[idx].0;
                    self.pos = self.skiplist[idx].1 as usize;
                    self.skiplist_idx = idx + 1;
                }
            }

            self.seek_block(target)?;
        }

        // If the target is anywhere, it is in the loaded block
        loop {
            let doc = self.documents[self.block_doc_idx];

            if doc > target {
                return Ok(false);
            } else if doc == target {
                return Ok(true);
            } else if doc == self.block_last_doc {
                // block exhausted without reaching the target
                return Ok(false);
            } else {
                self.skip_block_doc()?;
            }
        }
    }

    /// Rightmost usable skiplist entry for `target`, searching from the
    /// current skiplist cursor (prior jumps are monotonic)
    fn skiplist_search(&self, target: u32) -> Option<usize> {
        let tail = &self.skiplist[self.skiplist_idx..];
        let k = tail.partition_point(|entry| entry.0 < target);

        if k == 0 {
            None
        } else {
            Some(self.skiplist_idx + k - 1)
        }
    }

    /// Walk block headers until one may contain `target`, then unpack it.
    /// Exhausts the decoder if every remaining block ends below the target.
    fn seek_block(&mut self, target: u32) -> Result<()> {
        loop {
            let (this_last, body_len, n) = self.read_block_header()?;

            if target > this_last {
                self.pos += body_len;

                if self.pos == self.blocks.len() {
                    self.finalize();
                    return Ok(());
                }

                self.block_last_doc = this_last;
            } else {
                return self.unpack_block(this_last, n);
            }
        }
    }

    fn unpack_next_block(&mut self) -> Result<()> {
        let (this_last, _body_len, n) = self.read_block_header()?;
        self.unpack_block(this_last, n)
    }

    /// Read and validate a block header at the stream cursor
    fn read_block_header(&mut self) -> Result<(u32, usize, usize)> {
        let delta = decode_varint(self.blocks, &mut self.pos)?;
        let body_len = decode_varint(self.blocks, &mut self.pos)? as usize;
        let n = *self
            .blocks
            .get(self.pos)
            .ok_or(StrataError::CorruptBlock("truncated block header"))?
            as usize;
        self.pos += 1;

        if n == 0 {
            return Err(StrataError::CorruptBlock("block with zero documents"));
        }
        if n > BLOCK_SIZE {
            return Err(StrataError::CorruptBlock("block count exceeds capacity"));
        }
        if self.pos + body_len > self.blocks.len() {
            return Err(StrataError::CorruptBlock("block body exceeds chunk"));
        }

        Ok((self.block_last_doc + delta, body_len, n))
    }

    fn unpack_block(&mut self, this_last: u32, n: usize) -> Result<()> {
        let mut id = self.block_last_doc;

        for i in 0..n - 1 {
            id += decode_varint(self.blocks, &mut self.pos)?;
            self.documents[i] = id;
        }

        for i in 0..n {
            self.freqs[i] = decode_varint(self.blocks, &mut self.pos)?;
        }

        self.block_last_doc = this_last;
        self.documents[n - 1] = this_last;
        self.block_doc_idx = 0;

        Ok(())
    }

    /// Skip the current document's unread position bytes and step to the
    /// next slot in the block
    fn skip_block_doc(&mut self) -> Result<()> {
        let freq = self.freqs[self.block_doc_idx];
        self.block_doc_idx += 1;

        for _ in 0..freq {
            decode_varint(self.blocks, &mut self.pos)?;
        }

        Ok(())
    }

    /// Discard position bytes for every remaining document of the loaded
    /// block, leaving the cursor at the next block header
    fn skip_remaining_block_documents(&mut self) -> Result<()> {
        loop {
            let freq = self.freqs[self.block_doc_idx];

            for _ in 0..freq {
                decode_varint(self.blocks, &mut self.pos)?;
            }

            if self.documents[self.block_doc_idx] == self.block_last_doc {
                return Ok(());
            }

            self.block_doc_idx += 1;
        }
    }

    fn finalize(&mut self) {
        self.block_last_doc = u32::MAX;
        self.documents[0] = u32::MAX;
        self.freqs[0] = 0;
        self.block_doc_idx = 0;
        self.pos = self.blocks.len();
    }
}
