//! Merge engine
//!
//! Two layers: [`merge_postings`] fuses one term's posting chunks from
//! several segments into an attached encoder, and
//! [`MergeCandidatesCollection`] drives that over whole segments, walking
//! their term cursors in lockstep and producing a new segment session.
//!
//! Participants are always ordered most-recent first. When several
//! segments carry the same `(term, docID)`, the most recent one wins and
//! the older occurrences are discarded. A docID masked by the most recent
//! tied participant's delete registry is dropped entirely; older
//! participants are not consulted for it.

use tracing::debug;

use crate::error::{Result, StrataError};

use super::deletes::DeletedDocs;
use super::postings::{skiplist_region_len, PostingsEncoder};
use super::reader::SegmentSource;
use super::session::IndexSession;
use super::term_dict::TermsCursor;
use super::types::{DocId, Position, SegmentId, TermCtx, BLOCK_SIZE};
use super::varint::decode_varint;

/// One posting chunk taking part in a single-term merge
pub struct ChunkMergeParticipant<'a> {
    /// Block region of the chunk (past the inline skiplist)
    blocks: &'a [u8],
    pos: usize,
    deletes: &'a DeletedDocs,
    documents: [u32; BLOCK_SIZE],
    freqs: [u32; BLOCK_SIZE],
    /// Documents in the loaded block
    size: usize,
    /// Cursor within the loaded block
    idx: usize,
}

impl<'a> ChunkMergeParticipant<'a> {
    pub fn new(tctx: TermCtx, postings: &'a [u8], deletes: &'a DeletedDocs) -> Result<Self> {
        let offset = tctx.chunk.offset as usize;
        let length = tctx.chunk.length as usize;
        let chunk = postings
            .get(offset..offset + length)
            .ok_or(StrataError::ChunkOutOfBounds {
                offset: tctx.chunk.offset as u64,
                len: tctx.chunk.length as u64,
                stream_len: postings.len() as u64,
            })?;

        let region = skiplist_region_len(tctx.documents);
        if region > chunk.len() {
            return Err(StrataError::CorruptBlock("skiplist region exceeds chunk"));
        }

        // a virtual one-document block ending at doc 0 seeds refill()
        Ok(Self {
            blocks: &chunk[region..],
            pos: 0,
            deletes,
            documents: [0; BLOCK_SIZE],
            freqs: [0; BLOCK_SIZE],
            size: 1,
            idx: 0,
        })
    }

    fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn current_doc(&self) -> u32 {
        self.documents[self.idx]
    }

    /// Load the next block into the document/frequency arrays
    fn refill(&mut self) -> Result<()> {
        let prev_last = self.documents[self.size - 1];

        let delta = decode_varint(self.blocks, &mut self.pos)?;
        let body_len = decode_varint(self.blocks, &mut self.pos)? as usize;
        let n = *self
            .blocks
            .get(self.pos)
            .ok_or(StrataError::CorruptBlock("truncated block header"))? as usize;
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

        let mut id = prev_last;
        for i in 0..n - 1 {
            id += decode_varint(self.blocks, &mut self.pos)?;
            self.documents[i] = id;
        }
        for i in 0..n {
            self.freqs[i] = decode_varint(self.blocks, &mut self.pos)?;
        }

        self.documents[n - 1] = prev_last + delta;
        self.size = n;
        self.idx = 0;

        Ok(())
    }

    /// Re-encode the current document through the output encoder, consuming
    /// its position bytes
    fn append_to(&mut self, encoder: &mut PostingsEncoder) -> Result<()> {
        let doc = self.documents[self.idx];
        let freq = self.freqs[self.idx];

        encoder.begin_document(DocId(doc), freq);
        let mut position: Position = 0;
        for _ in 0..freq {
            position += decode_varint(self.blocks, &mut self.pos)?;
            encoder.new_position(position);
        }
        encoder.end_document();

        // consumed; skip_current must not re-skip these bytes
        self.freqs[self.idx] = 0;
        Ok(())
    }

    /// Discard the current document's unread positions and advance.
    /// Returns `true` when the loaded block is exhausted.
    fn skip_current(&mut self) -> Result<bool> {
        for _ in 0..self.freqs[self.idx] {
            decode_varint(self.blocks, &mut self.pos)?;
        }

        self.idx += 1;
        Ok(self.idx == self.size)
    }
}

/// Merge posting chunks, most-recent first, into the encoder's open term.
/// The caller brackets this with `begin_term` / `end_term`.
pub fn merge_postings(
    mut participants: Vec<ChunkMergeParticipant<'_>>,
    encoder: &mut PostingsEncoder,
) -> Result<()> {
    participants.retain(|p| !p.is_empty());
    for participant in &mut participants {
        participant.refill()?;
    }

    let mut tied: Vec<usize> = Vec::new();

    while !participants.is_empty() {
        let mut lowest = participants[0].current_doc();
        tied.clear();
        tied.push(0);

        for (i, participant) in participants.iter().enumerate().skip(1) {
            let doc = participant.current_doc();
            if doc < lowest {
                lowest = doc;
                tied.clear();
                tied.push(i);
            } else if doc == lowest {
                tied.push(i);
            }
        }

        // the most recent tied participant rules: it supplies the postings,
        // and its registry alone decides whether the doc survives
        if !participants[tied[0]].deletes.is_deleted(DocId(lowest)) {
            participants[tied[0]].append_to(encoder)?;
        }

        // advance highest index first so removals keep lower indices valid
        for &i in tied.iter().rev() {
            if participants[i].skip_current()? {
                if participants[i].pos != participants[i].blocks.len() {
                    participants[i].refill()?;
                } else {
                    // index-shift removal preserves recency order
                    participants.remove(i);
                }
            }
        }
    }

    Ok(())
}

/// One segment taking part in a multi-segment merge
pub struct MergeParticipant<'a> {
    pub id: SegmentId,
    pub terms: Box<dyn TermsCursor + 'a>,
    pub postings: &'a [u8],
    pub deletes: &'a DeletedDocs,
}

impl<'a> MergeParticipant<'a> {
    /// Participant over an opened segment source
    pub fn from_source(
        id: SegmentId,
        source: &'a SegmentSource,
        deletes: &'a DeletedDocs,
    ) -> Result<Self> {
        Ok(Self {
            id,
            terms: Box::new(source.terms_cursor()?),
            postings: source.postings_data(),
            deletes,
        })
    }
}

/// Collects segments for a merge and fuses them into a new segment session
pub struct MergeCandidatesCollection<'a> {
    participants: Vec<MergeParticipant<'a>>,
    committed: bool,
}

impl<'a> MergeCandidatesCollection<'a> {
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            committed: false,
        }
    }

    pub fn insert(&mut self, participant: MergeParticipant<'a>) {
        self.participants.push(participant);
    }

    /// Order participants most-recent first. Must be called before `merge`.
    pub fn commit(&mut self) {
        self.participants.sort_by(|a, b| b.id.cmp(&a.id));
        self.committed = true;
    }

    /// Fuse all participants into `session`: union of posting lists, minus
    /// masked documents, most-recent segment winning per `(term, docID)`
    pub fn merge(mut self, session: &mut IndexSession) -> Result<()> {
        assert!(self.committed, "commit() must order participants first");

        let mut encoder = PostingsEncoder::new();
        let mut tied: Vec<usize> = Vec::new();
        let mut merged_terms = 0u64;

        self.participants.retain(|p| !p.terms.done());

        while !self.participants.is_empty() {
            // lexicographically smallest current term across live cursors
            tied.clear();
            tied.push(0);
            let mut smallest = self.participants[0].terms.current().0;

            for (i, participant) in self.participants.iter().enumerate().skip(1) {
                let term = participant.terms.current().0;
                if term < smallest {
                    smallest = term;
                    tied.clear();
                    tied.push(i);
                } else if term == smallest {
                    tied.push(i);
                }
            }
            let term = smallest.to_vec();

            let single = tied.len() == 1;
            let tctx = if single && self.participants[tied[0]].deletes.is_empty() {
                // untouched single-source term: transplant the chunk verbatim
                let src = &self.participants[tied[0]];
                let src_tctx = src.terms.current().1;
                let src_postings = src.postings;
                session.append_chunk(src_postings, src_tctx)?
            } else {
                encoder.begin_term();

                let mut chunks = Vec::with_capacity(tied.len());
                for &i in &tied {
                    let participant = &self.participants[i];
                    chunks.push(ChunkMergeParticipant::new(
                        participant.terms.current().1,
                        participant.postings,
                        participant.deletes,
                    )?);
                }
                merge_postings(chunks, &mut encoder)?;

                encoder.end_term(session)
            };

            // a term whose every document was masked vanishes
            if tctx.documents > 0 {
                session.push_term(&term, tctx);
                merged_terms += 1;
            }

            for &i in tied.iter().rev() {
                self.participants[i].terms.next()?;
                if self.participants[i].terms.done() {
                    self.participants.remove(i);
                }
            }
        }

        debug!(terms = merged_terms, "merged segments");
        Ok(())
    }
}

impl Default for MergeCandidatesCollection<'_> {
    fn default() -> Self {
        Self::new()
    }
}
