//! Core types for the segment-based inverted index

use serde::{Deserialize, Serialize};
use std::fmt;

/// Segment identifier (monotonically increasing; higher means more recent)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.0)
    }
}

/// Document identifier within a segment
///
/// `0` is reserved (the encoder rejects it) and `u32::MAX` is the
/// exhausted-decoder sentinel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(pub u32);

impl DocId {
    /// Sentinel returned by an exhausted decoder
    pub const MAX: DocId = DocId(u32::MAX);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Term identifier interned for the duration of one query execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TermId(pub u32);

/// Term occurrence position within a document, strictly increasing per
/// (document, term)
pub type Position = u32;

/// One materialized term occurrence
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TermHit {
    pub payload: u64,
    pub position: Position,
    pub flags: u8,
}

/// Records term occurrences for the document currently being materialized.
/// Implemented by the query-execution layer; idempotent for duplicate
/// (term, position) pairs.
pub trait WordSpace {
    fn set(&mut self, term: TermId, position: Position);
}

/// Byte range of one term's posting chunk inside the segment's posting file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkRange {
    pub offset: u32,
    pub length: u32,
}

impl ChunkRange {
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn end(&self) -> u32 {
        self.offset + self.length
    }
}

/// Posting-list locator for one term, produced at `end_term` and stored in
/// the terms dictionary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TermCtx {
    /// Number of documents in the posting list
    pub documents: u32,
    /// Chunk range in the segment's posting file
    pub chunk: ChunkRange,
}

impl TermCtx {
    pub fn new(documents: u32, chunk: ChunkRange) -> Self {
        Self { documents, chunk }
    }
}

/// Fixed block capacity of the posting codec. Every block except possibly
/// the last holds exactly this many postings.
pub const BLOCK_SIZE: usize = 128;

/// A posting skiplist entry is recorded once every this many block flushes
pub const SKIPLIST_STEP: usize = 16;

/// A terms-index record is emitted every this many terms during pack;
/// lookup scans at most this many records after the skiplist jump
pub const TERMS_INDEX_INTERVAL: usize = 32;
