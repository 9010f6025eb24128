//! Per-segment deleted-documents registry
//!
//! Segments are immutable; deletions that arrive after a segment is
//! written are tombstones tracked here and consulted during reads and
//! merges. The predicate is total over the u32 docID space.

use std::io;

use roaring::RoaringBitmap;

use super::types::DocId;

/// Registry of documents tombstoned since the segment was written
#[derive(Clone, Debug, Default)]
pub struct DeletedDocs {
    deleted: RoaringBitmap,
}

impl DeletedDocs {
    pub fn new() -> Self {
        Self {
            deleted: RoaringBitmap::new(),
        }
    }

    /// Mark a document as deleted
    pub fn insert(&mut self, doc: DocId) {
        self.deleted.insert(doc.0);
    }

    /// Whether `doc` is masked. Pure predicate, total over u32.
    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deleted.contains(doc.0)
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }

    pub fn len(&self) -> u64 {
        self.deleted.len()
    }

    /// Serialize for persistence alongside a segment
    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.deleted.serialized_size());
        self.deleted.serialize_into(&mut bytes)?;
        Ok(bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> io::Result<Self> {
        let deleted = RoaringBitmap::deserialize_from(bytes)?;
        Ok(Self { deleted })
    }
}

impl FromIterator<DocId> for DeletedDocs {
    fn from_iter<I: IntoIterator<Item = DocId>>(iter: I) -> Self {
        Self {
            deleted: iter.into_iter().map(|doc| doc.0).collect(),
        }
    }
}
