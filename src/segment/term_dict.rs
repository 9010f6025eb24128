//! Prefix-compressed terms dictionary
//!
//! Terms are stored front-coded in ascending byte order in the data stream:
//!
//! ```text
//! data record:
//!     u8      prefix_len   shared with the previously emitted term
//!     u8      suffix_len
//!     [u8]    suffix bytes
//!     varint  documents
//!     varint  chunk_offset
//!     varint  chunk_len
//! ```
//!
//! Every [`TERMS_INDEX_INTERVAL`]-th term additionally emits a record into
//! the index stream and resets the prefix context, so each bucket can be
//! entered without history:
//!
//! ```text
//! index record:
//!     u8      term_len
//!     [u8]    full term bytes
//!     u32 LE  data_offset   of the term's data record
//!     varint  documents
//!     varint  chunk_offset
//!     varint  chunk_len
//! ```
//!
//! Lookup binary-searches the parsed index for the bucket, then scans at
//! most one bucket of front-coded records. Terms are raw byte strings of
//! at most 255 bytes.

use crate::error::{Result, StrataError};

use super::types::{ChunkRange, TermCtx, TERMS_INDEX_INTERVAL};
use super::varint::{decode_varint, Writer};

/// Maximum term length in bytes (u8 length fields)
pub const MAX_TERM_LEN: usize = 255;

/// One parsed record of the terms index stream
#[derive(Clone, Debug)]
pub struct TermsSkiplistEntry {
    pub term: Box<[u8]>,
    /// Offset of the term's record in the data stream
    pub data_offset: u32,
    pub tctx: TermCtx,
}

/// Serialize a terms table into front-coded `data` and sparse `index`
/// streams. The input may be in arbitrary order; equal terms are a
/// [`StrataError::TermOrder`] violation.
pub fn pack_terms(
    mut terms: Vec<(Vec<u8>, TermCtx)>,
    data: &mut Writer,
    index: &mut Writer,
) -> Result<()> {
    terms.sort_by(|a, b| a.0.cmp(&b.0));

    let mut prefix_base: &[u8] = &[];

    for (i, (term, tctx)) in terms.iter().enumerate() {
        if term.len() > MAX_TERM_LEN {
            return Err(StrataError::TermTooLong(term.len()));
        }
        if i > 0 && terms[i - 1].0 >= *term {
            return Err(StrataError::TermOrder);
        }

        if i % TERMS_INDEX_INTERVAL == 0 {
            index.put_u8(term.len() as u8);
            index.put_bytes(term);
            index.put_u32_le(data.len() as u32);
            index.put_varint(tctx.documents);
            index.put_varint(tctx.chunk.offset);
            index.put_varint(tctx.chunk.length);

            // index records reset the prefix context for random entry
            prefix_base = &[];
        }

        let prefix_len = common_prefix_len(prefix_base, term);
        data.put_u8(prefix_len as u8);
        data.put_u8((term.len() - prefix_len) as u8);
        data.put_bytes(&term[prefix_len..]);
        data.put_varint(tctx.documents);
        data.put_varint(tctx.chunk.offset);
        data.put_varint(tctx.chunk.length);

        prefix_base = term;
    }

    Ok(())
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Parse the terms index stream into an in-memory skiplist
pub fn unpack_terms_skiplist(index: &[u8]) -> Result<Vec<TermsSkiplistEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < index.len() {
        let term_len = index[pos] as usize;
        pos += 1;

        let term = index
            .get(pos..pos + term_len)
            .ok_or(StrataError::CorruptTerms("truncated index term"))?;
        pos += term_len;

        let offset_bytes = index
            .get(pos..pos + 4)
            .ok_or(StrataError::CorruptTerms("truncated index offset"))?;
        let data_offset =
            u32::from_le_bytes([offset_bytes[0], offset_bytes[1], offset_bytes[2], offset_bytes[3]]);
        pos += 4;

        let documents = decode_varint(index, &mut pos)?;
        let chunk_offset = decode_varint(index, &mut pos)?;
        let chunk_len = decode_varint(index, &mut pos)?;

        entries.push(TermsSkiplistEntry {
            term: term.into(),
            data_offset,
            tctx: TermCtx::new(documents, ChunkRange::new(chunk_offset, chunk_len)),
        });
    }

    Ok(entries)
}

/// Point lookup: `None` is a normal miss, not an error
pub fn lookup_term(
    data: &[u8],
    term: &[u8],
    skiplist: &[TermsSkiplistEntry],
) -> Result<Option<TermCtx>> {
    // rightmost index entry with entry.term <= term
    let idx = skiplist.partition_point(|entry| entry.term.as_ref() <= term);
    if idx == 0 {
        // the query precedes every indexed term
        return Ok(None);
    }

    let entry = &skiplist[idx - 1];
    if entry.term.as_ref() == term {
        return Ok(Some(entry.tctx));
    }

    // scan front-coded records from the bucket head
    let mut pos = entry.data_offset as usize;
    let mut cur: Vec<u8> = Vec::with_capacity(MAX_TERM_LEN);

    while pos < data.len() {
        let tctx = decode_term_record(data, &mut pos, &mut cur)?;

        if cur.as_slice() >= term {
            if cur.as_slice() == term {
                return Ok(Some(tctx));
            }
            return Ok(None);
        }
    }

    Ok(None)
}

/// Decode one data-stream record at `*pos`, reconstructing the term into
/// `term_buf`
fn decode_term_record(data: &[u8], pos: &mut usize, term_buf: &mut Vec<u8>) -> Result<TermCtx> {
    let header = data
        .get(*pos..*pos + 2)
        .ok_or(StrataError::CorruptTerms("truncated record header"))?;
    let prefix_len = header[0] as usize;
    let suffix_len = header[1] as usize;
    *pos += 2;

    if prefix_len > term_buf.len() {
        return Err(StrataError::CorruptTerms("prefix exceeds previous term"));
    }

    let suffix = data
        .get(*pos..*pos + suffix_len)
        .ok_or(StrataError::CorruptTerms("truncated term suffix"))?;
    *pos += suffix_len;

    term_buf.truncate(prefix_len);
    term_buf.extend_from_slice(suffix);

    let documents = decode_varint(data, pos)?;
    let chunk_offset = decode_varint(data, pos)?;
    let chunk_len = decode_varint(data, pos)?;

    Ok(TermCtx::new(
        documents,
        ChunkRange::new(chunk_offset, chunk_len),
    ))
}

/// Ordered cursor over a terms source, the abstraction boundary used by the
/// multi-segment merge. Implementations may be prefix-compressed or flat;
/// emission order is strictly ascending by term bytes.
pub trait TermsCursor {
    /// Current `(term, tctx)`; only valid while `!done()`
    fn current(&self) -> (&[u8], TermCtx);

    /// Advance past the current term
    fn next(&mut self) -> Result<()>;

    fn done(&self) -> bool;
}

/// Cursor over a front-coded terms data stream
pub struct PrefixCompressedTermsCursor<'a> {
    data: &'a [u8],
    pos: usize,
    term: Vec<u8>,
    tctx: TermCtx,
    exhausted: bool,
}

impl<'a> PrefixCompressedTermsCursor<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut cursor = Self {
            data,
            pos: 0,
            term: Vec::with_capacity(MAX_TERM_LEN),
            tctx: TermCtx::default(),
            exhausted: data.is_empty(),
        };

        if !cursor.exhausted {
            cursor.decode_next()?;
        }

        Ok(cursor)
    }

    fn decode_next(&mut self) -> Result<()> {
        self.tctx = decode_term_record(self.data, &mut self.pos, &mut self.term)?;
        Ok(())
    }
}

impl TermsCursor for PrefixCompressedTermsCursor<'_> {
    fn current(&self) -> (&[u8], TermCtx) {
        debug_assert!(!self.exhausted);
        (&self.term, self.tctx)
    }

    fn next(&mut self) -> Result<()> {
        if self.pos >= self.data.len() {
            self.exhausted = true;
        } else {
            self.decode_next()?;
        }
        Ok(())
    }

    fn done(&self) -> bool {
        self.exhausted
    }
}

/// Cursor over an in-memory terms table, for sources that keep their terms
/// uncompressed (e.g. a not-yet-committed session)
pub struct FlatTermsCursor {
    terms: Vec<(Vec<u8>, TermCtx)>,
    idx: usize,
}

impl FlatTermsCursor {
    pub fn new(mut terms: Vec<(Vec<u8>, TermCtx)>) -> Self {
        terms.sort_by(|a, b| a.0.cmp(&b.0));
        Self { terms, idx: 0 }
    }
}

impl TermsCursor for FlatTermsCursor {
    fn current(&self) -> (&[u8], TermCtx) {
        debug_assert!(!self.done());
        let (term, tctx) = &self.terms[self.idx];
        (term, *tctx)
    }

    fn next(&mut self) -> Result<()> {
        self.idx += 1;
        Ok(())
    }

    fn done(&self) -> bool {
        self.idx >= self.terms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tctx(documents: u32, offset: u32, length: u32) -> TermCtx {
        TermCtx::new(documents, ChunkRange::new(offset, length))
    }

    fn pack(terms: Vec<(&str, TermCtx)>) -> (Vec<u8>, Vec<TermsSkiplistEntry>) {
        let input: Vec<(Vec<u8>, TermCtx)> = terms
            .into_iter()
            .map(|(t, c)| (t.as_bytes().to_vec(), c))
            .collect();

        let mut data = Writer::new();
        let mut index = Writer::new();
        pack_terms(input, &mut data, &mut index).unwrap();

        let skiplist = unpack_terms_skiplist(index.data()).unwrap();
        (data.into_inner(), skiplist)
    }

    #[test]
    fn test_pack_lookup_small() {
        let (data, skiplist) = pack(vec![
            ("apple", tctx(5, 0, 40)),
            ("applet", tctx(1, 40, 10)),
            ("banana", tctx(2, 50, 20)),
            ("zelda", tctx(9, 70, 30)),
        ]);

        assert_eq!(skiplist.len(), 1);
        assert_eq!(&*skiplist[0].term, b"apple");

        assert_eq!(
            lookup_term(&data, b"apple", &skiplist).unwrap(),
            Some(tctx(5, 0, 40))
        );
        assert_eq!(
            lookup_term(&data, b"applet", &skiplist).unwrap(),
            Some(tctx(1, 40, 10))
        );
        assert_eq!(
            lookup_term(&data, b"zelda", &skiplist).unwrap(),
            Some(tctx(9, 70, 30))
        );

        // misses: before the first term, between terms, after the last
        assert_eq!(lookup_term(&data, b"aardvark", &skiplist).unwrap(), None);
        assert_eq!(lookup_term(&data, b"apples", &skiplist).unwrap(), None);
        assert_eq!(lookup_term(&data, b"zzz", &skiplist).unwrap(), None);
    }

    #[test]
    fn test_pack_lookup_many_buckets() {
        // 150 terms across several index buckets, inserted unsorted
        let mut input: Vec<(Vec<u8>, TermCtx)> = (0..150u32)
            .rev()
            .map(|i| (format!("term{:04}", i).into_bytes(), tctx(i + 1, i * 10, 10)))
            .collect();
        input.push((b"amiga".to_vec(), tctx(200, 5000, 8)));
        input.push((b"zelda".to_vec(), tctx(201, 5008, 8)));

        let mut data = Writer::new();
        let mut index = Writer::new();
        pack_terms(input, &mut data, &mut index).unwrap();
        let skiplist = unpack_terms_skiplist(index.data()).unwrap();

        assert_eq!(skiplist.len(), 152usize.div_ceil(TERMS_INDEX_INTERVAL));

        for i in 0..150u32 {
            let term = format!("term{:04}", i);
            assert_eq!(
                lookup_term(data.data(), term.as_bytes(), &skiplist).unwrap(),
                Some(tctx(i + 1, i * 10, 10)),
                "lookup {}",
                term
            );
        }
        assert_eq!(
            lookup_term(data.data(), b"amiga", &skiplist).unwrap(),
            Some(tctx(200, 5000, 8))
        );
        assert_eq!(
            lookup_term(data.data(), b"zelda", &skiplist).unwrap(),
            Some(tctx(201, 5008, 8))
        );
        assert_eq!(lookup_term(data.data(), b"nonexistent", &skiplist).unwrap(), None);
    }

    #[test]
    fn test_cursor_ascending_order() {
        let mut input: Vec<(Vec<u8>, TermCtx)> = (0..100u32)
            .map(|i| (format!("w{:03}", i).into_bytes(), tctx(1, i, 1)))
            .collect();
        input.reverse();

        let mut data = Writer::new();
        let mut index = Writer::new();
        pack_terms(input, &mut data, &mut index).unwrap();

        let mut cursor = PrefixCompressedTermsCursor::new(data.data()).unwrap();
        let mut seen = Vec::new();
        while !cursor.done() {
            let (term, tctx) = cursor.current();
            seen.push((term.to_vec(), tctx));
            cursor.next().unwrap();
        }

        assert_eq!(seen.len(), 100);
        for window in seen.windows(2) {
            assert!(window[0].0 < window[1].0, "cursor must ascend");
        }
        assert_eq!(seen[13].0, b"w013".to_vec());
        assert_eq!(seen[13].1, tctx(1, 13, 1));
    }

    #[test]
    fn test_empty_dictionary() {
        let (data, skiplist) = pack(vec![]);
        assert!(skiplist.is_empty());
        assert_eq!(lookup_term(&data, b"anything", &skiplist).unwrap(), None);

        let cursor = PrefixCompressedTermsCursor::new(&data).unwrap();
        assert!(cursor.done());
    }

    #[test]
    fn test_duplicate_terms_rejected() {
        let input = vec![
            (b"dup".to_vec(), tctx(1, 0, 1)),
            (b"dup".to_vec(), tctx(2, 1, 1)),
        ];
        let mut data = Writer::new();
        let mut index = Writer::new();
        assert!(matches!(
            pack_terms(input, &mut data, &mut index),
            Err(StrataError::TermOrder)
        ));
    }

    #[test]
    fn test_overlong_term_rejected() {
        let input = vec![(vec![b'x'; 300], tctx(1, 0, 1))];
        let mut data = Writer::new();
        let mut index = Writer::new();
        assert!(matches!(
            pack_terms(input, &mut data, &mut index),
            Err(StrataError::TermTooLong(300))
        ));
    }

    #[test]
    fn test_flat_cursor() {
        let terms = vec![
            (b"pear".to_vec(), tctx(1, 0, 4)),
            (b"apple".to_vec(), tctx(2, 4, 4)),
            (b"mango".to_vec(), tctx(3, 8, 4)),
        ];
        let mut cursor = FlatTermsCursor::new(terms);

        let mut seen = Vec::new();
        while !cursor.done() {
            seen.push(cursor.current().0.to_vec());
            cursor.next().unwrap();
        }
        assert_eq!(seen, vec![b"apple".to_vec(), b"mango".to_vec(), b"pear".to_vec()]);
    }

    #[test]
    fn test_lookup_at_bucket_boundaries() {
        // exactly one term past a bucket boundary
        let input: Vec<(Vec<u8>, TermCtx)> = (0..=TERMS_INDEX_INTERVAL as u32)
            .map(|i| (format!("k{:03}", i).into_bytes(), tctx(1, i, 1)))
            .collect();

        let mut data = Writer::new();
        let mut index = Writer::new();
        pack_terms(input, &mut data, &mut index).unwrap();
        let skiplist = unpack_terms_skiplist(index.data()).unwrap();
        assert_eq!(skiplist.len(), 2);

        // bucket heads resolve via the index entry payload
        assert_eq!(lookup_term(data.data(), b"k000", &skiplist).unwrap(), Some(tctx(1, 0, 1)));
        let boundary = format!("k{:03}", TERMS_INDEX_INTERVAL);
        assert_eq!(
            lookup_term(data.data(), boundary.as_bytes(), &skiplist).unwrap(),
            Some(tctx(1, TERMS_INDEX_INTERVAL as u32, 1))
        );
        // last term of the first bucket
        let last_in_bucket = format!("k{:03}", TERMS_INDEX_INTERVAL - 1);
        assert_eq!(
            lookup_term(data.data(), last_in_bucket.as_bytes(), &skiplist).unwrap(),
            Some(tctx(1, TERMS_INDEX_INTERVAL as u32 - 1, 1))
        );
    }
}
