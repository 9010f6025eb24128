pub mod error;
pub mod segment;

pub use error::{Result, StrataError};
pub use segment::{
    CodecKind, DeletedDocs, IndexSession, MergeCandidatesCollection, MergeParticipant,
    PostingsDecoder, PostingsEncoder, SegmentManifest, SegmentSource, TermCtx, TermsCursor,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
