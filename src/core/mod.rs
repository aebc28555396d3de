pub mod error;
pub mod types;

pub use error::{ReplayError, Result};
pub use types::{CHUNK_SUFFIX, ChainPayload, Cursor, KickoffPayload, Segment, Sequence};
