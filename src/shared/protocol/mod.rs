pub mod error_codes;
pub mod messages;

pub use error_codes::{ErrorRecord, LongError, ShortError};
pub use messages::{ChunkPayload, ClientRequest, ClusterMessage, ServerResponse};

#[cfg(test)]
mod error_codes_test;
#[cfg(test)]
mod messages_test;
