//! The query transport core: parameter extraction, the request lifecycle,
//! the buffered writer and the response framer.

pub mod args;
pub mod duration;
pub mod errors;
pub mod framer;
pub mod media;
pub mod prepared;
pub mod request;
pub mod scan_vector;
pub mod state;
pub mod tristate;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use args::{Credential, Profile, QueryParams, Statement};
pub use errors::{CasMismatchPolicy, ErrorCode, QueryError, RetryPolicy};
pub use framer::{ResultRow, Row};
pub use media::MediaType;
pub use prepared::{Prepared, PreparedCache, PreparedStatements};
pub use request::{Request, RequestPool, ResponseDefaults, ResponseOptions};
pub use scan_vector::{ScanConfig, ScanConsistency, ScanVector, ScanVectorEntry, ScanVectorSource};
pub use state::State;
pub use tristate::Tristate;
pub use writer::{BufferPool, BufferedWriter, Handoff, Lease, ResponseSink};
