//! # adox-query
//!
//! The operations adox exposes, built on three reusable pieces:
//!
//! - [`Paginator`]: offset cursors over list endpoints that ignore `$top`
//! - [`FanOut`]: one lookup per pool or queue, merged with partial-failure tolerance
//! - [`StreamingDownloader`]: readiness checks, then chunked writes to disk
//!
//! [`DevOpsTools`] wires them to a [`Connection`](adox_client::Connection) and
//! returns an [`Envelope`](adox_core::Envelope) from every operation.

pub mod download;
pub mod fanout;
pub mod pagination;
mod tools;

pub use download::{JobSelector, OutputTarget, StreamingDownloader};
pub use fanout::{AggregatedRecord, FanOut, FanOutResult, RecordFilter, ScopedRecord, SkippedScope};
pub use pagination::{Page, PageRequest, Paginator};
pub use tools::*;
