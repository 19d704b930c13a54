//! Fetch orchestration for audiograb.
//!
//! [`FetchService`] validates a request against its source, serves it from
//! the cache when possible, and otherwise runs the external tool through a
//! [`SingleFlightDispatcher`] so that concurrent requests for the same media
//! share one execution.

pub mod dispatcher;
pub mod executor;
pub mod service;
pub mod source;

pub use dispatcher::SingleFlightDispatcher;
pub use executor::{FetchExecutor, ProcessExecutor};
pub use service::{Executors, FetchOutcome, FetchService};
pub use source::{SourceKind, ToolSpec};
