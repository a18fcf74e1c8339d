//! Streaming serialization of the object graph
pub mod dumper;
pub mod error;
pub mod escape;
pub mod options;
pub mod record;
pub mod sink;
pub mod skip;
pub mod stats;

pub use dumper::{DumpSession, Dumper};
pub use error::DumpError;
pub use options::{DumpOptions, RecurseMode};
pub use record::{write_record, ObjectRecord};
pub use skip::SkipSet;
pub use stats::DumpStats;
