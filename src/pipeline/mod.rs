//! The data model and components for one compiled SQL's lifecycle from
//! PARSE through SYNC/CLOSE.

pub mod arena;
pub mod binder;
pub mod cursor;
pub mod dispatcher;
pub mod entry;
pub mod oid;
pub mod serializer;
pub mod sync;

pub use entry::{DescribeState, PipelineEntry, SqlPayload, StateSync};
pub use sync::{run_sync, SyncPassContext, SyncSignal};
