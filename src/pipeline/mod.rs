//! Resumable, checkpointed enrichment stages keyed by IMDb id.

pub mod checkpoint;
pub mod driver;
pub mod merge;
pub mod progress;
pub mod quota;
pub mod schema;
pub mod shutdown;
pub mod table;

pub use checkpoint::CheckpointStore;
pub use driver::{RunOptions, SourceAdapter, StageDriver, StageInput, StageSummary, StopReason};
pub use merge::{AbsentPolicy, ProviderColumns};
pub use quota::{QuotaLimits, QuotaState, QuotaStatus, QuotaTracker};
pub use schema::StageSchema;
pub use shutdown::Shutdown;
pub use table::{Row, Table, ID_COLUMN};
