pub mod fjall;
pub mod keys;
pub mod mem;
pub mod traits;
pub mod types;

pub use fjall::{FjallLogStorage, FjallStore};
pub use mem::{MemLogStorage, MemStateMachine};
pub use traits::{LogStorage, StateMachineStore};
pub use types::{LogEntry, LogPayload, LogPosition, LogState, Snapshot, SnapshotMeta, Vote};
