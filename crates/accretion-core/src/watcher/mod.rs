//! Replication Watcher: one state machine instance per object-write event.
//!
//! ```text
//! Filter ─match─▶ LocateArtifact ─found─▶ PublishNewVersion ─▶ Notify ─▶ Notified
//!   │               │    ▲
//!   └─▶ Ignored     │    └── WaitForReplication ◀─ absent, attempts ≤ limit
//!                   └─ absent, attempts > limit ─▶ TimedOut
//! ```

mod machine;
mod state;

pub use machine::{completion_message, ReplicationWatcher, WatchOutcome};
pub use state::{ArtifactInfo, ObjectWriteEvent, WatchContext, WatchState};
