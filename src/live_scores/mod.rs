pub mod provider;
pub mod sofascore;

pub use provider::{Snapshot, SnapshotSource, SourceError};
pub use sofascore::SofascoreSource;
