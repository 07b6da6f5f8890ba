pub mod atomic_file;
pub mod power_snapshot;
pub mod totalizer;

pub use atomic_file::{write_atomic, write_json_atomic};
pub use power_snapshot::PowerSnapshotFile;
pub use totalizer::{TotalizerRecord, TotalizerStore};
