pub mod schema;
pub mod snapshot;
pub mod store;

pub use snapshot::{SnapshotStore, SqliteSnapshotStore};
pub use store::MatrixStore;
