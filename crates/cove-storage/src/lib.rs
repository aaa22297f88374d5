mod error;
mod format;
mod queue;

pub use error::StorageError;
pub use format::{QueueRecord, LANE_FORMAT_VERSION};
pub use queue::{Persistence, PersistentQueue};
