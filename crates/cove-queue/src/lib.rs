mod background;
mod engine;
mod error;
mod events;
mod handler;
mod lanes;
mod manager;
pub mod policy;
mod settings;

pub use background::{BackgroundCompletion, BackgroundOutcome, RemainingTime};
pub use error::QueueError;
pub use events::QueueEvent;
pub use handler::{HandlerRegistry, QueueHandler};
pub use lanes::QueueLanes;
pub use manager::QueueManager;
pub use policy::ResultPolicy;
pub use settings::QueueSettings;
