pub mod status_queue;
mod xds_publisher;

pub use status_queue::{StatusEvent, StatusQueue, StatusQueueError, StatusSubscription, DEFAULT_STATUS_QUEUE_DEPTH};
pub use xds_publisher::XdsPublisherService;
