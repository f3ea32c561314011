mod converters;
mod model;
mod resource_generator;
mod server;
mod snapshot;
mod xds_cache;

pub use model::{PathMatch, TypeUrl, XdsError};
pub use resource_generator::ResourceGenerator;
pub use server::{start_aggregate_server, ServerAction};
pub use snapshot::{Snapshot, SnapshotCache};
pub use xds_cache::{XdsCache, LISTENER_NAME, ROUTE_CONFIGURATION_NAME};
