use std::time::Duration;

mod controller_def;
pub mod core_v1;
mod handlers;
pub mod ingress;
pub mod ingress_class;
pub mod negotiation;
mod utils;
mod work_queue;

pub use controller_def::{setup_controllers, Controller, ControllerDef, ControllersContext};
pub use handlers::{list_classless, ApiFetcher, ClassGate, DefaultClassSource, Reconcilable, Reconciler, Requeue, ResourceFetcher};
pub use negotiation::{negotiate_ingress_api, ApiResourceProbe, IngressApi, IngressControllerConditions, KubeApiProbe, NegotiationError};
pub use utils::{is_classless, is_default_ingress_class, matches_ingress_class, ClassBinding};

use crate::state::StoreError;

#[derive(thiserror::Error, Debug, PartialEq, PartialOrd)]
pub enum ControllerError {
    FetchFailed(String),
    Store(StoreError),
    InvalidPayload(String),
}

const RECONCILE_DELETION_WAIT: Duration = Duration::from_secs(5);
const RECONCILE_ERROR_WAIT: Duration = Duration::from_secs(1);
const RECONCILE_MAX_ERROR_WAIT: Duration = Duration::from_secs(300);

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<StoreError> for ControllerError {
    fn from(e: StoreError) -> Self {
        ControllerError::Store(e)
    }
}
