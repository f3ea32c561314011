mod reconciler;

pub use reconciler::{list_classless, ApiFetcher, ClassGate, DefaultClassSource, Reconcilable, Reconciler, Requeue, ResourceFetcher};
