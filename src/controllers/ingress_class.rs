use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt};
use k8s_openapi::api::networking::v1::IngressClass;
use kube::Api;
use tokio::sync::oneshot;
use typed_builder::TypedBuilder;

use super::{
    handlers::{ApiFetcher, Reconciler, ResourceFetcher},
    work_queue::WorkQueue,
    Controller, ControllersContext,
};

/// Mirrors `networking.k8s.io/v1` IngressClasses into the store and keeps the context's default
/// class flag in step with it.
#[derive(TypedBuilder)]
pub struct IngressClassController {
    ctx: Arc<ControllersContext>,
}

impl IngressClassController {
    fn reconciler(&self) -> Reconciler<IngressClass> {
        let fetcher: Arc<dyn ResourceFetcher<IngressClass>> = Arc::new(ApiFetcher::<IngressClass>::cluster(self.ctx.client.clone()));
        Reconciler::builder()
            .store(self.ctx.store.clone())
            .fetcher(fetcher)
            .rebuild(Arc::clone(&self.ctx.rebuild))
            .default_class(self.ctx.default_class.clone())
            .build()
    }
}

impl Controller for IngressClassController {
    fn name(&self) -> String {
        "IngressClass".to_owned()
    }

    fn get_controller(&self, synced: oneshot::Sender<()>) -> BoxFuture<'_, ()> {
        let api = Api::<IngressClass>::all(self.ctx.client.clone());
        let queue = WorkQueue::new(&self.name(), api, self.ctx.configuration.sync_period());
        queue.run(self.reconciler(), synced).boxed()
    }
}
