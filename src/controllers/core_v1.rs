use std::{marker::PhantomData, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Resource};
use tokio::sync::oneshot;
use typed_builder::TypedBuilder;

use super::{
    handlers::{ApiFetcher, Reconcilable, Reconciler, ResourceFetcher},
    work_queue::WorkQueue,
    Controller, ControllersContext,
};
use crate::common::format_resource;

/// Mirrors one core/v1 kind (Service, Endpoints or Secret) into the store.
#[derive(TypedBuilder)]
pub struct CoreV1Controller<R>
where
    R: Reconcilable + Resource<Scope = NamespaceResourceScope>,
{
    ctx: Arc<ControllersContext>,
    #[builder(default, setter(skip))]
    _kind: PhantomData<R>,
}

impl<R> Controller for CoreV1Controller<R>
where
    R: Reconcilable + Resource<Scope = NamespaceResourceScope>,
{
    fn name(&self) -> String {
        format_resource::<R>().to_owned()
    }

    fn get_controller(&self, synced: oneshot::Sender<()>) -> BoxFuture<'_, ()> {
        let fetcher: Arc<dyn ResourceFetcher<R>> = Arc::new(ApiFetcher::<R>::namespaced(self.ctx.client.clone()));
        let reconciler = Reconciler::builder().store(self.ctx.store.clone()).fetcher(fetcher).rebuild(Arc::clone(&self.ctx.rebuild)).build();
        let queue = WorkQueue::new(&self.name(), Api::<R>::all(self.ctx.client.clone()), self.ctx.configuration.sync_period());
        queue.run(reconciler, synced).boxed()
    }
}
