use std::{marker::PhantomData, sync::Arc};

use futures::{
    future::BoxFuture,
    stream::{self, BoxStream},
    FutureExt, StreamExt,
};
use k8s_openapi::NamespaceResourceScope;
use kube::{runtime::reflector::Store, Api, Resource};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use super::{
    handlers::{list_classless, ApiFetcher, ClassGate, DefaultClassSource, Reconcilable, Reconciler, ResourceFetcher},
    utils::ClassBinding,
    work_queue::WorkQueue,
    Controller, ControllersContext,
};
use crate::common::{format_resource, ResourceKey};

/// Ingress of any supported API generation.
pub trait IngressResource: Reconcilable + ClassBinding + Resource<Scope = NamespaceResourceScope> {}

impl<R> IngressResource for R where R: Reconcilable + ClassBinding + Resource<Scope = NamespaceResourceScope> {}

#[derive(TypedBuilder)]
pub struct IngressController<R: IngressResource> {
    ctx: Arc<ControllersContext>,
    class_lookups: bool,
    #[builder(default, setter(skip))]
    _ingress: PhantomData<R>,
}

impl<R: IngressResource> IngressController<R> {
    fn default_class_source(&self, queue: WorkQueue<R>) -> (WorkQueue<R>, DefaultClassSource) {
        if !self.class_lookups {
            return (queue, DefaultClassSource::Fixed(true));
        }
        let requeues = classless_requeues(queue.reader(), self.ctx.default_class.subscribe());
        (queue.with_trigger(requeues), DefaultClassSource::Store(self.ctx.store.clone()))
    }

    fn reconciler(&self, default_class: DefaultClassSource) -> Reconciler<R> {
        let fetcher: Arc<dyn ResourceFetcher<R>> = Arc::new(ApiFetcher::<R>::namespaced(self.ctx.client.clone()));
        Reconciler::builder()
            .store(self.ctx.store.clone())
            .fetcher(fetcher)
            .rebuild(Arc::clone(&self.ctx.rebuild))
            .class_gate(ClassGate::builder().class_name(self.ctx.configuration.ingress_class.clone()).default_class(default_class).build())
            .build()
    }
}

impl<R: IngressResource> Controller for IngressController<R> {
    fn name(&self) -> String {
        format!("{} {}", format_resource::<R>(), R::KIND)
    }

    fn get_controller(&self, synced: oneshot::Sender<()>) -> BoxFuture<'_, ()> {
        let api = Api::<R>::all(self.ctx.client.clone());
        let queue = WorkQueue::new(&self.name(), api, self.ctx.configuration.sync_period());
        let (mut queue, default_class) = self.default_class_source(queue);

        if let Some(status_queue) = self.ctx.status_queue.as_ref() {
            match status_queue.subscribe(&R::KIND.gvk()) {
                Ok(subscription) => {
                    info!("{} subscribed to status events", self.name());
                    queue = queue.with_trigger(subscription.into_stream().map(|event| event.resource_key()).boxed());
                },
                Err(e) => warn!("{} can't subscribe to status events {e}", self.name()),
            }
        }

        let reconciler = self.reconciler(default_class);
        queue.run(reconciler, synced).boxed()
    }
}

/// Classless ingresses to requeue once the ingress watch has listed everything, and again every
/// time the store gains or loses a default class of this controller.
fn classless_requeues<R: IngressResource>(ingresses: Store<R>, default_class: watch::Receiver<bool>) -> BoxStream<'static, ResourceKey> {
    stream::unfold((ingresses, default_class, false), |(ingresses, mut default_class, listed)| async move {
        if listed {
            default_class.changed().await.ok()?;
        } else if let Err(e) = ingresses.wait_until_ready().await {
            debug!("Ingress watch stopped before its initial listing {e}");
            return None;
        }
        let is_default = *default_class.borrow_and_update();
        let classless = list_classless(ingresses.state());
        info!("Default ingress class is {is_default}, requeue {} classless ingresses", classless.len());
        Some((stream::iter(classless), (ingresses, default_class, true)))
    })
    .flatten()
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
    use kube::runtime::{reflector, watcher::Event};

    use super::*;
    use crate::state::CacheStores;

    const INGRESSES: &str = r"
- metadata:
    name: plain
    namespace: shop
  spec:
    defaultBackend:
      service:
        name: web
        port:
          number: 80
- metadata:
    name: annotated
    namespace: shop
    annotations:
      kubernetes.io/ingress.class: nginx
  spec:
    defaultBackend:
      service:
        name: web
        port:
          number: 80
";

    const DEFAULT_CLASS: &str = r"
metadata:
  name: sail
  annotations:
    ingressclass.kubernetes.io/is-default-class: 'true'
spec:
  controller: inendless.com/ingress-controller
";

    async fn pending<S: futures::Stream + Unpin>(stream: &mut S) -> bool {
        tokio::time::timeout(Duration::from_millis(20), stream.next()).await.is_err()
    }

    #[tokio::test]
    async fn test_default_class_seen_during_initial_listing() {
        let ingresses: Vec<Ingress> = serde_yaml::from_str(INGRESSES).unwrap();
        let (reader, mut writer) = reflector::store::<Ingress>();
        let (sender, receiver) = watch::channel(false);
        let store = CacheStores::new();
        let gate = ClassGate::builder().class_name("sail".to_owned()).default_class(DefaultClassSource::Store(store.clone())).build();
        let mut requeues = classless_requeues(reader.clone(), receiver);

        writer.apply_watcher_event(&Event::Init);
        for ingress in &ingresses {
            writer.apply_watcher_event(&Event::InitApply(ingress.clone()));
        }
        let class: IngressClass = serde_yaml::from_str(DEFAULT_CLASS).unwrap();
        store.add(&class).unwrap();
        sender.send_replace(true);
        assert!(pending(&mut requeues).await);

        writer.apply_watcher_event(&Event::InitDone);
        let key = requeues.next().await.unwrap();
        assert_eq!(key, ResourceKey::namespaced("plain", "shop"));
        assert!(pending(&mut requeues).await);

        let requeued = reader.state().into_iter().find(|ingress| ResourceKey::from(ingress.as_ref()) == key).unwrap();
        assert_eq!(gate.matches(requeued.as_ref()), Ok(true));
        assert_eq!(gate.matches(&ingresses[1]), Ok(false));
    }

    #[tokio::test]
    async fn test_default_class_change_after_listing() {
        let ingresses: Vec<Ingress> = serde_yaml::from_str(INGRESSES).unwrap();
        let (reader, mut writer) = reflector::store::<Ingress>();
        let (sender, receiver) = watch::channel(false);
        let mut requeues = classless_requeues(reader, receiver);

        writer.apply_watcher_event(&Event::Init);
        writer.apply_watcher_event(&Event::InitDone);
        assert!(pending(&mut requeues).await);

        writer.apply_watcher_event(&Event::Apply(ingresses[0].clone()));
        sender.send_replace(true);
        assert_eq!(requeues.next().await, Some(ResourceKey::namespaced("plain", "shop")));
        assert!(pending(&mut requeues).await);

        sender.send_replace(false);
        assert_eq!(requeues.next().await, Some(ResourceKey::namespaced("plain", "shop")));

        drop(sender);
        assert_eq!(requeues.next().await, None);
    }
}
