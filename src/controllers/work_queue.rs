use std::{collections::HashMap, fmt::Debug, time::Duration};

use futures::{
    future,
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use kube::{
    runtime::{
        reflector::{self, store::Writer, Store},
        watcher::{self, Event},
        WatchStreamExt,
    },
    Api, Resource,
};
use serde::de::DeserializeOwned;
use tokio::{
    sync::{mpsc, oneshot},
    time::{interval_at, Instant},
};
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tracing::{debug, info, warn};

use super::{handlers::Reconcilable, ControllerError, Reconciler, Requeue, RECONCILE_ERROR_WAIT, RECONCILE_MAX_ERROR_WAIT};
use crate::common::ResourceKey;

const REQUEUE_CHANNEL_DEPTH: usize = 1024;

#[derive(Debug, PartialEq)]
enum QueueItem {
    Reconcile(ResourceKey),
    Synced,
}

/// Doubles the wait after every consecutive failure of the same identity.
#[derive(Debug, Default)]
struct Backoff {
    failures: HashMap<ResourceKey, Duration>,
}

impl Backoff {
    fn next(&mut self, key: &ResourceKey) -> Duration {
        let wait = self.failures.get(key).map_or(RECONCILE_ERROR_WAIT, |wait| (*wait * 2).min(RECONCILE_MAX_ERROR_WAIT));
        self.failures.insert(key.clone(), wait);
        wait
    }

    fn reset(&mut self, key: &ResourceKey) {
        self.failures.remove(key);
    }
}

/// Watches one kind and drives its reconciler one request at a time.
///
/// Requests come from the watch (including deletions), from requeues and retries, from a periodic
/// resync over every known object and from any extra trigger streams.
pub struct WorkQueue<R>
where
    R: Resource<DynamicType = ()> + Clone + 'static,
{
    name: String,
    api: Api<R>,
    reader: Store<R>,
    writer: Writer<R>,
    sync_period: Duration,
    triggers: Vec<BoxStream<'static, ResourceKey>>,
}

impl<R> WorkQueue<R>
where
    R: Reconcilable + DeserializeOwned + Debug,
{
    pub fn new(name: &str, api: Api<R>, sync_period: Duration) -> Self {
        let (reader, writer) = reflector::store();
        Self { name: name.to_owned(), api, reader, writer, sync_period, triggers: vec![] }
    }

    /// Objects seen by the watch so far.
    pub fn reader(&self) -> Store<R> {
        self.reader.clone()
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: BoxStream<'static, ResourceKey>) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub async fn run(self, reconciler: Reconciler<R>, synced: oneshot::Sender<()>) {
        let WorkQueue { name, api, reader, writer, sync_period, triggers } = self;
        let (requeue_sender, requeue_receiver) = mpsc::channel(REQUEUE_CHANNEL_DEPTH);

        let watch = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()))
            .default_backoff()
            .filter_map(|event| future::ready(watch_request(event)))
            .boxed();

        let resync_reader = reader.clone();
        let resync = IntervalStream::new(interval_at(Instant::now() + sync_period, sync_period))
            .flat_map(move |_| {
                debug!("Resync tick");
                stream::iter(resync_reader.state().iter().map(|object| ResourceKey::from(object.as_ref())).collect::<Vec<_>>())
            })
            .boxed();

        let mut sources = vec![watch, ReceiverStream::new(requeue_receiver).map(QueueItem::Reconcile).boxed(), resync.map(QueueItem::Reconcile).boxed()];
        sources.extend(triggers.into_iter().map(|trigger| trigger.map(QueueItem::Reconcile).boxed()));

        info!("{name} work queue started");
        drive(&name, stream::select_all(sources), &requeue_sender, &reader, &reconciler, synced).await;
        info!("{name} work queue stopped");
    }
}

fn watch_request<R: Resource>(event: Result<Event<R>, watcher::Error>) -> Option<QueueItem> {
    match event {
        Ok(Event::Apply(object) | Event::InitApply(object) | Event::Delete(object)) => Some(QueueItem::Reconcile(ResourceKey::from(&object))),
        Ok(Event::InitDone) => Some(QueueItem::Synced),
        Ok(Event::Init) => None,
        Err(e) => {
            warn!("Watch error {e}");
            None
        },
    }
}

/// Reconciles `requests` one at a time until the stream ends. Retries and `Requeue::After` go back
/// through `requeue_sender` once their wait is over.
async fn drive<R, S>(
    name: &str,
    mut requests: S,
    requeue_sender: &mpsc::Sender<ResourceKey>,
    reader: &Store<R>,
    reconciler: &Reconciler<R>,
    synced: oneshot::Sender<()>,
) where
    R: Reconcilable,
    S: Stream<Item = QueueItem> + Unpin,
{
    let mut synced = Some(synced);
    let mut backoff = Backoff::default();

    while let Some(item) = requests.next().await {
        let key = match item {
            QueueItem::Synced => {
                if let Some(synced) = synced.take() {
                    info!("{name} cache synced with {} objects", reader.state().len());
                    if synced.send(()).is_err() {
                        debug!("{name} nobody is waiting for the cache sync");
                    }
                }
                continue;
            },
            QueueItem::Reconcile(key) => key,
        };

        if key.name.is_empty() {
            warn!("{name} skipping request {}", ControllerError::InvalidPayload(format!("no name in {key:?}")));
            continue;
        }

        let wait = match reconciler.reconcile(&key).await {
            Ok(Requeue::No) => {
                backoff.reset(&key);
                None
            },
            Ok(Requeue::After(wait)) => {
                backoff.reset(&key);
                Some(wait)
            },
            Err(e) => {
                let wait = backoff.next(&key);
                warn!("{name} reconcile of {key} failed {e}, retrying in {wait:?}");
                Some(wait)
            },
        };

        if let Some(wait) = wait {
            let requeue_sender = requeue_sender.clone();
            let name = name.to_owned();
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                if let Err(e) = requeue_sender.send(key).await {
                    debug!("{name} work queue is gone, dropping requeue of {}", e.0);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use k8s_openapi::{
        api::core::v1::Service,
        apimachinery::pkg::apis::meta::v1::Time,
        chrono::{Duration as ChronoDuration, Utc},
    };
    use kube_core::ErrorResponse;
    use tokio::sync::Notify;

    use super::*;
    use crate::{controllers::ResourceFetcher, state::CacheStores};

    const SERVICE: &str = r"
metadata:
  name: web
  namespace: shop
spec:
  ports:
  - port: 80
    targetPort: 8080
";

    #[derive(Default)]
    struct CountingFetcher {
        object: Option<Service>,
        failing: bool,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ResourceFetcher<Service> for CountingFetcher {
        async fn fetch(&self, _key: &ResourceKey) -> Result<Option<Service>, kube::Error> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_owned(),
                    message: "etcdserver: leader changed".to_owned(),
                    reason: "InternalError".to_owned(),
                    code: 500,
                }));
            }
            Ok(self.object.clone())
        }
    }

    fn service() -> Service {
        serde_yaml::from_str(SERVICE).unwrap()
    }

    /// Runs a queue over `items` plus its own requeues. Returns the fetcher and the sync signal.
    fn start(store: &CacheStores, fetcher: CountingFetcher, items: Vec<QueueItem>) -> (Arc<CountingFetcher>, oneshot::Receiver<()>) {
        let fetcher = Arc::new(fetcher);
        let reconciler = Reconciler::builder()
            .store(store.clone())
            .fetcher(Arc::clone(&fetcher) as Arc<dyn ResourceFetcher<Service>>)
            .rebuild(Arc::new(Notify::new()))
            .build();
        let (reader, _writer) = reflector::store::<Service>();
        let (synced_sender, synced_receiver) = oneshot::channel();
        let (requeue_sender, requeue_receiver) = mpsc::channel(8);
        let requests = stream::select(stream::iter(items), ReceiverStream::new(requeue_receiver).map(QueueItem::Reconcile));
        tokio::spawn(async move { drive("Service", requests, &requeue_sender, &reader, &reconciler, synced_sender).await });
        (fetcher, synced_receiver)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::default();
        let key = ResourceKey::namespaced("web", "shop");
        let waits: Vec<Duration> = (0..12).map(|_| backoff.next(&key)).collect();
        assert_eq!(waits[0], Duration::from_secs(1));
        assert_eq!(waits[1], Duration::from_secs(2));
        assert_eq!(waits[4], Duration::from_secs(16));
        assert_eq!(waits[11], Duration::from_secs(300));

        backoff.reset(&key);
        assert_eq!(backoff.next(&key), Duration::from_secs(1));
        assert_eq!(backoff.next(&ResourceKey::namespaced("api", "shop")), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_watch_events_become_requests() {
        let web = service();
        let events: Vec<Result<Event<Service>, watcher::Error>> = vec![
            Ok(Event::Init),
            Ok(Event::InitApply(web.clone())),
            Ok(Event::InitDone),
            Ok(Event::Apply(web.clone())),
            Ok(Event::Delete(web)),
        ];
        let requests: Vec<QueueItem> = stream::iter(events).filter_map(|event| future::ready(watch_request(event))).collect().await;
        let key = ResourceKey::namespaced("web", "shop");
        assert_eq!(
            requests,
            vec![QueueItem::Reconcile(key.clone()), QueueItem::Synced, QueueItem::Reconcile(key.clone()), QueueItem::Reconcile(key)]
        );
    }

    #[tokio::test]
    async fn test_synced_after_initial_requests() {
        let store = CacheStores::new();
        let fetcher = CountingFetcher { object: Some(service()), ..Default::default() };
        let items = vec![
            QueueItem::Reconcile(ResourceKey::namespaced("", "shop")),
            QueueItem::Reconcile(ResourceKey::namespaced("web", "shop")),
            QueueItem::Synced,
            QueueItem::Synced,
        ];
        let (fetcher, synced) = start(&store, fetcher, items);

        assert_eq!(synced.await, Ok(()));
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_service("shop", "web").unwrap(), Some(service()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_after_deletion_wait() {
        let store = CacheStores::new();
        let mut web = service();
        store.add(&web).unwrap();
        web.metadata.deletion_timestamp = Some(Time(Utc::now() - ChronoDuration::seconds(5)));
        let (fetcher, _synced) =
            start(&store, CountingFetcher { object: Some(web), ..Default::default() }, vec![QueueItem::Reconcile(ResourceKey::namespaced("web", "shop"))]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
        assert!(store.get_service("shop", "web").unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconcile_is_retried_with_backoff() {
        let store = CacheStores::new();
        let (fetcher, _synced) =
            start(&store, CountingFetcher { failing: true, ..Default::default() }, vec![QueueItem::Reconcile(ResourceKey::namespaced("web", "shop"))]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 4);
    }
}
