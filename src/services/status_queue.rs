use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::{stream::BoxStream, StreamExt};
use kube::core::GroupVersionKind;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

use crate::common::{ObjectKind, ResourceKey};

pub const DEFAULT_STATUS_QUEUE_DEPTH: usize = 8192;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEvent {
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl StatusEvent {
    pub fn new(kind: ObjectKind, key: &ResourceKey) -> Self {
        Self { gvk: kind.gvk(), namespace: key.namespace.clone(), name: key.name.clone() }
    }

    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey { namespace: self.namespace.clone(), name: self.name.clone() }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, PartialOrd)]
pub enum StatusQueueError {
    LockingError,
    Closed,
}

impl std::fmt::Display for StatusQueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Receiving end for one kind. Clones share the receiver, so each event reaches exactly one of them.
#[derive(Clone, Debug)]
pub struct StatusSubscription {
    receiver: Arc<tokio::sync::Mutex<Receiver<StatusEvent>>>,
}

impl StatusSubscription {
    pub async fn recv(&self) -> Option<StatusEvent> {
        self.receiver.lock().await.recv().await
    }

    pub fn into_stream(self) -> BoxStream<'static, StatusEvent> {
        futures::stream::unfold(self, |subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
        .boxed()
    }
}

type Channel = (Sender<StatusEvent>, StatusSubscription);

/// Bounded per-kind event bus. Channels are created on first use and never replaced.
#[derive(Clone, Debug)]
pub struct StatusQueue {
    capacity: usize,
    channels: Arc<Mutex<HashMap<GroupVersionKind, Channel>>>,
}

impl Default for StatusQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STATUS_QUEUE_DEPTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, channels: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn channel(&self, gvk: &GroupVersionKind) -> Result<Channel, StatusQueueError> {
        let mut channels = self.channels.lock().map_err(|_| StatusQueueError::LockingError)?;
        let channel = channels.entry(gvk.clone()).or_insert_with(|| {
            debug!("Creating status channel for {}/{}", gvk.api_version(), gvk.kind);
            let (sender, receiver) = mpsc::channel(self.capacity);
            (sender, StatusSubscription { receiver: Arc::new(tokio::sync::Mutex::new(receiver)) })
        });
        Ok(channel.clone())
    }

    /// Waits for room in the channel of the event's kind.
    pub async fn publish(&self, event: StatusEvent) -> Result<(), StatusQueueError> {
        let (sender, _) = self.channel(&event.gvk)?;
        sender.send(event).await.map_err(|_| StatusQueueError::Closed)
    }

    pub fn subscribe(&self, gvk: &GroupVersionKind) -> Result<StatusSubscription, StatusQueueError> {
        Ok(self.channel(gvk)?.1)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn event(kind: ObjectKind, name: &str) -> StatusEvent {
        StatusEvent::new(kind, &ResourceKey::namespaced(name, "shop"))
    }

    #[tokio::test]
    async fn test_events_are_routed_by_kind() {
        let queue = StatusQueue::new();
        let v1 = queue.subscribe(&ObjectKind::IngressNetworkingV1.gvk()).unwrap();
        let v1beta1 = queue.subscribe(&ObjectKind::IngressNetworkingV1beta1.gvk()).unwrap();

        queue.publish(event(ObjectKind::IngressNetworkingV1, "web")).await.unwrap();
        queue.publish(event(ObjectKind::IngressNetworkingV1beta1, "legacy")).await.unwrap();

        assert_eq!(v1.recv().await.unwrap().resource_key(), ResourceKey::namespaced("web", "shop"));
        assert_eq!(v1beta1.recv().await.unwrap().name, "legacy");
    }

    #[tokio::test]
    async fn test_publish_before_subscribe_is_kept() {
        let queue = StatusQueue::new();
        queue.publish(event(ObjectKind::IngressNetworkingV1, "web")).await.unwrap();
        let subscription = queue.subscribe(&ObjectKind::IngressNetworkingV1.gvk()).unwrap();
        assert_eq!(subscription.recv().await.unwrap().name, "web");
    }

    #[tokio::test]
    async fn test_subscribers_compete() {
        let queue = StatusQueue::new();
        let first = queue.subscribe(&ObjectKind::IngressNetworkingV1.gvk()).unwrap();
        let second = queue.subscribe(&ObjectKind::IngressNetworkingV1.gvk()).unwrap();
        queue.publish(event(ObjectKind::IngressNetworkingV1, "web")).await.unwrap();

        assert!(first.recv().await.is_some());
        assert!(tokio::time::timeout(Duration::from_millis(20), second.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_blocks_when_full() {
        let queue = StatusQueue::with_capacity(1);
        let subscription = queue.subscribe(&ObjectKind::IngressNetworkingV1.gvk()).unwrap();
        queue.publish(event(ObjectKind::IngressNetworkingV1, "one")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), queue.publish(event(ObjectKind::IngressNetworkingV1, "two"))).await;
        assert!(blocked.is_err());

        let publisher = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.publish(event(ObjectKind::IngressNetworkingV1, "three")).await })
        };
        assert_eq!(subscription.recv().await.unwrap().name, "one");
        assert_eq!(publisher.await.unwrap(), Ok(()));
        assert_eq!(subscription.recv().await.unwrap().name, "three");
    }
}
