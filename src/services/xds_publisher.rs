use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use super::{StatusEvent, StatusQueue};
use crate::{
    backends::envoy::{ResourceGenerator, ServerAction, SnapshotCache, XdsError},
    common::ResourceKey,
    controllers::IngressApi,
    state::CacheStores,
    Result,
};

const REBUILD_DEBOUNCE: Duration = Duration::from_millis(200);

/// Turns store changes into xDS snapshots for the discovery server.
#[derive(TypedBuilder)]
pub struct XdsPublisherService {
    store: CacheStores,
    rebuild: Arc<Notify>,
    ingress_api: IngressApi,
    envoy_listener_port: u16,
    server_sender: mpsc::Sender<ServerAction>,
    #[builder(default)]
    status_queue: Option<StatusQueue>,
}

impl XdsPublisherService {
    pub async fn start(self) -> Result<()> {
        let mut snapshots = SnapshotCache::default();
        loop {
            self.publish(&mut snapshots).await?;
            self.rebuild.notified().await;
            // collapse bursts of store changes into one rebuild
            tokio::time::sleep(REBUILD_DEBOUNCE).await;
        }
    }

    async fn publish(&self, snapshots: &mut SnapshotCache) -> Result<()> {
        let (cache, translated) = match ResourceGenerator::new(&self.store, self.ingress_api, self.envoy_listener_port).generate_resources() {
            Ok(generated) => generated,
            Err(e) => {
                warn!("Unable to generate resources {e}");
                return Ok(());
            },
        };

        let Some(snapshot) = snapshots.next(&cache) else {
            debug!("Resources unchanged, skipping snapshot");
            return Ok(());
        };

        info!("Publishing snapshot version {} for {} ingresses", snapshot.version, translated.len());
        self.server_sender.send(ServerAction::UpdateSnapshot(snapshot)).await.map_err(|_| XdsError::ChannelClosed)?;
        self.publish_status(translated).await;
        Ok(())
    }

    async fn publish_status(&self, translated: Vec<ResourceKey>) {
        let (Some(status_queue), Some(kind)) = (self.status_queue.as_ref(), self.ingress_api.object_kind()) else {
            return;
        };
        for key in translated {
            if let Err(e) = status_queue.publish(StatusEvent::new(kind, &key)).await {
                warn!("Unable to publish status for {key} {e}");
            }
        }
    }
}
