use std::sync::Arc;

use futures::FutureExt;
use kube::Client;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::info;

pub mod backends;
pub mod common;
mod controllers;
mod services;
mod state;

pub use common::Configuration;

use crate::{
    backends::envoy::start_aggregate_server,
    controllers::{setup_controllers, ControllersContext, IngressControllerConditions, KubeApiProbe},
    services::{StatusQueue, XdsPublisherService},
    state::CacheStores,
};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

const SERVER_ACTIONS_DEPTH: usize = 16;

#[derive(Error, Debug)]
enum StartupError {
    #[error("caches did not sync in time")]
    CacheSyncTimeout,
    #[error("controller {0} stopped before its cache synced")]
    ControllerStopped(String),
}

pub async fn start(configuration: Configuration) -> Result<()> {
    info!("Sail started");
    let client = Client::try_default().await?;

    let conditions = IngressControllerConditions::negotiate(&configuration, &KubeApiProbe::new(client.clone())).await?;
    info!("Using ingress API {}", conditions.chosen());

    let store = CacheStores::new();
    let rebuild = Arc::new(Notify::new());
    let status_queue = configuration.update_status.then(StatusQueue::new);
    let ctx = Arc::new(
        ControllersContext::builder()
            .client(client)
            .store(store.clone())
            .rebuild(Arc::clone(&rebuild))
            .configuration(configuration.clone())
            .status_queue(status_queue.clone())
            .build(),
    );

    let controller_defs = setup_controllers(&ctx, &conditions);
    let mut synced_receivers = vec![];
    let mut tasks = vec![];
    for def in controller_defs.iter().filter(|def| def.enabled) {
        let (synced_sender, synced_receiver) = oneshot::channel();
        let name = def.name();
        synced_receivers.push(synced_receiver.map(move |synced| synced.map_err(|_| StartupError::ControllerStopped(name))));
        tasks.push(
            async move {
                info!("{} controller...started", def.name());
                def.controller.get_controller(synced_sender).await;
                info!("{} controller...stopped", def.name());
                crate::Result::<()>::Ok(())
            }
            .boxed(),
        );
    }

    let (server_sender, server_receiver) = mpsc::channel(SERVER_ACTIONS_DEPTH);
    let publisher = XdsPublisherService::builder()
        .store(store)
        .rebuild(rebuild)
        .ingress_api(conditions.chosen())
        .envoy_listener_port(configuration.envoy_listener_port)
        .server_sender(server_sender)
        .status_queue(status_queue)
        .build();
    let control_plane_address = configuration.control_plane.to_ip()?;
    let cache_sync_timeout = configuration.cache_sync_timeout();

    tasks.push(
        async move {
            tokio::time::timeout(cache_sync_timeout, futures::future::try_join_all(synced_receivers))
                .await
                .map_err(|_| StartupError::CacheSyncTimeout)??;
            info!("Caches synced, serving xDS on {control_plane_address}");
            futures::future::try_join(publisher.start(), start_aggregate_server(control_plane_address, server_receiver)).await?;
            crate::Result::<()>::Ok(())
        }
        .boxed(),
    );

    futures::future::try_join_all(tasks).await?;
    info!("Sail stopped");
    Ok(())
}
