use std::{
    collections::HashSet,
    fmt::Display,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use envoy_api_rs::{
    envoy::service::discovery::v3::{
        aggregated_discovery_service_server::{AggregatedDiscoveryService, AggregatedDiscoveryServiceServer},
        DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
    },
    tonic::{transport::Server, IntoStreamingRequest, Response, Status},
};
use futures::FutureExt;
use tokio::{
    net::TcpListener,
    sync::mpsc::{self, error::TrySendError, Receiver},
};
use tokio_stream::{
    wrappers::{ReceiverStream, TcpListenerStream},
    Stream, StreamExt,
};
use tracing::{debug, info, warn};

use super::{model::TypeUrl, snapshot::Snapshot};

pub enum ServerAction {
    UpdateSnapshot(Snapshot),
}

impl Display for ServerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerAction::UpdateSnapshot(snapshot) => write!(f, "ServerAction::UpdateSnapshot {{version: {} }}", snapshot.version),
        }
    }
}

#[derive(Debug, Clone)]
struct AdsClient {
    sender: mpsc::Sender<Result<DiscoveryResponse, Status>>,
    client_id: SocketAddr,
    subscriptions: HashSet<TypeUrl>,
}

impl AdsClient {
    fn new(client_id: SocketAddr, sender: mpsc::Sender<Result<DiscoveryResponse, Status>>) -> Self {
        Self { sender, client_id, subscriptions: HashSet::new() }
    }
}

#[derive(Debug, Clone, Default)]
struct AdsClients {
    ads_clients: Arc<Mutex<Vec<AdsClient>>>,
}

impl AdsClients {
    fn new() -> Self {
        AdsClients::default()
    }

    fn clients(&self) -> Vec<AdsClient> {
        self.ads_clients.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn add_or_replace_client(&self, client: AdsClient) {
        let mut clients = self.ads_clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(local_client) = clients.iter_mut().find(|c| c.client_id == client.client_id) {
            info!("Replacing client {}", client.client_id);
            *local_client = client;
        } else {
            info!("Adding client {}", client.client_id);
            clients.push(client);
        }
    }

    fn with_client<T>(&self, client_id: SocketAddr, f: impl FnOnce(&mut AdsClient) -> T) -> Option<T> {
        let mut clients = self.ads_clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.iter_mut().find(|c| c.client_id == client_id).map(f)
    }

    fn remove_client(&self, client_id: SocketAddr) {
        let mut clients = self.ads_clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.retain(|f| f.client_id != client_id);
    }
}

type CurrentSnapshot = Arc<Mutex<Option<Snapshot>>>;

fn current_snapshot(snapshot: &CurrentSnapshot) -> Option<Snapshot> {
    snapshot.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

fn discovery_response(type_url: TypeUrl, snapshot: &Snapshot) -> DiscoveryResponse {
    DiscoveryResponse {
        type_url: type_url.to_string(),
        resources: snapshot.resources(type_url).to_vec(),
        nonce: uuid::Uuid::new_v4().to_string(),
        version_info: snapshot.version_info(),
        ..Default::default()
    }
}

/// Records the subscription carried by `request` and decides what, if anything, goes back to the client.
fn process_request(client: &mut AdsClient, request: &DiscoveryRequest, snapshot: Option<&Snapshot>) -> Option<DiscoveryResponse> {
    let type_url = match TypeUrl::try_from(request.type_url.as_str()) {
        Ok(type_url) => type_url,
        Err(e) => {
            warn!("Client {} {e}", client.client_id);
            return None;
        },
    };
    client.subscriptions.insert(type_url);

    if let Some(status) = request.error_detail.as_ref() {
        warn!("Client {} rejected {type_url} version {} nonce {} {status:?}", client.client_id, request.version_info, request.response_nonce);
        return None;
    }

    let Some(snapshot) = snapshot else {
        debug!("No snapshot yet for {type_url}, client {} waits for the first update", client.client_id);
        return None;
    };

    if !request.response_nonce.is_empty() && request.version_info == snapshot.version_info() {
        debug!("Client {} acknowledged {type_url} version {}", client.client_id, request.version_info);
        return None;
    }

    Some(discovery_response(type_url, snapshot))
}

pub struct AggregateServer {
    snapshot: CurrentSnapshot,
    ads_clients: AdsClients,
}

struct AggregateServerService {
    snapshot: CurrentSnapshot,
    ads_clients: AdsClients,
    stream_resources_rx: Receiver<ServerAction>,
}

impl AggregateServerService {
    async fn start(self) {
        let mut stream_resources_rx = self.stream_resources_rx;
        while let Some(event) = stream_resources_rx.recv().await {
            info!("{event}");
            match event {
                ServerAction::UpdateSnapshot(snapshot) => {
                    *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
                    let clients = self.ads_clients.clients();
                    info!("Pushing version {} to {} clients", snapshot.version, clients.len());
                    for client in clients {
                        self.push(&client, &snapshot);
                    }
                },
            }
        }
    }

    /// Never waits on a client. A lagging client misses the push and picks the snapshot up with
    /// its next request, a closed one is dropped from the registry.
    fn push(&self, client: &AdsClient, snapshot: &Snapshot) {
        for type_url in TypeUrl::ALL.into_iter().filter(|type_url| client.subscriptions.contains(type_url)) {
            match client.sender.try_send(Ok(discovery_response(type_url, snapshot))) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => {
                    warn!("Client {} is not keeping up, skipped {type_url} version {}", client.client_id, snapshot.version);
                },
                Err(TrySendError::Closed(_)) => {
                    debug!("Client {} is gone", client.client_id);
                    self.ads_clients.remove_client(client.client_id);
                    return;
                },
            }
        }
    }
}

type AggregatedDiscoveryServiceResult<T> = std::result::Result<Response<T>, Status>;

#[envoy_api_rs::tonic::async_trait]
impl AggregatedDiscoveryService for AggregateServer {
    type StreamAggregatedResourcesStream = Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;

    async fn stream_aggregated_resources(
        &self,
        req: envoy_api_rs::tonic::Request<envoy_api_rs::tonic::Streaming<DiscoveryRequest>>,
    ) -> AggregatedDiscoveryServiceResult<Self::StreamAggregatedResourcesStream> {
        let Some(client_ip) = req.remote_addr() else {
            return Err(Status::aborted("Invalid remote IP address"));
        };
        info!("AggregateServer::stream_aggregated_resources client connected from {client_ip}");

        let (tx, rx) = mpsc::channel(128);
        self.ads_clients.add_or_replace_client(AdsClient::new(client_ip, tx.clone()));

        let ads_clients = self.ads_clients.clone();
        let snapshot = Arc::clone(&self.snapshot);
        let mut incoming_stream = req.into_streaming_request().into_inner();

        tokio::spawn(async move {
            while let Some(item) = incoming_stream.next().await {
                let request = match item {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Discovery request error {e:?}");
                        continue;
                    },
                };
                debug!("Discovery request from {client_ip} type {} version {} nonce {}", request.type_url, request.version_info, request.response_nonce);

                let current = current_snapshot(&snapshot);
                let response = ads_clients.with_client(client_ip, |client| process_request(client, &request, current.as_ref())).flatten();
                if let Some(response) = response {
                    if tx.send(Ok(response)).await.is_err() {
                        break;
                    }
                }
            }

            info!("Server side closed... removing client {client_ip}");
            ads_clients.remove_client(client_ip);
        });

        let output_stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(output_stream) as Self::StreamAggregatedResourcesStream))
    }

    type DeltaAggregatedResourcesStream = Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

    async fn delta_aggregated_resources(
        &self,
        req: envoy_api_rs::tonic::Request<envoy_api_rs::tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> AggregatedDiscoveryServiceResult<Self::DeltaAggregatedResourcesStream> {
        info!("AggregateServer::delta_aggregated_resources client connected from: {:?}", req.remote_addr());
        Err(Status::unimplemented("Delta stream not implemented at the moment"))
    }
}

pub async fn start_aggregate_server(server_address: SocketAddr, stream_resources_rx: Receiver<ServerAction>) -> crate::Result<()> {
    let listener = TcpListener::bind(server_address).await?;
    info!("Aggregated discovery server listening on {server_address}");
    let stream = TcpListenerStream::new(listener);

    let snapshot = CurrentSnapshot::default();
    let ads_clients = AdsClients::new();
    let service = AggregateServerService { snapshot: Arc::clone(&snapshot), ads_clients: ads_clients.clone(), stream_resources_rx };
    let server = AggregateServer { snapshot, ads_clients };
    let aggregate_server = AggregatedDiscoveryServiceServer::new(server);
    let server = Server::builder().concurrency_limit_per_connection(256).add_service(aggregate_server).serve_with_incoming(stream);

    let service = async move {
        service.start().await;
        Ok::<_, crate::Error>(())
    }
    .boxed();
    let server = async move { server.await.map_err(crate::Error::from) }.boxed();

    let (result, _, _) = futures::future::select_all(vec![server, service]).await;
    result
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backends::envoy::{model::PathMatch, snapshot::SnapshotCache, xds_cache::XdsCache};

    fn client() -> AdsClient {
        let (tx, _rx) = mpsc::channel(1);
        AdsClient::new("10.0.0.7:50000".parse().unwrap(), tx)
    }

    fn snapshot() -> Snapshot {
        let mut cache = XdsCache::new();
        cache.add_route("retail/shop/0/0", None, PathMatch::Prefix("/".to_owned()), "web.retail:80");
        cache.add_endpoint("web.retail:80", "10.0.0.1", 8080);
        SnapshotCache::default().next(&cache).unwrap()
    }

    fn request(type_url: TypeUrl, version_info: &str, response_nonce: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            type_url: type_url.to_string(),
            version_info: version_info.to_owned(),
            response_nonce: response_nonce.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_initial_request_gets_current_resources() {
        let mut client = client();
        let snapshot = snapshot();
        let response = process_request(&mut client, &request(TypeUrl::Cluster, "", ""), Some(&snapshot)).unwrap();
        assert_eq!(response.type_url, TypeUrl::Cluster.to_string());
        assert_eq!(response.version_info, "1");
        assert_eq!(response.resources.len(), 1);
        assert!(!response.nonce.is_empty());
        assert!(client.subscriptions.contains(&TypeUrl::Cluster));
    }

    #[test]
    fn test_ack_is_not_answered() {
        let mut client = client();
        let snapshot = snapshot();
        assert!(process_request(&mut client, &request(TypeUrl::Cluster, "1", "abc"), Some(&snapshot)).is_none());
        assert!(process_request(&mut client, &request(TypeUrl::Cluster, "1", ""), Some(&snapshot)).is_some());
        assert!(process_request(&mut client, &request(TypeUrl::Cluster, "0", "abc"), Some(&snapshot)).is_some());
    }

    #[test]
    fn test_nack_is_not_resent() {
        let mut client = client();
        let snapshot = snapshot();
        let nack = DiscoveryRequest { error_detail: Some(Default::default()), ..request(TypeUrl::Listener, "0", "abc") };
        assert!(process_request(&mut client, &nack, Some(&snapshot)).is_none());
        assert!(client.subscriptions.contains(&TypeUrl::Listener));
    }

    #[test]
    fn test_no_snapshot_or_unknown_type() {
        let mut client = client();
        assert!(process_request(&mut client, &request(TypeUrl::RouteConfiguration, "", ""), None).is_none());
        assert!(client.subscriptions.contains(&TypeUrl::RouteConfiguration));

        let unknown = DiscoveryRequest { type_url: "type.googleapis.com/envoy.config.core.v3.Secret".to_owned(), ..Default::default() };
        assert!(process_request(&mut client, &unknown, Some(&snapshot())).is_none());
        assert_eq!(client.subscriptions.len(), 1);
    }

    #[tokio::test]
    async fn test_update_pushes_subscribed_types() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut client = AdsClient::new("10.0.0.7:50000".parse().unwrap(), tx);
        client.subscriptions.insert(TypeUrl::Listener);
        let ads_clients = AdsClients::new();
        ads_clients.add_or_replace_client(client);

        let (actions_tx, actions_rx) = mpsc::channel(1);
        let service = AggregateServerService { snapshot: CurrentSnapshot::default(), ads_clients, stream_resources_rx: actions_rx };
        let current = Arc::clone(&service.snapshot);
        actions_tx.send(ServerAction::UpdateSnapshot(snapshot())).await.unwrap();
        drop(actions_tx);
        service.start().await;

        let pushed = rx.recv().await.unwrap().unwrap();
        assert_eq!(pushed.type_url, TypeUrl::Listener.to_string());
        assert!(rx.try_recv().is_err());
        assert_eq!(current_snapshot(&current).map(|s| s.version), Some(1));
    }

    #[tokio::test]
    async fn test_stalled_client_does_not_block_pushes() {
        let subscribed = |address: &str, sender| {
            let mut client = AdsClient::new(address.parse().unwrap(), sender);
            client.subscriptions.extend([TypeUrl::Cluster, TypeUrl::Listener]);
            client
        };
        let (stalled_tx, mut stalled_rx) = mpsc::channel(1);
        let (healthy_tx, mut healthy_rx) = mpsc::channel(8);
        let (closed_tx, closed_rx) = mpsc::channel(8);
        drop(closed_rx);
        let ads_clients = AdsClients::new();
        ads_clients.add_or_replace_client(subscribed("10.0.0.7:50000", stalled_tx));
        ads_clients.add_or_replace_client(subscribed("10.0.0.8:50000", healthy_tx));
        ads_clients.add_or_replace_client(subscribed("10.0.0.9:50000", closed_tx));

        let (actions_tx, actions_rx) = mpsc::channel(4);
        let service = AggregateServerService { snapshot: CurrentSnapshot::default(), ads_clients: ads_clients.clone(), stream_resources_rx: actions_rx };
        let mut second = snapshot();
        second.version = 2;
        actions_tx.send(ServerAction::UpdateSnapshot(snapshot())).await.unwrap();
        actions_tx.send(ServerAction::UpdateSnapshot(second)).await.unwrap();
        drop(actions_tx);
        tokio::time::timeout(Duration::from_secs(1), service.start()).await.unwrap();

        let pushed: Vec<String> = std::iter::from_fn(|| healthy_rx.try_recv().ok()).map(|r| r.unwrap().version_info).collect();
        assert_eq!(pushed, vec!["1", "1", "2", "2"]);
        assert_eq!(stalled_rx.try_recv().unwrap().unwrap().version_info, "1");
        assert!(stalled_rx.try_recv().is_err());
        assert_eq!(ads_clients.clients().len(), 2);
    }
}
