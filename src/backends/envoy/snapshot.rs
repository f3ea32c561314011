use std::collections::HashMap;

use envoy_api_rs::{google::protobuf::Any, prost::Message};

use super::{converters::AnyTypeConverter, model::TypeUrl, xds_cache::XdsCache};

/// Versioned, immutable set of resources handed to the discovery server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub version: u64,
    resources: HashMap<TypeUrl, Vec<Any>>,
}

impl Snapshot {
    pub fn version_info(&self) -> String {
        self.version.to_string()
    }

    pub fn resources(&self, type_url: TypeUrl) -> &[Any] {
        self.resources.get(&type_url).map(Vec::as_slice).unwrap_or_default()
    }
}

fn to_any<M: Message>(type_url: TypeUrl, messages: Vec<M>) -> Vec<Any> {
    messages.iter().map(|message| AnyTypeConverter::from((type_url.to_string(), message))).collect()
}

fn resources_of(cache: &XdsCache) -> HashMap<TypeUrl, Vec<Any>> {
    HashMap::from([
        (TypeUrl::Cluster, to_any(TypeUrl::Cluster, cache.cluster_contents())),
        (TypeUrl::ClusterLoadAssignment, to_any(TypeUrl::ClusterLoadAssignment, cache.endpoints_contents())),
        (TypeUrl::Listener, to_any(TypeUrl::Listener, cache.listener_contents())),
        (TypeUrl::RouteConfiguration, to_any(TypeUrl::RouteConfiguration, cache.route_contents())),
    ])
}

/// Hands out a new snapshot only when the generated resources change, so versions never move for
/// an identical resource set.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    current: Option<Snapshot>,
}

impl SnapshotCache {
    pub fn next(&mut self, cache: &XdsCache) -> Option<Snapshot> {
        let resources = resources_of(cache);
        if self.current.as_ref().is_some_and(|current| current.resources == resources) {
            return None;
        }
        let version = self.current.as_ref().map_or(1, |current| current.version + 1);
        let snapshot = Snapshot { version, resources };
        self.current = Some(snapshot.clone());
        Some(snapshot)
    }
}
