use k8s_openapi::{
    api::{
        core::v1::{EndpointPort, Endpoints, Service, ServicePort},
        networking::v1::Ingress,
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::ResourceExt;
use tracing::{debug, warn};

use super::{
    model::PathMatch,
    xds_cache::{XdsCache, LISTENER_NAME, ROUTE_CONFIGURATION_NAME},
};
use crate::{
    common::{NetworkingIngress, ResourceKey},
    controllers::IngressApi,
    state::{CacheStores, StoreError},
};

const LISTENER_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PATH: &str = "/";

#[derive(Clone, Debug, PartialEq, Eq)]
enum BackendPort {
    Number(i32),
    Name(String),
}

impl std::fmt::Display for BackendPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendPort::Number(number) => write!(f, "{number}"),
            BackendPort::Name(name) => write!(f, "{name}"),
        }
    }
}

/// One `(host, path, backend)` rule of an Ingress, independent of the API version it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
struct IngressRoute {
    name: String,
    host: Option<String>,
    path: PathMatch,
    service: String,
    port: BackendPort,
}

pub struct ResourceGenerator<'a> {
    store: &'a CacheStores,
    ingress_api: IngressApi,
    listener_port: u16,
}

impl<'a> ResourceGenerator<'a> {
    pub fn new(store: &'a CacheStores, ingress_api: IngressApi, listener_port: u16) -> Self {
        Self { store, ingress_api, listener_port }
    }

    /// Builds the xDS cache for every stored Ingress of the chosen API and returns the keys of the
    /// Ingresses that were translated.
    pub fn generate_resources(&self) -> Result<(XdsCache, Vec<ResourceKey>), StoreError> {
        let ingresses: Vec<(ResourceKey, Vec<IngressRoute>)> = match self.ingress_api {
            IngressApi::NetworkingV1 => self.store.list_ingresses_v1()?.iter().map(|i| (ResourceKey::from(i), routes_v1(i))).collect(),
            IngressApi::NetworkingV1beta1 | IngressApi::ExtensionsV1beta1 => {
                self.store.list_ingresses_v1beta1()?.iter().map(|i| (ResourceKey::from(i), routes_v1beta1(i))).collect()
            },
            IngressApi::Other => vec![],
        };

        let mut cache = XdsCache::new();
        let mut translated = vec![];
        for (key, routes) in ingresses {
            let namespace = key.namespace.clone().unwrap_or_default();
            for route in routes {
                let cluster = format!("{}.{namespace}:{}", route.service, route.port);
                self.add_cluster_with_endpoints(&mut cache, &cluster, &namespace, &route)?;
                cache.add_route(&route.name, route.host, route.path, &cluster);
            }
            translated.push(key);
        }

        cache.add_listener(LISTENER_NAME, vec![ROUTE_CONFIGURATION_NAME.to_owned()], LISTENER_ADDRESS, u32::from(self.listener_port));
        debug!("Generated resources for {} ingresses", translated.len());
        Ok((cache, translated))
    }

    fn add_cluster_with_endpoints(&self, cache: &mut XdsCache, cluster: &str, namespace: &str, route: &IngressRoute) -> Result<(), StoreError> {
        cache.add_cluster(cluster);
        if !cache.endpoints(cluster).is_empty() {
            return Ok(());
        }

        let Some(service) = self.store.get_service(namespace, &route.service)? else {
            warn!("Service {namespace}/{} not found for cluster {cluster}", route.service);
            return Ok(());
        };
        let Some(service_port) = find_service_port(&service, &route.port) else {
            warn!("Service {namespace}/{} has no port {}", route.service, route.port);
            return Ok(());
        };
        let Some(endpoints) = self.store.get_endpoints_for_service(namespace, &route.service)? else {
            debug!("No endpoints for service {namespace}/{}", route.service);
            return Ok(());
        };

        for (address, port) in resolve_endpoints(&endpoints, service_port) {
            cache.add_endpoint(cluster, &address, port);
        }
        Ok(())
    }
}

fn path_match(path: Option<&str>, path_type: Option<&str>) -> PathMatch {
    let path = path.filter(|path| !path.is_empty()).unwrap_or(DEFAULT_PATH).to_owned();
    match path_type {
        Some("Exact") => PathMatch::Exact(path),
        _ => PathMatch::Prefix(path),
    }
}

fn routes_v1(ingress: &Ingress) -> Vec<IngressRoute> {
    let prefix = route_prefix(ingress.namespace(), &ingress.name_any());
    let Some(spec) = ingress.spec.as_ref() else {
        return vec![];
    };

    let backend_of = |backend: &k8s_openapi::api::networking::v1::IngressBackend| {
        let service = backend.service.as_ref()?;
        let port = service.port.as_ref()?;
        let port = match (port.number, port.name.as_ref()) {
            (Some(number), _) => BackendPort::Number(number),
            (None, Some(name)) => BackendPort::Name(name.clone()),
            (None, None) => return None,
        };
        Some((service.name.clone(), port))
    };

    let mut routes = vec![];
    for (rule_index, rule) in spec.rules.iter().flatten().enumerate() {
        for (path_index, path) in rule.http.iter().flat_map(|http| http.paths.iter()).enumerate() {
            if let Some((service, port)) = backend_of(&path.backend) {
                routes.push(IngressRoute {
                    name: format!("{prefix}/{rule_index}/{path_index}"),
                    host: rule.host.clone(),
                    path: path_match(path.path.as_deref(), Some(path.path_type.as_str())),
                    service,
                    port,
                });
            }
        }
    }
    if let Some((service, port)) = spec.default_backend.as_ref().and_then(backend_of) {
        routes.push(IngressRoute { name: format!("{prefix}/default"), host: None, path: path_match(None, None), service, port });
    }
    routes
}

fn routes_v1beta1(ingress: &NetworkingIngress) -> Vec<IngressRoute> {
    let prefix = route_prefix(ingress.namespace(), &ingress.name_any());
    let Some(spec) = ingress.spec.as_ref() else {
        return vec![];
    };

    let backend_of = |backend: &crate::common::ingress_v1beta1::IngressBackend| {
        let service = backend.service_name.clone()?;
        let port = match backend.service_port.as_ref()? {
            IntOrString::Int(number) => BackendPort::Number(*number),
            IntOrString::String(name) => BackendPort::Name(name.clone()),
        };
        Some((service, port))
    };

    let mut routes = vec![];
    for (rule_index, rule) in spec.rules.iter().flatten().enumerate() {
        for (path_index, path) in rule.http.iter().flat_map(|http| http.paths.iter()).enumerate() {
            if let Some((service, port)) = backend_of(&path.backend) {
                routes.push(IngressRoute {
                    name: format!("{prefix}/{rule_index}/{path_index}"),
                    host: rule.host.clone(),
                    path: path_match(path.path.as_deref(), path.path_type.as_deref()),
                    service,
                    port,
                });
            }
        }
    }
    if let Some((service, port)) = spec.backend.as_ref().and_then(backend_of) {
        routes.push(IngressRoute { name: format!("{prefix}/default"), host: None, path: path_match(None, None), service, port });
    }
    routes
}

fn route_prefix(namespace: Option<String>, name: &str) -> String {
    format!("{}/{name}", namespace.unwrap_or_default())
}

fn find_service_port<'s>(service: &'s Service, port: &BackendPort) -> Option<&'s ServicePort> {
    service.spec.as_ref()?.ports.as_ref()?.iter().find(|service_port| match port {
        BackendPort::Number(number) => service_port.port == *number,
        BackendPort::Name(name) => service_port.name.as_ref() == Some(name),
    })
}

fn subset_port_matches(endpoint_port: &EndpointPort, service_port: &ServicePort, single_port: bool) -> bool {
    if let Some(name) = service_port.name.as_ref().filter(|name| !name.is_empty()) {
        return endpoint_port.name.as_ref() == Some(name);
    }
    match &service_port.target_port {
        Some(IntOrString::Int(target)) => endpoint_port.port == *target,
        _ => single_port,
    }
}

/// One `(address, port)` per ready address of every subset exposing the service port.
fn resolve_endpoints(endpoints: &Endpoints, service_port: &ServicePort) -> Vec<(String, u32)> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .filter_map(|subset| {
            let ports = subset.ports.as_deref().unwrap_or_default();
            let port = ports.iter().find(|port| subset_port_matches(port, service_port, ports.len() == 1))?;
            let port = u32::try_from(port.port).ok()?;
            Some(subset.addresses.iter().flatten().map(move |address| (address.ip.clone(), port)))
        })
        .flatten()
        .collect()
}
