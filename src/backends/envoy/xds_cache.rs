use std::{cmp::Reverse, collections::BTreeMap, time::Duration};

use envoy_api_rs::envoy::{
    config::{
        cluster::v3::{
            cluster::{ClusterDiscoveryType, DiscoveryType, DnsLookupFamily, EdsClusterConfig, LbPolicy},
            Cluster as EnvoyCluster,
        },
        endpoint::v3::{lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint as EnvoyEndpoint, LbEndpoint, LocalityLbEndpoints},
        listener::v3::{filter, Filter, FilterChain, Listener as EnvoyListener},
        route::v3::{
            route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier, Route as EnvoyRoute, RouteAction, RouteConfiguration,
            RouteMatch, VirtualHost,
        },
    },
    extensions::filters::{
        http::router::v3::Router,
        network::http_connection_manager::v3::{
            http_connection_manager::{CodecType, RouteSpecifier},
            http_filter, HttpConnectionManager, HttpFilter, Rds,
        },
    },
};
use itertools::Itertools;
use tracing::debug;

use super::{
    converters::{ads_config_source, AnyTypeConverter, DurationConverter, SocketAddressFactory},
    model::{Cluster, Endpoint, Listener, PathMatch, Route},
};

pub const ROUTE_CONFIGURATION_NAME: &str = "sail_route";
pub const LISTENER_NAME: &str = "sail_http";
pub const ANY_HOST: &str = "*";
const CLUSTER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
const HTTP_CONNECTION_MANAGER_NAME: &str = "envoy.filters.network.http_connection_manager";

/// Resource set for one point in time. Built by a single rebuild pass, so it is not synchronised.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct XdsCache {
    listeners: BTreeMap<String, Listener>,
    routes: BTreeMap<String, Route>,
    clusters: BTreeMap<String, Cluster>,
    endpoints: BTreeMap<String, Vec<Endpoint>>,
}

impl XdsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, name: &str, route_names: Vec<String>, address: &str, port: u32) {
        self.listeners.insert(name.to_owned(), Listener { name: name.to_owned(), address: address.to_owned(), port, route_names });
    }

    pub fn add_route(&mut self, name: &str, host: Option<String>, path: PathMatch, cluster: &str) {
        self.routes.insert(name.to_owned(), Route { name: name.to_owned(), host, path, cluster: cluster.to_owned() });
    }

    pub fn add_cluster(&mut self, name: &str) {
        self.clusters.insert(name.to_owned(), Cluster { name: name.to_owned() });
    }

    /// Appends to the endpoints of `cluster`; repeated calls accumulate.
    pub fn add_endpoint(&mut self, cluster: &str, upstream_host: &str, upstream_port: u32) {
        if !self.clusters.contains_key(cluster) {
            self.add_cluster(cluster);
        }
        self.endpoints
            .entry(cluster.to_owned())
            .or_default()
            .push(Endpoint { upstream_host: upstream_host.to_owned(), upstream_port });
    }

    pub fn clear_endpoints(&mut self, cluster: &str) {
        self.endpoints.remove(cluster);
    }

    pub fn endpoints(&self, cluster: &str) -> &[Endpoint] {
        self.endpoints.get(cluster).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn cluster_contents(&self) -> Vec<EnvoyCluster> {
        self.clusters
            .values()
            .map(|cluster| EnvoyCluster {
                name: cluster.name.clone(),
                connect_timeout: Some(DurationConverter::from(CLUSTER_CONNECT_TIMEOUT)),
                cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds.into())),
                eds_cluster_config: Some(EdsClusterConfig { eds_config: Some(ads_config_source()), service_name: String::new() }),
                lb_policy: LbPolicy::RoundRobin.into(),
                dns_lookup_family: DnsLookupFamily::V4Only.into(),
                ..Default::default()
            })
            .collect()
    }

    /// Every route in one configuration, grouped by host. Exact paths come first, then longer paths.
    pub fn route_contents(&self) -> Vec<RouteConfiguration> {
        let virtual_hosts = self
            .routes
            .values()
            .into_group_map_by(|route| route.host.clone().unwrap_or_else(|| ANY_HOST.to_owned()))
            .into_iter()
            .sorted_by(|(this, _), (other, _)| (this == ANY_HOST, this).cmp(&(other == ANY_HOST, other)))
            .map(|(host, routes)| {
                let routes = routes
                    .into_iter()
                    .sorted_by_key(|route| (matches!(route.path, PathMatch::Prefix(_)), Reverse(route.path.path().len()), route.name.clone()))
                    .map(envoy_route)
                    .collect();
                VirtualHost { name: host.clone(), domains: vec![host], routes, ..Default::default() }
            })
            .collect();

        vec![RouteConfiguration { name: ROUTE_CONFIGURATION_NAME.to_owned(), virtual_hosts, ..Default::default() }]
    }

    pub fn listener_contents(&self) -> Vec<EnvoyListener> {
        self.listeners
            .values()
            .filter_map(|listener| {
                let Some(route_name) = listener.route_names.first() else {
                    debug!("Listener {} has no routes, skipping", listener.name);
                    return None;
                };
                Some(envoy_listener(listener, route_name))
            })
            .collect()
    }

    pub fn endpoints_contents(&self) -> Vec<ClusterLoadAssignment> {
        self.clusters
            .values()
            .map(|cluster| ClusterLoadAssignment {
                cluster_name: cluster.name.clone(),
                endpoints: vec![LocalityLbEndpoints {
                    lb_endpoints: self
                        .endpoints(&cluster.name)
                        .iter()
                        .map(|endpoint| LbEndpoint {
                            host_identifier: Some(HostIdentifier::Endpoint(EnvoyEndpoint {
                                address: Some(SocketAddressFactory::from_address_port(&endpoint.upstream_host, endpoint.upstream_port)),
                                ..Default::default()
                            })),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .collect()
    }
}

fn envoy_route(route: &Route) -> EnvoyRoute {
    let path_specifier = match &route.path {
        PathMatch::Exact(path) => PathSpecifier::Path(path.clone()),
        PathMatch::Prefix(path) => PathSpecifier::Prefix(path.clone()),
    };
    EnvoyRoute {
        name: route.name.clone(),
        r#match: Some(RouteMatch { path_specifier: Some(path_specifier), ..Default::default() }),
        action: Some(Action::Route(RouteAction { cluster_specifier: Some(ClusterSpecifier::Cluster(route.cluster.clone())), ..Default::default() })),
        ..Default::default()
    }
}

fn envoy_listener(listener: &Listener, route_name: &str) -> EnvoyListener {
    let router_filter = HttpFilter {
        name: ROUTER_FILTER_NAME.to_owned(),
        config_type: Some(http_filter::ConfigType::TypedConfig(AnyTypeConverter::from((
            "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router".to_owned(),
            &Router::default(),
        )))),
        ..Default::default()
    };

    let http_connection_manager = HttpConnectionManager {
        stat_prefix: listener.name.clone(),
        codec_type: CodecType::Auto.into(),
        http_filters: vec![router_filter],
        route_specifier: Some(RouteSpecifier::Rds(Rds { config_source: Some(ads_config_source()), route_config_name: route_name.to_owned() })),
        ..Default::default()
    };

    let http_connection_manager_any = AnyTypeConverter::from((
        "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager".to_owned(),
        &http_connection_manager,
    ));

    EnvoyListener {
        name: listener.name.clone(),
        address: Some(SocketAddressFactory::from_address_port(&listener.address, listener.port)),
        filter_chains: vec![FilterChain {
            filters: vec![Filter {
                name: HTTP_CONNECTION_MANAGER_NAME.to_owned(),
                config_type: Some(filter::ConfigType::TypedConfig(http_connection_manager_any)),
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}
