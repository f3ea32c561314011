use std::{fmt, result::Result as StdResult};

use thiserror::Error;

#[derive(Eq, Hash, PartialEq, Debug, Copy, Clone)]
pub enum TypeUrl {
    Listener,
    Cluster,
    RouteConfiguration,
    ClusterLoadAssignment,
}

impl TypeUrl {
    pub const ALL: [TypeUrl; 4] = [TypeUrl::Cluster, TypeUrl::ClusterLoadAssignment, TypeUrl::Listener, TypeUrl::RouteConfiguration];
}

impl fmt::Display for TypeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TypeUrl::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
                TypeUrl::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
                TypeUrl::RouteConfiguration => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
                TypeUrl::ClusterLoadAssignment => "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment",
            }
        )
    }
}

impl TryFrom<&str> for TypeUrl {
    type Error = XdsError;

    fn try_from(type_url_string: &str) -> StdResult<TypeUrl, XdsError> {
        match type_url_string {
            "type.googleapis.com/envoy.config.listener.v3.Listener" => Ok(TypeUrl::Listener),
            "type.googleapis.com/envoy.config.cluster.v3.Cluster" => Ok(TypeUrl::Cluster),
            "type.googleapis.com/envoy.config.route.v3.RouteConfiguration" => Ok(TypeUrl::RouteConfiguration),
            "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment" => Ok(TypeUrl::ClusterLoadAssignment),
            value => Err(XdsError::UnknownResourceType(format!("did not recognise type_url {value}"))),
        }
    }
}

#[derive(Error, Debug)]
pub enum XdsError {
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
    #[error("server channel closed")]
    ChannelClosed,
}

/// Listener entry of the xDS cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub address: String,
    pub port: u32,
    pub route_names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
}

impl PathMatch {
    pub fn path(&self) -> &str {
        match self {
            PathMatch::Exact(path) | PathMatch::Prefix(path) => path,
        }
    }
}

/// Route entry of the xDS cache. A missing host matches any host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub host: Option<String>,
    pub path: PathMatch,
    pub cluster: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub upstream_host: String,
    pub upstream_port: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_urls() {
        for type_url in TypeUrl::ALL {
            assert_eq!(TypeUrl::try_from(type_url.to_string().as_str()).unwrap(), type_url);
        }
        assert!(TypeUrl::try_from("type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret").is_err());
    }
}
