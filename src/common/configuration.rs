use std::{fmt::Display, net::SocketAddr, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use super::DEFAULT_INGRESS_CLASS;
use crate::Result;

#[derive(Clone, Debug, TypedBuilder, Deserialize, PartialEq)]
pub struct Address {
    pub hostname: String,
    pub port: u16,
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(format!("{}:{}", self.hostname, self.port).as_str())
    }
}

impl Default for Address {
    fn default() -> Self {
        Self { hostname: "0.0.0.0".to_owned(), port: 18000 }
    }
}

impl Address {
    pub fn to_ip(&self) -> Result<SocketAddr> {
        self.to_string().parse::<SocketAddr>().map_err(std::convert::Into::into)
    }
}

fn default_ingress_class() -> String {
    DEFAULT_INGRESS_CLASS.to_owned()
}

fn enabled() -> bool {
    true
}

fn default_sync_period_seconds() -> u64 {
    600
}

fn default_cache_sync_timeout_seconds() -> u64 {
    120
}

fn default_envoy_listener_port() -> u16 {
    8080
}

#[derive(Clone, Debug, TypedBuilder, Deserialize, PartialEq)]
pub struct Configuration {
    #[builder(default = default_ingress_class())]
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,
    #[builder(default = true)]
    #[serde(default = "enabled")]
    pub enable_ingress_networking_v1: bool,
    #[builder(default)]
    #[serde(default)]
    pub enable_ingress_networking_v1beta1: bool,
    #[builder(default)]
    #[serde(default)]
    pub enable_ingress_extensions_v1beta1: bool,
    #[builder(default = true)]
    #[serde(default = "enabled")]
    pub enable_ingress_class_networking_v1: bool,
    #[builder(default = true)]
    #[serde(default = "enabled")]
    pub enable_services: bool,
    #[builder(default = true)]
    #[serde(default = "enabled")]
    pub update_status: bool,
    #[builder(default = default_sync_period_seconds())]
    #[serde(default = "default_sync_period_seconds")]
    pub sync_period_seconds: u64,
    #[builder(default = default_cache_sync_timeout_seconds())]
    #[serde(default = "default_cache_sync_timeout_seconds")]
    pub cache_sync_timeout_seconds: u64,
    #[builder(default)]
    #[serde(default)]
    pub termination_delay_seconds: u64,
    #[builder(default)]
    #[serde(default)]
    pub control_plane: Address,
    #[builder(default = default_envoy_listener_port())]
    #[serde(default = "default_envoy_listener_port")]
    pub envoy_listener_port: u16,
    #[builder(default)]
    #[serde(default)]
    pub enable_open_telemetry: Option<bool>,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigurationError {
    #[error("ingress class must be not empty")]
    IngressClass,
    #[error("at least one ingress api version must be enabled")]
    IngressApi,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.ingress_class.is_empty() {
            return Err(ConfigurationError::IngressClass.into());
        }
        if !(self.enable_ingress_networking_v1 || self.enable_ingress_networking_v1beta1 || self.enable_ingress_extensions_v1beta1) {
            return Err(ConfigurationError::IngressApi.into());
        }
        if self.sync_period_seconds == 0 {
            return Err(ConfigurationError::ZeroValue("sync_period_seconds").into());
        }
        if self.cache_sync_timeout_seconds == 0 {
            return Err(ConfigurationError::ZeroValue("cache_sync_timeout_seconds").into());
        }
        if self.envoy_listener_port == 0 {
            return Err(ConfigurationError::ZeroValue("envoy_listener_port").into());
        }
        Ok(())
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_seconds)
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_seconds)
    }

    pub fn termination_delay(&self) -> Duration {
        Duration::from_secs(self.termination_delay_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let configuration: Configuration = serde_yaml::from_str("{}").unwrap();
        assert_eq!(configuration, Configuration::builder().build());
        assert_eq!(configuration.ingress_class, "sail");
        assert!(configuration.enable_ingress_networking_v1);
        assert!(!configuration.enable_ingress_networking_v1beta1);
        assert!(!configuration.enable_ingress_extensions_v1beta1);
        assert_eq!(configuration.control_plane.to_string(), "0.0.0.0:18000");
        assert!(configuration.validate().is_ok());
    }

    #[test]
    fn test_configuration_file() {
        let yaml = r"
ingress_class: edge
enable_ingress_networking_v1: false
enable_ingress_networking_v1beta1: true
enable_services: false
sync_period_seconds: 30
control_plane:
  hostname: 127.0.0.1
  port: 9000
envoy_listener_port: 10080
";
        let configuration: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(configuration.ingress_class, "edge");
        assert!(configuration.enable_ingress_networking_v1beta1);
        assert!(!configuration.enable_services);
        assert_eq!(configuration.sync_period(), Duration::from_secs(30));
        assert_eq!(configuration.control_plane.to_ip().unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert!(configuration.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let no_class = Configuration::builder().ingress_class(String::new()).build();
        assert!(no_class.validate().is_err());

        let no_api = Configuration::builder()
            .enable_ingress_networking_v1(false)
            .enable_ingress_networking_v1beta1(false)
            .enable_ingress_extensions_v1beta1(false)
            .build();
        assert!(no_api.validate().is_err());

        let no_port = Configuration::builder().envoy_listener_port(0).build();
        assert!(no_port.validate().is_err());
    }
}
