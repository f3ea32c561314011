use envoy_api_rs::{
    envoy::config::core::v3::{
        address,
        config_source::ConfigSourceSpecifier,
        socket_address::{PortSpecifier, Protocol},
        Address, AggregatedConfigSource, ApiVersion, ConfigSource, SocketAddress,
    },
    google,
};

pub enum AnyTypeConverter {}

impl AnyTypeConverter {
    pub fn from<Msg: envoy_api_rs::prost::Message>((type_url, msg): (String, &Msg)) -> google::protobuf::Any {
        google::protobuf::Any { type_url, value: msg.encode_to_vec() }
    }
}

pub enum DurationConverter {}

impl DurationConverter {
    pub fn from(val: std::time::Duration) -> google::protobuf::Duration {
        google::protobuf::Duration {
            nanos: i32::try_from(val.subsec_nanos()).unwrap_or_default(),
            seconds: i64::try_from(val.as_secs()).unwrap_or(i64::MAX),
        }
    }
}

pub enum SocketAddressFactory {}

impl SocketAddressFactory {
    pub fn from_address_port(address: &str, port: u32) -> Address {
        Address {
            address: Some(address::Address::SocketAddress(SocketAddress {
                address: address.to_owned(),
                protocol: Protocol::Tcp.into(),
                port_specifier: Some(PortSpecifier::PortValue(port)),
                ..Default::default()
            })),
        }
    }
}

/// Config source pointing back at the aggregated stream the proxy is already connected to.
pub fn ads_config_source() -> ConfigSource {
    ConfigSource {
        resource_api_version: ApiVersion::V3.into(),
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        ..Default::default()
    }
}
