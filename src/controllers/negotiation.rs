use std::fmt::Display;

use async_trait::async_trait;
use kube::Client;
use tracing::{debug, info};

use crate::common::{Configuration, ObjectKind};

const INGRESS_RESOURCE: &str = "ingresses";
const INGRESS_CLASS_RESOURCE: &str = "ingressclasses";

/// Ingress API generation the controller serves for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngressApi {
    NetworkingV1,
    NetworkingV1beta1,
    ExtensionsV1beta1,
    Other,
}

impl IngressApi {
    pub fn object_kind(self) -> Option<ObjectKind> {
        match self {
            IngressApi::NetworkingV1 => Some(ObjectKind::IngressNetworkingV1),
            IngressApi::NetworkingV1beta1 => Some(ObjectKind::IngressNetworkingV1beta1),
            IngressApi::ExtensionsV1beta1 => Some(ObjectKind::IngressExtensionsV1beta1),
            IngressApi::Other => None,
        }
    }
}

impl Display for IngressApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.object_kind() {
            Some(kind) => write!(f, "{}", kind.gvk().api_version()),
            None => write!(f, "other"),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum NegotiationError {
    NoSuitableApi,
    Probe(String),
}

impl Display for NegotiationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Answers whether the cluster serves a resource in a given group and version.
#[async_trait]
pub trait ApiResourceProbe: Send + Sync {
    async fn has_api_resource(&self, group: &str, version: &str, resource: &str) -> Result<bool, NegotiationError>;
}

pub struct KubeApiProbe {
    client: Client,
}

impl KubeApiProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApiResourceProbe for KubeApiProbe {
    async fn has_api_resource(&self, group: &str, version: &str, resource: &str) -> Result<bool, NegotiationError> {
        let resources = if group.is_empty() {
            self.client.list_core_api_resources(version).await
        } else {
            self.client.list_api_group_resources(&format!("{group}/{version}")).await
        };

        match resources {
            Ok(list) => Ok(list.resources.iter().any(|r| r.name == resource)),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(e) => Err(NegotiationError::Probe(e.to_string())),
        }
    }
}

/// Picks the most preferred enabled Ingress API the cluster exposes.
pub async fn negotiate_ingress_api(configuration: &Configuration, probe: &dyn ApiResourceProbe) -> Result<IngressApi, NegotiationError> {
    let candidates = [
        (IngressApi::NetworkingV1, configuration.enable_ingress_networking_v1),
        (IngressApi::NetworkingV1beta1, configuration.enable_ingress_networking_v1beta1),
        (IngressApi::ExtensionsV1beta1, configuration.enable_ingress_extensions_v1beta1),
    ];

    for (api, enabled) in candidates {
        let Some(kind) = api.object_kind().filter(|_| enabled) else {
            continue;
        };
        if probe.has_api_resource(kind.group(), kind.version(), INGRESS_RESOURCE).await? {
            info!("Negotiated ingress api {api}");
            return Ok(api);
        }
        debug!("Ingress api {api} is not served by the cluster");
    }

    Err(NegotiationError::NoSuitableApi)
}

/// Controller gating derived from the negotiated API and the configuration.
#[derive(Clone, Debug)]
pub struct IngressControllerConditions {
    chosen: IngressApi,
    configuration: Configuration,
    ingress_class_served: bool,
}

impl IngressControllerConditions {
    pub async fn negotiate(configuration: &Configuration, probe: &dyn ApiResourceProbe) -> Result<Self, NegotiationError> {
        let chosen = negotiate_ingress_api(configuration, probe).await?;
        let mut conditions = Self::new(chosen, configuration.clone());
        if conditions.ingress_class_net_v1_enabled() {
            let kind = ObjectKind::IngressClass;
            conditions.ingress_class_served = probe.has_api_resource(kind.group(), kind.version(), INGRESS_CLASS_RESOURCE).await?;
            if !conditions.ingress_class_served {
                info!("Ingress classes are not served by the cluster, class lookups disabled");
            }
        }
        Ok(conditions)
    }

    pub fn new(chosen: IngressApi, configuration: Configuration) -> Self {
        Self { chosen, configuration, ingress_class_served: true }
    }

    pub fn chosen(&self) -> IngressApi {
        self.chosen
    }

    pub fn ingress_net_v1_enabled(&self) -> bool {
        self.chosen == IngressApi::NetworkingV1 && self.configuration.enable_ingress_networking_v1
    }

    pub fn ingress_net_v1beta1_enabled(&self) -> bool {
        self.chosen == IngressApi::NetworkingV1beta1 && self.configuration.enable_ingress_networking_v1beta1
    }

    pub fn ingress_ext_v1beta1_enabled(&self) -> bool {
        self.chosen == IngressApi::ExtensionsV1beta1 && self.configuration.enable_ingress_extensions_v1beta1
    }

    pub fn ingress_class_net_v1_enabled(&self) -> bool {
        self.chosen == IngressApi::NetworkingV1 && self.configuration.enable_ingress_class_networking_v1 && self.ingress_class_served
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct FakeProbe {
        served: Vec<(&'static str, &'static str)>,
        classes: bool,
        failing: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProbe {
        fn serving(served: Vec<(&'static str, &'static str)>) -> Self {
            Self { served, classes: false, failing: false, calls: Mutex::new(vec![]) }
        }
    }

    #[async_trait]
    impl ApiResourceProbe for FakeProbe {
        async fn has_api_resource(&self, group: &str, version: &str, resource: &str) -> Result<bool, NegotiationError> {
            self.calls.lock().unwrap().push(format!("{group}/{version}"));
            if self.failing {
                return Err(NegotiationError::Probe("connection refused".to_owned()));
            }
            let served = self.served.iter().any(|(g, v)| *g == group && *v == version);
            Ok(served && (resource == INGRESS_RESOURCE || (resource == INGRESS_CLASS_RESOURCE && self.classes)))
        }
    }

    fn all_enabled() -> Configuration {
        Configuration::builder().enable_ingress_networking_v1beta1(true).enable_ingress_extensions_v1beta1(true).build()
    }

    #[tokio::test]
    async fn test_prefers_networking_v1() {
        let probe = FakeProbe::serving(vec![("networking.k8s.io", "v1"), ("networking.k8s.io", "v1beta1"), ("extensions", "v1beta1")]);
        assert_eq!(negotiate_ingress_api(&all_enabled(), &probe).await, Ok(IngressApi::NetworkingV1));
        assert_eq!(probe.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let probe = FakeProbe::serving(vec![("networking.k8s.io", "v1beta1"), ("extensions", "v1beta1")]);
        assert_eq!(negotiate_ingress_api(&all_enabled(), &probe).await, Ok(IngressApi::NetworkingV1beta1));

        let probe = FakeProbe::serving(vec![("extensions", "v1beta1")]);
        assert_eq!(negotiate_ingress_api(&all_enabled(), &probe).await, Ok(IngressApi::ExtensionsV1beta1));
    }

    #[tokio::test]
    async fn test_disabled_apis_are_not_probed() {
        let probe = FakeProbe::serving(vec![("networking.k8s.io", "v1"), ("extensions", "v1beta1")]);
        let configuration = Configuration::builder().enable_ingress_networking_v1(false).enable_ingress_extensions_v1beta1(true).build();
        assert_eq!(negotiate_ingress_api(&configuration, &probe).await, Ok(IngressApi::ExtensionsV1beta1));
        assert_eq!(*probe.calls.lock().unwrap(), vec!["extensions/v1beta1".to_owned()]);
    }

    #[tokio::test]
    async fn test_no_suitable_api() {
        let probe = FakeProbe::serving(vec![("networking.k8s.io", "v1beta1")]);
        assert_eq!(negotiate_ingress_api(&Configuration::builder().build(), &probe).await, Err(NegotiationError::NoSuitableApi));
    }

    #[tokio::test]
    async fn test_probe_failure_aborts() {
        let probe = FakeProbe { served: vec![], classes: false, failing: true, calls: Mutex::new(vec![]) };
        assert!(matches!(negotiate_ingress_api(&all_enabled(), &probe).await, Err(NegotiationError::Probe(_))));
    }

    #[tokio::test]
    async fn test_conditions_check_ingress_classes() {
        let mut probe = FakeProbe::serving(vec![("networking.k8s.io", "v1")]);
        let conditions = IngressControllerConditions::negotiate(&Configuration::builder().build(), &probe).await.unwrap();
        assert!(conditions.ingress_net_v1_enabled());
        assert!(!conditions.ingress_class_net_v1_enabled());

        probe.classes = true;
        let conditions = IngressControllerConditions::negotiate(&Configuration::builder().build(), &probe).await.unwrap();
        assert!(conditions.ingress_class_net_v1_enabled());

        let configuration = Configuration::builder().enable_ingress_class_networking_v1(false).build();
        let probe = FakeProbe::serving(vec![("networking.k8s.io", "v1")]);
        let conditions = IngressControllerConditions::negotiate(&configuration, &probe).await.unwrap();
        assert!(!conditions.ingress_class_net_v1_enabled());
        assert_eq!(probe.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_conditions() {
        let conditions = IngressControllerConditions::new(IngressApi::NetworkingV1, Configuration::builder().build());
        assert!(conditions.ingress_net_v1_enabled());
        assert!(conditions.ingress_class_net_v1_enabled());
        assert!(!conditions.ingress_net_v1beta1_enabled());

        let configuration = Configuration::builder().enable_ingress_networking_v1beta1(true).build();
        let conditions = IngressControllerConditions::new(IngressApi::NetworkingV1beta1, configuration);
        assert!(conditions.ingress_net_v1beta1_enabled());
        assert!(!conditions.ingress_class_net_v1_enabled());
        assert!(!conditions.ingress_ext_v1beta1_enabled());
    }
}
