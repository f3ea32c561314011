//! Ingress shapes for the `networking.k8s.io/v1beta1` and `extensions/v1beta1` APIs.
//!
//! Both API versions were dropped from `k8s-openapi`, so they are declared here with the fields the
//! controller reads. The two resources share one spec and convert losslessly into each other.

use k8s_openapi::{
    api::core::v1::{LoadBalancerStatus, TypedLocalObjectReference},
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<IngressBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<IngressRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Vec<IngressTLS>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<TypedLocalObjectReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HTTPIngressRuleValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HTTPIngressRuleValue {
    #[serde(default)]
    pub paths: Vec<HTTPIngressPath>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HTTPIngressPath {
    pub backend: IngressBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressTLS {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerStatus>,
}

macro_rules! ingress_v1beta1_resource {
    ($(#[$attr:meta])* $name:ident, $group:literal, $api_version:literal) => {
        $(#[$attr])*
        #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub metadata: ObjectMeta,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub spec: Option<IngressSpec>,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub status: Option<IngressStatus>,
        }

        impl k8s_openapi::Resource for $name {
            const API_VERSION: &'static str = $api_version;
            const GROUP: &'static str = $group;
            const KIND: &'static str = "Ingress";
            const VERSION: &'static str = "v1beta1";
            const URL_PATH_SEGMENT: &'static str = "ingresses";
            type Scope = k8s_openapi::NamespaceResourceScope;
        }

        impl k8s_openapi::Metadata for $name {
            type Ty = ObjectMeta;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

ingress_v1beta1_resource!(
    /// `networking.k8s.io/v1beta1` Ingress.
    NetworkingIngress,
    "networking.k8s.io",
    "networking.k8s.io/v1beta1"
);

ingress_v1beta1_resource!(
    /// `extensions/v1beta1` Ingress, kept in the store as a [`NetworkingIngress`].
    ExtensionsIngress,
    "extensions",
    "extensions/v1beta1"
);

impl From<ExtensionsIngress> for NetworkingIngress {
    fn from(ingress: ExtensionsIngress) -> Self {
        Self { metadata: ingress.metadata, spec: ingress.spec, status: ingress.status }
    }
}

impl From<NetworkingIngress> for ExtensionsIngress {
    fn from(ingress: NetworkingIngress) -> Self {
        Self { metadata: ingress.metadata, spec: ingress.spec, status: ingress.status }
    }
}
