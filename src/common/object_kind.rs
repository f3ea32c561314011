use std::fmt::Display;

use kube::core::GroupVersionKind;

const NETWORKING_GROUP: &str = "networking.k8s.io";
const EXTENSIONS_GROUP: &str = "extensions";
const CORE_GROUP: &str = "";

/// Every kind the controller mirrors. The set is closed: anything else is rejected by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    IngressNetworkingV1,
    IngressNetworkingV1beta1,
    IngressExtensionsV1beta1,
    IngressClass,
    Service,
    Secret,
    Endpoints,
}

impl ObjectKind {
    pub fn group(self) -> &'static str {
        match self {
            ObjectKind::IngressNetworkingV1 | ObjectKind::IngressNetworkingV1beta1 | ObjectKind::IngressClass => NETWORKING_GROUP,
            ObjectKind::IngressExtensionsV1beta1 => EXTENSIONS_GROUP,
            ObjectKind::Service | ObjectKind::Secret | ObjectKind::Endpoints => CORE_GROUP,
        }
    }

    pub fn version(self) -> &'static str {
        match self {
            ObjectKind::IngressNetworkingV1beta1 | ObjectKind::IngressExtensionsV1beta1 => "v1beta1",
            _ => "v1",
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            ObjectKind::IngressNetworkingV1 | ObjectKind::IngressNetworkingV1beta1 | ObjectKind::IngressExtensionsV1beta1 => "Ingress",
            ObjectKind::IngressClass => "IngressClass",
            ObjectKind::Service => "Service",
            ObjectKind::Secret => "Secret",
            ObjectKind::Endpoints => "Endpoints",
        }
    }

    pub fn gvk(self) -> GroupVersionKind {
        GroupVersionKind::gvk(self.group(), self.version(), self.kind())
    }

    pub fn is_namespaced(self) -> bool {
        !matches!(self, ObjectKind::IngressClass)
    }

    /// Ingress-like kinds go through the ingress class filter before they are stored.
    pub fn is_class_gated(self) -> bool {
        matches!(self, ObjectKind::IngressNetworkingV1 | ObjectKind::IngressNetworkingV1beta1 | ObjectKind::IngressExtensionsV1beta1)
    }

    /// Legacy extensions ingresses share the networking/v1beta1 partition.
    pub fn partition(self) -> ObjectKind {
        match self {
            ObjectKind::IngressExtensionsV1beta1 => ObjectKind::IngressNetworkingV1beta1,
            kind => kind,
        }
    }

    pub fn object_key(self, namespace: Option<&str>, name: &str) -> String {
        if self.is_namespaced() {
            format!("{}/{name}", namespace.unwrap_or_default())
        } else {
            name.to_owned()
        }
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gvk = self.gvk();
        write!(f, "{}/{}", gvk.api_version(), gvk.kind)
    }
}
