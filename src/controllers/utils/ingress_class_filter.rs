use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::{Resource, ResourceExt};

use crate::common::{ExtensionsIngress, NetworkingIngress, DEFAULT_INGRESS_CLASS_ANNOTATION, INGRESS_CLASS_ANNOTATION};

/// Objects that can be bound to an ingress class.
///
/// Every such object may carry the `kubernetes.io/ingress.class` annotation. Only the
/// `networking.k8s.io/v1` Ingress has a class field that takes part in matching.
pub trait ClassBinding: Resource {
    fn class_field(&self) -> Option<&str> {
        None
    }

    fn class_annotation(&self) -> Option<&str> {
        self.meta().annotations.as_ref().and_then(|annotations| annotations.get(INGRESS_CLASS_ANNOTATION)).map(String::as_str)
    }
}

impl ClassBinding for Ingress {
    fn class_field(&self) -> Option<&str> {
        self.spec.as_ref().and_then(|spec| spec.ingress_class_name.as_deref())
    }
}

impl ClassBinding for NetworkingIngress {}
impl ClassBinding for ExtensionsIngress {}

pub fn is_classless<R: ClassBinding>(object: &R) -> bool {
    object.class_annotation().is_none() && object.class_field().is_none()
}

pub fn matches_ingress_class<R: ClassBinding>(object: &R, configured_class: &str, is_default: bool) -> bool {
    if is_default && is_classless(object) {
        return true;
    }

    if object.class_field() == Some(configured_class) {
        return true;
    }

    object.class_annotation() == Some(configured_class)
}

pub fn is_default_ingress_class(class: &IngressClass) -> bool {
    class.annotations().get(DEFAULT_INGRESS_CLASS_ANNOTATION).is_some_and(|value| value == "true")
}
