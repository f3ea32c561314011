mod configuration;
pub mod ingress_v1beta1;
mod object_kind;
mod resource_key;

pub use configuration::{Address, Configuration, ConfigurationError};
pub use ingress_v1beta1::{ExtensionsIngress, NetworkingIngress};
pub use object_kind::ObjectKind;
pub use resource_key::ResourceKey;

pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
pub const DEFAULT_INGRESS_CLASS_ANNOTATION: &str = "ingressclass.kubernetes.io/is-default-class";
pub const DEFAULT_INGRESS_CLASS: &str = "sail";
/// Value of `IngressClass.spec.controller` for classes handled by this controller.
pub const INGRESS_CLASS_CONTROLLER: &str = "inendless.com/ingress-controller";

pub fn format_resource<R>() -> &'static str {
    std::any::type_name::<R>().split("::").last().unwrap_or_default()
}
