use std::fmt::Display;

use kube::Resource;

use super::ObjectKind;

/// Identity of a watched object. Stable across spec and status updates.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned(), namespace: None }
    }

    pub fn namespaced(name: &str, namespace: &str) -> Self {
        Self { name: name.to_owned(), namespace: Some(namespace.to_owned()) }
    }

    /// Key under which an object with this identity is kept in the partition of `kind`.
    pub fn store_key(&self, kind: ObjectKind) -> String {
        kind.object_key(self.namespace.as_deref(), &self.name)
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl<R: Resource> From<&R> for ResourceKey {
    fn from(resource: &R) -> Self {
        let meta = resource.meta();
        let name = match (meta.name.as_ref(), meta.generate_name.as_ref()) {
            (None, None) => "",
            (Some(name), _) | (None, Some(name)) => name,
        };
        Self { name: name.to_owned(), namespace: meta.namespace.clone() }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::{core::v1::Service, networking::v1::IngressClass};
    use kube_core::ObjectMeta;

    use super::*;

    #[test]
    fn test_keys_from_resources() {
        let service = Service {
            metadata: ObjectMeta { name: Some("web".to_owned()), namespace: Some("shop".to_owned()), ..Default::default() },
            ..Default::default()
        };
        let key = ResourceKey::from(&service);
        assert_eq!(key, ResourceKey::namespaced("web", "shop"));
        assert_eq!(key.to_string(), "shop/web");
        assert_eq!(key.store_key(ObjectKind::Service), "shop/web");

        let class = IngressClass { metadata: ObjectMeta { name: Some("sail".to_owned()), ..Default::default() }, ..Default::default() };
        let key = ResourceKey::from(&class);
        assert_eq!(key.to_string(), "sail");
        assert_eq!(key.store_key(ObjectKind::IngressClass), "sail");
    }
}
