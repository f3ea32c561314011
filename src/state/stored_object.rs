use k8s_openapi::api::{
    core::v1::{Endpoints, Secret, Service},
    networking::v1::{Ingress, IngressClass},
};
use kube::Resource;
use kube_core::ObjectMeta;

use crate::common::{ExtensionsIngress, NetworkingIngress, ObjectKind, ResourceKey};

/// Owned copy of an object held by the store, tagged with the partition it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredObject {
    IngressV1(Ingress),
    IngressV1beta1(NetworkingIngress),
    IngressClass(IngressClass),
    Service(Service),
    Secret(Secret),
    Endpoints(Endpoints),
}

impl StoredObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            StoredObject::IngressV1(_) => ObjectKind::IngressNetworkingV1,
            StoredObject::IngressV1beta1(_) => ObjectKind::IngressNetworkingV1beta1,
            StoredObject::IngressClass(_) => ObjectKind::IngressClass,
            StoredObject::Service(_) => ObjectKind::Service,
            StoredObject::Secret(_) => ObjectKind::Secret,
            StoredObject::Endpoints(_) => ObjectKind::Endpoints,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            StoredObject::IngressV1(o) => o.meta(),
            StoredObject::IngressV1beta1(o) => o.meta(),
            StoredObject::IngressClass(o) => o.meta(),
            StoredObject::Service(o) => o.meta(),
            StoredObject::Secret(o) => o.meta(),
            StoredObject::Endpoints(o) => o.meta(),
        }
    }

    pub fn resource_key(&self) -> ResourceKey {
        let meta = self.metadata();
        ResourceKey { namespace: meta.namespace.clone(), name: meta.name.clone().unwrap_or_default() }
    }

    pub fn key(&self) -> String {
        self.resource_key().store_key(self.kind())
    }
}

/// Types the store knows how to keep. `KIND` picks the partition, key derivation is shared.
pub trait Storable: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    const KIND: ObjectKind;

    fn into_stored(self) -> StoredObject;
    fn from_stored(object: StoredObject) -> Option<Self>;

    fn store_key(&self) -> String {
        ResourceKey::from(self).store_key(Self::KIND.partition())
    }
}

macro_rules! storable {
    ($type:ty, $kind:expr, $variant:ident) => {
        impl Storable for $type {
            const KIND: ObjectKind = $kind;

            fn into_stored(self) -> StoredObject {
                StoredObject::$variant(self)
            }

            fn from_stored(object: StoredObject) -> Option<Self> {
                match object {
                    StoredObject::$variant(o) => Some(o),
                    _ => None,
                }
            }
        }
    };
}

storable!(Ingress, ObjectKind::IngressNetworkingV1, IngressV1);
storable!(NetworkingIngress, ObjectKind::IngressNetworkingV1beta1, IngressV1beta1);
storable!(IngressClass, ObjectKind::IngressClass, IngressClass);
storable!(Service, ObjectKind::Service, Service);
storable!(Secret, ObjectKind::Secret, Secret);
storable!(Endpoints, ObjectKind::Endpoints, Endpoints);

impl Storable for ExtensionsIngress {
    const KIND: ObjectKind = ObjectKind::IngressExtensionsV1beta1;

    fn into_stored(self) -> StoredObject {
        StoredObject::IngressV1beta1(self.into())
    }

    fn from_stored(object: StoredObject) -> Option<Self> {
        match object {
            StoredObject::IngressV1beta1(o) => Some(o.into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_scoped_key() {
        let class = IngressClass { metadata: ObjectMeta { name: Some("sail".to_owned()), ..Default::default() }, ..Default::default() };
        assert_eq!(class.store_key(), "sail");
        assert_eq!(class.into_stored().key(), "sail");
    }
}
