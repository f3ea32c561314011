mod stored_object;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use k8s_openapi::api::{
    core::v1::{Endpoints, Service},
    networking::v1::{Ingress, IngressClass},
};
pub use stored_object::{Storable, StoredObject};
use tracing::debug;

use crate::common::{NetworkingIngress, ObjectKind, ResourceKey, INGRESS_CLASS_CONTROLLER};

#[derive(thiserror::Error, Debug, PartialEq, PartialOrd)]
pub enum StoreError {
    UnsupportedKind(String),
    LockingError,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

type Result<T, E = StoreError> = std::result::Result<T, E>;
type Partition = BTreeMap<String, StoredObject>;

const PARTITIONS: [ObjectKind; 6] = [
    ObjectKind::IngressNetworkingV1,
    ObjectKind::IngressNetworkingV1beta1,
    ObjectKind::IngressClass,
    ObjectKind::Service,
    ObjectKind::Secret,
    ObjectKind::Endpoints,
];

/// In-memory mirror of the watched cluster objects, one partition per kind.
///
/// All partitions sit behind a single lock. Values are owned copies: callers never see later
/// mutations of what they added and never mutate what the store holds.
#[derive(Clone, Debug)]
pub struct CacheStores {
    partitions: Arc<RwLock<HashMap<ObjectKind, Partition>>>,
}

impl Default for CacheStores {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStores {
    pub fn new() -> Self {
        Self::with_kinds(&PARTITIONS)
    }

    pub fn with_kinds(kinds: &[ObjectKind]) -> Self {
        let partitions = kinds.iter().map(|kind| (kind.partition(), Partition::new())).collect();
        Self { partitions: Arc::new(RwLock::new(partitions)) }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ObjectKind, Partition>>> {
        self.partitions.read().map_err(|_| StoreError::LockingError)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ObjectKind, Partition>>> {
        self.partitions.write().map_err(|_| StoreError::LockingError)
    }

    pub fn add_object(&self, object: StoredObject) -> Result<()> {
        let kind = object.kind();
        let key = object.key();
        let mut partitions = self.write()?;
        let partition = partitions.get_mut(&kind).ok_or_else(|| StoreError::UnsupportedKind(kind.to_string()))?;
        debug!("Store add {kind} {key}");
        partition.insert(key, object);
        Ok(())
    }

    pub fn delete_object(&self, object: &StoredObject) -> Result<Option<StoredObject>> {
        self.delete_by_kind(object.kind(), &object.key())
    }

    pub fn delete_by_kind(&self, kind: ObjectKind, key: &str) -> Result<Option<StoredObject>> {
        let kind = kind.partition();
        let mut partitions = self.write()?;
        let partition = partitions.get_mut(&kind).ok_or_else(|| StoreError::UnsupportedKind(kind.to_string()))?;
        let removed = partition.remove(key);
        if removed.is_some() {
            debug!("Store delete {kind} {key}");
        }
        Ok(removed)
    }

    pub fn get_by_kind(&self, kind: ObjectKind, key: &str) -> Result<Option<StoredObject>> {
        let kind = kind.partition();
        let partitions = self.read()?;
        let partition = partitions.get(&kind).ok_or_else(|| StoreError::UnsupportedKind(kind.to_string()))?;
        Ok(partition.get(key).cloned())
    }

    /// All objects of a kind ordered by key.
    pub fn list_by_kind(&self, kind: ObjectKind) -> Result<Vec<StoredObject>> {
        let kind = kind.partition();
        let partitions = self.read()?;
        let partition = partitions.get(&kind).ok_or_else(|| StoreError::UnsupportedKind(kind.to_string()))?;
        Ok(partition.values().cloned().collect())
    }

    pub fn add<R: Storable>(&self, resource: &R) -> Result<()> {
        self.add_object(resource.clone().into_stored())
    }

    pub fn delete<R: Storable>(&self, resource: &R) -> Result<Option<R>> {
        Ok(self.delete_by_kind(R::KIND, &resource.store_key())?.and_then(R::from_stored))
    }

    pub fn delete_key<R: Storable>(&self, key: &ResourceKey) -> Result<Option<R>> {
        Ok(self.delete_by_kind(R::KIND, &key.store_key(R::KIND))?.and_then(R::from_stored))
    }

    pub fn get<R: Storable>(&self, key: &ResourceKey) -> Result<Option<R>> {
        Ok(self.get_by_kind(R::KIND, &key.store_key(R::KIND))?.and_then(R::from_stored))
    }

    pub fn contains<R: Storable>(&self, key: &ResourceKey) -> Result<bool> {
        let kind = R::KIND.partition();
        let partitions = self.read()?;
        let partition = partitions.get(&kind).ok_or_else(|| StoreError::UnsupportedKind(kind.to_string()))?;
        Ok(partition.contains_key(&key.store_key(kind)))
    }

    pub fn list<R: Storable>(&self) -> Result<Vec<R>> {
        Ok(self.list_by_kind(R::KIND)?.into_iter().filter_map(R::from_stored).collect())
    }

    pub fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.get(&ResourceKey::namespaced(name, namespace))
    }

    /// Endpoints objects share the name of the Service they back.
    pub fn get_endpoints_for_service(&self, namespace: &str, service_name: &str) -> Result<Option<Endpoints>> {
        self.get(&ResourceKey::namespaced(service_name, namespace))
    }

    /// Ingress classes that name this controller in `spec.controller`.
    pub fn list_ingress_classes(&self) -> Result<Vec<IngressClass>> {
        Ok(self
            .list::<IngressClass>()?
            .into_iter()
            .filter(|class| class.spec.as_ref().and_then(|spec| spec.controller.as_deref()) == Some(INGRESS_CLASS_CONTROLLER))
            .collect())
    }

    pub fn list_ingresses_v1(&self) -> Result<Vec<Ingress>> {
        self.list()
    }

    pub fn list_ingresses_v1beta1(&self) -> Result<Vec<NetworkingIngress>> {
        self.list()
    }
}
