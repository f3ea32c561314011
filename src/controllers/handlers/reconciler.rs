use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        core::v1::{Endpoints, Secret, Service},
        networking::v1::{Ingress, IngressClass},
    },
    chrono::Utc,
    ClusterResourceScope, NamespaceResourceScope,
};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, instrument, warn};
use typed_builder::TypedBuilder;

use crate::{
    common::{ExtensionsIngress, NetworkingIngress, ResourceKey},
    controllers::{
        utils::{is_classless, is_default_ingress_class, matches_ingress_class, ClassBinding},
        ControllerError, RECONCILE_DELETION_WAIT,
    },
    state::{CacheStores, Storable, StoreError},
};

type Result<T, E = ControllerError> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    No,
    After(Duration),
}

/// Source of the live object for a reconcile request. `Ok(None)` means the object is gone.
#[async_trait]
pub trait ResourceFetcher<R>: Send + Sync {
    async fn fetch(&self, key: &ResourceKey) -> Result<Option<R>, kube::Error>;
}

pub struct ApiFetcher<R: Resource> {
    client: Client,
    api_for: fn(Client, Option<&str>) -> Api<R>,
}

impl<R> ApiFetcher<R>
where
    R: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    pub fn namespaced(client: Client) -> Self {
        Self {
            client,
            api_for: |client, namespace| match namespace {
                Some(namespace) => Api::namespaced(client, namespace),
                None => Api::all(client),
            },
        }
    }
}

impl<R> ApiFetcher<R>
where
    R: Resource<DynamicType = (), Scope = ClusterResourceScope>,
{
    pub fn cluster(client: Client) -> Self {
        Self { client, api_for: |client, _| Api::all(client) }
    }
}

#[async_trait]
impl<R> ResourceFetcher<R> for ApiFetcher<R>
where
    R: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn fetch(&self, key: &ResourceKey) -> Result<Option<R>, kube::Error> {
        let api = (self.api_for)(self.client.clone(), key.namespace.as_deref());
        api.get_opt(&key.name).await
    }
}

/// Whether the controller is currently the cluster default ingress class.
#[derive(Clone, Debug)]
pub enum DefaultClassSource {
    Fixed(bool),
    /// Any stored IngressClass of this controller carrying the default annotation.
    Store(CacheStores),
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct ClassGate {
    class_name: String,
    default_class: DefaultClassSource,
}

impl ClassGate {
    pub fn is_default(&self) -> Result<bool, StoreError> {
        match &self.default_class {
            DefaultClassSource::Fixed(is_default) => Ok(*is_default),
            DefaultClassSource::Store(store) => has_default_class(store),
        }
    }

    pub fn matches<R: ClassBinding>(&self, object: &R) -> Result<bool, StoreError> {
        Ok(matches_ingress_class(object, &self.class_name, self.is_default()?))
    }
}

fn has_default_class(store: &CacheStores) -> Result<bool, StoreError> {
    Ok(store.list_ingress_classes()?.iter().any(is_default_ingress_class))
}

/// Kinds the reconciler can drive. Only ingress kinds consult the class gate.
pub trait Reconcilable: Storable + DeserializeOwned + Debug + PartialEq {
    fn passes_class_gate(&self, _gate: &ClassGate) -> Result<bool, StoreError> {
        Ok(true)
    }
}

impl Reconcilable for Ingress {
    fn passes_class_gate(&self, gate: &ClassGate) -> Result<bool, StoreError> {
        gate.matches(self)
    }
}

impl Reconcilable for NetworkingIngress {
    fn passes_class_gate(&self, gate: &ClassGate) -> Result<bool, StoreError> {
        gate.matches(self)
    }
}

impl Reconcilable for ExtensionsIngress {
    fn passes_class_gate(&self, gate: &ClassGate) -> Result<bool, StoreError> {
        gate.matches(self)
    }
}

impl Reconcilable for IngressClass {}
impl Reconcilable for Service {}
impl Reconcilable for Endpoints {}
impl Reconcilable for Secret {}

#[derive(TypedBuilder)]
pub struct Reconciler<R: Reconcilable> {
    store: CacheStores,
    fetcher: Arc<dyn ResourceFetcher<R>>,
    rebuild: Arc<Notify>,
    #[builder(default, setter(strip_option))]
    class_gate: Option<ClassGate>,
    /// Set on the IngressClass reconciler. Receives whether the store holds a default class of
    /// this controller, after every store mutation.
    #[builder(default, setter(strip_option))]
    default_class: Option<watch::Sender<bool>>,
}

impl<R: Reconcilable> Reconciler<R> {
    #[instrument(level = "info", name = "Reconcile", skip_all, fields(kind = %R::KIND, id = %key))]
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<Requeue> {
        let live = match self.fetcher.fetch(key).await {
            Ok(live) => live,
            Err(e) => {
                warn!("Unable to fetch {key} {e}");
                return Err(ControllerError::FetchFailed(e.to_string()));
            },
        };

        let Some(live) = live else {
            if self.store.delete_key::<R>(key).map_err(|e| self.store_error(e))?.is_some() {
                info!("Object is gone, removed from store");
                self.stored_changed()?;
            }
            return Ok(Requeue::No);
        };

        if live.meta().deletion_timestamp.as_ref().is_some_and(|deleted_at| deleted_at.0 <= Utc::now()) {
            if self.store.contains::<R>(key).map_err(|e| self.store_error(e))? {
                self.store.delete_key::<R>(key).map_err(|e| self.store_error(e))?;
                info!("Object is being deleted, removed from store");
                self.stored_changed()?;
                return Ok(Requeue::After(RECONCILE_DELETION_WAIT));
            }
            debug!("Object is being deleted and is not stored");
            return Ok(Requeue::No);
        }

        if let Some(gate) = self.class_gate.as_ref().filter(|_| R::KIND.is_class_gated()) {
            if !live.passes_class_gate(gate).map_err(|e| self.store_error(e))? {
                if self.store.delete_key::<R>(key).map_err(|e| self.store_error(e))?.is_some() {
                    info!("Object no longer matches ingress class {}, removed from store", gate.class_name);
                    self.stored_changed()?;
                } else {
                    debug!("Object does not match ingress class {}", gate.class_name);
                }
                return Ok(Requeue::No);
            }
        }

        let stored = self.store.get::<R>(key).map_err(|e| self.store_error(e))?;
        if stored.as_ref() == Some(&live) {
            debug!("Object not changed");
            return Ok(Requeue::No);
        }
        self.store.add(&live).map_err(|e| self.store_error(e))?;
        info!("Object stored, version {:?}", live.resource_version());
        self.stored_changed()?;
        Ok(Requeue::No)
    }

    fn stored_changed(&self) -> Result<()> {
        self.rebuild.notify_one();
        if let Some(sender) = &self.default_class {
            let is_default = has_default_class(&self.store).map_err(|e| self.store_error(e))?;
            let changed = sender.send_if_modified(|current| std::mem::replace(current, is_default) != is_default);
            if changed {
                info!("Default ingress class of this controller is now {is_default}");
            }
        }
        Ok(())
    }

    fn store_error(&self, e: StoreError) -> ControllerError {
        error!("Store failure for {} {e}", R::KIND);
        ControllerError::Store(e)
    }
}

/// Identities of every classless object among `objects`.
pub fn list_classless<R, I>(objects: I) -> Vec<ResourceKey>
where
    R: ClassBinding,
    I: IntoIterator<Item = Arc<R>>,
{
    objects.into_iter().filter(|object| is_classless(object.as_ref())).map(|object| ResourceKey::from(object.as_ref())).collect()
}
