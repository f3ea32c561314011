use std::sync::Arc;

use futures::future::BoxFuture;
use k8s_openapi::api::{
    core::v1::{Endpoints, Secret, Service},
    networking::v1::Ingress,
};
use tokio::sync::{oneshot, watch, Notify};
use typed_builder::TypedBuilder;

use super::{
    core_v1::CoreV1Controller, ingress::IngressController, ingress_class::IngressClassController, negotiation::IngressControllerConditions,
};
use crate::{
    common::{Configuration, ExtensionsIngress, NetworkingIngress},
    services::StatusQueue,
    state::CacheStores,
};

/// A watch registration plus its work loop. The loop signals `synced` once the initial listing is in.
pub trait Controller: Send + Sync {
    fn name(&self) -> String;
    fn get_controller(&self, synced: oneshot::Sender<()>) -> BoxFuture<'_, ()>;
}

/// Everything a controller needs from the rest of the process.
#[derive(TypedBuilder)]
pub struct ControllersContext {
    pub client: kube::Client,
    pub store: CacheStores,
    pub rebuild: Arc<Notify>,
    pub configuration: Configuration,
    #[builder(default)]
    pub status_queue: Option<StatusQueue>,
    /// Whether the store holds a default IngressClass of this controller.
    #[builder(default = watch::channel(false).0)]
    pub default_class: watch::Sender<bool>,
}

pub struct ControllerDef {
    pub enabled: bool,
    pub controller: Box<dyn Controller>,
}

impl ControllerDef {
    pub fn name(&self) -> String {
        self.controller.name()
    }
}

pub fn setup_controllers(ctx: &Arc<ControllersContext>, conditions: &IngressControllerConditions) -> Vec<ControllerDef> {
    let class_lookups = conditions.ingress_class_net_v1_enabled();
    let services_enabled = ctx.configuration.enable_services;

    vec![
        ControllerDef { enabled: class_lookups, controller: Box::new(IngressClassController::builder().ctx(Arc::clone(ctx)).build()) },
        ControllerDef {
            enabled: conditions.ingress_net_v1_enabled(),
            controller: Box::new(IngressController::<Ingress>::builder().ctx(Arc::clone(ctx)).class_lookups(class_lookups).build()),
        },
        ControllerDef {
            enabled: conditions.ingress_net_v1beta1_enabled(),
            controller: Box::new(IngressController::<NetworkingIngress>::builder().ctx(Arc::clone(ctx)).class_lookups(class_lookups).build()),
        },
        ControllerDef {
            enabled: conditions.ingress_ext_v1beta1_enabled(),
            controller: Box::new(IngressController::<ExtensionsIngress>::builder().ctx(Arc::clone(ctx)).class_lookups(class_lookups).build()),
        },
        ControllerDef { enabled: services_enabled, controller: Box::new(CoreV1Controller::<Service>::builder().ctx(Arc::clone(ctx)).build()) },
        ControllerDef { enabled: services_enabled, controller: Box::new(CoreV1Controller::<Endpoints>::builder().ctx(Arc::clone(ctx)).build()) },
        ControllerDef { enabled: true, controller: Box::new(CoreV1Controller::<Secret>::builder().ctx(Arc::clone(ctx)).build()) },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::negotiation::IngressApi;

    fn context(configuration: Configuration) -> Arc<ControllersContext> {
        let config = kube::Config::new("http://127.0.0.1:6443".parse().unwrap());
        let client = kube::Client::try_from(config).unwrap();
        Arc::new(
            ControllersContext::builder()
                .client(client)
                .store(CacheStores::new())
                .rebuild(Arc::new(Notify::new()))
                .configuration(configuration)
                .build(),
        )
    }

    fn enabled(defs: &[ControllerDef]) -> Vec<String> {
        defs.iter().filter(|def| def.enabled).map(ControllerDef::name).collect()
    }

    #[tokio::test]
    async fn test_networking_v1_controllers() {
        let configuration = Configuration::builder().build();
        let conditions = IngressControllerConditions::new(IngressApi::NetworkingV1, configuration.clone());
        let defs = setup_controllers(&context(configuration), &conditions);
        assert_eq!(defs.len(), 7);
        assert_eq!(enabled(&defs), vec!["IngressClass", "Ingress networking.k8s.io/v1/Ingress", "Service", "Endpoints", "Secret"]);
    }

    #[tokio::test]
    async fn test_legacy_controllers_without_services() {
        let configuration = Configuration::builder().enable_ingress_extensions_v1beta1(true).enable_services(false).build();
        let conditions = IngressControllerConditions::new(IngressApi::ExtensionsV1beta1, configuration.clone());
        let defs = setup_controllers(&context(configuration), &conditions);
        assert_eq!(enabled(&defs), vec!["ExtensionsIngress extensions/v1beta1/Ingress", "Secret"]);
    }
}
