use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

use crate::lifecycle::{LifecycleResource, RequestType};
use crate::resources::{GraphHandler, GraphVariantHandler, SubgraphHandler, graph, graph_variant, subgraph};
use crate::secrets::{ApiKeySource, LocalSecretResolver, SecretResolver, resolve_api_key};
use crate::{
    Error, InMemoryRegistry, LifecycleEvent, LifecycleResponse, RegistryApi, RegistryClient,
    ResourceManager, Result, Settings, SubgraphReconciler, VariantReadinessPoller,
};

/// Builds a registry client for a resolved API key.
pub trait ClientFactory: Send + Sync {
    fn client(&self, api_key: &str) -> Result<Arc<dyn RegistryApi>>;
}

pub struct HttpClientFactory {
    settings: Settings,
}

impl HttpClientFactory {
    pub fn new(settings: Settings) -> Self {
        HttpClientFactory { settings }
    }
}

impl ClientFactory for HttpClientFactory {
    fn client(&self, api_key: &str) -> Result<Arc<dyn RegistryApi>> {
        Ok(Arc::new(RegistryClient::new(api_key, &self.settings)?))
    }
}

/// Every key shares the same in-process registry.
impl ClientFactory for InMemoryRegistry {
    fn client(&self, _api_key: &str) -> Result<Arc<dyn RegistryApi>> {
        Ok(Arc::new(self.clone()))
    }
}

// Built fresh for every event from the key it carries.
pub struct Services {
    pub registry: Arc<dyn RegistryApi>,
    pub reconciler: Arc<SubgraphReconciler>,
    pub poller: Arc<VariantReadinessPoller>,
}

impl Services {
    pub fn new(registry: Arc<dyn RegistryApi>, settings: &Settings) -> Self {
        let reconciler = Arc::new(SubgraphReconciler::new(registry.clone()));
        let poller = Arc::new(
            VariantReadinessPoller::new(registry.clone())
                .with_interval(settings.poll_interval)
                .with_max_wait(settings.max_wait),
        );
        Services {
            registry,
            reconciler,
            poller,
        }
    }
}

pub type ManagerFactory = fn(&Services) -> Box<dyn LifecycleResource>;

fn graph_manager(services: &Services) -> Box<dyn LifecycleResource> {
    Box::new(ResourceManager::new(GraphHandler::new(services)))
}

fn graph_variant_manager(services: &Services) -> Box<dyn LifecycleResource> {
    Box::new(ResourceManager::new(GraphVariantHandler::new(services)))
}

fn subgraph_manager(services: &Services) -> Box<dyn LifecycleResource> {
    Box::new(ResourceManager::new(SubgraphHandler::new(services)))
}

pub struct CustomResourceDispatcher {
    settings: Settings,
    clients: Arc<dyn ClientFactory>,
    secrets: Arc<dyn SecretResolver>,
    resources: BTreeMap<String, ManagerFactory>,
}

impl CustomResourceDispatcher {
    /// Dispatcher serving every built-in resource type.
    pub fn new(
        settings: Settings,
        clients: Arc<dyn ClientFactory>,
        secrets: Arc<dyn SecretResolver>,
    ) -> Self {
        let mut dispatcher = CustomResourceDispatcher {
            settings,
            clients,
            secrets,
            resources: BTreeMap::new(),
        };
        dispatcher.register(graph::RESOURCE_TYPE, graph_manager);
        dispatcher.register(graph_variant::RESOURCE_TYPE, graph_variant_manager);
        dispatcher.register(subgraph::RESOURCE_TYPE, subgraph_manager);
        dispatcher
    }

    /// Dispatcher talking to the hosted registry, resolving secrets locally.
    pub fn with_http(settings: Settings) -> Self {
        let clients = Arc::new(HttpClientFactory::new(settings.clone()));
        Self::new(settings, clients, Arc::new(LocalSecretResolver))
    }

    pub fn register(&mut self, resource_type: impl Into<String>, factory: ManagerFactory) {
        self.resources.insert(resource_type.into(), factory);
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub async fn handle(&self, event: &LifecycleEvent) -> Result<LifecycleResponse> {
        let span = info_span!(
            "lifecycle",
            resource_type = %event.resource_type,
            request_type = %event.request_type,
            logical_id = %event.logical_resource_id,
        );
        let result = self.dispatch(event).instrument(span.clone()).await;
        span.in_scope(|| match &result {
            Ok(_) => info!("lifecycle event handled"),
            Err(e) => error!(kind = e.kind(), error = %e, "lifecycle event failed"),
        });
        result
    }

    async fn dispatch(&self, event: &LifecycleEvent) -> Result<LifecycleResponse> {
        let factory = self
            .resources
            .get(&event.resource_type)
            .ok_or_else(|| Error::UnknownResourceType(event.resource_type.clone()))?;
        let request_type = event.request_type()?;

        let source = ApiKeySource::from_properties(&event.resource_properties)?;
        let api_key = resolve_api_key(&source, self.secrets.as_ref()).await?;

        let services = Services::new(self.clients.client(&api_key)?, &self.settings);
        let manager = factory(&services);

        match request_type {
            RequestType::Create => manager.create(event).await,
            RequestType::Update => manager.update(event).await,
            RequestType::Delete => manager.delete(event).await,
        }
    }
}
