use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{already_gone, check_subgraphs, require};
use crate::lifecycle::{IdOptions, ParsedRequest, Provisioned, ResourceHandler, Schema};
use crate::reconciler::random_revision;
use crate::{
    Error, RegistryApi, Result, Services, SubgraphReconciler, SubgraphSet,
    VariantReadinessPoller,
};

pub const RESOURCE_TYPE: &str = "Custom::GraphOS-GraphVariant";

const MAX_ID_LENGTH: usize = 27;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphVariantProperties {
    pub graph_id: String,
    /// Natural key of the variant; never regenerated.
    pub name: String,
    pub subgraphs: SubgraphSet,
}

impl Schema for GraphVariantProperties {
    fn validate(&self) -> Result<()> {
        require("graphId", &self.graph_id)?;
        require("name", &self.name)?;
        if self.subgraphs.is_empty() {
            return Err(Error::validation(
                "subgraphs must contain at least one subgraph",
            ));
        }
        check_subgraphs(&self.subgraphs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GraphVariantData {
    pub url: String,
}

impl Schema for GraphVariantData {
    fn validate(&self) -> Result<()> {
        require("Url", &self.url)
    }
}

pub struct GraphVariantHandler {
    registry: Arc<dyn RegistryApi>,
    reconciler: Arc<SubgraphReconciler>,
    poller: Arc<VariantReadinessPoller>,
}

impl GraphVariantHandler {
    pub fn new(services: &Services) -> Self {
        GraphVariantHandler {
            registry: services.registry.clone(),
            reconciler: services.reconciler.clone(),
            poller: services.poller.clone(),
        }
    }

    /// Publish what changed, then block until the variant composed.
    async fn converge(&self, properties: &GraphVariantProperties) -> Result<GraphVariantData> {
        let revision = random_revision();
        self.reconciler
            .synchronize_variant(
                &properties.graph_id,
                &revision,
                &properties.name,
                &properties.subgraphs,
            )
            .await?;
        let url = self
            .poller
            .get_url(&properties.graph_id, &properties.name)
            .await?;
        Ok(GraphVariantData { url })
    }
}

#[async_trait]
impl ResourceHandler for GraphVariantHandler {
    type Properties = GraphVariantProperties;
    type Data = GraphVariantData;

    fn id_options(&self) -> IdOptions {
        IdOptions::max_length(MAX_ID_LENGTH)
    }

    async fn create(
        &self,
        request: ParsedRequest<GraphVariantProperties>,
    ) -> Result<Provisioned<GraphVariantData>> {
        let data = self.converge(&request.properties).await?;
        Ok(Provisioned {
            physical_resource_id: request.physical_resource_id,
            data,
        })
    }

    async fn update(&self, request: ParsedRequest<GraphVariantProperties>) -> Result<GraphVariantData> {
        let properties = &request.properties;
        if let Some(old) = &request.old_properties {
            if old.graph_id != properties.graph_id || old.name != properties.name {
                info!(
                    graph_id = %old.graph_id,
                    variant = %old.name,
                    "variant key changed, removing the previous variant"
                );
                already_gone(
                    self.registry.delete_variant(&old.graph_id, &old.name).await,
                    &old.name,
                )?;
            }
        }
        self.converge(properties).await
    }

    async fn delete(&self, request: ParsedRequest<GraphVariantProperties>) -> Result<()> {
        let properties = &request.properties;
        already_gone(
            self.registry
                .delete_variant(&properties.graph_id, &properties.name)
                .await,
            &properties.name,
        )?;
        info!(graph_id = %properties.graph_id, variant = %properties.name, "deleted variant");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::parse_properties;
    use crate::memory_registry::router_url;
    use crate::{CompositionOutcome, InMemoryRegistry, RegistryCall, Settings};
    use serde_json::json;
    use std::time::Duration;

    fn services(registry: &InMemoryRegistry) -> Services {
        let settings = Settings {
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
            ..Settings::default()
        };
        Services::new(Arc::new(registry.clone()), &settings)
    }

    fn properties(name: &str, sdl: &str) -> GraphVariantProperties {
        parse_properties(
            "ResourceProperties",
            &json!({
                "apiKey": "service:g:key",
                "graphId": "g",
                "name": name,
                "subgraphs": { "products": { "sdl": sdl, "url": "http://products" } }
            }),
        )
        .unwrap()
    }

    fn request(
        properties: GraphVariantProperties,
        old: Option<GraphVariantProperties>,
    ) -> ParsedRequest<GraphVariantProperties> {
        ParsedRequest {
            logical_resource_id: "GraphVariantmain".to_string(),
            physical_resource_id: "GraphVariantmain-0a1b2c3d".to_string(),
            properties,
            old_properties: old,
        }
    }

    #[test]
    fn a_variant_needs_at_least_one_subgraph() {
        let err = parse_properties::<GraphVariantProperties>(
            "ResourceProperties",
            &json!({ "graphId": "g", "name": "main", "subgraphs": {} }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least one subgraph"));
    }

    #[tokio::test(start_paused = true)]
    async fn create_publishes_and_returns_the_router_url() {
        let registry = InMemoryRegistry::new();
        registry.seed_graph("g", "Graph").await;
        registry.seed_variant("g", "dev", &[]).await;

        let handler = GraphVariantHandler::new(&services(&registry));
        let provisioned = handler
            .create(request(properties("main", "type Query{a:Int}"), None))
            .await
            .unwrap();

        assert_eq!(provisioned.data.url, router_url("g", "main"));
        let observed = registry.snapshot("g").await.unwrap();
        assert!(observed.contains_key("dev"), "other variants are left alone");
        assert_eq!(observed["main"]["products"].sdl, "type Query{a:Int}");
        let revision = registry.variant_revision("g", "main").await.unwrap();
        assert_eq!(revision.len(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn reverting_a_change_publishes_under_a_new_revision() {
        let registry = InMemoryRegistry::new();
        registry.seed_graph("g", "Graph").await;
        let handler = GraphVariantHandler::new(&services(&registry));

        handler
            .create(request(properties("main", "type Query{a:Int}"), None))
            .await
            .unwrap();
        let first = registry.variant_revision("g", "main").await.unwrap();

        handler
            .update(request(
                properties("main", "type Query{a:String}"),
                Some(properties("main", "type Query{a:Int}")),
            ))
            .await
            .unwrap();
        let changed = registry.variant_revision("g", "main").await.unwrap();

        handler
            .update(request(
                properties("main", "type Query{a:Int}"),
                Some(properties("main", "type Query{a:String}")),
            ))
            .await
            .unwrap();
        let reverted = registry.variant_revision("g", "main").await.unwrap();

        assert_ne!(first, changed);
        assert_ne!(first, reverted);
        assert_ne!(changed, reverted);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_composition_fails_the_create() {
        let registry = InMemoryRegistry::new();
        registry.seed_graph("g", "Graph").await;
        registry.set_composition(CompositionOutcome::Fail).await;

        let handler = GraphVariantHandler::new(&services(&registry));
        let err = handler
            .create(request(properties("main", "type Query{a:Int}"), None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CompositionFailedError");
    }

    #[tokio::test(start_paused = true)]
    async fn composition_that_never_finishes_times_out() {
        let registry = InMemoryRegistry::new();
        registry.seed_graph("g", "Graph").await;
        registry.set_composition(CompositionOutcome::Never).await;

        let handler = GraphVariantHandler::new(&services(&registry));
        let err = handler
            .create(request(properties("main", "type Query{a:Int}"), None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TimeoutError");
    }

    #[tokio::test(start_paused = true)]
    async fn renaming_a_variant_removes_the_old_one() {
        let registry = InMemoryRegistry::new();
        registry.seed_graph("g", "Graph").await;
        registry
            .seed_variant("g", "dev", &[("products", "type Query{a:Int}")])
            .await;

        let handler = GraphVariantHandler::new(&services(&registry));
        let data = handler
            .update(request(
                properties("staging", "type Query{a:Int}"),
                Some(properties("dev", "type Query{a:Int}")),
            ))
            .await
            .unwrap();

        assert_eq!(data.url, router_url("g", "staging"));
        let observed = registry.snapshot("g").await.unwrap();
        assert!(!observed.contains_key("dev"));
        assert!(observed.contains_key("staging"));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_update_publishes_nothing() {
        let registry = InMemoryRegistry::new();
        registry.seed_graph("g", "Graph").await;
        registry
            .seed_variant("g", "main", &[("products", "type Query{a:Int}")])
            .await;

        let handler = GraphVariantHandler::new(&services(&registry));
        handler
            .update(request(
                properties("main", "type Query{a:Int}"),
                Some(properties("main", "type Query{a:Int}")),
            ))
            .await
            .unwrap();

        assert!(registry.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_variant_and_tolerates_repeats() {
        let registry = InMemoryRegistry::new();
        registry.seed_graph("g", "Graph").await;
        registry
            .seed_variant("g", "main", &[("products", "type Query{a:Int}")])
            .await;

        let handler = GraphVariantHandler::new(&services(&registry));
        handler
            .delete(request(properties("main", "type Query{a:Int}"), None))
            .await
            .unwrap();
        handler
            .delete(request(properties("main", "type Query{a:Int}"), None))
            .await
            .unwrap();

        assert_eq!(
            registry.mutations().await,
            vec![
                RegistryCall::DeleteVariant {
                    graph_id: "g".to_string(),
                    variant: "main".to_string(),
                };
                2
            ]
        );
    }

    #[tokio::test]
    async fn failing_delete_is_surfaced() {
        let registry = InMemoryRegistry::new();
        registry.seed_graph("g", "Graph").await;
        registry.seed_variant("g", "main", &[]).await;
        registry.fail_deletes_in("main").await;

        let handler = GraphVariantHandler::new(&services(&registry));
        let err = handler
            .delete(request(properties("main", "type Query{a:Int}"), None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "RegistryError");
    }
}
