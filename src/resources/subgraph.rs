use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{already_gone, check_subgraph, require};
use crate::lifecycle::{IdOptions, ParsedRequest, Provisioned, ResourceHandler, Schema};
use crate::reconciler::content_revision;
use crate::{RegistryApi, Result, Services, SubgraphInput};

pub const RESOURCE_TYPE: &str = "Custom::GraphOS-Subgraph";

const MAX_ID_LENGTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphProperties {
    pub graph_id: String,
    pub variant_name: String,
    pub subgraph_name: String,
    pub sdl: String,
    pub url: String,
}

impl SubgraphProperties {
    fn same_key(&self, other: &SubgraphProperties) -> bool {
        self.graph_id == other.graph_id
            && self.variant_name == other.variant_name
            && self.subgraph_name == other.subgraph_name
    }

    fn input(&self) -> SubgraphInput {
        SubgraphInput {
            name: self.subgraph_name.clone(),
            sdl: self.sdl.clone(),
            url: self.url.clone(),
        }
    }
}

impl Schema for SubgraphProperties {
    fn validate(&self) -> Result<()> {
        require("graphId", &self.graph_id)?;
        require("variantName", &self.variant_name)?;
        check_subgraph(&self.subgraph_name, &self.sdl, &self.url)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SubgraphData {}

impl Schema for SubgraphData {}

/// Publishes a single subgraph into an existing variant.
pub struct SubgraphHandler {
    registry: Arc<dyn RegistryApi>,
}

impl SubgraphHandler {
    pub fn new(services: &Services) -> Self {
        SubgraphHandler {
            registry: services.registry.clone(),
        }
    }

    async fn publish(&self, properties: &SubgraphProperties) -> Result<()> {
        let revision = content_revision([(properties.subgraph_name.as_str(), properties.sdl.as_str())]);
        self.registry
            .publish_subgraph(
                &properties.graph_id,
                &properties.variant_name,
                &revision,
                &properties.input(),
            )
            .await?;
        info!(
            graph_id = %properties.graph_id,
            variant = %properties.variant_name,
            subgraph = %properties.subgraph_name,
            revision = %revision,
            "published subgraph"
        );
        Ok(())
    }

    async fn remove(&self, properties: &SubgraphProperties) -> Result<()> {
        already_gone(
            self.registry
                .delete_subgraph(
                    &properties.graph_id,
                    &properties.variant_name,
                    &properties.subgraph_name,
                )
                .await,
            &properties.subgraph_name,
        )
    }
}

#[async_trait]
impl ResourceHandler for SubgraphHandler {
    type Properties = SubgraphProperties;
    type Data = SubgraphData;

    fn id_options(&self) -> IdOptions {
        IdOptions::max_length(MAX_ID_LENGTH)
    }

    async fn create(
        &self,
        request: ParsedRequest<SubgraphProperties>,
    ) -> Result<Provisioned<SubgraphData>> {
        self.publish(&request.properties).await?;
        Ok(Provisioned {
            physical_resource_id: request.physical_resource_id,
            data: SubgraphData {},
        })
    }

    async fn update(&self, request: ParsedRequest<SubgraphProperties>) -> Result<SubgraphData> {
        if let Some(old) = &request.old_properties {
            if !old.same_key(&request.properties) {
                self.remove(old).await?;
            }
        }
        self.publish(&request.properties).await?;
        Ok(SubgraphData {})
    }

    async fn delete(&self, request: ParsedRequest<SubgraphProperties>) -> Result<()> {
        self.remove(&request.properties).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::parse_properties;
    use crate::registry_client::MockRegistryApi;
    use crate::{Error, Settings};
    use mockall::Sequence;
    use mockall::predicate::eq;
    use serde_json::json;

    fn properties(variant: &str, name: &str, sdl: &str) -> SubgraphProperties {
        parse_properties(
            "ResourceProperties",
            &json!({
                "graphId": "g",
                "variantName": variant,
                "subgraphName": name,
                "sdl": sdl,
                "url": format!("http://{}", name),
            }),
        )
        .unwrap()
    }

    fn request(
        properties: SubgraphProperties,
        old: Option<SubgraphProperties>,
    ) -> ParsedRequest<SubgraphProperties> {
        ParsedRequest {
            logical_resource_id: "ProductsSubgraph".to_string(),
            physical_resource_id: "ProductsSubgraph-0a1b2c3d".to_string(),
            properties,
            old_properties: old,
        }
    }

    fn handler(registry: MockRegistryApi) -> SubgraphHandler {
        SubgraphHandler::new(&Services::new(Arc::new(registry), &Settings::default()))
    }

    #[tokio::test]
    async fn create_publishes_with_a_content_revision() {
        let expected = content_revision([("products", "type Query{a:Int}")]);
        let mut registry = MockRegistryApi::new();
        registry
            .expect_publish_subgraph()
            .withf(move |graph_id, variant, revision, subgraph| {
                graph_id == "g"
                    && variant == "main"
                    && revision == expected
                    && subgraph.name == "products"
                    && subgraph.url == "http://products"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let provisioned = handler(registry)
            .create(request(properties("main", "products", "type Query{a:Int}"), None))
            .await
            .unwrap();
        assert_eq!(provisioned.data, SubgraphData {});
    }

    #[tokio::test]
    async fn moving_a_subgraph_removes_it_from_its_old_variant_first() {
        let mut seq = Sequence::new();
        let mut registry = MockRegistryApi::new();
        registry
            .expect_delete_subgraph()
            .with(eq("g"), eq("dev"), eq("products"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        registry
            .expect_publish_subgraph()
            .withf(|_, variant, _, _| variant == "main")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));

        handler(registry)
            .update(request(
                properties("main", "products", "type Query{a:Int}"),
                Some(properties("dev", "products", "type Query{a:Int}")),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sdl_only_update_republishes_in_place() {
        let mut registry = MockRegistryApi::new();
        registry.expect_delete_subgraph().never();
        registry
            .expect_publish_subgraph()
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        handler(registry)
            .update(request(
                properties("main", "products", "type Query{a:String}"),
                Some(properties("main", "products", "type Query{a:Int}")),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_failures_propagate() {
        let mut registry = MockRegistryApi::new();
        registry
            .expect_delete_subgraph()
            .returning(|_, _, _| Err(Error::transport("502 Bad Gateway")));

        let err = handler(registry)
            .delete(request(properties("main", "products", "type Query{a:Int}"), None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransportError");
    }
}
