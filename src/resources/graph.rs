use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::{already_gone, check_subgraphs, require};
use crate::lifecycle::{
    IdOptions, ParsedRequest, Provisioned, ResourceHandler, Schema, bool_or_string,
};
use crate::reconciler::random_revision;
use crate::{
    DesiredState, Error, RegistryApi, Result, Services, SubgraphReconciler, SubgraphSet,
};

pub const RESOURCE_TYPE: &str = "Custom::GraphOS-Graph";

const MAX_ID_LENGTH: usize = 27;
const MAX_TITLE_LENGTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantProperties {
    pub subgraphs: SubgraphSet,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphProperties {
    #[serde(default)]
    pub account_id: Option<String>,
    pub title: String,
    #[serde(default, deserialize_with = "bool_or_string")]
    pub hidden_from_uninvited_non_admin: bool,
    /// When present, the graph's variants are reconciled to exactly this set.
    #[serde(default)]
    pub variants: Option<BTreeMap<String, VariantProperties>>,
}

impl GraphProperties {
    fn desired(&self) -> Option<DesiredState> {
        self.variants.as_ref().map(|variants| {
            variants
                .iter()
                .map(|(name, variant)| (name.clone(), variant.subgraphs.clone()))
                .collect()
        })
    }
}

impl Schema for GraphProperties {
    fn validate(&self) -> Result<()> {
        require("title", &self.title)?;
        if self.title.chars().count() > MAX_TITLE_LENGTH {
            return Err(Error::validation(format!(
                "title must be at most {} characters",
                MAX_TITLE_LENGTH
            )));
        }
        if let Some(account_id) = &self.account_id {
            require("accountId", account_id)?;
        }
        for (name, variant) in self.variants.iter().flatten() {
            require("variant name", name)?;
            check_subgraphs(&variant.subgraphs)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GraphData {
    pub id: String,
    pub title: String,
    pub hidden_from_uninvited_non_admin: bool,
}

impl Schema for GraphData {
    fn validate(&self) -> Result<()> {
        require("Id", &self.id)?;
        require("Title", &self.title)
    }
}

pub struct GraphHandler {
    registry: Arc<dyn RegistryApi>,
    reconciler: Arc<SubgraphReconciler>,
}

impl GraphHandler {
    pub fn new(services: &Services) -> Self {
        GraphHandler {
            registry: services.registry.clone(),
            reconciler: services.reconciler.clone(),
        }
    }

    async fn reconcile(&self, graph_id: &str, properties: &GraphProperties) -> Result<()> {
        if let Some(desired) = properties.desired() {
            let revision = random_revision();
            self.reconciler
                .synchronize(graph_id, &revision, &desired)
                .await?;
        }
        Ok(())
    }
}

fn data_for(graph_id: &str, properties: &GraphProperties) -> GraphData {
    GraphData {
        id: graph_id.to_string(),
        title: properties.title.clone(),
        hidden_from_uninvited_non_admin: properties.hidden_from_uninvited_non_admin,
    }
}

#[async_trait]
impl ResourceHandler for GraphHandler {
    type Properties = GraphProperties;
    type Data = GraphData;

    fn id_options(&self) -> IdOptions {
        IdOptions::max_length(MAX_ID_LENGTH)
    }

    async fn create(&self, request: ParsedRequest<GraphProperties>) -> Result<Provisioned<GraphData>> {
        let properties = &request.properties;
        let account_id = match &properties.account_id {
            Some(account_id) => account_id.clone(),
            None => self.registry.primary_account_id().await?,
        };

        let graph_id = self
            .registry
            .create_graph(
                &account_id,
                &request.physical_resource_id,
                &properties.title,
                properties.hidden_from_uninvited_non_admin,
            )
            .await?;
        info!(graph_id = %graph_id, account_id = %account_id, "created graph");

        self.reconcile(&graph_id, properties).await?;

        Ok(Provisioned {
            data: data_for(&request.physical_resource_id, properties),
            physical_resource_id: request.physical_resource_id,
        })
    }

    async fn update(&self, request: ParsedRequest<GraphProperties>) -> Result<GraphData> {
        let graph_id = &request.physical_resource_id;
        let properties = &request.properties;
        let old = request.old_properties.as_ref();

        if old.is_none_or(|old| old.title != properties.title) {
            self.registry
                .update_graph_title(graph_id, &properties.title)
                .await?;
        }
        if old.is_none_or(|old| {
            old.hidden_from_uninvited_non_admin != properties.hidden_from_uninvited_non_admin
        }) {
            self.registry
                .update_graph_visibility(graph_id, properties.hidden_from_uninvited_non_admin)
                .await?;
        }

        self.reconcile(graph_id, properties).await?;

        Ok(data_for(graph_id, properties))
    }

    async fn delete(&self, request: ParsedRequest<GraphProperties>) -> Result<()> {
        let graph_id = &request.physical_resource_id;
        already_gone(self.registry.delete_graph(graph_id).await, graph_id)?;
        info!(graph_id = %graph_id, "deleted graph");
        Ok(())
    }
}
