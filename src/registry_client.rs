use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    CompositionStatus, Error, ObservedState, ObservedSubgraph, Result, Settings, SubgraphInput,
    VariantStatus,
};

macro_rules! operation {
    ($file:literal) => {
        include_str!(concat!(env!("OUT_OPERATIONS"), "/", $file))
    };
}

pub(crate) const GET_PRIMARY_ACCOUNT_ID: &str = operation!("get_primary_account_id.graphql");
pub(crate) const CREATE_GRAPH: &str = operation!("create_graph.graphql");
pub(crate) const UPDATE_GRAPH_TITLE: &str = operation!("update_graph_title.graphql");
pub(crate) const UPDATE_GRAPH_VISIBILITY: &str = operation!("update_graph_visibility.graphql");
pub(crate) const DELETE_GRAPH: &str = operation!("delete_graph.graphql");
pub(crate) const GET_VARIANTS_AND_SUBGRAPHS: &str = operation!("get_variants_and_subgraphs.graphql");
pub(crate) const DELETE_VARIANT: &str = operation!("delete_variant.graphql");
pub(crate) const DELETE_SUBGRAPH: &str = operation!("delete_subgraph.graphql");
pub(crate) const PUBLISH_SUBGRAPH: &str = operation!("publish_subgraph.graphql");
pub(crate) const PUBLISH_SUBGRAPHS: &str = operation!("publish_subgraphs.graphql");
pub(crate) const GET_VARIANT_STATUS: &str = operation!("get_variant_status.graphql");

/// Graph type every provisioned graph is created with.
const GRAPH_TYPE: &str = "CLOUD_SUPERGRAPH";

/// Typed operations against the schema registry.
///
/// No method retries; retry policy belongs to whoever drives the lifecycle.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Account owning the API key (a graph key's account, or a user's first membership).
    async fn primary_account_id(&self) -> Result<String>;

    /// Create a graph and return the id the registry assigned.
    async fn create_graph(
        &self,
        account_id: &str,
        graph_id: &str,
        title: &str,
        hidden_from_uninvited_non_admin: bool,
    ) -> Result<String>;

    async fn update_graph_title(&self, graph_id: &str, title: &str) -> Result<()>;

    async fn update_graph_visibility(
        &self,
        graph_id: &str,
        hidden_from_uninvited_non_admin: bool,
    ) -> Result<()>;

    async fn delete_graph(&self, graph_id: &str) -> Result<()>;

    /// Every variant of the graph with its subgraphs and their active SDL.
    async fn observed_state(&self, graph_id: &str) -> Result<ObservedState>;

    async fn delete_variant(&self, graph_id: &str, variant: &str) -> Result<()>;

    async fn delete_subgraph(&self, graph_id: &str, variant: &str, subgraph: &str) -> Result<()>;

    async fn publish_subgraph(
        &self,
        graph_id: &str,
        variant: &str,
        revision: &str,
        subgraph: &SubgraphInput,
    ) -> Result<()>;

    async fn publish_subgraphs(
        &self,
        graph_id: &str,
        variant: &str,
        revision: &str,
        subgraphs: &[SubgraphInput],
    ) -> Result<()>;

    /// Routing url and latest composition outcome; `None` if the variant does not exist yet.
    async fn variant_status(&self, graph_id: &str, variant: &str) -> Result<Option<VariantStatus>>;
}

#[derive(Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Deserialize)]
struct MeData {
    me: Option<Identity>,
}

/// Who the API key belongs to.
#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum Identity {
    Service {
        account: Option<AccountRef>,
    },
    User {
        #[serde(default)]
        memberships: Vec<Membership>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AccountRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Membership {
    account: AccountRef,
}

fn account_from_identity(identity: Option<Identity>) -> Result<String> {
    match identity {
        Some(Identity::Service {
            account: Some(account),
        }) => Ok(account.id),
        Some(Identity::User { memberships }) => memberships
            .into_iter()
            .next()
            .map(|membership| membership.account.id)
            .ok_or_else(|| Error::not_found("Could not find primary account ID")),
        _ => Err(Error::not_found("Could not find primary account ID")),
    }
}

#[derive(Deserialize)]
struct CreateGraphData {
    account: Option<AccountMutation>,
}

#[derive(Deserialize)]
struct AccountMutation {
    #[serde(rename = "createGraph")]
    create_graph: Option<GraphCreation>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum GraphCreation {
    Service { id: String },
    GraphCreationError { message: String },
}

#[derive(Deserialize)]
struct GraphRoot<T> {
    graph: Option<T>,
}

#[derive(Deserialize)]
struct ServiceRoot {
    service: Option<Value>,
}

#[derive(Deserialize)]
struct VariantsNode {
    #[serde(default)]
    variants: Vec<VariantNode>,
}

#[derive(Deserialize)]
struct VariantNode {
    name: String,
    #[serde(default)]
    subgraphs: Option<Vec<SubgraphNode>>,
}

#[derive(Deserialize)]
struct SubgraphNode {
    name: String,
    url: Option<String>,
    #[serde(rename = "activePartialSchema")]
    active_partial_schema: PartialSchema,
}

#[derive(Deserialize)]
struct PartialSchema {
    sdl: String,
}

#[derive(Deserialize)]
struct VariantRef<T> {
    variant: Option<T>,
}

#[derive(Deserialize)]
struct PublishSubgraphNode {
    #[serde(rename = "publishSubgraph")]
    publish: Option<PublishResult>,
}

#[derive(Deserialize)]
struct PublishSubgraphsNode {
    #[serde(rename = "publishSubgraphs")]
    publish: Option<PublishResult>,
}

#[derive(Deserialize)]
struct PublishResult {
    #[serde(default)]
    errors: Vec<Option<CompositionError>>,
}

#[derive(Debug, Deserialize)]
struct CompositionError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct VariantStatusNode {
    url: Option<String>,
    #[serde(rename = "latestLaunch")]
    latest_launch: Option<LaunchNode>,
}

#[derive(Deserialize)]
struct LaunchNode {
    status: String,
}

fn composition_status(launch_status: &str) -> CompositionStatus {
    match launch_status {
        "LAUNCH_COMPLETED" => CompositionStatus::Completed,
        "LAUNCH_FAILED" => CompositionStatus::Failed,
        _ => CompositionStatus::Pending,
    }
}

fn observed_from(node: VariantsNode) -> ObservedState {
    node.variants
        .into_iter()
        .map(|variant| {
            let subgraphs = variant
                .subgraphs
                .unwrap_or_default()
                .into_iter()
                .map(|subgraph| {
                    (
                        subgraph.name,
                        ObservedSubgraph {
                            sdl: subgraph.active_partial_schema.sdl,
                            url: subgraph.url,
                        },
                    )
                })
                .collect();
            (variant.name, subgraphs)
        })
        .collect()
}

fn log_composition_errors(graph_id: &str, variant: &str, result: Option<PublishResult>) {
    let Some(result) = result else {
        return;
    };
    for error in result.errors.into_iter().flatten() {
        warn!(
            graph_id = %graph_id,
            variant = %variant,
            code = error.code.as_deref().unwrap_or("UNKNOWN"),
            message = error.message.as_deref().unwrap_or(""),
            "publish reported a composition error"
        );
    }
}

/// HTTP client for the registry's GraphQL endpoint.
pub struct RegistryClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    client_name: String,
}

impl RegistryClient {
    pub fn new(api_key: impl Into<String>, settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(RegistryClient {
            client,
            endpoint: settings.registry_url.clone(),
            api_key: api_key.into(),
            client_name: settings.client_name.clone(),
        })
    }

    /// Execute one operation and decode its `data`.
    ///
    /// A non-empty `errors` array is a [`Error::Registry`]; anything that keeps
    /// us from reading a GraphQL envelope is a [`Error::Transport`].
    pub async fn request<T: DeserializeOwned>(
        &self,
        operation_name: &str,
        document: &str,
        variables: Value,
    ) -> Result<T> {
        debug!(operation = %operation_name, "sending registry request");

        let request_body = json!({
            "query": document,
            "operationName": operation_name,
            "variables": variables,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("X-API-Key", &self.api_key)
            .header("apollographql-client-name", &self.client_name)
            .header("apollographql-client-version", env!("CARGO_PKG_VERSION"))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("Failed to send {}: {}", operation_name, e)))?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(format!(
                "{} returned {}: {}",
                operation_name, status, body
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transport(format!("Failed to read {}: {}", operation_name, e)))?;
        let envelope: GraphQLResponse<T> = serde_json::from_slice(&bytes).map_err(|e| {
            Error::transport(format!(
                "Failed to parse response to {} ({}): {}",
                operation_name, status, e
            ))
        })?;

        let errors = envelope.errors.unwrap_or_default();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(Error::registry(messages.join("; ")));
        }
        if !status.is_success() {
            return Err(Error::transport(format!(
                "{} returned {}",
                operation_name, status
            )));
        }

        envelope
            .data
            .ok_or_else(|| Error::transport(format!("{} returned no data", operation_name)))
    }

    pub async fn get_primary_account_id(&self) -> Result<String> {
        let data: MeData = self
            .request("GetPrimaryAccountId", GET_PRIMARY_ACCOUNT_ID, json!({}))
            .await?;
        account_from_identity(data.me)
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn primary_account_id(&self) -> Result<String> {
        self.get_primary_account_id().await
    }

    async fn create_graph(
        &self,
        account_id: &str,
        graph_id: &str,
        title: &str,
        hidden_from_uninvited_non_admin: bool,
    ) -> Result<String> {
        let data: CreateGraphData = self
            .request(
                "CreateGraph",
                CREATE_GRAPH,
                json!({
                    "accountId": account_id,
                    "graphType": GRAPH_TYPE,
                    "hiddenFromUninvitedNonAdmin": hidden_from_uninvited_non_admin,
                    "createGraphId": graph_id,
                    "title": title,
                }),
            )
            .await?;

        let account = data
            .account
            .ok_or_else(|| Error::not_found(format!("Account {} does not exist", account_id)))?;
        match account.create_graph {
            Some(GraphCreation::Service { id }) => Ok(id),
            Some(GraphCreation::GraphCreationError { message }) => Err(Error::registry(message)),
            None => Err(Error::registry(format!(
                "Could not create graph {}: empty response",
                graph_id
            ))),
        }
    }

    async fn update_graph_title(&self, graph_id: &str, title: &str) -> Result<()> {
        let data: GraphRoot<Value> = self
            .request(
                "UpdateGraphTitle",
                UPDATE_GRAPH_TITLE,
                json!({ "graphId": graph_id, "title": title }),
            )
            .await?;
        data.graph
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))
    }

    async fn update_graph_visibility(
        &self,
        graph_id: &str,
        hidden_from_uninvited_non_admin: bool,
    ) -> Result<()> {
        let data: GraphRoot<Value> = self
            .request(
                "UpdateGraphVisibility",
                UPDATE_GRAPH_VISIBILITY,
                json!({
                    "graphId": graph_id,
                    "hiddenFromUninvitedNonAdmin": hidden_from_uninvited_non_admin,
                }),
            )
            .await?;
        data.graph
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))
    }

    async fn delete_graph(&self, graph_id: &str) -> Result<()> {
        let data: ServiceRoot = self
            .request("DeleteGraph", DELETE_GRAPH, json!({ "graphId": graph_id }))
            .await?;
        data.service
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))
    }

    async fn observed_state(&self, graph_id: &str) -> Result<ObservedState> {
        let data: GraphRoot<VariantsNode> = self
            .request(
                "GetVariantsAndSubgraphs",
                GET_VARIANTS_AND_SUBGRAPHS,
                json!({ "graphId": graph_id }),
            )
            .await?;
        data.graph
            .map(observed_from)
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))
    }

    async fn delete_variant(&self, graph_id: &str, variant: &str) -> Result<()> {
        let data: GraphRoot<VariantRef<Value>> = self
            .request(
                "DeleteVariant",
                DELETE_VARIANT,
                json!({ "graphId": graph_id, "graphVariant": variant }),
            )
            .await?;
        let graph = data
            .graph
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))?;
        graph.variant.map(|_| ()).ok_or_else(|| {
            Error::not_found(format!(
                "Variant {} of graph {} does not exist",
                variant, graph_id
            ))
        })
    }

    async fn delete_subgraph(&self, graph_id: &str, variant: &str, subgraph: &str) -> Result<()> {
        let data: GraphRoot<Value> = self
            .request(
                "DeleteSubgraph",
                DELETE_SUBGRAPH,
                json!({ "graphId": graph_id, "graphVariant": variant, "name": subgraph }),
            )
            .await?;
        data.graph
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))
    }

    async fn publish_subgraph(
        &self,
        graph_id: &str,
        variant: &str,
        revision: &str,
        subgraph: &SubgraphInput,
    ) -> Result<()> {
        let data: GraphRoot<PublishSubgraphNode> = self
            .request(
                "PublishSubgraph",
                PUBLISH_SUBGRAPH,
                json!({
                    "graphId": graph_id,
                    "graphVariant": variant,
                    "name": subgraph.name,
                    "revision": revision,
                    "activePartialSchema": { "sdl": subgraph.sdl },
                    "url": subgraph.url,
                }),
            )
            .await?;
        let graph = data
            .graph
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))?;
        log_composition_errors(graph_id, variant, graph.publish);
        Ok(())
    }

    async fn publish_subgraphs(
        &self,
        graph_id: &str,
        variant: &str,
        revision: &str,
        subgraphs: &[SubgraphInput],
    ) -> Result<()> {
        let inputs: Vec<Value> = subgraphs
            .iter()
            .map(|subgraph| {
                json!({
                    "name": subgraph.name,
                    "activePartialSchema": { "sdl": subgraph.sdl },
                    "url": subgraph.url,
                })
            })
            .collect();
        let data: GraphRoot<PublishSubgraphsNode> = self
            .request(
                "PublishSubgraphs",
                PUBLISH_SUBGRAPHS,
                json!({
                    "graphId": graph_id,
                    "graphVariant": variant,
                    "revision": revision,
                    "subgraphs": inputs,
                }),
            )
            .await?;
        let graph = data
            .graph
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))?;
        log_composition_errors(graph_id, variant, graph.publish);
        Ok(())
    }

    async fn variant_status(&self, graph_id: &str, variant: &str) -> Result<Option<VariantStatus>> {
        let data: GraphRoot<VariantRef<VariantStatusNode>> = self
            .request(
                "GetVariantStatus",
                GET_VARIANT_STATUS,
                json!({ "graphId": graph_id, "graphVariant": variant }),
            )
            .await?;
        let graph = data
            .graph
            .ok_or_else(|| Error::not_found(format!("Graph {} does not exist", graph_id)))?;
        Ok(graph.variant.map(|node| VariantStatus {
            url: node.url,
            composition: node
                .latest_launch
                .map(|launch| composition_status(&launch.status))
                .unwrap_or(CompositionStatus::Pending),
        }))
    }
}
