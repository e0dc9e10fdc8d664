use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::info;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "Create" => Ok(RequestType::Create),
            "Update" => Ok(RequestType::Update),
            "Delete" => Ok(RequestType::Delete),
            other => Err(Error::UnsupportedOperation(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleEvent {
    pub request_type: String,
    pub resource_type: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Value>,
}

impl LifecycleEvent {
    pub fn request_type(&self) -> Result<RequestType> {
        RequestType::parse(&self.request_type)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub trait Schema {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

pub fn parse_properties<P>(label: &str, value: &Value) -> Result<P>
where
    P: DeserializeOwned + Schema,
{
    let properties: P = serde_json::from_value(value.clone())
        .map_err(|e| Error::validation(format!("{}: {}", label, e)))?;
    properties
        .validate()
        .map_err(|e| Error::validation(format!("{}: {}", label, strip_category(e))))?;
    Ok(properties)
}

pub fn render_data<D>(data: &D) -> Result<Value>
where
    D: Serialize + Schema,
{
    data.validate()
        .map_err(|e| Error::validation(format!("Data: {}", strip_category(e))))?;
    serde_json::to_value(data).map_err(|e| Error::validation(format!("Data: {}", e)))
}

fn strip_category(err: Error) -> String {
    match err {
        Error::Validation(msg) => msg,
        other => other.to_string(),
    }
}

/// Accepts `true`/`false` as booleans or strings; provisioning frameworks stringify properties.
pub fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Text(String),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Bool(value) => Ok(value),
        Flexible::Text(text) => match text.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, found \"{}\"",
                other
            ))),
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdOptions {
    pub max_length: usize,
    /// Random bytes in the suffix; each byte is two hex characters.
    pub random_bytes: usize,
}

impl IdOptions {
    pub const fn max_length(max_length: usize) -> Self {
        IdOptions {
            max_length,
            random_bytes: 4,
        }
    }
}

/// `logical_id` truncated to fit, then `-` and a random hex suffix.
/// `max_length` counts bytes; the cut never splits a character.
pub fn generate_id(logical_id: &str, options: &IdOptions) -> String {
    let mut random = vec![0u8; options.random_bytes];
    rand::thread_rng().fill_bytes(&mut random);
    let suffix = format!("-{}", hex::encode(random));
    let budget = options.max_length.saturating_sub(suffix.len());
    let end = logical_id
        .char_indices()
        .map(|(start, c)| start + c.len_utf8())
        .take_while(|end| *end <= budget)
        .last()
        .unwrap_or(0);
    format!("{}{}", &logical_id[..end], suffix)
}

#[derive(Clone, Debug)]
pub struct ParsedRequest<P> {
    pub logical_resource_id: String,
    pub physical_resource_id: String,
    pub properties: P,
    /// Present on update only.
    pub old_properties: Option<P>,
}

#[derive(Clone, Debug)]
pub struct Provisioned<D> {
    pub physical_resource_id: String,
    pub data: D,
}

/// Resource-specific strategy invoked by [`ResourceManager`].
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    type Properties: DeserializeOwned + Schema + Send + Sync;
    type Data: Serialize + Schema + Send;

    fn id_options(&self) -> IdOptions;

    async fn create(
        &self,
        request: ParsedRequest<Self::Properties>,
    ) -> Result<Provisioned<Self::Data>>;

    async fn update(&self, request: ParsedRequest<Self::Properties>) -> Result<Self::Data>;

    async fn delete(&self, request: ParsedRequest<Self::Properties>) -> Result<()>;
}

/// Object-safe face of a [`ResourceManager`], used by the dispatcher.
#[async_trait]
pub trait LifecycleResource: Send + Sync {
    async fn create(&self, event: &LifecycleEvent) -> Result<LifecycleResponse>;
    async fn update(&self, event: &LifecycleEvent) -> Result<LifecycleResponse>;
    async fn delete(&self, event: &LifecycleEvent) -> Result<LifecycleResponse>;
}

pub struct ResourceManager<H> {
    handler: H,
}

impl<H: ResourceHandler> ResourceManager<H> {
    pub fn new(handler: H) -> Self {
        ResourceManager { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub async fn create(&self, event: &LifecycleEvent) -> Result<LifecycleResponse> {
        let physical_resource_id = event.physical_resource_id.clone().unwrap_or_else(|| {
            generate_id(&event.logical_resource_id, &self.handler.id_options())
        });
        let properties = parse_properties("ResourceProperties", &event.resource_properties)?;

        info!(
            resource_type = %event.resource_type,
            logical_id = %event.logical_resource_id,
            physical_id = %physical_resource_id,
            "creating resource"
        );
        let provisioned = self
            .handler
            .create(ParsedRequest {
                logical_resource_id: event.logical_resource_id.clone(),
                physical_resource_id,
                properties,
                old_properties: None,
            })
            .await?;

        Ok(LifecycleResponse {
            data: Some(render_data(&provisioned.data)?),
            physical_resource_id: Some(provisioned.physical_resource_id),
        })
    }

    pub async fn update(&self, event: &LifecycleEvent) -> Result<LifecycleResponse> {
        let physical_resource_id = existing_id(event, "update")?;
        let properties = parse_properties("ResourceProperties", &event.resource_properties)?;
        let old_value = event
            .old_resource_properties
            .as_ref()
            .ok_or_else(|| Error::validation("OldResourceProperties: missing"))?;
        let old_properties = parse_properties("OldResourceProperties", old_value)?;

        info!(
            resource_type = %event.resource_type,
            physical_id = %physical_resource_id,
            "updating resource"
        );
        let data = self
            .handler
            .update(ParsedRequest {
                logical_resource_id: event.logical_resource_id.clone(),
                physical_resource_id: physical_resource_id.clone(),
                properties,
                old_properties: Some(old_properties),
            })
            .await?;

        Ok(LifecycleResponse {
            physical_resource_id: Some(physical_resource_id),
            data: Some(render_data(&data)?),
        })
    }

    pub async fn delete(&self, event: &LifecycleEvent) -> Result<LifecycleResponse> {
        let physical_resource_id = existing_id(event, "delete")?;
        let properties = parse_properties("ResourceProperties", &event.resource_properties)?;

        info!(
            resource_type = %event.resource_type,
            physical_id = %physical_resource_id,
            "deleting resource"
        );
        self.handler
            .delete(ParsedRequest {
                logical_resource_id: event.logical_resource_id.clone(),
                physical_resource_id,
                properties,
                old_properties: None,
            })
            .await?;

        Ok(LifecycleResponse::default())
    }
}

fn existing_id(event: &LifecycleEvent, operation: &str) -> Result<String> {
    event
        .physical_resource_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::invariant(format!(
                "cannot {} {} before it was created: no physical resource id",
                operation, event.logical_resource_id
            ))
        })
}

#[async_trait]
impl<H: ResourceHandler> LifecycleResource for ResourceManager<H> {
    async fn create(&self, event: &LifecycleEvent) -> Result<LifecycleResponse> {
        ResourceManager::create(self, event).await
    }

    async fn update(&self, event: &LifecycleEvent) -> Result<LifecycleResponse> {
        ResourceManager::update(self, event).await
    }

    async fn delete(&self, event: &LifecycleEvent) -> Result<LifecycleResponse> {
        ResourceManager::delete(self, event).await
    }
}
