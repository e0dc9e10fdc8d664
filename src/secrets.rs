use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

use crate::{Error, Result};

/// Where a secret value lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretRef {
    /// `env:NAME`
    Env(String),
    /// `file:PATH`, e.g. a mounted secret volume
    File(PathBuf),
}

impl FromStr for SecretRef {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.split_once(':') {
            Some(("env", name)) if !name.is_empty() => Ok(SecretRef::Env(name.to_string())),
            Some(("file", path)) if !path.is_empty() => Ok(SecretRef::File(PathBuf::from(path))),
            _ => Err(Error::missing_credential(format!(
                "unsupported secret reference \"{}\" (expected env:NAME or file:PATH)",
                value
            ))),
        }
    }
}

/// How the registry API key was declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiKeySource {
    Literal(String),
    Secret(SecretRef),
}

impl ApiKeySource {
    /// Read `apiKey` or `apiKeySecretRef` from resource properties; the literal wins.
    pub fn from_properties(properties: &Value) -> Result<Self> {
        let field = |name: &str| {
            properties
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };
        if let Some(key) = field("apiKey") {
            return Ok(ApiKeySource::Literal(key.to_string()));
        }
        if let Some(reference) = field("apiKeySecretRef") {
            return Ok(ApiKeySource::Secret(reference.parse()?));
        }
        Err(Error::missing_credential(
            "resource properties carry neither apiKey nor apiKeySecretRef",
        ))
    }
}

#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, reference: &SecretRef) -> Result<String>;
}

/// Resolves secrets from the process environment and the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalSecretResolver;

#[async_trait]
impl SecretResolver for LocalSecretResolver {
    async fn resolve(&self, reference: &SecretRef) -> Result<String> {
        let value = match reference {
            SecretRef::Env(name) => std::env::var(name).map_err(|_| {
                Error::missing_credential(format!("environment variable {} is not set", name))
            })?,
            SecretRef::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::missing_credential(format!("cannot read {}: {}", path.display(), e))
            })?,
        };
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::missing_credential(format!(
                "secret {:?} is empty",
                reference
            )));
        }
        Ok(value.to_string())
    }
}

/// Resolve the API key for one event. Not retried: a missing key fails the event.
pub async fn resolve_api_key(source: &ApiKeySource, resolver: &dyn SecretResolver) -> Result<String> {
    match source {
        ApiKeySource::Literal(key) => Ok(key.clone()),
        ApiKeySource::Secret(reference) => {
            debug!(reference = ?reference, "resolving api key from secret");
            resolver.resolve(reference).await
        }
    }
}
