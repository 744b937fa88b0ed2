use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::schemas::Asset;

use super::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Postgresql,
    Mysql,
    Neo4j,
    Redis,
    Mongodb,
    Kafka,
    S3,
    RestApi,
    GraphqlApi,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Postgresql => "postgresql",
            SourceKind::Mysql => "mysql",
            SourceKind::Neo4j => "neo4j",
            SourceKind::Redis => "redis",
            SourceKind::Mongodb => "mongodb",
            SourceKind::Kafka => "kafka",
            SourceKind::S3 => "s3",
            SourceKind::RestApi => "rest_api",
            SourceKind::GraphqlApi => "graphql_api",
        }
    }
}

/// A credential at rest is a reference, never material. `Plaintext` exists
/// for dev mode only and is rejected at publish unless the source asset
/// sets `dev_mode: true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRef {
    Env(String),
    Vault(String),
    Plaintext(String),
    None,
}

impl CredentialRef {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("") => CredentialRef::None,
            Some(value) => {
                if let Some(name) = value.strip_prefix("env:") {
                    CredentialRef::Env(name.to_string())
                } else if let Some(path) = value.strip_prefix("vault:") {
                    CredentialRef::Vault(path.to_string())
                } else {
                    CredentialRef::Plaintext(value.to_string())
                }
            }
        }
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self, CredentialRef::Plaintext(_))
    }
}

/// Resolves credential references to material at connection-open time.
/// The default implementation consults the process environment; a secret
/// store is an external collaborator wired in behind this trait.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, credential: &CredentialRef) -> Result<Option<SecretString>, SourceError>;
}

#[derive(Debug, Default)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, credential: &CredentialRef) -> Result<Option<SecretString>, SourceError> {
        match credential {
            CredentialRef::None => Ok(None),
            CredentialRef::Env(name) => std::env::var(name)
                .map(|value| Some(SecretString::from(value)))
                .map_err(|_| SourceError::CredentialError(format!("env:{name}"))),
            CredentialRef::Vault(path) => {
                Err(SourceError::CredentialError(format!("vault:{path}")))
            }
            CredentialRef::Plaintext(value) => Ok(Some(SecretString::from(value.clone()))),
        }
    }
}

/// Fixed-map resolver for tests.
#[derive(Debug, Default)]
pub struct StaticSecretResolver {
    secrets: HashMap<String, String>,
}

impl StaticSecretResolver {
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl SecretResolver for StaticSecretResolver {
    fn resolve(&self, credential: &CredentialRef) -> Result<Option<SecretString>, SourceError> {
        match credential {
            CredentialRef::None => Ok(None),
            CredentialRef::Env(name) | CredentialRef::Vault(name) => self
                .secrets
                .get(name)
                .map(|value| Some(SecretString::from(value.clone())))
                .ok_or_else(|| SourceError::CredentialError(name.clone())),
            CredentialRef::Plaintext(value) => Ok(Some(SecretString::from(value.clone()))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_idle_lifetime_secs")]
    pub idle_lifetime_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_acquire_timeout_secs() -> u64 {
    5
}
fn default_idle_lifetime_secs() -> u64 {
    600
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idle_lifetime_secs: default_idle_lifetime_secs(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Wire shape of a source asset's content payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceContent {
    #[serde(rename = "type")]
    kind: SourceKind,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    username: Option<String>,
    /// `env:NAME`, `vault:PATH`, or (dev mode only) plaintext.
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    secret_key_ref: Option<String>,
    #[serde(default)]
    tls_mode: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    pool: PoolConfig,
    #[serde(default)]
    dev_mode: bool,
    #[serde(default)]
    extras: HashMap<String, serde_json::Value>,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Typed connection spec for one backend, parsed from a source asset.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: String,
    pub kind: SourceKind,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub uri: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub credential: CredentialRef,
    pub tls_mode: Option<String>,
    pub timeout: Duration,
    pub pool: PoolConfig,
    pub dev_mode: bool,
    pub extras: HashMap<String, serde_json::Value>,
}

impl SourceSpec {
    pub fn from_asset(asset: &Asset) -> Result<Self, SourceError> {
        let content: SourceContent = serde_json::from_value(asset.content.clone())
            .map_err(|err| SourceError::MalformedSpec(asset.name.clone(), err.to_string()))?;
        // secret_key_ref wins over the legacy password field when both are
        // set; the password field remains only for dev mode.
        let credential = match (&content.secret_key_ref, &content.password) {
            (Some(reference), _) => CredentialRef::parse(Some(reference)),
            (None, Some(password)) => CredentialRef::parse(Some(password)),
            (None, None) => CredentialRef::None,
        };
        Ok(Self {
            name: asset.name.clone(),
            kind: content.kind,
            host: content.host,
            port: content.port,
            uri: content.uri,
            database: content.database,
            username: content.username,
            credential,
            tls_mode: content.tls_mode,
            timeout: Duration::from_secs(content.timeout_secs),
            pool: content.pool,
            dev_mode: content.dev_mode,
            extras: content.extras,
        })
    }

    /// Stable identity for pooling: one pool per published source name and
    /// endpoint.
    pub fn pool_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.name,
            self.kind.as_str(),
            self.uri
                .clone()
                .unwrap_or_else(|| format!(
                    "{}:{}",
                    self.host.as_deref().unwrap_or(""),
                    self.port.unwrap_or(0)
                ))
        )
    }
}

/// Publication gate for source assets: the spec must parse, name an
/// endpoint, and carry no plaintext credential outside dev mode.
pub fn validate_source_for_publication(asset: &Asset) -> Vec<String> {
    let spec = match SourceSpec::from_asset(asset) {
        Ok(spec) => spec,
        Err(err) => return vec![err.to_string()],
    };
    let mut errors = Vec::new();
    if spec.host.is_none() && spec.uri.is_none() {
        errors.push("source: host or uri is required".to_string());
    }
    if spec.credential.is_plaintext() && !spec.dev_mode {
        errors.push(
            "source: plaintext password is not allowed; use secret_key_ref \
             ('env:NAME' or 'vault:PATH'), or set dev_mode for local development"
                .to_string(),
        );
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{AssetKind, AssetStatus};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn source_asset(content: serde_json::Value) -> Asset {
        Asset {
            id: Uuid::new_v4(),
            kind: AssetKind::Source,
            name: "primary_postgres".into(),
            scope: "ops".into(),
            version: 1,
            status: AssetStatus::Draft,
            tenant_id: "t1".into(),
            content,
            tool_type: None,
            is_system: false,
            description: String::new(),
            tags: Default::default(),
            created_by: "system".into(),
            created_at: Utc::now(),
            published_by: None,
            published_at: None,
        }
    }

    #[test]
    fn credential_ref_parsing() {
        assert_eq!(
            CredentialRef::parse(Some("env:PG_PASSWORD")),
            CredentialRef::Env("PG_PASSWORD".into())
        );
        assert_eq!(
            CredentialRef::parse(Some("vault:secret/pg")),
            CredentialRef::Vault("secret/pg".into())
        );
        assert!(CredentialRef::parse(Some("hunter2")).is_plaintext());
        assert_eq!(CredentialRef::parse(None), CredentialRef::None);
    }

    #[test]
    fn spec_prefers_secret_key_ref_over_password() {
        let asset = source_asset(json!({
            "type": "postgresql",
            "host": "db.internal",
            "port": 5432,
            "username": "ops",
            "password": "legacy-plaintext",
            "secret_key_ref": "env:PG_PASSWORD"
        }));
        let spec = SourceSpec::from_asset(&asset).unwrap();
        assert_eq!(spec.credential, CredentialRef::Env("PG_PASSWORD".into()));
    }

    #[test]
    fn plaintext_password_blocks_publication_without_dev_mode() {
        let asset = source_asset(json!({
            "type": "postgresql",
            "host": "db.internal",
            "password": "hunter2"
        }));
        let errors = validate_source_for_publication(&asset);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("plaintext"));
    }

    #[test]
    fn plaintext_password_allowed_in_dev_mode() {
        let asset = source_asset(json!({
            "type": "postgresql",
            "host": "localhost",
            "password": "hunter2",
            "dev_mode": true
        }));
        assert!(validate_source_for_publication(&asset).is_empty());
    }

    #[test]
    fn missing_endpoint_blocks_publication() {
        let asset = source_asset(json!({"type": "neo4j"}));
        let errors = validate_source_for_publication(&asset);
        assert!(errors.iter().any(|e| e.contains("host or uri")));
    }

    #[test]
    fn static_resolver_serves_tests() {
        let resolver = StaticSecretResolver::default().with("PG_PASSWORD", "s3cret");
        let secret = resolver
            .resolve(&CredentialRef::Env("PG_PASSWORD".into()))
            .unwrap();
        assert!(secret.is_some());
        assert!(resolver
            .resolve(&CredentialRef::Env("MISSING".into()))
            .is_err());
    }
}
