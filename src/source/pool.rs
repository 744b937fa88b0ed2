use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::registry::AssetRegistry;
use crate::schemas::AssetKind;

use super::{GraphConnection, HttpConnection, SecretResolver, SourceError, SourceSpec};
#[cfg(feature = "postgres")]
use super::SqlConnection;

/// Process-wide connection pools, one per source identity. Connections are
/// opened lazily on first use and shared afterwards; each kind map has its
/// own lock.
pub struct SourcePool {
    registry: Arc<AssetRegistry>,
    resolver: Arc<dyn SecretResolver>,
    scope: String,
    #[cfg(feature = "postgres")]
    sql: RwLock<HashMap<String, Arc<SqlConnection>>>,
    graph: RwLock<HashMap<String, Arc<GraphConnection>>>,
    http: RwLock<HashMap<String, Arc<HttpConnection>>>,
}

impl SourcePool {
    pub fn new(
        registry: Arc<AssetRegistry>,
        resolver: Arc<dyn SecretResolver>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            resolver,
            scope: scope.into(),
            #[cfg(feature = "postgres")]
            sql: RwLock::new(HashMap::new()),
            graph: RwLock::new(HashMap::new()),
            http: RwLock::new(HashMap::new()),
        }
    }

    /// Loads and parses the published source asset for `source_ref`.
    pub async fn resolve_spec(
        &self,
        source_ref: &str,
        tenant_id: &str,
    ) -> Result<SourceSpec, SourceError> {
        let asset = self
            .registry
            .get(AssetKind::Source, &self.scope, source_ref, tenant_id)
            .await
            .map_err(|err| SourceError::ConnectionError(err.to_string()))?
            .ok_or_else(|| SourceError::SourceNotFound(source_ref.to_string()))?;
        SourceSpec::from_asset(&asset)
    }

    #[cfg(feature = "postgres")]
    pub async fn open_sql(
        &self,
        source_ref: &str,
        tenant_id: &str,
    ) -> Result<Arc<SqlConnection>, SourceError> {
        let spec = self.resolve_spec(source_ref, tenant_id).await?;
        let key = spec.pool_key();
        if let Some(connection) = self.sql.read().await.get(&key) {
            return Ok(Arc::clone(connection));
        }
        let mut pool = self.sql.write().await;
        if let Some(connection) = pool.get(&key) {
            return Ok(Arc::clone(connection));
        }
        log::debug!("opening sql pool for source '{}'", spec.name);
        let connection = Arc::new(SqlConnection::connect(&spec, self.resolver.as_ref()).await?);
        pool.insert(key, Arc::clone(&connection));
        Ok(connection)
    }

    pub async fn open_graph(
        &self,
        source_ref: &str,
        tenant_id: &str,
    ) -> Result<Arc<GraphConnection>, SourceError> {
        let spec = self.resolve_spec(source_ref, tenant_id).await?;
        let key = spec.pool_key();
        if let Some(connection) = self.graph.read().await.get(&key) {
            return Ok(Arc::clone(connection));
        }
        let mut pool = self.graph.write().await;
        if let Some(connection) = pool.get(&key) {
            return Ok(Arc::clone(connection));
        }
        log::debug!("opening graph connection for source '{}'", spec.name);
        let connection = Arc::new(GraphConnection::connect(&spec, self.resolver.as_ref())?);
        pool.insert(key, Arc::clone(&connection));
        Ok(connection)
    }

    pub async fn open_http(
        &self,
        source_ref: &str,
        tenant_id: &str,
    ) -> Result<Arc<HttpConnection>, SourceError> {
        let spec = self.resolve_spec(source_ref, tenant_id).await?;
        let key = spec.pool_key();
        if let Some(connection) = self.http.read().await.get(&key) {
            return Ok(Arc::clone(connection));
        }
        let mut pool = self.http.write().await;
        if let Some(connection) = pool.get(&key) {
            return Ok(Arc::clone(connection));
        }
        log::debug!("opening http connection for source '{}'", spec.name);
        let connection = Arc::new(HttpConnection::connect(&spec, self.resolver.as_ref())?);
        pool.insert(key, Arc::clone(&connection));
        Ok(connection)
    }

    /// Drops every pooled connection; the next use reopens from the
    /// current published source assets.
    pub async fn invalidate(&self) {
        #[cfg(feature = "postgres")]
        self.sql.write().await.clear();
        self.graph.write().await.clear();
        self.http.write().await.clear();
        log::info!("source pools invalidated");
    }
}
