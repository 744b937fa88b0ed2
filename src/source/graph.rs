use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::query::safety::validate_reader_cypher;

use super::{QueryResult, SecretResolver, SourceError, SourceKind, SourceSpec};

/// Read-only Cypher connection over the graph store's HTTP transaction
/// endpoint.
pub struct GraphConnection {
    client: reqwest::Client,
    endpoint: String,
    username: Option<String>,
    password: Option<SecretString>,
    source_name: String,
}

impl GraphConnection {
    pub fn connect(
        spec: &SourceSpec,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, SourceError> {
        if spec.kind != SourceKind::Neo4j {
            return Err(SourceError::UnsupportedOperation {
                source_name: spec.name.clone(),
                operation: "graph".into(),
            });
        }
        let base = match (&spec.uri, &spec.host) {
            (Some(uri), _) => uri.trim_end_matches('/').to_string(),
            (None, Some(host)) => format!("http://{host}:{}", spec.port.unwrap_or(7474)),
            (None, None) => {
                return Err(SourceError::MalformedSpec(
                    spec.name.clone(),
                    "missing host or uri".into(),
                ))
            }
        };
        let database = spec.database.as_deref().unwrap_or("neo4j");
        let client = reqwest::Client::builder()
            .timeout(spec.timeout)
            .build()
            .map_err(|err| SourceError::ConnectionError(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{base}/db/{database}/tx/commit"),
            username: spec.username.clone(),
            password: resolver.resolve(&spec.credential)?,
            source_name: spec.name.clone(),
        })
    }

    /// Runs one read-only Cypher statement with named parameters.
    pub async fn run(&self, cypher: &str, params: Value) -> Result<QueryResult, SourceError> {
        if !validate_reader_cypher(cypher).is_empty() {
            return Err(SourceError::WriteRejected);
        }

        let body = serde_json::json!({
            "statements": [{"statement": cypher, "parameters": params}]
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(username) = &self.username {
            request = request.basic_auth(
                username,
                self.password.as_ref().map(|secret| secret.expose_secret()),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|err| SourceError::Upstream(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::Upstream(format!(
                "graph source '{}' returned {}",
                self.source_name,
                response.status()
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| SourceError::Upstream(err.to_string()))?;

        if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
            if let Some(first) = errors.first() {
                return Err(SourceError::Upstream(
                    first
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("graph query failed")
                        .to_string(),
                ));
            }
        }

        Ok(parse_tx_result(&payload))
    }
}

fn parse_tx_result(payload: &Value) -> QueryResult {
    let result = payload
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first());
    let Some(result) = result else {
        return QueryResult::default();
    };
    let columns = result
        .get("columns")
        .and_then(Value::as_array)
        .map(|columns| {
            columns
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let rows = result
        .get("data")
        .and_then(Value::as_array)
        .map(|data| {
            data.iter()
                .filter_map(|entry| entry.get("row"))
                .filter_map(Value::as_array)
                .map(|row| row.to_vec())
                .collect()
        })
        .unwrap_or_default();
    QueryResult { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CredentialRef, PoolConfig, StaticSecretResolver};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn neo4j_spec(uri: String) -> SourceSpec {
        SourceSpec {
            name: "graph_main".into(),
            kind: SourceKind::Neo4j,
            host: None,
            port: None,
            uri: Some(uri),
            database: Some("neo4j".into()),
            username: Some("neo4j".into()),
            credential: CredentialRef::Env("NEO4J_PASSWORD".into()),
            tls_mode: None,
            timeout: Duration::from_secs(5),
            pool: PoolConfig::default(),
            dev_mode: false,
            extras: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn runs_cypher_and_parses_rows() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/db/neo4j/tx/commit")
            .with_status(200)
            .with_body(
                json!({
                    "results": [{
                        "columns": ["id", "label"],
                        "data": [
                            {"row": ["app-x", "Application"]},
                            {"row": ["db-1", "Database"]}
                        ]
                    }],
                    "errors": []
                })
                .to_string(),
            )
            .create_async()
            .await;

        let resolver = StaticSecretResolver::default().with("NEO4J_PASSWORD", "pw");
        let connection = GraphConnection::connect(&neo4j_spec(server.url()), &resolver).unwrap();
        let result = connection
            .run(
                "MATCH (a {code: $code})-[r]->(b) RETURN a.code, labels(b)[0]",
                json!({"code": "app-x"}),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.columns, vec!["id", "label"]);
        assert_eq!(result.row_count(), 2);
    }

    #[tokio::test]
    async fn write_cypher_rejected_before_wire() {
        let resolver = StaticSecretResolver::default().with("NEO4J_PASSWORD", "pw");
        let connection =
            GraphConnection::connect(&neo4j_spec("http://unreachable.invalid".into()), &resolver)
                .unwrap();
        let result = connection
            .run("MATCH (n) DETACH DELETE n", json!({}))
            .await;
        assert!(matches!(result, Err(SourceError::WriteRejected)));
    }

    #[tokio::test]
    async fn graph_errors_surface_as_upstream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/db/neo4j/tx/commit")
            .with_status(200)
            .with_body(
                json!({
                    "results": [],
                    "errors": [{"code": "Neo.ClientError", "message": "bad query"}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let resolver = StaticSecretResolver::default().with("NEO4J_PASSWORD", "pw");
        let connection = GraphConnection::connect(&neo4j_spec(server.url()), &resolver).unwrap();
        let result = connection.run("MATCH (n) RETURN n", json!({})).await;
        assert!(matches!(result, Err(SourceError::Upstream(_))));
    }
}
