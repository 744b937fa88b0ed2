use std::collections::HashMap;

use secrecy::ExposeSecret;
use serde_json::Value;

use super::{SecretResolver, SourceError, SourceKind, SourceSpec};

/// HTTP backend connection: a configured client plus the base URL and
/// default headers from the source asset. Credential references in header
/// values are resolved at open time.
pub struct HttpConnection {
    client: reqwest::Client,
    base_url: String,
    default_headers: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpConnection {
    pub fn connect(
        spec: &SourceSpec,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, SourceError> {
        if !matches!(spec.kind, SourceKind::RestApi | SourceKind::GraphqlApi) {
            return Err(SourceError::UnsupportedOperation {
                source_name: spec.name.clone(),
                operation: "http".into(),
            });
        }
        let base_url = spec
            .uri
            .clone()
            .or_else(|| spec.host.as_ref().map(|host| format!("https://{host}")))
            .ok_or_else(|| {
                SourceError::MalformedSpec(spec.name.clone(), "missing host or uri".into())
            })?;

        let mut default_headers = HashMap::new();
        if let Some(headers) = spec.extras.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let Some(raw) = value.as_str() else { continue };
                let resolved = if raw.starts_with("env:") || raw.starts_with("vault:") {
                    let secret =
                        resolver.resolve(&super::CredentialRef::parse(Some(raw)))?;
                    secret
                        .map(|secret| secret.expose_secret().to_string())
                        .unwrap_or_default()
                } else {
                    raw.to_string()
                };
                default_headers.insert(name.clone(), resolved);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(spec.timeout)
            .build()
            .map_err(|err| SourceError::ConnectionError(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issues one request. `path` may be absolute or relative to the base
    /// URL.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, SourceError> {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        };
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| SourceError::ConnectionError(format!("invalid method '{method}'")))?;

        let mut request = self.client.request(method, &url);
        for (name, value) in self.default_headers.iter().chain(headers.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SourceError::AcquireTimeout(url.clone())
                } else {
                    SourceError::Upstream(err.to_string())
                }
            })?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| SourceError::Upstream(err.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(HttpResponse { status, body })
    }
}
