//! JSON REST provider gateway client.
//!
//! Resources live under `/v1/resources/{type}`; bodies carry the region and
//! an `attributes` object. Retries are the executor's business, so every
//! method makes exactly one request and classifies the outcome.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use super::{Attributes, Provider};
use crate::error::ProviderError;

/// Default retry-after when a 429 carries no usable header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Environment variable holding the optional bearer token.
pub const TOKEN_ENV_VAR: &str = "HALYARD_PROVIDER_TOKEN";

/// Client for the provider gateway.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Gateway base URL without trailing slash.
    base_url: String,
    /// Region sent with every mutating request.
    region: Option<String>,
    /// Bearer token.
    token: Option<String>,
}

/// Request body for create and update.
#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    attributes: &'a Attributes,
}

/// Response body for create, read and update.
#[derive(Debug, Deserialize)]
struct ResourceResponse {
    attributes: Attributes,
}

/// Error body returned by the gateway.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

impl HttpProvider {
    /// Creates a client for the gateway at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
            region: None,
            token: std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()),
        })
    }

    /// Sets the region sent with create and update requests.
    #[must_use]
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, resource_type: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/v1/resources/{resource_type}/{id}", self.base_url),
            None => format!("{}/v1/resources/{resource_type}", self.base_url),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    /// Sends a request and maps transport failures.
    async fn send(&self, builder: RequestBuilder) -> Result<Response, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))?;
        trace!("Gateway responded {}", response.status());
        Ok(response)
    }

    /// Parses an attribute response, classifying non-success statuses.
    async fn attributes(
        response: Response,
        resource_type: &str,
        id: Option<&str>,
    ) -> Result<Attributes, ProviderError> {
        let response = Self::check_status(response, resource_type, id).await?;
        let body: ResourceResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            }
        })?;
        Ok(body.attributes)
    }

    async fn check_status(
        response: Response,
        resource_type: &str,
        id: Option<&str>,
    ) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::NOT_FOUND
            && let Some(id) = id
        {
            return Err(ProviderError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        Err(match status.as_u16() {
            401 | 403 => ProviderError::AuthenticationFailed { message },
            code if status.is_server_error() => ProviderError::Unavailable {
                status: code,
                message,
            },
            code => ProviderError::rejected(code, message),
        })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        debug!("POST {resource_type}");
        let body = ResourceRequest {
            region: self.region.as_deref(),
            attributes,
        };
        let builder = self
            .request(Method::POST, &self.url(resource_type, None))
            .json(&body);
        let response = self.send(builder).await?;
        Self::attributes(response, resource_type, None).await
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Attributes, ProviderError> {
        debug!("GET {resource_type}/{id}");
        let builder = self.request(Method::GET, &self.url(resource_type, Some(id)));
        let response = self.send(builder).await?;
        Self::attributes(response, resource_type, Some(id)).await
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        debug!("PUT {resource_type}/{id}");
        let body = ResourceRequest {
            region: self.region.as_deref(),
            attributes,
        };
        let builder = self
            .request(Method::PUT, &self.url(resource_type, Some(id)))
            .json(&body);
        let response = self.send(builder).await?;
        Self::attributes(response, resource_type, Some(id)).await
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), ProviderError> {
        debug!("DELETE {resource_type}/{id}");
        let builder = self.request(Method::DELETE, &self.url(resource_type, Some(id)));
        let response = self.send(builder).await?;
        Self::check_status(response, resource_type, Some(id)).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn attrs() -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("name"), json!("web-elb"));
        attributes
    }

    async fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), 5)
            .expect("client")
            .with_region(Some(String::from("us-east-2")))
            .with_token("secret")
    }

    #[tokio::test]
    async fn test_create_posts_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources/aws_elb"))
            .and(header_is("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "region": "us-east-2",
                "attributes": { "name": "web-elb" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "attributes": { "id": "elb-1", "name": "web-elb", "dns_name": "web.example" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = provider(&server)
            .await
            .create("aws_elb", &attrs())
            .await
            .expect("create");
        assert_eq!(created["id"], json!("elb-1"));
        assert_eq!(created["dns_name"], json!("web.example"));
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .create("aws_elb", &attrs())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::RateLimited { retry_after_secs: 7 });
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("throttled"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .update("aws_elb", "elb-1", &attrs())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent_and_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "InvalidAMIID.Malformed: ami-x"
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .create("aws_launch_template", &attrs())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err, ProviderError::rejected(400, "InvalidAMIID.Malformed: ami-x"));
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/resources/aws_elb/elb-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .delete("aws_elb", "elb-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_network_error_is_transient() {
        let provider = HttpProvider::new("http://127.0.0.1:9", 1).expect("client");
        let err = provider.read("aws_elb", "elb-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Network { .. }));
    }
}
