use reqwest::header::HeaderMap;
use reqwest::{Certificate, Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unsuccessful HTTP response: {status}: {body}")]
    Unsuccessful { status: StatusCode, body: String },
    #[error("request failed")]
    Transport(#[from] reqwest::Error),
    #[error("invalid request URL: {0}")]
    Url(String),
    #[error("invalid request body: {0}")]
    Body(String),
}

impl ClientError {
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, ClientError::Unsuccessful { .. })
    }
}

/// A response whose status has already been checked.
#[derive(Debug, Clone)]
pub struct HttpEnvelope {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpEnvelope {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| {
                ClientError::Body(format!("failed to parse response: {e}"))
            })
    }
}

pub fn user_agent() -> &'static str {
    concat!("ochami/", env!("CARGO_PKG_VERSION"))
}

pub fn build_http_client(
    cacert: Option<Certificate>,
    insecure: bool,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().user_agent(user_agent());
    if let Some(cert) = cacert {
        builder = builder.add_root_certificate(cert);
    }
    if insecure {
        tracing::warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build()
}

/// Wraps a reqwest client with the bearer token every request carries.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    token: Option<String>,
}

impl HttpClient {
    pub fn new(client: Client, token: Option<String>) -> Self {
        Self { client, token }
    }

    fn build_request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<HttpEnvelope, ClientError> {
        tracing::debug!(%method, %url, "sending request");
        let mut request = self.build_request(method, url);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        tracing::trace!(%status, len = body.len(), "received response");

        if !status.is_success() {
            return Err(ClientError::Unsuccessful {
                status,
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        Ok(HttpEnvelope {
            status,
            headers,
            body,
        })
    }
}
