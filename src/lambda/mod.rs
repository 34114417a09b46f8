//! Lambda Cloud implementation of the [`Provider`] trait.
//!
//! Every call carries the API key as a bearer token and is bounded by a
//! 30-second client timeout. Responses with a status of 400 or above are
//! surfaced verbatim as [`LambdaError::Api`].

mod error;
pub(crate) mod types;

use std::fmt;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::provider::{Instance, LaunchRequest, Provider, ProviderFuture, SshKey};

pub use error::LambdaError;
use types::{AddKeyPayload, DataEnvelope, LaunchData, TerminatePayload};

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://cloud.lambdalabs.com/api/v1";

/// Timeout applied to every HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the Lambda Cloud API.
#[derive(Clone)]
pub struct LambdaClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl fmt::Debug for LambdaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl LambdaClient {
    /// Creates a client against the production API.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Client`] when the TLS stack cannot be initialised.
    pub fn new(api_key: impl Into<String>) -> Result<Self, LambdaError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a client against an alternative API root, such as a local stub.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Client`] when the TLS stack cannot be initialised.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, LambdaError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| LambdaError::Client {
                message: err.to_string(),
            })?;
        let root = base_url.into();
        Ok(Self {
            http,
            base_url: root.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        })
    }

    /// Returns the API root requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Vec<u8>, LambdaError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let transport = |err: reqwest::Error| LambdaError::Transport {
            path: path.to_owned(),
            message: err.to_string(),
        };

        debug!(%method, path, "sending Lambda Cloud request");
        let mut request = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;

        if status.as_u16() >= 400 {
            return Err(LambdaError::Api {
                status: status.to_string(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes.to_vec())
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, LambdaError> {
        let bytes = self.send::<()>(Method::GET, path, None).await?;
        decode::<T>(path, &bytes)
    }
}

fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T, LambdaError> {
    serde_json::from_slice::<DataEnvelope<T>>(bytes)
        .map(|envelope| envelope.data)
        .map_err(|err| LambdaError::Decode {
            path: path.to_owned(),
            message: err.to_string(),
        })
}

impl Provider for LambdaClient {
    type Error = LambdaError;

    fn list_instances(&self) -> ProviderFuture<'_, Vec<Instance>, Self::Error> {
        Box::pin(async move { self.get_data("/instances").await })
    }

    fn launch_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let path = "/instance-operations/launch";
            let bytes = self.send(Method::POST, path, Some(request)).await?;
            let launched = decode::<LaunchData>(path, &bytes)?;
            launched
                .instance_ids
                .into_iter()
                .next()
                .filter(|id| !id.is_empty())
                .ok_or(LambdaError::MissingInstanceIds)
        })
    }

    fn terminate_instance<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let payload = TerminatePayload { instance_ids: [id] };
            self.send(Method::POST, "/instance-operations/terminate", Some(&payload))
                .await
                .map(drop)
        })
    }

    fn list_keys(&self) -> ProviderFuture<'_, Vec<SshKey>, Self::Error> {
        Box::pin(async move { self.get_data("/ssh-keys").await })
    }

    fn add_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let payload = AddKeyPayload { name, public_key };
            self.send(Method::POST, "/ssh-keys", Some(&payload))
                .await
                .map(drop)
        })
    }

    fn delete_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.send::<()>(Method::DELETE, &format!("/ssh-keys/{id}"), None)
                .await
                .map(drop)
        })
    }
}
