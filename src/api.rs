//! The console backend's HTTP API, as seen by a client.

use crate::{k8s, policy::PolicyConfiguration, poll::ClusterStatusSource};
use hyper::{
    body::Bytes,
    client::HttpConnector,
    header::{AUTHORIZATION, CONTENT_TYPE},
    Body, Client, Method, Request, StatusCode, Uri,
};
use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// The authenticated identity, as returned by login and by whoami.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterStatus {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A binding policy as listed by the backend.
///
/// Only the metadata is interpreted here; the spec is kept as it was
/// received until [`ListedPolicy::resource`] is asked for.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ListedPolicy {
    pub metadata: k8s::ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyList {
    // Sent as `null` when nothing matches.
    #[serde(default)]
    binding_policies: Option<Vec<ListedPolicy>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct DeleteRequest<'a> {
    policies: &'a [String],
}

/// The acknowledgement returned by delete calls.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error(transparent)]
    Transport(#[from] hyper::Error),

    #[error("{path} returned {status}")]
    Status { path: String, status: StatusCode },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("not logged in")]
    Unauthenticated,
}

/// A client for the console backend.
///
/// The bearer token obtained by [`ApiClient::login`] is attached to every
/// later request.
#[derive(Debug)]
pub struct ApiClient {
    base: String,
    client: Client<HttpConnector>,
    token: RwLock<Option<String>>,
}

const LOGIN_PATH: &str = "/login";
const WHOAMI_PATH: &str = "/api/me";
const CLUSTER_STATUS_PATH: &str = "/api/cluster-status";
const BINDING_POLICY_PATH: &str = "/api/bp/create-json";
const BINDING_POLICIES_PATH: &str = "/api/bp";
const DELETE_POLICY_PATH: &str = "/api/bp/delete";

/// Everything but RFC 3986 unreserved characters is escaped in paths and
/// query values.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// === impl ApiClient ===

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            base,
            client: Client::new(),
            token: RwLock::new(None),
        }
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let req = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let rsp: LoginResponse = self.send(Method::POST, LOGIN_PATH.to_string(), Some(&req)).await?;
        tracing::info!(username = %rsp.user.username, "logged in");
        *self.token.write() = Some(rsp.token);
        Ok(rsp.user)
    }

    /// Re-verifies the current token.
    pub async fn whoami(&self) -> Result<User, ApiError> {
        if self.token.read().is_none() {
            return Err(ApiError::Unauthenticated);
        }
        self.send::<(), _>(Method::GET, WHOAMI_PATH.to_string(), None)
            .await
    }

    pub async fn cluster_status(&self, name: &str) -> Result<ClusterStatus, ApiError> {
        self.send::<(), _>(Method::GET, cluster_status_path(name), None)
            .await
    }

    /// Creates the policy. The response body is not inspected.
    pub async fn create_policy(&self, config: &PolicyConfiguration) -> Result<(), ApiError> {
        self.execute(Method::POST, BINDING_POLICY_PATH, Some(config))
            .await?;
        tracing::info!(name = %config.name, namespace = %config.namespace, "binding policy created");
        Ok(())
    }

    /// Lists binding policies, optionally only those in `namespace`.
    pub async fn list_policies(&self, namespace: Option<&str>) -> Result<Vec<ListedPolicy>, ApiError> {
        let list: PolicyList = self
            .send::<(), _>(Method::GET, policies_path(namespace), None)
            .await?;
        let policies = list.binding_policies.unwrap_or_default();
        tracing::debug!(count = policies.len(), "listed binding policies");
        Ok(policies)
    }

    pub async fn delete_policy(&self, name: &str, namespace: &str) -> Result<Message, ApiError> {
        let rsp: Message = self
            .send::<(), _>(Method::DELETE, delete_policy_path(name, namespace), None)
            .await?;
        tracing::info!(%name, %namespace, "binding policy deleted");
        Ok(rsp)
    }

    /// Deletes several binding policies in one request.
    pub async fn delete_policies(&self, names: &[String]) -> Result<Message, ApiError> {
        let req = DeleteRequest { policies: names };
        let rsp: Message = self
            .send(Method::DELETE, DELETE_POLICY_PATH.to_string(), Some(&req))
            .await?;
        tracing::info!(count = names.len(), "binding policies deleted");
        Ok(rsp)
    }

    async fn send<B, T>(&self, method: Method, path: String, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let bytes = self.execute(method, &path, body).await?;
        serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode { path, source })
    }

    async fn execute<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Bytes, ApiError> {
        let uri: Uri = format!("{}{}", self.base, path)
            .parse()
            .map_err(hyper::http::Error::from)?;
        let mut req = Request::builder().method(method.clone()).uri(uri);
        let token = self.token.read().clone();
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => {
                let json = serde_json::to_vec(body).map_err(ApiError::Encode)?;
                req.header(CONTENT_TYPE, "application/json")
                    .body(Body::from(json))?
            }
            None => req.body(Body::empty())?,
        };

        tracing::debug!(%method, %path, "sending request");
        let rsp = self.client.request(req).await?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                path: path.to_string(),
                status,
            });
        }
        Ok(hyper::body::to_bytes(rsp.into_body()).await?)
    }
}

#[async_trait::async_trait]
impl ClusterStatusSource for ApiClient {
    async fn fetch(&self, cluster: &str) -> anyhow::Result<ClusterStatus> {
        Ok(self.cluster_status(cluster).await?)
    }
}

fn cluster_status_path(name: &str) -> String {
    format!("{CLUSTER_STATUS_PATH}?name={}", encode(name))
}

fn policies_path(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{BINDING_POLICIES_PATH}?namespace={}", encode(ns)),
        None => BINDING_POLICIES_PATH.to_string(),
    }
}

/// The backend reads the name from the query as well as the path.
fn delete_policy_path(name: &str, namespace: &str) -> String {
    let name = encode(name);
    format!(
        "{DELETE_POLICY_PATH}/{name}?name={name}&namespace={}",
        encode(namespace)
    )
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

// === impl ListedPolicy ===

impl ListedPolicy {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata
            .namespace
            .as_deref()
            .unwrap_or(k8s::DEFAULT_NAMESPACE)
    }

    /// The creation time in RFC 3339, when the backend reported one.
    pub fn created(&self) -> Option<String> {
        self.metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.to_rfc3339())
    }

    /// Decodes the listed spec into a typed resource.
    pub fn resource(&self) -> Result<k8s::BindingPolicy, serde_json::Error> {
        let spec = serde_json::from_value(self.spec.clone())?;
        let mut policy = k8s::BindingPolicy::new(self.name(), spec);
        policy.metadata = self.metadata.clone();
        Ok(policy)
    }
}
