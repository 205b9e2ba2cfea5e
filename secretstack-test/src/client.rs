//! Minimal signed Secrets Manager client
//!
//! Every request is SigV4-signed and sent once. Nothing is retried, so the
//! outcome of a call is exactly what the server (or the client itself) decided.

use chrono::Utc;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use secretstack_auth::{sign_request, SigningParams};
use secretstack_core::REQUEST_ID_HEADER;

pub const DEFAULT_ACCESS_KEY: &str = "test";
pub const DEFAULT_SECRET_KEY: &str = "test";
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const SERVICE: &str = "secretsmanager";

/// How a client picks the region it signs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionMode {
    /// Nothing set on the client; the ambient region applies
    Unspecified,
    /// Explicitly no region; the credential scope has an empty region
    Null,
    Explicit(String),
}

impl RegionMode {
    pub fn explicit(region: impl Into<String>) -> Self {
        Self::Explicit(region.into())
    }
}

impl fmt::Display for RegionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => f.write_str("unspecified"),
            Self::Null => f.write_str("null"),
            Self::Explicit(region) => write!(f, "explicit({region})"),
        }
    }
}

/// Region from `AWS_REGION`, then `AWS_DEFAULT_REGION`
pub fn ambient_region_from_env() -> Option<String> {
    ["AWS_REGION", "AWS_DEFAULT_REGION"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|region| !region.is_empty())
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{code} ({status}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("No region configured for an unspecified region mode")]
    MissingRegion,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ClientError {
    /// HTTP status of a service error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Error code of a service error
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_server_fault(&self) -> bool {
        self.status().is_some_and(|status| status >= 500)
    }

    /// Rejected by the client itself or answered with a 4xx
    pub fn is_client_rejection(&self) -> bool {
        match self {
            Self::MissingRegion | Self::InvalidEndpoint(_) => true,
            Self::Service { status, .. } => (400..500).contains(status),
            Self::Transport(_) | Self::Parse(_) => false,
        }
    }
}

/// A successful response
#[derive(Debug, Clone)]
pub struct Output<T> {
    pub http_status: u16,
    pub request_id: Option<String>,
    pub body: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSecretInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_request_token: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl CreateSecretInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn secret_string(mut self, value: impl Into<String>) -> Self {
        self.secret_string = Some(value.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateSecretInput {
    pub secret_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_string: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListSecretsInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_planned_deletion: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteSecretInput {
    pub secret_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force_delete_without_recovery: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_window_in_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRandomPasswordInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_characters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_punctuation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_space: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretRef {
    #[serde(rename = "ARN")]
    pub arn: String,
    pub name: String,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretValueOutput {
    #[serde(rename = "ARN")]
    pub arn: String,
    pub name: String,
    pub version_id: String,
    pub secret_string: Option<String>,
    pub secret_binary: Option<String>,
    #[serde(default)]
    pub version_stages: Vec<String>,
    /// Seconds since the epoch
    pub created_date: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutSecretValueOutput {
    #[serde(rename = "ARN")]
    pub arn: String,
    pub name: String,
    pub version_id: String,
    #[serde(default)]
    pub version_stages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeSecretOutput {
    #[serde(rename = "ARN")]
    pub arn: String,
    pub name: String,
    pub description: Option<String>,
    pub kms_key_id: Option<String>,
    pub deleted_date: Option<f64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub version_ids_to_stages: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListSecretsOutput {
    pub secret_list: Vec<DescribeSecretOutput>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteSecretOutput {
    #[serde(rename = "ARN")]
    pub arn: String,
    pub name: String,
    pub deletion_date: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RandomPasswordOutput {
    pub random_password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourcePolicyOutput {
    #[serde(rename = "ARN")]
    pub arn: String,
    pub name: String,
    pub resource_policy: Option<String>,
}

/// Body of operations that return nothing
#[derive(Debug, Clone, Deserialize)]
pub struct Empty {}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Builder for [`SecretsManagerClient`]
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    endpoint: String,
    region_mode: RegionMode,
    ambient_region: Option<String>,
    access_key: String,
    secret_key: String,
}

impl ClientBuilder {
    pub fn region_mode(mut self, region_mode: RegionMode) -> Self {
        self.region_mode = region_mode;
        self
    }

    /// Replace the region picked up from the environment
    pub fn ambient_region(mut self, region: Option<String>) -> Self {
        self.ambient_region = region;
        self
    }

    pub fn credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = access_key.into();
        self.secret_key = secret_key.into();
        self
    }

    pub fn build(self) -> Result<SecretsManagerClient, ClientError> {
        let endpoint = Url::parse(&self.endpoint)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(SecretsManagerClient {
            endpoint,
            region_mode: self.region_mode,
            ambient_region: self.ambient_region,
            access_key: self.access_key,
            secret_key: self.secret_key,
            http,
        })
    }
}

/// Client for the Secrets Manager JSON protocol
#[derive(Debug)]
pub struct SecretsManagerClient {
    endpoint: Url,
    region_mode: RegionMode,
    ambient_region: Option<String>,
    access_key: String,
    secret_key: String,
    http: Client,
}

impl SecretsManagerClient {
    pub fn builder(endpoint: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            endpoint: endpoint.into(),
            region_mode: RegionMode::Unspecified,
            ambient_region: ambient_region_from_env(),
            access_key: DEFAULT_ACCESS_KEY.to_string(),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
        }
    }

    pub fn region_mode(&self) -> &RegionMode {
        &self.region_mode
    }

    /// Region placed in the credential scope. Empty for [`RegionMode::Null`].
    pub fn signing_region(&self) -> Result<&str, ClientError> {
        match &self.region_mode {
            RegionMode::Explicit(region) => Ok(region),
            RegionMode::Null => Ok(""),
            RegionMode::Unspecified => self
                .ambient_region
                .as_deref()
                .filter(|region| !region.is_empty())
                .ok_or(ClientError::MissingRegion),
        }
    }

    // === Secrets ===

    pub async fn create_secret(
        &self,
        input: &CreateSecretInput,
    ) -> Result<Output<SecretRef>, ClientError> {
        self.call("CreateSecret", input).await
    }

    pub async fn get_secret_value(
        &self,
        secret_id: &str,
    ) -> Result<Output<SecretValueOutput>, ClientError> {
        self.call("GetSecretValue", &json!({ "SecretId": secret_id })).await
    }

    pub async fn get_secret_value_stage(
        &self,
        secret_id: &str,
        version_stage: &str,
    ) -> Result<Output<SecretValueOutput>, ClientError> {
        self.call(
            "GetSecretValue",
            &json!({ "SecretId": secret_id, "VersionStage": version_stage }),
        )
        .await
    }

    pub async fn put_secret_value(
        &self,
        secret_id: &str,
        secret_string: &str,
    ) -> Result<Output<PutSecretValueOutput>, ClientError> {
        self.call(
            "PutSecretValue",
            &json!({ "SecretId": secret_id, "SecretString": secret_string }),
        )
        .await
    }

    pub async fn update_secret(
        &self,
        input: &UpdateSecretInput,
    ) -> Result<Output<SecretRef>, ClientError> {
        self.call("UpdateSecret", input).await
    }

    pub async fn describe_secret(
        &self,
        secret_id: &str,
    ) -> Result<Output<DescribeSecretOutput>, ClientError> {
        self.call("DescribeSecret", &json!({ "SecretId": secret_id })).await
    }

    pub async fn list_secrets(
        &self,
        input: &ListSecretsInput,
    ) -> Result<Output<ListSecretsOutput>, ClientError> {
        self.call("ListSecrets", input).await
    }

    pub async fn delete_secret(
        &self,
        input: &DeleteSecretInput,
    ) -> Result<Output<DeleteSecretOutput>, ClientError> {
        self.call("DeleteSecret", input).await
    }

    pub async fn restore_secret(&self, secret_id: &str) -> Result<Output<SecretRef>, ClientError> {
        self.call("RestoreSecret", &json!({ "SecretId": secret_id })).await
    }

    pub async fn get_random_password(
        &self,
        input: &GetRandomPasswordInput,
    ) -> Result<Output<RandomPasswordOutput>, ClientError> {
        self.call("GetRandomPassword", input).await
    }

    // === Resource policies ===

    pub async fn put_resource_policy(
        &self,
        secret_id: &str,
        policy: &str,
    ) -> Result<Output<ResourcePolicyOutput>, ClientError> {
        self.call(
            "PutResourcePolicy",
            &json!({ "SecretId": secret_id, "ResourcePolicy": policy }),
        )
        .await
    }

    pub async fn get_resource_policy(
        &self,
        secret_id: &str,
    ) -> Result<Output<ResourcePolicyOutput>, ClientError> {
        self.call("GetResourcePolicy", &json!({ "SecretId": secret_id })).await
    }

    pub async fn delete_resource_policy(
        &self,
        secret_id: &str,
    ) -> Result<Output<ResourcePolicyOutput>, ClientError> {
        self.call("DeleteResourcePolicy", &json!({ "SecretId": secret_id })).await
    }

    // === Tags ===

    pub async fn tag_resource(
        &self,
        secret_id: &str,
        tags: &[Tag],
    ) -> Result<Output<Empty>, ClientError> {
        self.call("TagResource", &json!({ "SecretId": secret_id, "Tags": tags })).await
    }

    pub async fn untag_resource(
        &self,
        secret_id: &str,
        tag_keys: &[&str],
    ) -> Result<Output<Empty>, ClientError> {
        self.call(
            "UntagResource",
            &json!({ "SecretId": secret_id, "TagKeys": tag_keys }),
        )
        .await
    }

    /// Sign and send a single JSON 1.1 request
    async fn call<I, T>(&self, operation: &str, input: &I) -> Result<Output<T>, ClientError>
    where
        I: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let region = self.signing_region()?;
        let payload = serde_json::to_vec(input).map_err(|e| ClientError::Parse(e.to_string()))?;

        let params = SigningParams {
            access_key: &self.access_key,
            secret_key: &self.secret_key,
            region,
            service: SERVICE,
            timestamp: Utc::now(),
        };
        let headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("host".to_string(), host_header(&self.endpoint)),
            ("x-amz-date".to_string(), params.amz_date()),
            ("x-amz-target".to_string(), format!("secretsmanager.{operation}")),
        ];
        let authorization = sign_request(&params, "POST", "/", "", &headers, &payload);

        debug!(
            operation = %operation,
            region_mode = %self.region_mode,
            region = %region,
            "Sending request"
        );

        let mut request = self.http.post(self.endpoint.clone());
        for (name, value) in headers.iter().filter(|(name, _)| name != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .header("authorization", authorization)
            .body(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().await?;

        if !(200..300).contains(&status) {
            return Err(service_error(status, error_type, &bytes));
        }

        let bytes: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        let body = serde_json::from_slice(bytes).map_err(|e| ClientError::Parse(e.to_string()))?;

        Ok(Output {
            http_status: status,
            request_id,
            body,
        })
    }
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn service_error(status: u16, header_type: Option<String>, body: &[u8]) -> ClientError {
    let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();
    let (body_type, message) = match parsed {
        Some(body) => (body.error_type, body.message),
        None => (None, None),
    };

    // Codes may be namespaced as `prefix#Code`
    let code = body_type
        .or(header_type)
        .map(|code| code.rsplit('#').next().unwrap_or_default().to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    ClientError::Service {
        status,
        code,
        message: message.unwrap_or_else(|| String::from_utf8_lossy(body).into_owned()),
    }
}
