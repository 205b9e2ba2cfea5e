//! HTTP handlers for Secrets Manager

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use secretstack_auth::resolve_scope;
use secretstack_core::{AwsError, ErrorCode, RequestId, REQUEST_ID_HEADER};

use crate::password::PasswordPolicy;
use crate::storage::{
    NewSecret, Secret, SecretUpdate, SecretValue, SecretsManagerError, SecretsManagerState,
    SecretsManagerStorage,
};

pub const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
pub const TARGET_PREFIX: &str = "secretsmanager.";

const DEFAULT_MAX_RESULTS: usize = 100;

/// Handle Secrets Manager requests based on X-Amz-Target header
pub async fn handle_request(
    State(state): State<Arc<SecretsManagerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = RequestId::new();
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let scope = match resolve_scope(&headers, state.defaults()) {
        Ok(scope) => scope,
        Err(e) => {
            warn!(target = %target, error = %e, "Rejecting request with bad credential scope");
            return error_response(&request_id, &AwsError::from(e));
        }
    };

    info!(target = %target, scope = %scope, request_id = %request_id, "Secrets Manager request");

    let storage = state.storage(&scope);
    let operation = target.strip_prefix(TARGET_PREFIX).unwrap_or_default();

    let result = match operation {
        "CreateSecret" => handle_create_secret(&storage, &body),
        "GetSecretValue" => handle_get_secret_value(&storage, &body),
        "PutSecretValue" => handle_put_secret_value(&storage, &body),
        "UpdateSecret" => handle_update_secret(&storage, &body),
        "DescribeSecret" => handle_describe_secret(&storage, &body),
        "ListSecrets" => handle_list_secrets(&storage, &body),
        "DeleteSecret" => handle_delete_secret(&storage, &body),
        "RestoreSecret" => handle_restore_secret(&storage, &body),
        "GetRandomPassword" => handle_get_random_password(&body),
        "PutResourcePolicy" => handle_put_resource_policy(&storage, &body),
        "GetResourcePolicy" => handle_get_resource_policy(&storage, &body),
        "DeleteResourcePolicy" => handle_delete_resource_policy(&storage, &body),
        "TagResource" => handle_tag_resource(&storage, &body),
        "UntagResource" => handle_untag_resource(&storage, &body),
        _ => {
            warn!(target = %target, "Unknown Secrets Manager operation");
            Err(AwsError::new(
                ErrorCode::UnknownOperation,
                format!("Unknown operation: {}", target),
            ))
        }
    };

    let response = match result {
        Ok(mut response) => {
            set_request_id(&mut response, &request_id);
            response
        }
        Err(e) => {
            debug!(target = %target, error = %e, "Secrets Manager request failed");
            error_response(&request_id, &e)
        }
    };

    let status = response.status().as_u16();
    info!(
        target = %target,
        status = status,
        request_id = %request_id,
        "POST {} => {}",
        target,
        status
    );
    response
}

// === Request/Response types ===

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

fn tags_to_map(tags: Vec<Tag>) -> HashMap<String, String> {
    tags.into_iter().map(|t| (t.key, t.value)).collect()
}

fn tags_from_map(tags: &HashMap<String, String>) -> Vec<Tag> {
    let mut tags: Vec<Tag> = tags
        .iter()
        .map(|(k, v)| Tag {
            key: k.clone(),
            value: v.clone(),
        })
        .collect();
    tags.sort_by(|a, b| a.key.cmp(&b.key));
    tags
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecretIdRequest {
    secret_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SecretRefResponse {
    #[serde(rename = "ARN")]
    arn: String,
    name: String,
}

impl From<Secret> for SecretRefResponse {
    fn from(secret: Secret) -> Self {
        Self {
            arn: secret.arn,
            name: secret.name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSecretRequest {
    name: String,
    client_request_token: Option<String>,
    description: Option<String>,
    kms_key_id: Option<String>,
    secret_string: Option<String>,
    secret_binary: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct VersionedSecretResponse {
    #[serde(rename = "ARN")]
    arn: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetSecretValueRequest {
    secret_id: String,
    version_id: Option<String>,
    version_stage: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetSecretValueResponse {
    #[serde(rename = "ARN")]
    arn: String,
    name: String,
    version_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_binary: Option<String>,
    version_stages: Vec<String>,
    created_date: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutSecretValueRequest {
    secret_id: String,
    client_request_token: Option<String>,
    secret_string: Option<String>,
    secret_binary: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutSecretValueResponse {
    #[serde(rename = "ARN")]
    arn: String,
    name: String,
    version_id: String,
    version_stages: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateSecretRequest {
    secret_id: String,
    client_request_token: Option<String>,
    description: Option<String>,
    kms_key_id: Option<String>,
    secret_string: Option<String>,
    secret_binary: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteSecretRequest {
    secret_id: String,
    #[serde(default)]
    force_delete_without_recovery: bool,
    recovery_window_in_days: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteSecretResponse {
    #[serde(rename = "ARN")]
    arn: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletion_date: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSecretResponse {
    #[serde(rename = "ARN")]
    arn: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kms_key_id: Option<String>,
    created_date: f64,
    last_changed_date: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_accessed_date: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted_date: Option<f64>,
    tags: Vec<Tag>,
    version_ids_to_stages: HashMap<String, Vec<String>>,
}

impl From<Secret> for DescribeSecretResponse {
    fn from(secret: Secret) -> Self {
        Self {
            version_ids_to_stages: secret.version_ids_to_stages(),
            tags: tags_from_map(&secret.tags),
            arn: secret.arn,
            name: secret.name,
            description: secret.description,
            kms_key_id: secret.kms_key_id,
            created_date: epoch_seconds(secret.created_date),
            last_changed_date: epoch_seconds(secret.last_changed_date),
            last_accessed_date: secret.last_accessed_date.map(epoch_seconds),
            deleted_date: secret.deleted_date.map(epoch_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListSecretsRequest {
    max_results: Option<i64>,
    next_token: Option<String>,
    #[serde(default)]
    include_planned_deletion: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListSecretsResponse {
    secret_list: Vec<SecretListEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SecretListEntry {
    #[serde(rename = "ARN")]
    arn: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kms_key_id: Option<String>,
    created_date: f64,
    last_changed_date: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_accessed_date: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted_date: Option<f64>,
    tags: Vec<Tag>,
    secret_versions_to_stages: HashMap<String, Vec<String>>,
}

impl From<Secret> for SecretListEntry {
    fn from(secret: Secret) -> Self {
        Self {
            secret_versions_to_stages: secret.version_ids_to_stages(),
            tags: tags_from_map(&secret.tags),
            arn: secret.arn,
            name: secret.name,
            description: secret.description,
            kms_key_id: secret.kms_key_id,
            created_date: epoch_seconds(secret.created_date),
            last_changed_date: epoch_seconds(secret.last_changed_date),
            last_accessed_date: secret.last_accessed_date.map(epoch_seconds),
            deleted_date: secret.deleted_date.map(epoch_seconds),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetRandomPasswordRequest {
    password_length: Option<i64>,
    exclude_characters: Option<String>,
    exclude_numbers: Option<bool>,
    exclude_punctuation: Option<bool>,
    exclude_uppercase: Option<bool>,
    exclude_lowercase: Option<bool>,
    include_space: Option<bool>,
    require_each_included_type: Option<bool>,
}

fn password_policy(req: GetRandomPasswordRequest) -> Result<PasswordPolicy, SecretsManagerError> {
    let defaults = PasswordPolicy::default();
    let length = match req.password_length {
        Some(n) => usize::try_from(n).map_err(|_| {
            SecretsManagerError::InvalidParameter(format!("Invalid PasswordLength: {}", n))
        })?,
        None => defaults.length,
    };

    Ok(PasswordPolicy {
        length,
        exclude_characters: req.exclude_characters.unwrap_or_default(),
        exclude_numbers: req.exclude_numbers.unwrap_or(defaults.exclude_numbers),
        exclude_punctuation: req.exclude_punctuation.unwrap_or(defaults.exclude_punctuation),
        exclude_uppercase: req.exclude_uppercase.unwrap_or(defaults.exclude_uppercase),
        exclude_lowercase: req.exclude_lowercase.unwrap_or(defaults.exclude_lowercase),
        include_space: req.include_space.unwrap_or(defaults.include_space),
        require_each_included_type: req
            .require_each_included_type
            .unwrap_or(defaults.require_each_included_type),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetRandomPasswordResponse {
    random_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutResourcePolicyRequest {
    secret_id: String,
    resource_policy: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetResourcePolicyResponse {
    #[serde(rename = "ARN")]
    arn: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_policy: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagResourceRequest {
    secret_id: String,
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UntagResourceRequest {
    secret_id: String,
    tag_keys: Vec<String>,
}

// === Handlers ===

fn handle_create_secret(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: CreateSecretRequest = parse_body(body)?;

    let secret = storage.create_secret(NewSecret {
        name: req.name,
        description: req.description,
        kms_key_id: req.kms_key_id,
        value: SecretValue {
            secret_string: req.secret_string,
            secret_binary: req.secret_binary,
        },
        tags: tags_to_map(req.tags),
        client_request_token: req.client_request_token,
    })?;

    json_response(&VersionedSecretResponse {
        arn: secret.arn,
        name: secret.name,
        version_id: secret.current_version_id,
    })
}

fn handle_get_secret_value(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: GetSecretValueRequest = parse_body(body)?;

    let (secret, version) = storage.get_secret_value(
        &req.secret_id,
        req.version_id.as_deref(),
        req.version_stage.as_deref(),
    )?;

    json_response(&GetSecretValueResponse {
        arn: secret.arn,
        name: secret.name,
        version_id: version.version_id,
        secret_string: version.secret_string,
        secret_binary: version.secret_binary,
        version_stages: version.version_stages,
        created_date: epoch_seconds(version.created_date),
    })
}

fn handle_put_secret_value(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: PutSecretValueRequest = parse_body(body)?;

    let (secret, version) = storage.put_secret_value(
        &req.secret_id,
        SecretValue {
            secret_string: req.secret_string,
            secret_binary: req.secret_binary,
        },
        req.client_request_token,
    )?;

    json_response(&PutSecretValueResponse {
        arn: secret.arn,
        name: secret.name,
        version_id: version.version_id,
        version_stages: version.version_stages,
    })
}

fn handle_update_secret(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: UpdateSecretRequest = parse_body(body)?;

    let (secret, version) = storage.update_secret(
        &req.secret_id,
        SecretUpdate {
            description: req.description,
            kms_key_id: req.kms_key_id,
            value: SecretValue {
                secret_string: req.secret_string,
                secret_binary: req.secret_binary,
            },
            client_request_token: req.client_request_token,
        },
    )?;

    json_response(&VersionedSecretResponse {
        arn: secret.arn,
        name: secret.name,
        version_id: version.map(|v| v.version_id),
    })
}

fn handle_describe_secret(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: SecretIdRequest = parse_body(body)?;
    let secret = storage.describe_secret(&req.secret_id)?;
    json_response(&DescribeSecretResponse::from(secret))
}

fn handle_list_secrets(storage: &SecretsManagerStorage, body: &[u8]) -> Result<Response, AwsError> {
    let req: ListSecretsRequest = parse_body(body)?;

    let max_results = match req.max_results {
        Some(n @ 1..=100) => usize::try_from(n).unwrap_or(DEFAULT_MAX_RESULTS),
        Some(n) => {
            return Err(SecretsManagerError::InvalidParameter(format!(
                "MaxResults must be between 1 and 100, got {}",
                n
            ))
            .into())
        }
        None => DEFAULT_MAX_RESULTS,
    };
    let start = match req.next_token.as_deref() {
        Some(token) => decode_next_token(token)?,
        None => 0,
    };

    let secrets = storage.list_secrets(req.include_planned_deletion);
    let end = secrets.len().min(start.saturating_add(max_results));
    let next_token = (end < secrets.len()).then(|| encode_next_token(end));

    let secret_list = secrets
        .into_iter()
        .skip(start)
        .take(max_results)
        .map(SecretListEntry::from)
        .collect();

    json_response(&ListSecretsResponse {
        secret_list,
        next_token,
    })
}

fn handle_delete_secret(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: DeleteSecretRequest = parse_body(body)?;

    let secret = storage.delete_secret(
        &req.secret_id,
        req.force_delete_without_recovery,
        req.recovery_window_in_days,
    )?;

    json_response(&DeleteSecretResponse {
        arn: secret.arn,
        name: secret.name,
        deletion_date: secret.deleted_date.map(epoch_seconds),
    })
}

fn handle_restore_secret(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: SecretIdRequest = parse_body(body)?;
    let secret = storage.restore_secret(&req.secret_id)?;
    json_response(&SecretRefResponse::from(secret))
}

fn handle_get_random_password(body: &[u8]) -> Result<Response, AwsError> {
    let req: GetRandomPasswordRequest = parse_body(body)?;
    let policy = password_policy(req)?;
    let random_password = policy.generate()?;
    json_response(&GetRandomPasswordResponse { random_password })
}

fn handle_put_resource_policy(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: PutResourcePolicyRequest = parse_body(body)?;
    let secret = storage.put_resource_policy(&req.secret_id, req.resource_policy)?;
    json_response(&SecretRefResponse::from(secret))
}

fn handle_get_resource_policy(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: SecretIdRequest = parse_body(body)?;
    let secret = storage.get_resource_policy(&req.secret_id)?;
    json_response(&GetResourcePolicyResponse {
        arn: secret.arn,
        name: secret.name,
        resource_policy: secret.resource_policy,
    })
}

fn handle_delete_resource_policy(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: SecretIdRequest = parse_body(body)?;
    let secret = storage.delete_resource_policy(&req.secret_id)?;
    json_response(&SecretRefResponse::from(secret))
}

fn handle_tag_resource(storage: &SecretsManagerStorage, body: &[u8]) -> Result<Response, AwsError> {
    let req: TagResourceRequest = parse_body(body)?;
    storage.tag_resource(&req.secret_id, tags_to_map(req.tags))?;
    json_response(&serde_json::json!({}))
}

fn handle_untag_resource(
    storage: &SecretsManagerStorage,
    body: &[u8],
) -> Result<Response, AwsError> {
    let req: UntagResourceRequest = parse_body(body)?;
    storage.untag_resource(&req.secret_id, &req.tag_keys)?;
    json_response(&serde_json::json!({}))
}

// === Helpers ===

/// Parse a JSON request body. An empty body is treated as `{}`.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AwsError> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body)
        .map_err(|e| AwsError::new(ErrorCode::ValidationException, e.to_string()))
}

#[allow(clippy::cast_precision_loss)]
fn epoch_seconds(date: DateTime<Utc>) -> f64 {
    date.timestamp_millis() as f64 / 1000.0
}

fn encode_next_token(offset: usize) -> String {
    STANDARD.encode(offset.to_string())
}

fn decode_next_token(token: &str) -> Result<usize, AwsError> {
    STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SecretsManagerError::InvalidNextToken(token.to_string()).into())
}

fn json_response<T: Serialize>(body: &T) -> Result<Response, AwsError> {
    let body = serde_json::to_string(body).map_err(|e| AwsError::internal(e.to_string()))?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response())
}

/// AWS JSON 1.1 error response carrying `request_id`
pub fn error_response(request_id: &RequestId, error: &AwsError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (
        status,
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (HeaderName::from_static("x-amzn-errortype"), error.code.as_str()),
        ],
        error.to_json(),
    )
        .into_response();
    set_request_id(&mut response, request_id);
    response
}

fn set_request_id(response: &mut Response, request_id: &RequestId) {
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::post, Router};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(state: Arc<SecretsManagerState>) -> Router {
        Router::new()
            .route("/", post(handle_request))
            .with_state(state)
    }

    async fn call(
        state: &Arc<SecretsManagerState>,
        operation: &str,
        body: Value,
        authorization: Option<&str>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", format!("{TARGET_PREFIX}{operation}"));
        if let Some(auth) = authorization {
            request = request.header("authorization", auth);
        }
        let request = request.body(Body::from(body.to_string())).unwrap();

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, value)
    }

    fn auth_for(region: &str) -> String {
        format!(
            "AWS4-HMAC-SHA256 Credential=test/20240101/{region}/secretsmanager/aws4_request, SignedHeaders=host;x-amz-date, Signature=abcd"
        )
    }

    #[tokio::test]
    async fn test_create_and_get_secret() {
        let state = Arc::new(SecretsManagerState::new());

        let (status, headers, created) = call(
            &state,
            "CreateSecret",
            json!({"Name": "s-1", "SecretString": "my_secret", "Description": "testing"}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains_key(REQUEST_ID_HEADER));
        assert_eq!(created["Name"], "s-1");

        let (status, _, fetched) =
            call(&state, "GetSecretValue", json!({"SecretId": "s-1"}), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["SecretString"], "my_secret");
        assert_eq!(fetched["ARN"], created["ARN"]);
        assert!(fetched["CreatedDate"].as_f64().unwrap() > 0.0);
        assert_eq!(fetched["VersionStages"], json!(["AWSCURRENT"]));
    }

    #[tokio::test]
    async fn test_missing_secret_is_client_error() {
        let state = Arc::new(SecretsManagerState::new());
        let (status, headers, body) =
            call(&state, "GetSecretValue", json!({"SecretId": "nope"}), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "ResourceNotFoundException");
        assert_eq!(
            headers.get("x-amzn-errortype").unwrap(),
            "ResourceNotFoundException"
        );
        let request_id = headers.get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_eq!(request_id.len(), 36);
    }

    /// Shared buffer the fmt layer writes into
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_every_response_is_logged_with_status() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let state = Arc::new(SecretsManagerState::new());
        call(&state, "CreateSecret", json!({"Name": "s", "SecretString": "v"}), None).await;
        call(&state, "GetSecretValue", json!({"SecretId": "missing"}), None).await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("POST secretsmanager.CreateSecret => 200"), "{output}");
        assert!(output.contains("POST secretsmanager.GetSecretValue => 400"), "{output}");
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let state = Arc::new(SecretsManagerState::new());
        let (status, _, body) = call(&state, "RotateEverything", json!({}), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "UnknownOperationException");
    }

    #[tokio::test]
    async fn test_invalid_body_is_validation_error() {
        let state = Arc::new(SecretsManagerState::new());
        let (status, _, body) = call(&state, "CreateSecret", json!({"Nom": "x"}), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "ValidationException");
    }

    #[tokio::test]
    async fn test_region_scopes_requests() {
        let state = Arc::new(SecretsManagerState::new());
        let west = auth_for("us-west-2");

        let (status, _, created) = call(
            &state,
            "CreateSecret",
            json!({"Name": "regional", "SecretString": "v"}),
            Some(&west),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(created["ARN"].as_str().unwrap().contains(":us-west-2:"));

        // Unsigned requests land in the default region
        let (status, _, _) =
            call(&state, "GetSecretValue", json!({"SecretId": "regional"}), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = call(
            &state,
            "GetSecretValue",
            json!({"SecretId": "regional"}),
            Some(&west),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_credential_scope_is_client_error() {
        let state = Arc::new(SecretsManagerState::new());

        let (status, _, body) =
            call(&state, "ListSecrets", json!({}), Some("AWS4-HMAC-SHA256 garbage")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "IncompleteSignatureException");

        let (status, _, body) =
            call(&state, "ListSecrets", json!({}), Some(&auth_for("moon-base"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "InvalidSignatureException");

        // The failures leave no trace on the next request
        let (status, _, _) = call(&state, "ListSecrets", json!({}), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_region_uses_default() {
        let state = Arc::new(SecretsManagerState::new());
        let (status, _, created) = call(
            &state,
            "CreateSecret",
            json!({"Name": "nullregion", "SecretString": "v"}),
            Some(&auth_for("")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(created["ARN"].as_str().unwrap().contains(":us-east-1:"));
    }

    #[tokio::test]
    async fn test_list_secrets_pagination() {
        let state = Arc::new(SecretsManagerState::new());
        for i in 0..5 {
            call(
                &state,
                "CreateSecret",
                json!({"Name": format!("s-{i}"), "SecretString": "v"}),
                None,
            )
            .await;
        }

        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = json!({"MaxResults": 2});
            if let Some(t) = &token {
                req["NextToken"] = json!(t);
            }
            let (status, _, page) = call(&state, "ListSecrets", req, None).await;
            assert_eq!(status, StatusCode::OK);
            for entry in page["SecretList"].as_array().unwrap() {
                names.push(entry["Name"].as_str().unwrap().to_string());
            }
            match page["NextToken"].as_str() {
                Some(t) => token = Some(t.to_string()),
                None => break,
            }
        }

        assert_eq!(names, vec!["s-0", "s-1", "s-2", "s-3", "s-4"]);

        let (status, _, body) =
            call(&state, "ListSecrets", json!({"NextToken": "%%%"}), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "InvalidNextTokenException");
    }

    #[tokio::test]
    async fn test_get_random_password() {
        let state = Arc::new(SecretsManagerState::new());
        let (status, _, body) = call(
            &state,
            "GetRandomPassword",
            json!({"PasswordLength": 120, "ExcludeCharacters": "xyzDje@?!."}),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let password = body["RandomPassword"].as_str().unwrap();
        assert_eq!(password.chars().count(), 120);
        assert!(password.chars().all(|c| !"xyzDje@?!.".contains(c)));

        let (status, _, body) =
            call(&state, "GetRandomPassword", json!({"PasswordLength": -1}), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "InvalidParameterException");
    }

    #[tokio::test]
    async fn test_resource_policy_round_trip() {
        let state = Arc::new(SecretsManagerState::new());
        call(
            &state,
            "CreateSecret",
            json!({"Name": "with-policy", "SecretString": "v"}),
            None,
        )
        .await;

        let policy = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"AWS": "arn:aws:iam::000000000000:root"},
                "Action": "secretsmanager:GetSecretValue",
                "Resource": "*"
            }]
        });
        let (status, _, _) = call(
            &state,
            "PutResourcePolicy",
            json!({"SecretId": "with-policy", "ResourcePolicy": policy.to_string()}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, _, body) =
            call(&state, "GetResourcePolicy", json!({"SecretId": "with-policy"}), None).await;
        let stored: Value = serde_json::from_str(body["ResourcePolicy"].as_str().unwrap()).unwrap();
        assert_eq!(stored, policy);

        let (status, _, _) = call(
            &state,
            "DeleteResourcePolicy",
            json!({"SecretId": "with-policy"}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, _, body) =
            call(&state, "GetResourcePolicy", json!({"SecretId": "with-policy"}), None).await;
        assert!(body.get("ResourcePolicy").is_none());
    }

    #[tokio::test]
    async fn test_describe_includes_tags_and_stages() {
        let state = Arc::new(SecretsManagerState::new());
        call(
            &state,
            "CreateSecret",
            json!({
                "Name": "tagged",
                "SecretString": "v",
                "Tags": [{"Key": "env", "Value": "dev"}],
            }),
            None,
        )
        .await;
        call(
            &state,
            "TagResource",
            json!({"SecretId": "tagged", "Tags": [{"Key": "team", "Value": "core"}]}),
            None,
        )
        .await;
        call(
            &state,
            "UntagResource",
            json!({"SecretId": "tagged", "TagKeys": ["env"]}),
            None,
        )
        .await;

        let (status, _, body) =
            call(&state, "DescribeSecret", json!({"SecretId": "tagged"}), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Tags"], json!([{"Key": "team", "Value": "core"}]));
        let stages: Vec<&Value> = body["VersionIdsToStages"]
            .as_object()
            .unwrap()
            .values()
            .collect();
        assert_eq!(stages, vec![&json!(["AWSCURRENT"])]);
    }

    #[tokio::test]
    async fn test_delete_and_restore() {
        let state = Arc::new(SecretsManagerState::new());
        call(
            &state,
            "CreateSecret",
            json!({"Name": "doomed", "SecretString": "v"}),
            None,
        )
        .await;

        let (status, _, body) = call(
            &state,
            "DeleteSecret",
            json!({"SecretId": "doomed", "RecoveryWindowInDays": 7}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["DeletionDate"].as_f64().is_some());

        let (status, _, body) =
            call(&state, "GetSecretValue", json!({"SecretId": "doomed"}), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "InvalidRequestException");

        let (status, _, _) =
            call(&state, "RestoreSecret", json!({"SecretId": "doomed"}), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = call(
            &state,
            "DeleteSecret",
            json!({"SecretId": "doomed", "ForceDeleteWithoutRecovery": true}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) =
            call(&state, "DescribeSecret", json!({"SecretId": "doomed"}), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "ResourceNotFoundException");
    }
}
