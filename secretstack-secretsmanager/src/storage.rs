//! Secrets Manager in-memory storage

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use secretstack_core::{AccountRegionKey, AwsError, ErrorCode, StateStore};

pub const STAGE_CURRENT: &str = "AWSCURRENT";
pub const STAGE_PREVIOUS: &str = "AWSPREVIOUS";

/// Length of the random token AWS appends to every secret ARN
pub const ARN_SUFFIX_LEN: usize = 6;

pub const DEFAULT_RECOVERY_WINDOW_DAYS: i64 = 30;
const MIN_RECOVERY_WINDOW_DAYS: i64 = 7;

static SECRET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9/_+=.@-]{1,512}$").expect("valid secret name pattern"));

/// A secret with its versions
#[derive(Debug, Clone)]
pub struct Secret {
    /// Secret ARN
    pub arn: String,
    /// Secret name
    pub name: String,
    /// Description
    pub description: Option<String>,
    /// KMS Key ID (optional, not actually used for encryption)
    pub kms_key_id: Option<String>,
    /// Secret versions (version_id -> SecretVersion)
    pub versions: HashMap<String, SecretVersion>,
    /// Current version ID (AWSCURRENT)
    pub current_version_id: Option<String>,
    /// Previous version ID (AWSPREVIOUS)
    pub previous_version_id: Option<String>,
    /// Creation date
    pub created_date: DateTime<Utc>,
    /// Last changed date
    pub last_changed_date: DateTime<Utc>,
    /// Last accessed date
    pub last_accessed_date: Option<DateTime<Utc>>,
    /// Deletion date (if scheduled for deletion)
    pub deleted_date: Option<DateTime<Utc>>,
    /// Resource policy document, stored as sent
    pub resource_policy: Option<String>,
    /// Tags
    pub tags: HashMap<String, String>,
}

impl Secret {
    pub fn is_scheduled_for_deletion(&self) -> bool {
        self.deleted_date.is_some()
    }

    fn ensure_not_deleted(&self) -> Result<(), SecretsManagerError> {
        if self.is_scheduled_for_deletion() {
            return Err(SecretsManagerError::InvalidRequest(
                "You can't perform this operation on the secret because it was marked for deletion."
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Add a version for a put or update. A retry with the same token and value
    /// returns the version it created the first time.
    fn add_version(
        &mut self,
        client_request_token: Option<String>,
        value: SecretValue,
        now: DateTime<Utc>,
    ) -> Result<SecretVersion, SecretsManagerError> {
        if let Some(existing) = client_request_token
            .as_ref()
            .and_then(|token| self.versions.get(token))
        {
            return if existing.secret_string == value.secret_string
                && existing.secret_binary == value.secret_binary
            {
                Ok(existing.clone())
            } else {
                Err(SecretsManagerError::ResourceExists(format!(
                    "A version with ID {} already exists with a different value",
                    existing.version_id
                )))
            };
        }

        let version_id = client_request_token.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.push_version(version_id, value, now)
    }

    /// Add a new AWSCURRENT version, demoting the current one to AWSPREVIOUS
    fn push_version(
        &mut self,
        version_id: String,
        value: SecretValue,
        now: DateTime<Utc>,
    ) -> Result<SecretVersion, SecretsManagerError> {
        if self.versions.contains_key(&version_id) {
            return Err(SecretsManagerError::ResourceExists(format!(
                "A version with ID {} already exists",
                version_id
            )));
        }

        // Keep CreatedDate non-decreasing even if the clock steps back
        let created_date = self
            .current_version_id
            .as_ref()
            .and_then(|id| self.versions.get(id))
            .map_or(now, |v| v.created_date.max(now));

        let current_vid = self.current_version_id.take();
        let prev_vid = self.previous_version_id.take();

        if let Some(ref pvid) = prev_vid {
            if let Some(prev_version) = self.versions.get_mut(pvid) {
                prev_version.version_stages.retain(|s| s != STAGE_PREVIOUS);
                // Versions without a stage are no longer reachable
                if prev_version.version_stages.is_empty() {
                    self.versions.remove(pvid);
                }
            }
        }

        if let Some(ref cvid) = current_vid {
            if let Some(current_version) = self.versions.get_mut(cvid) {
                current_version.version_stages.retain(|s| s != STAGE_CURRENT);
                current_version.version_stages.push(STAGE_PREVIOUS.to_string());
            }
        }
        self.previous_version_id = current_vid;

        let version = SecretVersion {
            version_id: version_id.clone(),
            secret_string: value.secret_string,
            secret_binary: value.secret_binary,
            created_date,
            version_stages: vec![STAGE_CURRENT.to_string()],
        };

        self.versions.insert(version_id.clone(), version.clone());
        self.current_version_id = Some(version_id);
        self.last_changed_date = now;
        Ok(version)
    }

    /// Version id -> stages, for DescribeSecret and ListSecrets
    pub fn version_ids_to_stages(&self) -> HashMap<String, Vec<String>> {
        self.versions
            .iter()
            .map(|(k, v)| (k.clone(), v.version_stages.clone()))
            .collect()
    }
}

/// A version of a secret
#[derive(Debug, Clone)]
pub struct SecretVersion {
    /// Version ID
    pub version_id: String,
    /// Secret string value
    pub secret_string: Option<String>,
    /// Secret binary value (base64 encoded)
    pub secret_binary: Option<String>,
    /// Creation date
    pub created_date: DateTime<Utc>,
    /// Version stages (e.g., AWSCURRENT, AWSPREVIOUS)
    pub version_stages: Vec<String>,
}

/// The value carried by a create, put or update call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretValue {
    pub secret_string: Option<String>,
    pub secret_binary: Option<String>,
}

impl SecretValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            secret_string: Some(value.into()),
            secret_binary: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.secret_string.is_none() && self.secret_binary.is_none()
    }

    fn validate(&self) -> Result<(), SecretsManagerError> {
        if self.secret_string.is_some() && self.secret_binary.is_some() {
            return Err(SecretsManagerError::InvalidParameter(
                "You can't specify both a binary secret value and a string secret value in the same secret."
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters for CreateSecret
#[derive(Debug, Clone, Default)]
pub struct NewSecret {
    pub name: String,
    pub description: Option<String>,
    pub kms_key_id: Option<String>,
    pub value: SecretValue,
    pub tags: HashMap<String, String>,
    pub client_request_token: Option<String>,
}

/// Parameters for UpdateSecret
#[derive(Debug, Clone, Default)]
pub struct SecretUpdate {
    pub description: Option<String>,
    pub kms_key_id: Option<String>,
    pub value: SecretValue,
    pub client_request_token: Option<String>,
}

/// In-memory storage for the secrets of one account/region
#[derive(Debug)]
pub struct SecretsManagerStorage {
    scope: AccountRegionKey,
    /// Secrets indexed by name
    secrets: DashMap<String, Secret>,
}

impl Default for SecretsManagerStorage {
    fn default() -> Self {
        Self::new(AccountRegionKey::default())
    }
}

impl SecretsManagerStorage {
    pub fn new(scope: AccountRegionKey) -> Self {
        Self {
            scope,
            secrets: DashMap::new(),
        }
    }

    pub fn scope(&self) -> &AccountRegionKey {
        &self.scope
    }

    fn new_arn(&self, name: &str) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ARN_SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!(
            "arn:aws:secretsmanager:{}:{}:secret:{}-{}",
            self.scope.region, self.scope.account_id, name, suffix
        )
    }

    /// Map a SecretId (name, full ARN or ARN without its random suffix) to the secret name
    fn resolve(&self, secret_id: &str) -> Result<String, SecretsManagerError> {
        if self.secrets.contains_key(secret_id) {
            return Ok(secret_id.to_string());
        }

        if secret_id.starts_with("arn:") {
            // An exact ARN wins over a partial match on a longer name
            if let Some(entry) = self.secrets.iter().find(|entry| entry.arn == secret_id) {
                return Ok(entry.key().clone());
            }

            let mut matches = self
                .secrets
                .iter()
                .filter(|entry| arn_matches(&entry.arn, secret_id))
                .map(|entry| entry.key().clone());

            if let (Some(name), None) = (matches.next(), matches.next()) {
                return Ok(name);
            }
        }

        Err(SecretsManagerError::ResourceNotFound(secret_id.to_string()))
    }

    /// Create a new secret
    pub fn create_secret(&self, new: NewSecret) -> Result<Secret, SecretsManagerError> {
        if !SECRET_NAME.is_match(&new.name) {
            return Err(SecretsManagerError::InvalidParameter(format!(
                "Invalid name: {}",
                new.name
            )));
        }
        new.value.validate()?;

        let now = Utc::now();
        let mut secret = Secret {
            arn: self.new_arn(&new.name),
            name: new.name.clone(),
            description: new.description,
            kms_key_id: new.kms_key_id,
            versions: HashMap::new(),
            current_version_id: None,
            previous_version_id: None,
            created_date: now,
            last_changed_date: now,
            last_accessed_date: None,
            deleted_date: None,
            resource_policy: None,
            tags: new.tags,
        };

        if !new.value.is_empty() {
            let version_id = new
                .client_request_token
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            secret.push_version(version_id, new.value, now)?;
        }

        match self.secrets.entry(new.name) {
            Entry::Occupied(entry) => Err(SecretsManagerError::ResourceExists(entry.key().clone())),
            Entry::Vacant(entry) => Ok(entry.insert(secret).clone()),
        }
    }

    /// Get a secret's metadata
    pub fn describe_secret(&self, secret_id: &str) -> Result<Secret, SecretsManagerError> {
        let name = self.resolve(secret_id)?;
        self.secrets
            .get(&name)
            .map(|s| s.clone())
            .ok_or(SecretsManagerError::ResourceNotFound(name))
    }

    /// Get secret value
    pub fn get_secret_value(
        &self,
        secret_id: &str,
        version_id: Option<&str>,
        version_stage: Option<&str>,
    ) -> Result<(Secret, SecretVersion), SecretsManagerError> {
        let name = self.resolve(secret_id)?;
        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.ensure_not_deleted()?;

        let version_id = if let Some(vid) = version_id {
            vid.to_string()
        } else {
            let stage = version_stage.unwrap_or(STAGE_CURRENT);
            match stage {
                STAGE_CURRENT => secret.current_version_id.clone(),
                STAGE_PREVIOUS => secret.previous_version_id.clone(),
                _ => secret
                    .versions
                    .values()
                    .find(|v| v.version_stages.iter().any(|s| s == stage))
                    .map(|v| v.version_id.clone()),
            }
            .ok_or_else(|| {
                SecretsManagerError::ResourceNotFound(format!(
                    "{} has no version with stage {}",
                    secret.name, stage
                ))
            })?
        };

        let version = secret.versions.get(&version_id).cloned().ok_or_else(|| {
            SecretsManagerError::ResourceNotFound(format!("Version {} not found", version_id))
        })?;

        if let Some(stage) = version_stage {
            if !version.version_stages.iter().any(|s| s == stage) {
                return Err(SecretsManagerError::InvalidRequest(format!(
                    "Version {} does not have stage {}",
                    version_id, stage
                )));
            }
        }

        secret.last_accessed_date = Some(Utc::now());

        Ok((secret.clone(), version))
    }

    /// Put a new secret value
    pub fn put_secret_value(
        &self,
        secret_id: &str,
        value: SecretValue,
        client_request_token: Option<String>,
    ) -> Result<(Secret, SecretVersion), SecretsManagerError> {
        value.validate()?;
        if value.is_empty() {
            return Err(SecretsManagerError::InvalidParameter(
                "You must provide either SecretString or SecretBinary.".to_string(),
            ));
        }

        let name = self.resolve(secret_id)?;
        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.ensure_not_deleted()?;

        let version = secret.add_version(client_request_token, value, Utc::now())?;

        Ok((secret.clone(), version))
    }

    /// Update metadata, and the value when one is given
    pub fn update_secret(
        &self,
        secret_id: &str,
        update: SecretUpdate,
    ) -> Result<(Secret, Option<SecretVersion>), SecretsManagerError> {
        update.value.validate()?;

        let name = self.resolve(secret_id)?;
        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.ensure_not_deleted()?;

        let now = Utc::now();
        // Version first, so a rejected retry leaves the metadata untouched
        let version = if update.value.is_empty() {
            None
        } else {
            Some(secret.add_version(update.client_request_token, update.value, now)?)
        };

        if let Some(description) = update.description {
            secret.description = Some(description);
        }
        if let Some(kms_key_id) = update.kms_key_id {
            secret.kms_key_id = Some(kms_key_id);
        }
        secret.last_changed_date = now;

        Ok((secret.clone(), version))
    }

    /// Delete a secret, immediately or after a recovery window
    pub fn delete_secret(
        &self,
        secret_id: &str,
        force_delete: bool,
        recovery_window_in_days: Option<i64>,
    ) -> Result<Secret, SecretsManagerError> {
        if force_delete && recovery_window_in_days.is_some() {
            return Err(SecretsManagerError::InvalidParameter(
                "You can't use ForceDeleteWithoutRecovery in conjunction with RecoveryWindowInDays."
                    .to_string(),
            ));
        }

        let name = self.resolve(secret_id)?;

        if force_delete {
            return self
                .secrets
                .remove(&name)
                .map(|(_, mut s)| {
                    s.deleted_date = Some(Utc::now());
                    s
                })
                .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()));
        }

        let days = recovery_window_in_days.unwrap_or(DEFAULT_RECOVERY_WINDOW_DAYS);
        if !(MIN_RECOVERY_WINDOW_DAYS..=DEFAULT_RECOVERY_WINDOW_DAYS).contains(&days) {
            return Err(SecretsManagerError::InvalidParameter(format!(
                "RecoveryWindowInDays must be between {} and {} days",
                MIN_RECOVERY_WINDOW_DAYS, DEFAULT_RECOVERY_WINDOW_DAYS
            )));
        }

        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.ensure_not_deleted()?;
        secret.deleted_date = Some(Utc::now() + Duration::days(days));
        Ok(secret.clone())
    }

    /// Cancel a scheduled deletion
    pub fn restore_secret(&self, secret_id: &str) -> Result<Secret, SecretsManagerError> {
        let name = self.resolve(secret_id)?;
        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.deleted_date = None;
        Ok(secret.clone())
    }

    /// List secrets ordered by name
    pub fn list_secrets(&self, include_planned_deletion: bool) -> Vec<Secret> {
        let mut secrets: Vec<Secret> = self
            .secrets
            .iter()
            .filter(|s| include_planned_deletion || !s.is_scheduled_for_deletion())
            .map(|r| r.value().clone())
            .collect();
        secrets.sort_by(|a, b| a.name.cmp(&b.name));
        secrets
    }

    /// Attach a resource policy. The document must be a JSON object.
    pub fn put_resource_policy(
        &self,
        secret_id: &str,
        policy: String,
    ) -> Result<Secret, SecretsManagerError> {
        match serde_json::from_str::<serde_json::Value>(&policy) {
            Ok(serde_json::Value::Object(_)) => {}
            Ok(_) => {
                return Err(SecretsManagerError::MalformedPolicyDocument(
                    "The policy document must be a JSON object".to_string(),
                ))
            }
            Err(e) => return Err(SecretsManagerError::MalformedPolicyDocument(e.to_string())),
        }

        let name = self.resolve(secret_id)?;
        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.ensure_not_deleted()?;
        secret.resource_policy = Some(policy);
        Ok(secret.clone())
    }

    pub fn get_resource_policy(&self, secret_id: &str) -> Result<Secret, SecretsManagerError> {
        self.describe_secret(secret_id)
    }

    pub fn delete_resource_policy(&self, secret_id: &str) -> Result<Secret, SecretsManagerError> {
        let name = self.resolve(secret_id)?;
        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.resource_policy = None;
        Ok(secret.clone())
    }

    pub fn tag_resource(
        &self,
        secret_id: &str,
        tags: HashMap<String, String>,
    ) -> Result<(), SecretsManagerError> {
        let name = self.resolve(secret_id)?;
        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.tags.extend(tags);
        Ok(())
    }

    pub fn untag_resource(
        &self,
        secret_id: &str,
        keys: &[String],
    ) -> Result<(), SecretsManagerError> {
        let name = self.resolve(secret_id)?;
        let mut secret = self
            .secrets
            .get_mut(&name)
            .ok_or_else(|| SecretsManagerError::ResourceNotFound(secret_id.to_string()))?;
        secret.tags.retain(|k, _| !keys.contains(k));
        Ok(())
    }
}

/// `id` names the secret `arn` if it is the full ARN, or the ARN with the
/// random suffix removed (with or without the separating hyphen).
fn arn_matches(arn: &str, id: &str) -> bool {
    match arn.strip_prefix(id) {
        Some("") => true,
        Some(rest) if id.ends_with('-') => rest.len() == ARN_SUFFIX_LEN,
        Some(rest) => rest.len() == ARN_SUFFIX_LEN + 1 && rest.starts_with('-'),
        None => false,
    }
}

/// Secrets Manager errors
#[derive(Debug, thiserror::Error)]
pub enum SecretsManagerError {
    #[error("Secret already exists: {0}")]
    ResourceExists(String),

    #[error("Secrets Manager can't find the specified secret: {0}")]
    ResourceNotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Invalid next token: {0}")]
    InvalidNextToken(String),

    #[error("Malformed policy document: {0}")]
    MalformedPolicyDocument(String),
}

impl SecretsManagerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ResourceExists(_) => ErrorCode::ResourceExistsException,
            Self::ResourceNotFound(_) => ErrorCode::ResourceNotFoundException,
            Self::InvalidParameter(_) => ErrorCode::InvalidParameterException,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequestException,
            Self::InvalidNextToken(_) => ErrorCode::InvalidNextTokenException,
            Self::MalformedPolicyDocument(_) => ErrorCode::MalformedPolicyDocumentException,
        }
    }
}

impl From<SecretsManagerError> for AwsError {
    fn from(err: SecretsManagerError) -> Self {
        AwsError::new(err.code(), err.to_string())
    }
}

/// State for Secrets Manager handlers
pub struct SecretsManagerState {
    stores: StateStore<Arc<SecretsManagerStorage>>,
    defaults: AccountRegionKey,
}

impl SecretsManagerState {
    pub fn new() -> Self {
        Self::with_defaults(AccountRegionKey::default())
    }

    /// State whose unscoped requests land in `defaults`
    pub fn with_defaults(defaults: AccountRegionKey) -> Self {
        Self {
            stores: StateStore::new(),
            defaults,
        }
    }

    pub fn defaults(&self) -> &AccountRegionKey {
        &self.defaults
    }

    /// Storage for one account/region, created on first use
    pub fn storage(&self, scope: &AccountRegionKey) -> Arc<SecretsManagerStorage> {
        self.stores
            .get_or_create_with(scope, |key| {
                Arc::new(SecretsManagerStorage::new(key.clone()))
            })
            .clone()
    }

    /// Drop every secret in every scope
    pub fn reset(&self) {
        self.stores.clear();
    }
}

impl Default for SecretsManagerState {
    fn default() -> Self {
        Self::new()
    }
}
