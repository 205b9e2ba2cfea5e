//! AWS Secrets Manager emulation for SecretStack
//!
//! Provides in-memory secrets storage, scoped per account and region, with support for:
//! - CreateSecret, GetSecretValue, PutSecretValue, UpdateSecret
//! - DeleteSecret, RestoreSecret, DescribeSecret, ListSecrets
//! - Put/Get/DeleteResourcePolicy, TagResource, UntagResource
//! - GetRandomPassword
//! - Secret versioning (AWSCURRENT, AWSPREVIOUS)

pub mod handlers;
pub mod password;
mod storage;

pub use handlers::{error_response, handle_request};
pub use password::PasswordPolicy;
pub use storage::{
    NewSecret, Secret, SecretUpdate, SecretValue, SecretVersion, SecretsManagerError,
    SecretsManagerState, SecretsManagerStorage, ARN_SUFFIX_LEN, STAGE_CURRENT, STAGE_PREVIOUS,
};
