//! AWS authentication for SecretStack
//!
//! Implements AWS Signature Version 4 header parsing and signing, and
//! resolves the account/region scope a request targets.

pub mod scope;
pub mod sigv4;

pub use scope::{is_valid_region, resolve_scope};
pub use sigv4::{
    parse_authorization_header, sign_request, AuthorizationHeader, SigV4Error, SigningParams,
};
