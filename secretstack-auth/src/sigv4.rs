//! AWS Signature Version 4 implementation

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use secretstack_core::{AwsError, ErrorCode};

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm understood by SecretStack
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Errors while handling a SigV4 authorization header
#[derive(Debug, Error)]
pub enum SigV4Error {
    #[error("Invalid authorization header format")]
    InvalidAuthFormat,

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Missing credential")]
    MissingCredential,

    #[error("Invalid credential format")]
    InvalidCredentialFormat,

    #[error("Missing signed headers")]
    MissingSignedHeaders,

    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid region in credential scope: {0}")]
    InvalidRegion(String),
}

impl From<SigV4Error> for AwsError {
    fn from(err: SigV4Error) -> Self {
        let code = match err {
            SigV4Error::InvalidRegion(_) => ErrorCode::InvalidSignature,
            _ => ErrorCode::IncompleteSignature,
        };
        AwsError::new(code, err.to_string())
    }
}

/// Parsed SigV4 authorization header
#[derive(Debug)]
pub struct AuthorizationHeader {
    pub algorithm: String,
    pub access_key: String,
    pub date: String,
    pub region: String,
    pub service: String,
    pub signed_headers: Vec<String>,
    pub signature: String,
}

/// Parse an AWS SigV4 authorization header
///
/// Format: AWS4-HMAC-SHA256 Credential=AKID/DATE/REGION/SERVICE/aws4_request,
///         SignedHeaders=host;x-amz-date, Signature=HEX
pub fn parse_authorization_header(header: &str) -> Result<AuthorizationHeader, SigV4Error> {
    let (algorithm, components) = header
        .trim()
        .split_once(' ')
        .ok_or(SigV4Error::InvalidAuthFormat)?;

    if algorithm != ALGORITHM {
        return Err(SigV4Error::UnsupportedAlgorithm(algorithm.to_string()));
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for component in components.split(',') {
        let Some((key, value)) = component.trim().split_once('=') else {
            continue;
        };

        match key {
            "Credential" => credential = Some(value),
            "SignedHeaders" => signed_headers = Some(value),
            "Signature" => signature = Some(value),
            _ => {}
        }
    }

    let credential = credential.ok_or(SigV4Error::MissingCredential)?;
    let credential_parts: Vec<&str> = credential.split('/').collect();
    if credential_parts.len() != 5 || credential_parts[4] != "aws4_request" {
        return Err(SigV4Error::InvalidCredentialFormat);
    }

    let signed_headers = signed_headers.ok_or(SigV4Error::MissingSignedHeaders)?;
    let signature = signature.ok_or(SigV4Error::MissingSignature)?;

    Ok(AuthorizationHeader {
        algorithm: algorithm.to_string(),
        access_key: credential_parts[0].to_string(),
        date: credential_parts[1].to_string(),
        region: credential_parts[2].to_string(),
        service: credential_parts[3].to_string(),
        signed_headers: signed_headers.split(';').map(String::from).collect(),
        signature: signature.to_string(),
    })
}

/// Inputs for signing a request
#[derive(Debug, Clone)]
pub struct SigningParams<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    /// May be empty, which produces a credential scope without a region
    pub region: &'a str,
    pub service: &'a str,
    pub timestamp: DateTime<Utc>,
}

impl SigningParams<'_> {
    /// `X-Amz-Date` value for this signature
    pub fn amz_date(&self) -> String {
        self.timestamp.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn short_date(&self) -> String {
        self.timestamp.format("%Y%m%d").to_string()
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.short_date(),
            self.region,
            self.service
        )
    }
}

/// Compute the `Authorization` header value for a request.
///
/// Every entry of `headers` is signed, so callers pass exactly the headers
/// they send (including `host` and `x-amz-date`).
pub fn sign_request(
    params: &SigningParams<'_>,
    method: &str,
    path: &str,
    query_string: &str,
    headers: &[(String, String)],
    payload: &[u8],
) -> String {
    let mut signed_headers: Vec<String> = headers.iter().map(|(k, _)| k.to_lowercase()).collect();
    signed_headers.sort();
    signed_headers.dedup();

    let payload_hash = hex::encode(Sha256::digest(payload));
    let canonical_request = create_canonical_request(
        method,
        path,
        query_string,
        headers,
        &signed_headers,
        &payload_hash,
    );

    let scope = params.scope();
    let string_to_sign =
        create_string_to_sign(ALGORITHM, &params.amz_date(), &scope, &canonical_request);
    let signing_key = derive_signing_key(
        params.secret_key,
        &params.short_date(),
        params.region,
        params.service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        params.access_key,
        scope,
        signed_headers.join(";"),
        signature
    )
}

/// Sign a string using HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the signing key
fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Create the canonical request string
fn create_canonical_request(
    method: &str,
    path: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers: &[String],
    payload_hash: &str,
) -> String {
    let canonical_headers: String = signed_headers
        .iter()
        .filter_map(|h| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(h))
                .map(|(k, v)| format!("{}:{}\n", k.to_lowercase(), v.trim()))
        })
        .collect();

    let signed_headers_str = signed_headers.join(";");

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, path, query_string, canonical_headers, signed_headers_str, payload_hash
    )
}

/// Create the string to sign
fn create_string_to_sign(
    algorithm: &str,
    timestamp: &str,
    scope: &str,
    canonical_request: &str,
) -> String {
    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{}\n{}\n{}\n{}", algorithm, timestamp, scope, canonical_hash)
}
