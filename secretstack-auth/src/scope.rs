//! Request scope resolution
//!
//! Every request is served from the state of one account/region pair. The
//! pair comes from the SigV4 credential scope when there is one, and from
//! the server defaults otherwise.

use http::{header::AUTHORIZATION, HeaderMap};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use secretstack_core::AccountRegionKey;

use crate::sigv4::{parse_authorization_header, SigV4Error};

static REGION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d{1,2}$").expect("valid region pattern"));

/// Whether `region` looks like an AWS region name (`us-east-1`, `us-gov-west-1`, ...)
pub fn is_valid_region(region: &str) -> bool {
    REGION_PATTERN.is_match(region)
}

/// Resolve the account/region a request should be served from.
///
/// - no `Authorization` header: `defaults`
/// - empty region in the credential scope: default region
/// - 12 digit access key: used as the account id
/// - unparseable header or bad region name: error (reported to the caller as 400)
pub fn resolve_scope(
    headers: &HeaderMap,
    defaults: &AccountRegionKey,
) -> Result<AccountRegionKey, SigV4Error> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        debug!("No authorization header, using default scope {}", defaults);
        return Ok(defaults.clone());
    };

    let value = value.to_str().map_err(|_| SigV4Error::InvalidAuthFormat)?;
    let auth = parse_authorization_header(value)?;

    let region = if auth.region.is_empty() {
        debug!("Empty region in credential scope, using {}", defaults.region);
        defaults.region.clone()
    } else if is_valid_region(&auth.region) {
        auth.region
    } else {
        return Err(SigV4Error::InvalidRegion(auth.region));
    };

    let account_id = if auth.access_key.len() == 12
        && auth.access_key.bytes().all(|b| b.is_ascii_digit())
    {
        auth.access_key
    } else {
        defaults.account_id.clone()
    };

    Ok(AccountRegionKey::new(account_id, region))
}
