use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use chrono::Utc;
use hmac::{Hmac, Mac as _};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret as _;
use sha2::Sha256;

use crate::auth::{
    Authenticated, POLY_ADDRESS, POLY_API_KEY, POLY_PASSPHRASE, POLY_SIGNATURE, POLY_TIMESTAMP,
};
use crate::error::{Authentication, Error};
use crate::{Result, Timestamp};

type HmacSha256 = Hmac<Sha256>;

/// `base64url(HMAC-SHA256(base64url_decode(secret), timestamp ∥ method ∥ path ∥ body))`
pub fn hmac_signature(
    secret: &str,
    timestamp: Timestamp,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<String> {
    let key = URL_SAFE
        .decode(secret)
        .map_err(|e| Authentication::InvalidSecretEncoding(e.to_string()))?;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| Error::validation(format!("invalid hmac key: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body);

    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// `body` must be the exact bytes that go on the wire.
pub fn create_headers(
    auth: &Authenticated,
    method: &Method,
    path: &str,
    body: &[u8],
) -> Result<HeaderMap> {
    create_headers_at(auth, method, path, body, Utc::now().timestamp())
}

pub fn create_headers_at(
    auth: &Authenticated,
    method: &Method,
    path: &str,
    body: &[u8],
    timestamp: Timestamp,
) -> Result<HeaderMap> {
    let credentials = &auth.credentials;
    let signature = hmac_signature(
        credentials.secret().expose_secret(),
        timestamp,
        method.as_str(),
        path,
        body,
    )?;

    let mut map = HeaderMap::new();
    map.insert(
        POLY_ADDRESS,
        HeaderValue::from_str(&auth.address.to_checksum(None))?,
    );
    map.insert(POLY_SIGNATURE, HeaderValue::from_str(&signature)?);
    map.insert(POLY_TIMESTAMP, HeaderValue::from(timestamp));
    map.insert(
        POLY_API_KEY,
        HeaderValue::from_str(&credentials.key().to_string())?,
    );

    let mut passphrase = HeaderValue::from_str(credentials.passphrase().expose_secret())?;
    passphrase.set_sensitive(true);
    map.insert(POLY_PASSPHRASE, passphrase);

    Ok(map)
}
