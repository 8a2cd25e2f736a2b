//! Request authentication at the three trust levels the exchange accepts.
//!
//! | Level | Proof                          | Used for                         |
//! |-------|--------------------------------|----------------------------------|
//! | L0    | none                           | public market data               |
//! | L1    | EIP-712 `ClobAuth` signature   | creating/deriving API keys       |
//! | L2    | HMAC-SHA256 with the API secret| order entry and account queries  |

pub mod l1;
pub mod l2;

use reqwest::header::{HeaderMap, HeaderName};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use uuid::Uuid;

use crate::types::Address;

pub type ApiKey = Uuid;

pub const POLY_ADDRESS: HeaderName = HeaderName::from_static("poly_address");
pub const POLY_SIGNATURE: HeaderName = HeaderName::from_static("poly_signature");
pub const POLY_TIMESTAMP: HeaderName = HeaderName::from_static("poly_timestamp");
pub const POLY_NONCE: HeaderName = HeaderName::from_static("poly_nonce");
pub const POLY_API_KEY: HeaderName = HeaderName::from_static("poly_api_key");
pub const POLY_PASSPHRASE: HeaderName = HeaderName::from_static("poly_passphrase");

/// L2 API credentials as returned by `/auth/api-key` and `/auth/derive-api-key`.
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    #[serde(rename = "apiKey")]
    key: ApiKey,
    secret: SecretString,
    passphrase: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(key: ApiKey, secret: SecretString, passphrase: SecretString) -> Self {
        Self {
            key,
            secret,
            passphrase,
        }
    }

    #[must_use]
    pub fn key(&self) -> ApiKey {
        self.key
    }

    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    #[must_use]
    pub fn passphrase(&self) -> &SecretString {
        &self.passphrase
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.secret.expose_secret() == other.secret.expose_secret()
            && self.passphrase.expose_secret() == other.passphrase.expose_secret()
    }
}

/// Address and credentials an L2 request is signed with.
#[derive(Clone, Debug)]
pub struct Authenticated {
    pub address: Address,
    pub credentials: Credentials,
}

#[must_use]
pub fn l0_headers() -> HeaderMap {
    HeaderMap::new()
}
