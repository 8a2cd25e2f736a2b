use std::str::FromStr as _;
use std::time::Duration;

use bon::Builder;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Result;
use crate::clob::types::{SignatureType, SignatureTypeInput};
use crate::error::Error;
use crate::transport::RetryPolicy;
use crate::types::{Address, ChainId};
use crate::{AMOY, POLYGON};

pub const DEFAULT_HOST: &str = "https://clob.polymarket.com";
pub const DEFAULT_WS_ENDPOINT: &str = "wss://ws-subscriptions-clob.polymarket.com";

/// Raw signing values typically passed from app-level bot config.
#[derive(Clone, Debug)]
pub struct RawSigningConfig {
    pub private_key: SecretString,
    pub signature_type: String,
    /// Empty means "sign for the key's own address".
    pub funder: String,
}

/// Client configuration.
///
/// Everything except the signing key has a usable default, so
/// `Config::builder().build()` yields a read-only Polygon mainnet client.
#[derive(Clone, Debug, Builder)]
pub struct Config {
    #[builder(into, default = DEFAULT_HOST.to_owned())]
    pub host: String,
    #[builder(default = POLYGON)]
    pub chain_id: ChainId,
    pub private_key: Option<SecretString>,
    /// Address reported in auth headers instead of the key's own address.
    pub address: Option<Address>,
    /// Maker address for proxy and Safe wallets.
    pub funder: Option<Address>,
    #[builder(default)]
    pub signature_type: SignatureType,
    #[builder(default)]
    pub retry: RetryPolicy,
    /// Tick sizes older than this are refetched; `None` caches forever.
    pub tick_size_ttl: Option<Duration>,
    #[builder(into, default = DEFAULT_WS_ENDPOINT.to_owned())]
    pub ws_endpoint: String,
    /// Parent scope for in-flight requests and streaming connections.
    #[builder(default)]
    pub cancellation: CancellationToken,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    pub fn from_raw(host: &str, chain_id: ChainId, raw: RawSigningConfig) -> Result<Self> {
        let signature_type =
            SignatureTypeInput::from_str(&raw.signature_type)?.into_signature_type();
        let funder = match raw.funder.trim() {
            "" => None,
            funder => Some(
                Address::from_str(funder)
                    .map_err(|e| Error::validation(format!("invalid funder address: {e}")))?,
            ),
        };

        let config = Config::builder()
            .host(host)
            .chain_id(chain_id)
            .private_key(raw.private_key)
            .maybe_funder(funder)
            .signature_type(signature_type)
            .build();
        config.validate()?;

        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        Url::parse(&self.host)?;

        if !matches!(self.chain_id, POLYGON | AMOY) {
            return Err(Error::unsupported_chain(self.chain_id));
        }

        match (self.signature_type, self.funder) {
            (SignatureType::Eoa, Some(_)) => Err(Error::validation(
                "Cannot have a funder address with an Eoa signature type",
            )),
            (SignatureType::Proxy | SignatureType::GnosisSafe, None) => Err(Error::validation(
                "proxy signatures require a funder address",
            )),
            (_, Some(funder)) if funder == Address::ZERO => Err(Error::validation(
                "Cannot have a zero funder address with a proxy signature type",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Kind;
    use crate::types::address;

    fn raw(signature_type: &str, funder: &str) -> RawSigningConfig {
        RawSigningConfig {
            private_key: SecretString::from(
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            ),
            signature_type: signature_type.to_owned(),
            funder: funder.to_owned(),
        }
    }

    #[test]
    fn builder_defaults() {
        let config = Config::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.chain_id, POLYGON);
        assert_eq!(config.signature_type, SignatureType::Eoa);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.private_key.is_none());
        assert!(config.tick_size_ttl.is_none());
        assert!(!config.cancellation.is_cancelled());
    }

    #[test]
    fn from_raw_parses_aliases() -> anyhow::Result<()> {
        let config = Config::from_raw(
            DEFAULT_HOST,
            POLYGON,
            raw(" Gnosis_Safe ", "0x1111111111111111111111111111111111111111"),
        )?;
        assert_eq!(config.signature_type, SignatureType::GnosisSafe);
        assert_eq!(
            config.funder,
            Some(address!("0x1111111111111111111111111111111111111111"))
        );

        let config = Config::from_raw(DEFAULT_HOST, AMOY, raw("eoa", ""))?;
        assert_eq!(config.signature_type, SignatureType::Eoa);
        assert!(config.funder.is_none());
        Ok(())
    }

    #[test]
    fn from_raw_rejects_bad_input() {
        let err = Config::from_raw(DEFAULT_HOST, POLYGON, raw("ledger", "")).unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);

        let err = Config::from_raw(DEFAULT_HOST, POLYGON, raw("proxy", "0x12")).unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);

        let err = Config::from_raw(DEFAULT_HOST, POLYGON, raw("proxy", "")).unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);

        let err = Config::from_raw(DEFAULT_HOST, 1, raw("eoa", "")).unwrap_err();
        assert_eq!(err.kind(), Kind::Configuration);

        let err = Config::from_raw("not a url", POLYGON, raw("eoa", "")).unwrap_err();
        assert_eq!(err.kind(), Kind::Configuration);
    }
}
