use std::borrow::Cow;

use alloy::dyn_abi::Eip712Domain;
use alloy::signers::Signer;
use alloy::sol;
use alloy::sol_types::SolStruct as _;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::auth::{POLY_ADDRESS, POLY_NONCE, POLY_SIGNATURE, POLY_TIMESTAMP};
use crate::clob::order_builder::encode_signature;
use crate::types::{ChainId, U256};
use crate::{Result, Timestamp};

const DOMAIN_NAME: Option<Cow<'static, str>> = Some(Cow::Borrowed("ClobAuthDomain"));
const VERSION: Option<Cow<'static, str>> = Some(Cow::Borrowed("1"));

pub const MESSAGE: &str = "This message attests that I control the given wallet";

sol! {
    struct ClobAuth {
        address address;
        string timestamp;
        uint256 nonce;
        string message;
    }
}

/// Signs the `ClobAuth` attestation for the signer's own address.
pub async fn sign_clob_auth<S: Signer + Sync>(
    signer: &S,
    chain_id: ChainId,
    timestamp: Timestamp,
    nonce: u32,
) -> Result<String> {
    let auth = ClobAuth {
        address: signer.address(),
        timestamp: timestamp.to_string(),
        nonce: U256::from(nonce),
        message: MESSAGE.to_owned(),
    };
    let domain = Eip712Domain {
        name: DOMAIN_NAME,
        version: VERSION,
        chain_id: Some(U256::from(chain_id)),
        ..Eip712Domain::default()
    };

    let signature = signer.sign_hash(&auth.eip712_signing_hash(&domain)).await?;
    Ok(encode_signature(&signature))
}

pub async fn create_headers<S: Signer + Sync>(
    signer: &S,
    chain_id: ChainId,
    nonce: Option<u32>,
) -> Result<HeaderMap> {
    create_headers_at(signer, chain_id, Utc::now().timestamp(), nonce).await
}

pub async fn create_headers_at<S: Signer + Sync>(
    signer: &S,
    chain_id: ChainId,
    timestamp: Timestamp,
    nonce: Option<u32>,
) -> Result<HeaderMap> {
    let nonce = nonce.unwrap_or(0);
    let signature = sign_clob_auth(signer, chain_id, timestamp, nonce).await?;

    let mut map = HeaderMap::new();
    map.insert(
        POLY_ADDRESS,
        HeaderValue::from_str(&signer.address().to_checksum(None))?,
    );
    map.insert(POLY_SIGNATURE, HeaderValue::from_str(&signature)?);
    map.insert(POLY_TIMESTAMP, HeaderValue::from(timestamp));
    map.insert(POLY_NONCE, HeaderValue::from(nonce));

    Ok(map)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use alloy::signers::local::PrivateKeySigner;

    use super::*;
    use crate::{AMOY, POLYGON};

    const HARDHAT_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[tokio::test]
    async fn clob_auth_signature_vector() -> anyhow::Result<()> {
        let signer = PrivateKeySigner::from_str(HARDHAT_KEY)?;

        let signature = sign_clob_auth(&signer, AMOY, 10_000_000, 23).await?;
        assert_eq!(
            signature,
            "0xf62319a987514da40e57e2f4d7529f7bac38f0355bd88bb5adbb3768d80de6c1682518e0af677d5260366425f4361e7b70c25ae232aff0ab2331e2b164a1aedc1b"
        );

        let mainnet = sign_clob_auth(&signer, POLYGON, 10_000_000, 23).await?;
        assert_ne!(signature, mainnet);
        Ok(())
    }

    #[tokio::test]
    async fn headers_carry_checksummed_address() -> anyhow::Result<()> {
        let signer = PrivateKeySigner::from_str(HARDHAT_KEY)?;

        let headers = create_headers_at(&signer, AMOY, 10_000_000, Some(23)).await?;
        assert_eq!(
            headers[POLY_ADDRESS],
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert_eq!(headers[POLY_TIMESTAMP], "10000000");
        assert_eq!(headers[POLY_NONCE], "23");
        assert_eq!(
            headers[POLY_SIGNATURE],
            sign_clob_auth(&signer, AMOY, 10_000_000, 23).await?.as_str()
        );

        let headers = create_headers(&signer, POLYGON, None).await?;
        assert_eq!(headers[POLY_NONCE], "0");
        assert_eq!(headers.len(), 4);
        Ok(())
    }
}
