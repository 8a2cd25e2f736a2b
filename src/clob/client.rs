use std::str::FromStr as _;
use std::sync::Arc;

use alloy::signers::Signer as _;
use alloy::signers::local::PrivateKeySigner;
use futures::Stream;
use secrecy::ExposeSecret as _;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{self, Authenticated, Credentials, l1, l2};
use crate::clob::cache::MetadataCache;
use crate::clob::order_builder::{self, Amounts};
use crate::clob::pagination::{Page, paginate};
use crate::clob::types::{
    CancelOrdersResponse, LimitOrderRequest, MarketOrderRequest, OpenOrder, OpenOrderParams,
    OrderBookSummary, OrderOverrides, OrderType, PostOrderRequest, PostOrderResponse,
    PostOrdersArgs, Side, SignatureType, SignedOrder, TickSize,
};
use crate::config::Config;
use crate::error::{Error, Validation};
use crate::transport::{Request, Response, Transport};
use crate::types::{Address, ChainId, Decimal, U256};
use crate::{Result, Timestamp};

#[derive(Deserialize)]
struct TickSizeResponse {
    minimum_tick_size: TickSize,
}

#[derive(Deserialize)]
struct NegRiskResponse {
    #[serde(default)]
    neg_risk: bool,
}

#[derive(Deserialize)]
struct FeeRateResponse {
    #[serde(default)]
    base_fee: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// Everything needed to sign an order once amounts are known.
struct Draft<'a> {
    token_id: &'a str,
    side: Side,
    amounts: Amounts,
    fee_rate_bps: u32,
    nonce: u64,
    expiration: u64,
    taker: Option<Address>,
    neg_risk: bool,
}

/// CLOB REST client.
///
/// Public market data works without a key. Order creation needs a signing key
/// and order entry additionally needs L2 credentials from [`Client::authenticate`]
/// or [`Client::with_credentials`].
#[derive(Clone, Debug)]
pub struct Client {
    chain_id: ChainId,
    signer: Option<PrivateKeySigner>,
    address: Option<Address>,
    funder: Option<Address>,
    signature_type: SignatureType,
    transport: Transport,
    cache: Arc<MetadataCache>,
    auth: Option<Authenticated>,
    cancel: CancellationToken,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let signer = config
            .private_key
            .as_ref()
            .map(|key| {
                PrivateKeySigner::from_str(key.expose_secret())
                    .map_err(|e| Error::validation(format!("invalid private key: {e}")))
                    .map(|signer| signer.with_chain_id(Some(config.chain_id)))
            })
            .transpose()?;

        let transport = Transport::new(Url::parse(&config.host)?, config.retry)?;

        Ok(Self {
            chain_id: config.chain_id,
            signer,
            address: config.address,
            funder: config.funder,
            signature_type: config.signature_type,
            transport,
            cache: Arc::new(MetadataCache::new(config.tick_size_ttl)),
            auth: None,
            cancel: config.cancellation,
        })
    }

    /// Replaces the scope in-flight requests are cancelled with.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Uses already issued L2 credentials instead of creating or deriving them.
    pub fn with_credentials(mut self, credentials: Credentials) -> Result<Self> {
        let address = self.address()?;
        self.auth = Some(Authenticated {
            address,
            credentials,
        });
        Ok(self)
    }

    /// Creates API credentials, or derives the existing ones, and switches to L2.
    pub async fn authenticate(self) -> Result<Self> {
        let credentials = self.create_or_derive_api_key(None).await?;
        self.with_credentials(credentials)
    }

    /// Address reported in auth headers.
    pub fn address(&self) -> Result<Address> {
        match (self.address, &self.signer) {
            (Some(address), _) => Ok(address),
            (None, Some(signer)) => Ok(signer.address()),
            (None, None) => Err(Error::authentication(
                "an address or signing key is required",
            )),
        }
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.auth.as_ref().map(|auth| &auth.credentials)
    }

    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    #[must_use]
    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub async fn server_time(&self) -> Result<Timestamp> {
        self.send(Request::get("/time")).await?.json()
    }

    /// Fetches the book and refreshes the cached tick size for its asset.
    pub async fn order_book(&self, token_id: &str) -> Result<OrderBookSummary> {
        let book: OrderBookSummary = self
            .send(Request::get("/book").query("token_id", token_id))
            .await?
            .json()?;

        if !book.asset_id.is_empty() {
            if let Ok(tick_size) = book.tick_size.parse::<TickSize>() {
                self.cache.set_tick_size(&book.asset_id, tick_size);
            }
        }

        Ok(book)
    }

    pub async fn tick_size(&self, token_id: &str) -> Result<TickSize> {
        if let Some(tick_size) = self.cache.tick_size(token_id) {
            return Ok(tick_size);
        }

        let response: TickSizeResponse = self
            .send(Request::get("/tick-size").query("token_id", token_id))
            .await?
            .json()?;
        self.cache
            .set_tick_size(token_id, response.minimum_tick_size);

        Ok(response.minimum_tick_size)
    }

    pub async fn neg_risk(&self, token_id: &str) -> Result<bool> {
        if let Some(neg_risk) = self.cache.neg_risk(token_id) {
            return Ok(neg_risk);
        }

        let response: NegRiskResponse = self
            .send(Request::get("/neg-risk").query("token_id", token_id))
            .await?
            .json()?;
        self.cache.set_neg_risk(token_id, response.neg_risk);

        Ok(response.neg_risk)
    }

    pub async fn fee_rate_bps(&self, token_id: &str) -> Result<u32> {
        if let Some(fee_rate_bps) = self.cache.fee_rate_bps(token_id) {
            return Ok(fee_rate_bps);
        }

        let response: FeeRateResponse = self
            .send(Request::get("/fee-rate").query("token_id", token_id))
            .await?
            .json()?;
        self.cache.set_fee_rate_bps(token_id, response.base_fee);

        Ok(response.base_fee)
    }

    /// Drops the cached tick size for `token_id`, or every cached tick size.
    pub fn clear_tick_size_cache(&self, token_id: Option<&str>) {
        match token_id {
            Some(token_id) => self.cache.invalidate_tick_size(token_id),
            None => self.cache.clear_tick_sizes(),
        }
    }

    pub async fn create_api_key(&self, nonce: Option<u32>) -> Result<Credentials> {
        let headers = l1::create_headers(self.signer()?, self.chain_id, nonce).await?;
        self.send(Request::post("/auth/api-key").headers(headers))
            .await?
            .json()
    }

    pub async fn derive_api_key(&self, nonce: Option<u32>) -> Result<Credentials> {
        let headers = l1::create_headers(self.signer()?, self.chain_id, nonce).await?;
        self.send(Request::get("/auth/derive-api-key").headers(headers))
            .await?
            .json()
    }

    /// Creating fails with a status error once a key exists for the nonce; that
    /// key is then derived instead.
    pub async fn create_or_derive_api_key(&self, nonce: Option<u32>) -> Result<Credentials> {
        match self.create_api_key(nonce).await {
            Ok(credentials) => Ok(credentials),
            Err(err) if err.status().is_some() => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %err, "api key creation rejected, deriving instead");
                self.derive_api_key(nonce).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn create_order(&self, request: &LimitOrderRequest) -> Result<SignedOrder> {
        self.create_order_with_overrides(request, OrderOverrides::default())
            .await
    }

    /// Builds and signs a limit order. Overrides skip the matching metadata lookups.
    pub async fn create_order_with_overrides(
        &self,
        request: &LimitOrderRequest,
        overrides: OrderOverrides,
    ) -> Result<SignedOrder> {
        self.signer()?;

        let tick_size = match overrides.tick_size {
            Some(tick_size) => tick_size,
            None => self.tick_size(&request.token_id).await?,
        };
        order_builder::validate_price(request.price, tick_size.as_str())?;

        let neg_risk = match overrides.neg_risk {
            Some(neg_risk) => neg_risk,
            None => self.neg_risk(&request.token_id).await?,
        };
        let fee_rate_bps = self
            .resolve_fee_rate_bps(&request.token_id, request.fee_rate_bps)
            .await?;

        let amounts = order_builder::compute_limit_amounts(
            request.side,
            request.price,
            request.size,
            tick_size.as_str(),
        )?;
        let expiration = match request.expiration {
            Some(expiration) => u64::try_from(expiration.timestamp()).map_err(|e| {
                Error::validation(format!(
                    "Unable to represent expiration {expiration} as a u64: {e}"
                ))
            })?,
            None => 0,
        };

        self.sign(Draft {
            token_id: &request.token_id,
            side: request.side,
            amounts,
            fee_rate_bps,
            nonce: request.nonce,
            expiration,
            taker: request.taker,
            neg_risk,
        })
        .await
    }

    /// Builds and signs a market order, pricing it from the book when no
    /// positive price is given.
    pub async fn create_market_order(&self, request: &MarketOrderRequest) -> Result<SignedOrder> {
        self.signer()?;

        let tick_size = self.tick_size(&request.token_id).await?;
        let price = match request.price {
            Some(price) if price > Decimal::ZERO => price,
            _ => {
                self.calculate_market_price(
                    &request.token_id,
                    request.side,
                    request.amount,
                    request.order_type,
                )
                .await?
            }
        };
        order_builder::validate_price(price, tick_size.as_str())?;

        let neg_risk = self.neg_risk(&request.token_id).await?;
        let fee_rate_bps = self
            .resolve_fee_rate_bps(&request.token_id, request.fee_rate_bps)
            .await?;

        let amounts = order_builder::compute_market_amounts(
            request.side,
            request.amount,
            price,
            tick_size.as_str(),
        )?;

        self.sign(Draft {
            token_id: &request.token_id,
            side: request.side,
            amounts,
            fee_rate_bps,
            nonce: request.nonce,
            expiration: 0,
            taker: request.taker,
            neg_risk,
        })
        .await
    }

    /// Worst price needed to fill `amount` against the current book.
    ///
    /// Buys walk the asks summing notional, sells walk the bids summing shares,
    /// both from the best level. A book too thin to fill is a "no match" for
    /// FOK and the worst level's price otherwise.
    pub async fn calculate_market_price(
        &self,
        token_id: &str,
        side: Side,
        amount: Decimal,
        order_type: OrderType,
    ) -> Result<Decimal> {
        let book = self.order_book(token_id).await?;
        market_price(&book, side, amount, order_type)
    }

    pub async fn post_order(
        &self,
        order: &SignedOrder,
        order_type: OrderType,
        post_only: bool,
    ) -> Result<PostOrderResponse> {
        validate_submission(order, order_type, post_only)?;

        let body = PostOrderRequest {
            order: order.clone(),
            owner: self.owner()?,
            order_type,
            post_only,
            defer_exec: None,
        };

        self.send_l2(Request::post("/order").json(&body)?)
            .await?
            .json()
    }

    /// Submits a batch. Entries without their own `post_only` use `post_only`.
    pub async fn post_orders(
        &self,
        orders: &[PostOrdersArgs],
        defer_exec: bool,
        post_only: bool,
    ) -> Result<Vec<PostOrderResponse>> {
        let owner = self.owner()?;
        let body = orders
            .iter()
            .map(|args| {
                let post_only = args.post_only.unwrap_or(post_only);
                validate_submission(&args.order, args.order_type, post_only)?;
                Ok(PostOrderRequest {
                    order: args.order.clone(),
                    owner: owner.clone(),
                    order_type: args.order_type,
                    post_only,
                    defer_exec: Some(defer_exec),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let response: OneOrMany<PostOrderResponse> = self
            .send_l2(Request::post("/orders").json(&body)?)
            .await?
            .json()?;

        Ok(match response {
            OneOrMany::Many(responses) => responses,
            OneOrMany::One(response) => vec![response],
        })
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<CancelOrdersResponse> {
        let body = json!({ "orderID": order_id });
        self.send_l2(Request::delete("/order").json(&body)?)
            .await?
            .json()
    }

    pub async fn cancel_all(&self) -> Result<CancelOrdersResponse> {
        self.send_l2(Request::delete("/cancel-all")).await?.json()
    }

    /// Lazily pages through the caller's resting orders.
    pub fn open_orders(
        &self,
        params: OpenOrderParams,
    ) -> impl Stream<Item = Result<OpenOrder>> + '_ {
        paginate(move |cursor: String| {
            let mut request = Request::get("/data/orders");
            for (key, value) in [
                ("id", &params.id),
                ("market", &params.market),
                ("asset_id", &params.asset_id),
            ] {
                if let Some(value) = value {
                    request = request.query(key, value.as_str());
                }
            }
            if !cursor.is_empty() {
                request = request.query("next_cursor", cursor);
            }

            async move {
                let page: Page<OpenOrder> = self.send_l2(request).await?.json()?;
                Ok(page)
            }
        })
    }

    /// The market's quoted fee wins; a different non-zero user fee is rejected.
    async fn resolve_fee_rate_bps(&self, token_id: &str, provided: u32) -> Result<u32> {
        let required = self.fee_rate_bps(token_id).await?;
        resolve_fee_rate(provided, required)
    }

    async fn sign(&self, draft: Draft<'_>) -> Result<SignedOrder> {
        let signer = self.signer()?;
        let token_id = U256::from_str(draft.token_id)
            .map_err(|e| Error::validation(format!("invalid token id {}: {e}", draft.token_id)))?;

        let mut order = SignedOrder {
            salt: order_builder::generate_salt(),
            maker: self.funder.unwrap_or(self.address()?),
            signer: signer.address(),
            taker: draft.taker.unwrap_or(Address::ZERO),
            token_id,
            maker_amount: draft.amounts.maker_u256()?,
            taker_amount: draft.amounts.taker_u256()?,
            expiration: draft.expiration,
            nonce: draft.nonce,
            fee_rate_bps: draft.fee_rate_bps,
            side: draft.side,
            signature_type: self.signature_type,
            signature: String::new(),
        };
        order.signature =
            order_builder::sign_order(&order.order(), self.chain_id, draft.neg_risk, signer)
                .await?;

        Ok(order)
    }

    fn signer(&self) -> Result<&PrivateKeySigner> {
        self.signer
            .as_ref()
            .ok_or_else(|| Error::authentication("signer key required for this operation"))
    }

    fn authenticated(&self) -> Result<&Authenticated> {
        self.auth.as_ref().ok_or_else(|| {
            Error::authentication("L2 credentials required; call `authenticate` first")
        })
    }

    fn owner(&self) -> Result<String> {
        Ok(self.authenticated()?.credentials.key().to_string())
    }

    async fn send(&self, request: Request) -> Result<Response> {
        let request = request.headers(auth::l0_headers());
        self.transport.execute(&request, &self.cancel).await
    }

    /// Signs the path and the exact body bytes that will be sent.
    async fn send_l2(&self, request: Request) -> Result<Response> {
        let auth = self.authenticated()?;
        let headers = l2::create_headers(auth, &request.method, &request.path, request.body_bytes())?;
        let request = request.headers(headers);

        self.transport.execute(&request, &self.cancel).await
    }
}

fn validate_submission(order: &SignedOrder, order_type: OrderType, post_only: bool) -> Result<()> {
    if post_only && !matches!(order_type, OrderType::GTC | OrderType::GTD) {
        return Err(Error::validation(
            "postOnly is only supported for GTC and GTD orders",
        ));
    }
    if order.expiration != 0 && order_type != OrderType::GTD {
        return Err(Error::validation(
            "Only GTD orders may have a non-zero expiration",
        ));
    }
    Ok(())
}

fn resolve_fee_rate(provided: u32, required: u32) -> Result<u32> {
    if required > 0 && provided > 0 && provided != required {
        return Err(Validation::FeeRateMismatch { provided, required }.into());
    }
    Ok(if required > 0 { required } else { provided })
}

fn market_price(
    book: &OrderBookSummary,
    side: Side,
    amount: Decimal,
    order_type: OrderType,
) -> Result<Decimal> {
    let levels = match side {
        Side::Buy => &book.asks,
        Side::Sell => &book.bids,
        other => return Err(Validation::InvalidSide(other.to_string()).into()),
    };
    let Some(worst) = levels.first() else {
        return Err(no_match());
    };

    let mut filled = Decimal::ZERO;
    for level in levels.iter().rev() {
        filled += match side {
            Side::Buy => level.size * level.price,
            _ => level.size,
        };
        if filled >= amount {
            return Ok(level.price);
        }
    }

    if order_type == OrderType::FOK {
        return Err(no_match());
    }
    Ok(worst.price)
}

fn no_match() -> Error {
    Error::validation("no match")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::types::PriceLevel;
    use crate::types::dec;

    fn book(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> OrderBookSummary {
        let levels = |levels: &[(Decimal, Decimal)]| {
            levels
                .iter()
                .map(|&(price, size)| PriceLevel { price, size })
                .collect()
        };
        OrderBookSummary {
            market: String::new(),
            asset_id: "1".to_owned(),
            timestamp: String::new(),
            bids: levels(bids),
            asks: levels(asks),
            min_order_size: String::new(),
            neg_risk: false,
            tick_size: "0.01".to_owned(),
            last_trade_price: String::new(),
            hash: String::new(),
        }
    }

    #[test]
    fn buy_walks_asks_by_notional() -> anyhow::Result<()> {
        let book = book(
            &[],
            &[
                (dec!(0.6), dec!(100)),
                (dec!(0.55), dec!(100)),
                (dec!(0.5), dec!(100)),
            ],
        );

        assert_eq!(
            market_price(&book, Side::Buy, dec!(50), OrderType::FOK)?,
            dec!(0.5)
        );
        assert_eq!(
            market_price(&book, Side::Buy, dec!(100), OrderType::FOK)?,
            dec!(0.55)
        );
        assert!(market_price(&book, Side::Buy, dec!(1000), OrderType::FOK).is_err());
        assert_eq!(
            market_price(&book, Side::Buy, dec!(1000), OrderType::FAK)?,
            dec!(0.6)
        );
        Ok(())
    }

    #[test]
    fn sell_walks_bids_by_shares() -> anyhow::Result<()> {
        let book = book(&[(dec!(0.3), dec!(10)), (dec!(0.4), dec!(10))], &[]);

        assert_eq!(
            market_price(&book, Side::Sell, dec!(10), OrderType::FOK)?,
            dec!(0.4)
        );
        assert_eq!(
            market_price(&book, Side::Sell, dec!(15), OrderType::FOK)?,
            dec!(0.3)
        );
        Ok(())
    }

    #[test]
    fn empty_book_never_matches() {
        let empty = book(&[], &[]);
        for order_type in [OrderType::FOK, OrderType::FAK] {
            let err = market_price(&empty, Side::Buy, dec!(1), order_type).unwrap_err();
            assert_eq!(err.to_string(), "Validation: no match");
        }
    }

    #[test]
    fn fee_rate_resolution() {
        assert_eq!(resolve_fee_rate(0, 0).ok(), Some(0));
        assert_eq!(resolve_fee_rate(25, 0).ok(), Some(25));
        assert_eq!(resolve_fee_rate(0, 100).ok(), Some(100));
        assert_eq!(resolve_fee_rate(100, 100).ok(), Some(100));

        let err = resolve_fee_rate(25, 100).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Validation>(),
            Some(&Validation::FeeRateMismatch {
                provided: 25,
                required: 100
            })
        );
        assert!(err.to_string().contains(
            "invalid user provided fee rate (25), fee rate for the market must be 100"
        ));
    }
}
