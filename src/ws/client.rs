use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::auth::Credentials;
use crate::ws::StreamConfig;
use crate::ws::connection::Connection;
use crate::ws::types::{
    AuthPayload, BookUpdate, Channel, ConnectionState, EVENT_BOOK, EVENT_LAST_TRADE_PRICE,
    EVENT_ORDER, EVENT_PRICE_CHANGE, EVENT_TICK_SIZE_CHANGE, EVENT_TRADE, LastTradePrice,
    OrderUpdate, PriceChange, SubscriptionRequest, TickSizeChange, TradeUpdate,
};

#[derive(Default)]
struct Connections {
    market: Option<Connection>,
    user: Option<Connection>,
}

impl Connections {
    fn slot(&mut self, channel: Channel) -> &mut Option<Connection> {
        match channel {
            Channel::Market => &mut self.market,
            Channel::User => &mut self.user,
        }
    }
}

/// Streaming client.
///
/// Every `subscribe_*` call returns its own bounded queue. A queue closes when
/// its `scope` is cancelled, when [`Client::close`] is called or when the
/// config's cancellation token fires. Slow consumers lose events rather than
/// stall the connection.
pub struct Client {
    config: StreamConfig,
    connections: Mutex<Connections>,
}

impl Client {
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(Connections::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub async fn subscribe_orderbook<I, S>(
        &self,
        asset_ids: I,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<BookUpdate>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_market(asset_ids, EVENT_BOOK, scope).await
    }

    pub async fn subscribe_prices<I, S>(
        &self,
        asset_ids: I,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<PriceChange>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_market(asset_ids, EVENT_PRICE_CHANGE, scope)
            .await
    }

    pub async fn subscribe_last_trade_price<I, S>(
        &self,
        asset_ids: I,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<LastTradePrice>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_market(asset_ids, EVENT_LAST_TRADE_PRICE, scope)
            .await
    }

    pub async fn subscribe_tick_size_change<I, S>(
        &self,
        asset_ids: I,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<TickSizeChange>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_market(asset_ids, EVENT_TICK_SIZE_CHANGE, scope)
            .await
    }

    pub async fn subscribe_orders<I, S>(
        &self,
        credentials: &Credentials,
        markets: I,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<OrderUpdate>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_user(credentials, markets, EVENT_ORDER, scope)
            .await
    }

    pub async fn subscribe_trades<I, S>(
        &self,
        credentials: &Credentials,
        markets: I,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<TradeUpdate>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_user(credentials, markets, EVENT_TRADE, scope)
            .await
    }

    /// Untyped subscription. `event_type: None` receives every event of the
    /// request's channel.
    pub async fn subscribe(
        &self,
        request: SubscriptionRequest,
        event_type: Option<&str>,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<Value> {
        self.connection(request.channel)
            .subscribe(request, event_type, scope)
            .await
    }

    /// No-op when the market channel was never opened.
    pub async fn unsubscribe_market<I, S>(&self, asset_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = SubscriptionRequest::unsubscribe_market(collect(asset_ids));
        self.unsubscribe(request).await
    }

    /// No-op when the user channel was never opened.
    pub async fn unsubscribe_user<I, S>(&self, markets: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = SubscriptionRequest::unsubscribe_user(collect(markets));
        self.unsubscribe(request).await
    }

    /// Closes both connections and every queue. Later subscriptions open
    /// fresh connections.
    pub fn close(&self) {
        let mut connections = self.lock();
        for connection in [connections.market.take(), connections.user.take()]
            .into_iter()
            .flatten()
        {
            connection.close();
        }
    }

    #[must_use]
    pub fn state(&self, channel: Channel) -> ConnectionState {
        self.lock()
            .slot(channel)
            .as_ref()
            .map_or(ConnectionState::Disconnected, Connection::state)
    }

    /// Watches the state of `channel`'s connection, if it has been opened.
    #[must_use]
    pub fn state_changes(&self, channel: Channel) -> Option<watch::Receiver<ConnectionState>> {
        self.lock()
            .slot(channel)
            .as_ref()
            .map(Connection::state_changes)
    }

    async fn subscribe_market<T, I, S>(
        &self,
        asset_ids: I,
        event_type: &str,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<T>
    where
        T: DeserializeOwned + Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = SubscriptionRequest::market(collect(asset_ids));
        self.connection(Channel::Market)
            .subscribe(request, Some(event_type), scope)
            .await
    }

    async fn subscribe_user<T, I, S>(
        &self,
        credentials: &Credentials,
        markets: I,
        event_type: &str,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<T>
    where
        T: DeserializeOwned + Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = SubscriptionRequest::user(collect(markets), AuthPayload::from(credentials));
        self.connection(Channel::User)
            .subscribe(request, Some(event_type), scope)
            .await
    }

    async fn unsubscribe(&self, request: SubscriptionRequest) -> Result<()> {
        let connection = self.lock().slot(request.channel).clone();
        match connection {
            Some(connection) => connection.unsubscribe(&request).await,
            None => Ok(()),
        }
    }

    fn connection(&self, channel: Channel) -> Connection {
        self.lock()
            .slot(channel)
            .get_or_insert_with(|| Connection::spawn(self.config.url(channel), self.config.clone()))
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, Connections> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn collect<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}
