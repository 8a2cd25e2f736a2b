//! Streaming client against a loopback WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use polymarket_clob_core::auth::Credentials;
use polymarket_clob_core::types::dec;
use polymarket_clob_core::ws::types::{BookUpdate, PriceChange};
use polymarket_clob_core::ws::{Channel, Client, ConnectionState, StreamConfig};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

enum Control {
    Send(String),
    Drop,
}

#[derive(Default)]
struct Recorded {
    paths: Vec<String>,
    /// Subscription frames per accepted connection, heartbeats excluded.
    frames: Vec<Vec<Value>>,
    pings: usize,
    controls: Vec<mpsc::UnboundedSender<Control>>,
}

/// Accepts any number of connections, records what they send and answers
/// `PING` with `PONG` when `answer_pings` is set.
struct MockWsServer {
    addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockWsServer {
    async fn start(answer_pings: bool) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        let shared = Arc::clone(&recorded);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, Arc::clone(&shared), answer_pings));
            }
        });

        Ok(Self { addr, recorded })
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn connections(&self) -> usize {
        self.recorded.lock().await.frames.len()
    }

    async fn frames(&self, connection: usize) -> Vec<Value> {
        self.recorded
            .lock()
            .await
            .frames
            .get(connection)
            .cloned()
            .unwrap_or_default()
    }

    async fn paths(&self) -> Vec<String> {
        self.recorded.lock().await.paths.clone()
    }

    async fn pings(&self) -> usize {
        self.recorded.lock().await.pings
    }

    async fn control(&self, connection: usize, control: Control) {
        let recorded = self.recorded.lock().await;
        let sender = recorded.controls.get(connection).expect("connection exists");
        let _sent = sender.send(control);
    }
}

async fn handle_connection(stream: TcpStream, recorded: Arc<Mutex<Recorded>>, answer_pings: bool) {
    let (path_tx, path_rx) = std::sync::mpsc::channel();
    let callback = move |request: &Request, response: Response| {
        let _sent = path_tx.send(request.uri().path().to_owned());
        Ok::<_, ErrorResponse>(response)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let index = {
        let mut recorded = recorded.lock().await;
        recorded.paths.push(path_rx.recv().unwrap_or_default());
        recorded.frames.push(Vec::new());
        recorded.controls.push(control_tx);
        recorded.frames.len() - 1
    };

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Some(Control::Send(text)) => {
                    if write.send(Message::text(text)).await.is_err() {
                        return;
                    }
                }
                Some(Control::Drop) | None => return,
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) if text.as_str() == "PING" => {
                    recorded.lock().await.pings += 1;
                    if answer_pings && write.send(Message::text("PONG")).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        recorded.lock().await.frames[index].push(value);
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn config(server: &MockWsServer) -> StreamConfig {
    StreamConfig::builder()
        .endpoint(format!("{}/", server.url()))
        .ping_interval(Duration::from_millis(50))
        .pong_timeout(Duration::from_millis(250))
        .reconnect_base_delay(Duration::from_millis(20))
        .reconnect_max_delay(Duration::from_millis(100))
        .buffer(16)
        .build()
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !condition().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn book(asset_id: &str) -> Value {
    json!({
        "event_type": "book",
        "asset_id": asset_id,
        "market": "0xm",
        "timestamp": "1700000000000",
        "bids": [{ "price": "0.48", "size": "30" }],
        "asks": [{ "price": "0.52", "size": "25" }],
    })
}

#[tokio::test]
async fn events_reach_matching_queues() -> anyhow::Result<()> {
    let server = &MockWsServer::start(true).await?;
    let client = &Client::new(config(server));
    let scope = CancellationToken::new();

    let mut books = client.subscribe_orderbook(["1"], &scope).await;
    let mut prices = client.subscribe_prices(["1"], &scope).await;
    eventually(move || async move { server.frames(0).await.len() >= 2 }).await;

    let frames = server.frames(0).await;
    let subscription = &frames[0];
    assert_eq!(subscription["type"], "market");
    assert_eq!(subscription["operation"], "subscribe");
    assert_eq!(subscription["assets_ids"], json!(["1"]));
    assert_eq!(subscription["initial_dump"], true);
    assert_eq!(server.paths().await, vec!["/ws/market".to_owned()]);

    let batch = json!([
        book("1"),
        {
            "event_type": "price_change",
            "market": "0xm",
            "price_changes": [{ "asset_id": "1", "price": "0.5", "size": "10", "side": "BUY" }],
        },
    ]);
    server.control(0, Control::Send(batch.to_string())).await;

    let update: BookUpdate = timeout(WAIT, books.recv()).await?.expect("book");
    assert_eq!(update.asset_id, "1");
    assert_eq!(update.bids[0].price, dec!(0.48));

    let change: PriceChange = timeout(WAIT, prices.recv()).await?.expect("price change");
    assert_eq!(change.price_changes[0].price, dec!(0.5));

    assert!(books.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn reconnect_replays_tracked_subscriptions() -> anyhow::Result<()> {
    let server = &MockWsServer::start(true).await?;
    let client = &Client::new(config(server));
    let scope = CancellationToken::new();

    let mut books = client.subscribe_orderbook(["1"], &scope).await;
    eventually(move || async move { client.state(Channel::Market) == ConnectionState::Connected }).await;
    let _prices = client.subscribe_prices(["2"], &scope).await;
    let _trades = client.subscribe_last_trade_price(["3"], &scope).await;
    client.unsubscribe_market(["2"]).await?;
    eventually(move || async move {
        server
            .frames(0)
            .await
            .iter()
            .any(|frame| frame["operation"] == "unsubscribe")
    })
    .await;

    server.control(0, Control::Drop).await;
    eventually(move || async move { server.connections().await == 2 }).await;
    eventually(move || async move { server.frames(1).await.len() >= 2 }).await;
    sleep(Duration::from_millis(100)).await;

    let replayed = server.frames(1).await;
    let assets: Vec<_> = replayed.iter().map(|frame| frame["assets_ids"].clone()).collect();
    assert_eq!(assets, vec![json!(["1"]), json!(["3"])]);
    assert!(replayed.iter().all(|frame| frame["operation"] == "subscribe"));

    server.control(1, Control::Send(book("1").to_string())).await;
    let update = timeout(WAIT, books.recv()).await?.expect("book after reconnect");
    assert_eq!(update.asset_id, "1");
    Ok(())
}

#[tokio::test]
async fn dropped_session_goes_straight_to_connecting() -> anyhow::Result<()> {
    let server = &MockWsServer::start(true).await?;
    let client = &Client::new(config(server));
    let _books = client
        .subscribe_orderbook(["1"], &CancellationToken::new())
        .await;
    eventually(move || async move { client.state(Channel::Market) == ConnectionState::Connected }).await;

    let mut states = client
        .state_changes(Channel::Market)
        .expect("market channel opened");
    states.borrow_and_update();
    server.control(0, Control::Drop).await;

    let mut seen = Vec::new();
    timeout(WAIT, async {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == ConnectionState::Connected {
                break;
            }
        }
    })
    .await?;

    assert_eq!(seen.first(), Some(&ConnectionState::Connecting));
    assert_eq!(seen.last(), Some(&ConnectionState::Connected));
    assert!(!seen.contains(&ConnectionState::Disconnected));
    Ok(())
}

#[tokio::test]
async fn answered_heartbeats_keep_the_session() -> anyhow::Result<()> {
    let server = &MockWsServer::start(true).await?;
    let client = &Client::new(config(server));
    let _books = client
        .subscribe_orderbook(["1"], &CancellationToken::new())
        .await;

    eventually(move || async move { server.pings().await >= 10 }).await;
    assert_eq!(server.connections().await, 1);
    assert_eq!(client.state(Channel::Market), ConnectionState::Connected);
    Ok(())
}

#[tokio::test]
async fn missing_pongs_force_a_reconnect() -> anyhow::Result<()> {
    let server = &MockWsServer::start(false).await?;
    let client = &Client::new(config(server));
    let _books = client
        .subscribe_orderbook(["1"], &CancellationToken::new())
        .await;

    eventually(move || async move { server.connections().await >= 2 }).await;
    eventually(move || async move { !server.frames(1).await.is_empty() }).await;
    assert_eq!(server.frames(1).await[0]["assets_ids"], json!(["1"]));
    Ok(())
}

#[tokio::test]
async fn cancelled_scope_closes_only_its_queue() -> anyhow::Result<()> {
    let server = &MockWsServer::start(true).await?;
    let client = &Client::new(config(server));
    let short = CancellationToken::new();
    let long = CancellationToken::new();

    let mut cancelled = client.subscribe_orderbook(["1"], &short).await;
    let mut kept = client.subscribe_orderbook(["2"], &long).await;
    eventually(move || async move { client.state(Channel::Market) == ConnectionState::Connected }).await;

    short.cancel();
    assert!(timeout(WAIT, cancelled.recv()).await?.is_none());

    server.control(0, Control::Send(book("2").to_string())).await;
    assert!(timeout(WAIT, kept.recv()).await?.is_some());

    server.control(0, Control::Drop).await;
    eventually(move || async move { server.connections().await == 2 }).await;
    eventually(move || async move { !server.frames(1).await.is_empty() }).await;
    sleep(Duration::from_millis(100)).await;

    let replayed = server.frames(1).await;
    let assets: Vec<_> = replayed.iter().map(|frame| frame["assets_ids"].clone()).collect();
    assert_eq!(assets, vec![json!(["2"])]);

    server.control(1, Control::Send(book("2").to_string())).await;
    let update = timeout(WAIT, kept.recv()).await?.expect("book after reconnect");
    assert_eq!(update.asset_id, "2");
    Ok(())
}

#[tokio::test]
async fn close_ends_every_queue() -> anyhow::Result<()> {
    let server = &MockWsServer::start(true).await?;
    let client = &Client::new(config(server));
    let scope = CancellationToken::new();

    let mut books = client.subscribe_orderbook(["1"], &scope).await;
    eventually(move || async move { client.state(Channel::Market) == ConnectionState::Connected }).await;
    let mut states = client
        .state_changes(Channel::Market)
        .expect("market channel opened");

    client.close();
    assert!(timeout(WAIT, books.recv()).await?.is_none());
    timeout(WAIT, states.wait_for(|state| *state == ConnectionState::Closed)).await??;
    assert_eq!(client.state(Channel::Market), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn user_subscriptions_carry_credentials() -> anyhow::Result<()> {
    let server = &MockWsServer::start(true).await?;
    let client = &Client::new(config(server));
    let credentials = Credentials::new(
        Uuid::parse_str("00000000-0000-0000-0000-000000000001")?,
        SecretString::from("c2VjcmV0"),
        SecretString::from("passphrase"),
    );

    let _orders = client
        .subscribe_orders(&credentials, ["0xm"], &CancellationToken::new())
        .await;
    eventually(move || async move { !server.frames(0).await.is_empty() }).await;

    let frames = server.frames(0).await;
    let subscription = &frames[0];
    assert_eq!(server.paths().await, vec!["/ws/user".to_owned()]);
    assert_eq!(subscription["type"], "user");
    assert_eq!(subscription["markets"], json!(["0xm"]));
    assert_eq!(
        subscription["auth"],
        json!({
            "apiKey": "00000000-0000-0000-0000-000000000001",
            "secret": "c2VjcmV0",
            "passphrase": "passphrase",
        })
    );
    assert_eq!(client.state(Channel::Market), ConnectionState::Disconnected);
    Ok(())
}
