//! Connection Lifecycle Integration Tests
//!
//! Drives a single session against the in-memory exchange: login gating,
//! bounded reconnect, subscription replay and close.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use okx_connector::infrastructure::okx::connection::Connection;
use okx_connector::infrastructure::okx::endpoints::ws_url;
use okx_connector::infrastructure::okx::messages::Request;
use okx_connector::{
    ConnectionError, ConnectionEvent, ConnectionState, ControlEvent, ControlKind, SessionClass,
    StreamEvent, Topic,
};
use support::{FakeExchange, LoginReply, credentials, eventually, settings};

fn session(exchange: &FakeExchange, class: SessionClass) -> Arc<Connection> {
    Connection::new(
        class,
        ws_url(class, false),
        credentials(),
        settings(),
        exchange.dialer(),
    )
}

fn record_connection_events(connection: &Connection) -> Arc<Mutex<Vec<ConnectionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    connection.on(ControlKind::Connection, move |event| {
        if let StreamEvent::Control(ControlEvent::Connection(change)) = event {
            sink.lock().push(change.clone());
        }
    });
    seen
}

#[tokio::test]
async fn connect_is_idempotent() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    let events = record_connection_events(&connection);

    connection.connect().await.unwrap();
    connection.connect().await.unwrap();

    assert_eq!(exchange.dial_count(), 1);
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(*events.lock(), vec![ConnectionEvent::Connected]);
}

#[tokio::test]
async fn failed_connect_leaves_session_disconnected() {
    let exchange = FakeExchange::new();
    exchange.fail_dials("");
    let connection = session(&exchange, SessionClass::Public);

    let err = connection.connect().await.unwrap_err();

    assert!(matches!(err, ConnectionError::Dial(_)), "{err}");
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(exchange.dial_count(), 1);
}

#[tokio::test]
async fn control_frames_need_a_socket() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);

    let err = connection
        .send_control(&Request::subscribe(vec![Topic::new("tickers", "BTC-USDT")]))
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectionError::NotConnected));
}

#[tokio::test]
async fn private_subscribe_logs_in_first() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Private);
    connection.connect().await.unwrap();

    connection
        .subscribe(vec![Topic::new("orders", "").with_inst_type("SPOT")])
        .await
        .unwrap();

    let frames = exchange.latest("/private").frames();
    assert_eq!(frames.len(), 2);
    assert!(frames[0].contains(r#""op":"login""#), "{}", frames[0]);
    assert!(frames[1].contains(r#""op":"subscribe""#), "{}", frames[1]);
    assert!(frames[1].contains(r#""instType":"SPOT""#), "{}", frames[1]);
    assert!(connection.is_authenticated().await);
}

#[tokio::test]
async fn login_args_are_signed() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Private);
    connection.connect().await.unwrap();

    connection.login().await.unwrap();

    let login = exchange.latest("/private").ops("login").remove(0);
    let args = &login["args"][0];
    assert_eq!(args["apiKey"], "test-key");
    assert_eq!(args["passphrase"], "test-pass");
    assert!(args["timestamp"].as_str().unwrap().parse::<u64>().is_ok());
    assert!(!args["sign"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_login_sends_no_subscribe() {
    let exchange = FakeExchange::new();
    exchange.set_login(LoginReply::Reject);
    let connection = session(&exchange, SessionClass::Private);
    connection.connect().await.unwrap();

    let err = connection
        .subscribe(vec![Topic::new("account", "")])
        .await
        .unwrap_err();

    match err {
        ConnectionError::LoginRejected { code, .. } => assert_eq!(code, "60009"),
        other => panic!("unexpected error: {other}"),
    }
    let socket = exchange.latest("/private");
    assert_eq!(socket.ops("login").len(), 1);
    assert!(socket.ops("subscribe").is_empty());
    assert!(connection.subscriptions().is_empty());
    assert!(!connection.is_authenticated().await);
}

#[tokio::test]
async fn unanswered_login_times_out() {
    let exchange = FakeExchange::new();
    exchange.set_login(LoginReply::Silent);
    let connection = session(&exchange, SessionClass::Private);
    connection.connect().await.unwrap();

    let err = connection.login().await.unwrap_err();

    assert!(matches!(err, ConnectionError::LoginTimeout(_)), "{err}");
}

#[tokio::test]
async fn unrelated_error_does_not_settle_a_pending_login() {
    let exchange = FakeExchange::new();
    exchange.set_login(LoginReply::Silent);
    let connection = session(&exchange, SessionClass::Business);
    connection.connect().await.unwrap();

    let pending = {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move {
            connection
                .subscribe_with_auth(vec![Topic::new("deposit-info", "")])
                .await
        })
    };
    assert!(eventually(|| exchange.latest("/business").ops("login").len() == 1).await);

    exchange.push(
        "/business",
        r#"{"event":"error","code":"60018","msg":"Wrong URL or channel doesn't exist."}"#,
    );
    exchange.push("/business", r#"{"event":"login","code":"0","msg":""}"#);

    pending.await.unwrap().unwrap();
    assert!(connection.is_authenticated().await);
    assert_eq!(exchange.latest("/business").ops("subscribe").len(), 1);
}

#[tokio::test]
async fn public_subscribe_skips_login() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    connection.connect().await.unwrap();

    connection
        .subscribe(vec![Topic::new("tickers", "BTC-USDT")])
        .await
        .unwrap();

    let socket = exchange.latest("/public");
    assert!(socket.ops("login").is_empty());
    assert_eq!(socket.ops("subscribe").len(), 1);
    assert_eq!(connection.subscriptions(), vec![Topic::new("tickers", "BTC-USDT")]);
}

#[tokio::test]
async fn unsubscribe_forgets_topics() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    connection.connect().await.unwrap();
    let btc = Topic::new("tickers", "BTC-USDT");
    let eth = Topic::new("tickers", "ETH-USDT");
    connection
        .subscribe(vec![btc.clone(), eth.clone()])
        .await
        .unwrap();

    connection.unsubscribe(vec![btc]).await.unwrap();

    assert_eq!(connection.subscriptions(), vec![eth]);
    let unsubscribe = exchange.latest("/public").ops("unsubscribe").remove(0);
    assert_eq!(unsubscribe["args"][0]["instId"], "BTC-USDT");
}

#[tokio::test]
async fn reconnect_gives_up_after_five_attempts() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    let events = record_connection_events(&connection);
    connection.connect().await.unwrap();

    exchange.fail_dials("");
    exchange.hang_up("/public");

    assert!(
        eventually(|| events
            .lock()
            .contains(&ConnectionEvent::ReconnectExhausted { attempts: 5 }))
        .await
    );
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(exchange.dial_count(), 6);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(exchange.dial_count(), 6);
}

#[tokio::test]
async fn sockets_closing_after_handshake_use_up_the_attempt_budget() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    let events = record_connection_events(&connection);
    connection.connect().await.unwrap();
    connection
        .subscribe(vec![Topic::new("tickers", "BTC-USDT")])
        .await
        .unwrap();

    exchange.close_new_sockets();
    exchange.hang_up("/public");

    assert!(
        eventually(|| events
            .lock()
            .contains(&ConnectionEvent::ReconnectExhausted { attempts: 5 }))
        .await
    );
    assert_eq!(exchange.dial_count(), 6);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(exchange.dial_count(), 6);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnected_session_gets_a_fresh_budget_once_it_delivers_frames() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    let events = record_connection_events(&connection);
    connection.connect().await.unwrap();

    for round in 1..=3 {
        exchange.hang_up("/public");
        assert!(
            eventually(|| exchange.sessions("/public").len() == round + 1
                && connection.state() == ConnectionState::Connected)
            .await
        );
        exchange.push("/public", r#"{"event":"notice","code":"64008","msg":"upgrade"}"#);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let reconnects: Vec<_> = events
        .lock()
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::Reconnected { .. }))
        .cloned()
        .collect();
    assert_eq!(reconnects, vec![ConnectionEvent::Reconnected { attempts: 1 }; 3]);
}

#[tokio::test]
async fn reconnect_replays_subscriptions() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    let events = record_connection_events(&connection);
    connection.connect().await.unwrap();
    connection
        .subscribe(vec![
            Topic::new("tickers", "BTC-USDT"),
            Topic::new("books5", "BTC-USDT"),
        ])
        .await
        .unwrap();

    exchange.hang_up("/public");

    assert!(
        eventually(|| events
            .lock()
            .contains(&ConnectionEvent::Reconnected { attempts: 1 }))
        .await
    );
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(exchange.sessions("/public").len(), 2);

    let replay = exchange.latest("/public").ops("subscribe");
    assert_eq!(replay.len(), 1);
    let channels: Vec<&str> = replay[0]["args"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["channel"].as_str().unwrap())
        .collect();
    assert_eq!(channels, ["tickers", "books5"]);
}

#[tokio::test]
async fn private_reconnect_logs_in_before_replay() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Private);
    connection.connect().await.unwrap();
    connection
        .subscribe(vec![Topic::new("positions", "").with_inst_type("ANY")])
        .await
        .unwrap();

    exchange.hang_up("/private");

    assert!(
        eventually(|| exchange.sessions("/private").len() == 2
            && connection.state() == ConnectionState::Connected)
        .await
    );
    let frames = exchange.latest("/private").frames();
    assert_eq!(frames.len(), 2, "{frames:?}");
    assert!(frames[0].contains(r#""op":"login""#));
    assert!(frames[1].contains(r#""op":"subscribe""#));
    assert!(connection.is_authenticated().await);
}

#[tokio::test]
async fn private_reconnect_fails_when_login_is_rejected() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Private);
    let events = record_connection_events(&connection);
    connection.connect().await.unwrap();
    connection.login().await.unwrap();

    exchange.set_login(LoginReply::Reject);
    exchange.hang_up("/private");

    assert!(
        eventually(|| events
            .lock()
            .contains(&ConnectionEvent::ReconnectExhausted { attempts: 5 }))
        .await
    );
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    for socket in exchange.sessions("/private").iter().skip(1) {
        assert!(socket.ops("subscribe").is_empty());
    }
}

#[tokio::test]
async fn close_during_reconnect_stops_it_quietly() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Private);
    let events = record_connection_events(&connection);
    connection.connect().await.unwrap();

    exchange.set_login(LoginReply::Silent);
    exchange.hang_up("/private");
    assert!(
        eventually(|| exchange.sessions("/private").len() == 2
            && exchange.latest("/private").ops("login").len() == 1)
        .await
    );

    connection.close().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(exchange.dial_count(), 2);
    assert_eq!(
        *events.lock(),
        vec![ConnectionEvent::Connected, ConnectionEvent::Closed]
    );
}

#[tokio::test]
async fn recover_brings_a_failed_session_up() {
    let exchange = FakeExchange::new();
    exchange.fail_dials("");
    let connection = session(&exchange, SessionClass::Public);
    assert!(connection.connect().await.is_err());

    exchange.allow_dials();
    let attempts = connection.recover().await.unwrap();

    assert_eq!(attempts, 1);
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn close_is_terminal() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    let events = record_connection_events(&connection);
    connection.connect().await.unwrap();

    connection.close().await;
    connection.close().await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(matches!(
        connection.connect().await,
        Err(ConnectionError::Closed)
    ));
    assert!(matches!(
        connection.recover().await,
        Err(ConnectionError::Closed)
    ));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(exchange.dial_count(), 1);
    assert_eq!(
        *events.lock(),
        vec![ConnectionEvent::Connected, ConnectionEvent::Closed]
    );
}

#[tokio::test]
async fn frames_refresh_last_activity() {
    let exchange = FakeExchange::new();
    let connection = session(&exchange, SessionClass::Public);
    connection.connect().await.unwrap();
    let before = connection.last_activity();

    tokio::time::sleep(Duration::from_millis(5)).await;
    exchange.push("/public", r#"{"event":"notice","code":"64008","msg":"upgrade"}"#);

    assert!(eventually(|| connection.last_activity() > before).await);
}
