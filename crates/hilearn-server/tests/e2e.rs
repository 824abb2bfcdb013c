//! End-to-end: real listener, real HTTP client, real WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use hilearn_api::auth::{AppState, AppStateInner, ensure_admin};
use hilearn_api::routes::router;
use hilearn_db::Database;
use hilearn_gateway::connection::GatewayTimings;
use hilearn_gateway::dispatcher::Dispatcher;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    http: reqwest::Client,
    state: AppState,
}

impl Server {
    async fn start() -> Self {
        Self::start_with(GatewayTimings::default()).await
    }

    async fn start_with(gateway_timings: GatewayTimings) -> Self {
        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            dispatcher: Dispatcher::new(),
            jwt_secret: Arc::from("e2e-secret"),
            token_ttl_days: 1,
            gateway_timings,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            http: reqwest::Client::new(),
            state,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn login(&self, email: &str, password: &str) -> (Uuid, String) {
        let body: Value = self
            .http
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        (
            body["userId"].as_str().unwrap().parse().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn register(&self, name: &str, email: &str) -> (Uuid, String) {
        let response = self
            .http
            .post(self.url("/auth/register"))
            .json(&json!({ "name": name, "email": email, "password": "password123" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        (
            body["userId"].as_str().unwrap().parse().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn get(&self, path: &str, token: &str) -> Value {
        self.http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn connect_with_query(&self, token: &str) -> Ws {
        let url = format!("ws://{}/gateway?token={}", self.addr, token);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    async fn connect_with_header(&self, token: &str) -> Ws {
        let mut request = format!("ws://{}/gateway", self.addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", token).parse().unwrap());
        let (ws, _) = connect_async(request).await.unwrap();
        ws
    }

    async fn connect_with_identify(&self, token: &str) -> Ws {
        let (mut ws, _) = connect_async(format!("ws://{}/gateway", self.addr)).await.unwrap();
        send(&mut ws, json!({ "type": "identify", "data": { "token": token } })).await;
        ws
    }
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next JSON frame, skipping control frames.
async fn next_event(ws: &mut Ws) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn assert_silent(ws: &mut Ws) {
    let quiet = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                _ => return String::new(),
            }
        }
    })
    .await;
    assert!(quiet.is_err(), "unexpected frame: {:?}", quiet);
}

#[tokio::test]
async fn chat_round_trip_over_gateway() {
    let server = Server::start().await;

    let db = server.state.db.clone();
    tokio::task::spawn_blocking(move || {
        ensure_admin(&db, "help@hilearn.test", "password123", "Help Desk")
    })
    .await
    .unwrap()
    .unwrap();

    let (agent_id, agent_token) = server.login("help@hilearn.test", "password123").await;
    let (ada_id, ada_token) = server.register("Ada", "ada@hilearn.test").await;

    // Learner discovers the support agent
    let agent = server.get("/chat/support-agent", &ada_token).await;
    assert_eq!(agent["id"], agent_id.to_string());

    // Agent has two tabs open, authenticated two different ways
    let mut agent_tab1 = server.connect_with_query(&agent_token).await;
    let mut agent_tab2 = server.connect_with_identify(&agent_token).await;
    let mut ada_ws = server.connect_with_header(&ada_token).await;

    // `ready` is only sent once the connection is in its room
    for ws in [&mut agent_tab1, &mut agent_tab2, &mut ada_ws] {
        assert_eq!(next_event(ws).await["type"], "ready");
    }
    assert_eq!(server.state.dispatcher.connection_count(agent_id).await, 2);

    send(
        &mut ada_ws,
        json!({ "type": "sendMessage", "data": { "receiverId": agent_id, "message": "I need help" } }),
    )
    .await;

    for ws in [&mut agent_tab1, &mut agent_tab2] {
        let event = next_event(ws).await;
        assert_eq!(event["type"], "newMessage");
        assert_eq!(event["data"]["message"], "I need help");
        assert_eq!(event["data"]["senderId"], ada_id.to_string());
        assert_eq!(event["data"]["sender"]["name"], "Ada");
    }
    // No echo to the sender
    assert_silent(&mut ada_ws).await;

    // Validation failures come back to the sender only
    send(
        &mut ada_ws,
        json!({ "type": "sendMessage", "data": { "receiverId": agent_id, "message": "" } }),
    )
    .await;
    let error = next_event(&mut ada_ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["data"]["code"], "validation");
    assert_silent(&mut agent_tab1).await;

    // Unread state over REST
    assert_eq!(server.get("/chat/unread", &agent_token).await["count"], 1);
    let contacts = server.get("/chat/contacts", &agent_token).await;
    assert_eq!(contacts[0]["id"], ada_id.to_string());
    assert_eq!(contacts[0]["unreadCount"], 1);

    assert_eq!(server.get(&format!("/chat/read/{}", ada_id), &agent_token).await["updated"], 1);
    assert_eq!(server.get("/chat/unread", &agent_token).await["count"], 0);

    let history = server.get(&format!("/chat/messages/{}", agent_id), &ada_token).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["read"], true);
}

#[tokio::test]
async fn invalid_token_is_rejected_at_upgrade() {
    let server = Server::start().await;

    let url = format!("ws://{}/gateway?token=bogus", server.addr);
    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected HTTP 401, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn failed_identify_closes_the_socket() {
    let server = Server::start().await;

    let mut ws = server.connect_with_identify("bogus").await;
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(Message::Text(_))) => return false,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(outcome, "server sent a frame instead of closing");
}

fn fast_timings() -> GatewayTimings {
    GatewayTimings {
        heartbeat_interval: Duration::from_millis(50),
        identify_timeout: Duration::from_millis(200),
    }
}

/// Wait until the socket closes or errors, skipping any frames before that.
async fn wait_closed(ws: &mut Ws) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("socket was never closed");
}

#[tokio::test]
async fn silent_socket_is_closed_after_identify_timeout() {
    let server = Server::start_with(fast_timings()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/gateway", server.addr)).await.unwrap();
    wait_closed(&mut ws).await;
}

#[tokio::test]
async fn missed_pongs_drop_the_connection() {
    let server = Server::start_with(fast_timings()).await;
    let (ada_id, ada_token) = server.register("Ada", "ada@hilearn.test").await;

    let mut ws = server.connect_with_query(&ada_token).await;
    assert_eq!(next_event(&mut ws).await["type"], "ready");
    assert_eq!(server.state.dispatcher.connection_count(ada_id).await, 1);

    // Not polling the socket means no pong ever goes back
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.state.dispatcher.connection_count(ada_id).await, 0);
    wait_closed(&mut ws).await;
}

#[tokio::test]
async fn answered_pings_keep_the_connection() {
    let server = Server::start_with(fast_timings()).await;
    let (ada_id, ada_token) = server.register("Ada", "ada@hilearn.test").await;

    let mut ws = server.connect_with_query(&ada_token).await;
    assert_eq!(next_event(&mut ws).await["type"], "ready");

    // Reading lets the client answer each ping with a pong
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    assert_eq!(server.state.dispatcher.connection_count(ada_id).await, 1);
}
