//! Exercises the real newline-JSON wire protocol over an in-process
//! `TcpListener`, mirroring the concrete scenarios enumerated alongside
//! the testable properties for this system.

use groupchat_server::admin::AdminSubsystem;
use groupchat_server::ai::{AiBackend, AiParticipant, AiRequest};
use groupchat_server::config::{AiConfig, Config};
use groupchat_server::files::LocalDiskBlobStore;
use groupchat_server::group_engine::GroupEngine;
use groupchat_server::server;
use groupchat_server::session::SessionRegistry;
use groupchat_server::state::AppState;
use groupchat_server::store::memory::MemoryStore;
use groupchat_server::store::Store;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

struct EchoAiBackend;

#[async_trait]
impl AiBackend for EchoAiBackend {
    async fn generate(&self, request: AiRequest) -> Result<String, String> {
        Ok(format!("ai reply to: {}", request.prompt))
    }
}

fn test_ai_config() -> AiConfig {
    AiConfig {
        enabled: true,
        base_url: String::new(),
        api_key: String::new(),
        model: String::new(),
        system_prompt: "you are a helpful test participant".to_string(),
        trigger_keywords: vec!["help".to_string()],
        context_messages: 5,
        request_timeout_secs: 5,
        max_concurrent_jobs: 4,
        trigger_on_private: true,
        trigger_on_mention: true,
        trigger_on_keyword: true,
    }
}

async fn spawn_server() -> std::net::SocketAddr {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store.bootstrap("adminpass1").await.unwrap();

    let sessions = SessionRegistry::new(store.clone());
    let group_engine = Arc::new(GroupEngine::new(store.clone(), sessions.clone()));
    let admin = Arc::new(AdminSubsystem::new(store.clone(), group_engine.clone()));
    let ai_backend: Arc<dyn AiBackend> = Arc::new(EchoAiBackend);
    let ai = Arc::new(AiParticipant::new(
        test_ai_config(),
        ai_backend,
        group_engine.clone(),
        store.clone(),
    ));

    let tmp_dir = std::env::temp_dir().join(format!("groupchat-test-{}", std::process::id()));
    let blobs = Arc::new(LocalDiskBlobStore::new(tmp_dir));

    let config = Arc::new(Config {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        max_connections: 64,
        database_url: String::new(),
        file_storage_root: "./ignored".to_string(),
        max_file_size_bytes: 1024 * 1024,
        allowed_file_extensions: vec!["txt".to_string()],
        bootstrap_admin_password: "adminpass1".to_string(),
        ai: test_ai_config(),
    });

    let state = AppState { config, store, sessions, group_engine, admin, ai, blobs };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(state, listener));
    addr
}

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self { reader: BufReader::new(read_half), writer }
    }

    async fn send(&mut self, value: Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        timeout(Duration::from_secs(2), async {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            serde_json::from_str(&line).unwrap()
        })
        .await
        .expect("timed out waiting for a frame")
    }

    async fn try_recv(&mut self) -> Option<Value> {
        let mut line = String::new();
        match timeout(Duration::from_millis(300), self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) | Err(_) => None,
            Ok(Ok(_)) => Some(serde_json::from_str(&line).unwrap()),
            Ok(Err(_)) => None,
        }
    }

    async fn register(&mut self, username: &str, password: &str) -> Value {
        self.send(json!({"message_type":"register_request","username":username,"password":password}))
            .await;
        self.recv().await
    }

    async fn login(&mut self, username: &str, password: &str) -> Value {
        self.send(json!({"message_type":"login_request","username":username,"password":password}))
            .await;
        self.recv().await
    }
}

#[tokio::test]
async fn registration_and_public_membership() {
    let addr = spawn_server().await;
    let mut client = Client::connect(addr).await;

    let response = client.register("alice", "password1").await;
    assert_eq!(response["message_type"], "register_response");
    assert_eq!(response["success"], true);
    assert_eq!(response["username"], "alice");

    let login = client.login("alice", "password1").await;
    assert_eq!(login["success"], true);
    assert!(login["current_chat_group_id"].is_i64());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let addr = spawn_server().await;
    let mut client = Client::connect(addr).await;
    client.register("alice", "password1").await;

    let mut second = Client::connect(addr).await;
    let response = second.register("alice", "password1").await;
    assert_eq!(response["message_type"], "error_message");
    assert_eq!(response["error_code"], 1002);
}

#[tokio::test]
async fn non_member_send_is_rejected_then_join_succeeds() {
    let addr = spawn_server().await;
    let mut alice = Client::connect(addr).await;
    alice.register("alice", "password1").await;
    alice.login("alice", "password1").await;

    let mut bob = Client::connect(addr).await;
    bob.register("bob", "password1").await;
    bob.login("bob", "password1").await;

    let created = {
        alice
            .send(json!({
                "message_type": "create_chat_request",
                "chat_name": "room1",
                "member_usernames": [],
                "is_private": false,
            }))
            .await;
        alice.recv().await
    };
    let room_id = created["chat_group_id"].as_i64().unwrap();

    bob.send(json!({"message_type":"chat_message","chat_group_id":room_id,"content":"hi"})).await;
    let error = bob.recv().await;
    assert_eq!(error["error_code"], 1005);

    bob.send(json!({"message_type":"join_chat_request","chat_name":"room1"})).await;
    let joined = bob.recv().await;
    assert_eq!(joined["success"], true);

    bob.send(json!({"message_type":"chat_message","chat_group_id":room_id,"content":"hi now"})).await;
    let ok = bob.recv().await;
    assert_eq!(ok["message_type"], "chat_message");
}

#[tokio::test]
async fn broadcast_filters_by_current_group() {
    let addr = spawn_server().await;
    let mut alice = Client::connect(addr).await;
    alice.register("alice", "password1").await;
    alice.login("alice", "password1").await;

    let mut bob = Client::connect(addr).await;
    bob.register("bob", "password1").await;
    bob.login("bob", "password1").await;

    alice
        .send(json!({"message_type":"create_chat_request","chat_name":"room1","member_usernames":[],"is_private":false}))
        .await;
    let room1_id = alice.recv().await["chat_group_id"].as_i64().unwrap();
    alice
        .send(json!({"message_type":"create_chat_request","chat_name":"room2","member_usernames":[],"is_private":false}))
        .await;
    alice.recv().await;

    bob.send(json!({"message_type":"join_chat_request","chat_name":"room1"})).await;
    bob.recv().await;
    bob.send(json!({"message_type":"join_chat_request","chat_name":"room2"})).await;
    bob.recv().await;

    bob.send(json!({"message_type":"enter_chat_request","chat_name":"room2"})).await;
    bob.recv().await; // enter_chat_response
    bob.recv().await; // chat_history_complete

    alice.send(json!({"message_type":"enter_chat_request","chat_name":"room1"})).await;
    alice.recv().await;
    alice.recv().await;

    alice
        .send(json!({
            "message_type": "chat_message",
            "chat_group_id": room1_id,
            "content": "hello room1",
        }))
        .await;

    let received = alice.recv().await;
    assert_eq!(received["content"], "hello room1");
    assert!(bob.try_recv().await.is_none());
}

#[tokio::test]
async fn ai_trigger_produces_a_followup_reply() {
    let addr = spawn_server().await;
    let mut alice = Client::connect(addr).await;
    alice.register("alice", "password1").await;
    let login = alice.login("alice", "password1").await;
    let public_id = login["current_chat_group_id"].as_i64().unwrap();

    alice
        .send(json!({"message_type":"chat_message","chat_group_id":public_id,"content":"hello @ai"}))
        .await;

    let own_echo = alice.recv().await;
    assert_eq!(own_echo["content"], "hello @ai");

    let ai_reply = timeout(Duration::from_secs(3), async {
        loop {
            let frame = alice.recv().await;
            if frame["kind"] == "ai" {
                return frame;
            }
        }
    })
    .await
    .expect("AI never replied");

    assert!(ai_reply["content"].as_str().unwrap().contains("hello @ai"));
}

#[tokio::test]
async fn admin_ban_blocks_further_sends_until_freed() {
    let addr = spawn_server().await;
    let mut admin = Client::connect(addr).await;
    admin.login("admin", "adminpass1").await;

    let mut alice = Client::connect(addr).await;
    alice.register("alice", "password1").await;
    let login = alice.login("alice", "password1").await;
    let public_id = login["current_chat_group_id"].as_i64().unwrap();

    admin.send(json!({"message_type":"chat_message","chat_group_id":0,"content":"/ban -u alice"})).await;
    let outcome = admin.recv().await;
    assert_eq!(outcome["message_type"], "admin_response");

    alice
        .send(json!({"message_type":"chat_message","chat_group_id":public_id,"content":"hi"}))
        .await;
    let error = alice.recv().await;
    assert_eq!(error["error_code"], 1005);

    admin.send(json!({"message_type":"chat_message","chat_group_id":0,"content":"/free -u alice"})).await;
    admin.recv().await;

    alice
        .send(json!({"message_type":"chat_message","chat_group_id":public_id,"content":"hi again"}))
        .await;
    let ok = alice.recv().await;
    assert_eq!(ok["message_type"], "chat_message");
}
