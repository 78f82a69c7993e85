//! End-to-end tests over real WebSockets.
//!
//! Each test starts a server on an ephemeral port and talks to it with raw
//! tokio-tungstenite sockets or with `EditorClient`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tessera_codec::pack;
use tessera_collab::client::{EditorClient, EditorEvent};
use tessera_collab::protocol::{ClientMessage, Delta, ServerMessage, SessionId, SettingChange};
use tessera_collab::server::{ServerConfig, SyncServer};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// Start a server on a free port, return it with its URL.
async fn start_test_server(config: ServerConfig) -> (Arc<SyncServer>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = Arc::new(SyncServer::new(config).unwrap());
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    (server, url)
}

async fn default_server() -> (Arc<SyncServer>, String) {
    start_test_server(ServerConfig::default()).await
}

/// Connect and read the `start` frame plus the cell frame.
async fn connect(url: &str) -> (Socket, SessionId, ServerMessage, Vec<u8>) {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let start = next_message(&mut ws).await;
    let ServerMessage::Start { session_id, .. } = &start else {
        panic!("expected start, got {start:?}");
    };
    let session_id = *session_id;
    let cells = match timeout(WAIT, ws.next()).await.unwrap() {
        Some(Ok(Message::Binary(data))) => data.to_vec(),
        other => panic!("expected cell frame, got {other:?}"),
    };
    (ws, session_id, start, cells)
}

async fn send(ws: &mut Socket, msg: ClientMessage) {
    ws.send(Message::Text(msg.encode().unwrap().into())).await.unwrap();
}

async fn send_text(ws: &mut Socket, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

async fn next_message(ws: &mut Socket) -> ServerMessage {
    loop {
        match timeout(WAIT, ws.next()).await.expect("timed out waiting for a frame") {
            Some(Ok(Message::Text(text))) => return ServerMessage::decode(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended: {other:?}"),
        }
    }
}

/// Skip frames until one matches.
async fn next_where(ws: &mut Socket, want: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
    loop {
        let msg = next_message(ws).await;
        if want(&msg) {
            return msg;
        }
    }
}

async fn join(url: &str, handle: &str) -> (Socket, SessionId) {
    let (mut ws, id, _, _) = connect(url).await;
    send(
        &mut ws,
        ClientMessage::Join {
            handle: handle.into(),
        },
    )
    .await;
    next_where(&mut ws, |m| {
        matches!(m, ServerMessage::Join { session_id, .. } if *session_id == id)
    })
    .await;
    (ws, id)
}

#[tokio::test]
async fn test_start_snapshot_on_connect() {
    let (_server, url) = default_server().await;
    let (_ws, id, start, cells) = connect(&url).await;
    match start {
        ServerMessage::Start {
            document,
            session_id,
            roster,
        } => {
            assert_eq!(session_id, id);
            assert_eq!((document.columns, document.rows), (80, 25));
            assert_eq!(document.font_name, "IBM VGA");
            assert!(roster.is_empty());
        }
        other => panic!("expected start, got {other:?}"),
    }
    assert_eq!(cells.len(), 80 * 25 * 2);
    assert_eq!(&cells[..2], &pack(0, 7, 0).to_le_bytes());
}

#[tokio::test]
async fn test_draw_reaches_everyone_and_later_joiners() {
    let (server, url) = default_server().await;
    let (mut a, a_id) = join(&url, "alice").await;
    let (mut b, b_id) = join(&url, "bob").await;

    let value = pack(65, 7, 0);
    send(&mut a, ClientMessage::Draw(vec![Delta::new(10, value)])).await;

    let expected = ServerMessage::Draw(vec![Delta::new(10, value)]);
    let seen_by_b = next_where(&mut b, |m| matches!(m, ServerMessage::Draw(_))).await;
    assert_eq!(seen_by_b, expected);
    let seen_by_a = next_where(&mut a, |m| matches!(m, ServerMessage::Draw(_))).await;
    assert_eq!(seen_by_a, expected);

    let stored = server
        .broadcaster()
        .with_store(|s| s.document().cell(10))
        .await;
    assert_eq!(stored, Some(value));

    let (_c, _, start, cells) = connect(&url).await;
    assert_eq!(&cells[20..22], &value.to_le_bytes());
    let ServerMessage::Start { roster, .. } = start else {
        panic!("expected start");
    };
    assert_eq!(roster.get(&a_id).map(String::as_str), Some("alice"));
    assert_eq!(roster.get(&b_id).map(String::as_str), Some("bob"));
}

#[tokio::test]
async fn test_out_of_range_draw_rejected_session_continues() {
    let (server, url) = default_server().await;
    let (mut a, _) = join(&url, "alice").await;
    let (mut b, _) = join(&url, "bob").await;

    send(&mut a, ClientMessage::Draw(vec![Delta::new(2000, 1)])).await;
    send(
        &mut a,
        ClientMessage::Chat {
            text: "still here".into(),
        },
    )
    .await;

    // The rejected draw produced nothing; the chat is next for everyone.
    let after = next_where(&mut b, |m| !matches!(m, ServerMessage::Join { .. })).await;
    assert_eq!(
        after,
        ServerMessage::Chat {
            handle: "alice".into(),
            text: "still here".into()
        }
    );
    let own = next_message(&mut a).await;
    assert!(matches!(own, ServerMessage::Join { .. } | ServerMessage::Chat { .. }));

    assert_eq!(server.stats().await.rejected_messages, 1);
    let untouched = server
        .broadcaster()
        .with_store(|s| s.document().cells().words().iter().all(|&w| w == pack(0, 7, 0)))
        .await;
    assert!(untouched);
}

#[tokio::test]
async fn test_unknown_and_malformed_messages_ignored() {
    let (_server, url) = default_server().await;
    let (mut a, _) = join(&url, "alice").await;

    send_text(&mut a, r#"["wave", 1]"#).await;
    send_text(&mut a, "not json at all").await;
    send(
        &mut a,
        ClientMessage::Chat {
            text: "ok".into(),
        },
    )
    .await;

    assert_eq!(
        next_message(&mut a).await,
        ServerMessage::Chat {
            handle: "alice".into(),
            text: "ok".into()
        }
    );
}

#[tokio::test]
async fn test_nick_and_part() {
    let (server, url) = default_server().await;
    let (mut a, a_id) = join(&url, "alice").await;
    let (mut b, _) = join(&url, "bob").await;

    send(
        &mut a,
        ClientMessage::Nick {
            handle: "al".into(),
        },
    )
    .await;
    assert_eq!(
        next_where(&mut b, |m| matches!(m, ServerMessage::Nick { .. })).await,
        ServerMessage::Nick {
            handle: "al".into(),
            session_id: a_id
        }
    );

    a.close(None).await.unwrap();
    assert_eq!(
        next_where(&mut b, |m| matches!(m, ServerMessage::Part { .. })).await,
        ServerMessage::Part { session_id: a_id }
    );
    assert!(!server.broadcaster().roster().await.contains_key(&a_id));
}

#[tokio::test]
async fn test_setting_changes_rebroadcast() {
    let (server, url) = default_server().await;
    let (mut a, _) = join(&url, "alice").await;

    let resize = SettingChange::Resize {
        columns: 160,
        rows: 50,
    };
    send(&mut a, ClientMessage::Setting(resize.clone())).await;
    send(&mut a, ClientMessage::Setting(SettingChange::IceColours(true))).await;
    assert_eq!(next_message(&mut a).await, ServerMessage::Setting(resize));
    assert_eq!(
        next_message(&mut a).await,
        ServerMessage::Setting(SettingChange::IceColours(true))
    );

    let (columns, ice) = server
        .broadcaster()
        .with_store(|s| (s.document().columns(), s.document().ice_colours))
        .await;
    assert_eq!(columns, 160);
    assert!(ice);

    let (_late, _, _, cells) = connect(&url).await;
    assert_eq!(cells.len(), 160 * 50 * 2);
}

#[tokio::test]
async fn test_server_stats_track_connections() {
    let (server, url) = default_server().await;
    let (mut a, _) = join(&url, "alice").await;
    assert_eq!(server.stats().await.active_connections, 1);

    a.close(None).await.unwrap();
    timeout(WAIT, async {
        while server.stats().await.active_connections > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 1);
    assert!(stats.total_messages >= 1);
}

/// Next `draw` text frame, left undecoded.
async fn next_draw_text(ws: &mut Socket) -> String {
    loop {
        match timeout(WAIT, ws.next()).await.expect("timed out waiting for a draw") {
            Some(Ok(Message::Text(text))) if text.as_str().starts_with(r#"["draw""#) => {
                return text.as_str().to_string();
            }
            Some(Ok(_)) => continue,
            other => panic!("connection ended: {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lagging_session_closed_while_readers_get_every_draw() {
    const DRAWS: usize = 48;
    let config = ServerConfig {
        broadcast_capacity: 2,
        columns: 500,
        rows: 200,
        ..ServerConfig::default()
    };
    let (server, url) = start_test_server(config).await;

    // Never read until the burst is over.
    let (mut idle, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut reader, _) = join(&url, "reader").await;
    let (mut writer, _) = join(&url, "writer").await;

    // Full-canvas draws are large enough to fill the idle socket's buffers.
    let stroke: Vec<Delta> = (0..500 * 200u32)
        .map(|i| Delta::new(i, pack(b'#', 9, 1)))
        .collect();
    let frame = ClientMessage::Draw(stroke).encode().unwrap();
    for _ in 0..DRAWS {
        send_text(&mut writer, &frame).await;
        next_draw_text(&mut writer).await;
        next_draw_text(&mut reader).await;
    }

    let mut idle_draws = 0;
    let closed = timeout(Duration::from_secs(30), async {
        while let Some(Ok(msg)) = idle.next().await {
            match msg {
                Message::Close(_) => return true,
                Message::Text(text) if text.as_str().starts_with(r#"["draw""#) => {
                    idle_draws += 1;
                }
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(closed, "lagging session should receive a Close frame");
    assert!(idle_draws < DRAWS, "lagging session saw all {idle_draws} draws");

    // The other two sessions stay connected and keep receiving.
    timeout(WAIT, async {
        while server.broadcaster().session_count().await != 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    send(
        &mut writer,
        ClientMessage::Chat {
            text: "after".into(),
        },
    )
    .await;
    assert_eq!(
        next_where(&mut reader, |m| matches!(m, ServerMessage::Chat { .. })).await,
        ServerMessage::Chat {
            handle: "writer".into(),
            text: "after".into()
        }
    );
}

async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<EditorEvent>) -> EditorEvent {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_editor_client_mirrors_document() {
    let (server, url) = default_server().await;
    let (mut raw, _) = join(&url, "bob").await;

    let mut client = EditorClient::new("alice", &url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, EditorEvent::Connected);
    loop {
        if let EditorEvent::Started { roster, .. } = next_event(&mut events).await {
            assert_eq!(roster.values().next().map(String::as_str), Some("bob"));
            break;
        }
    }

    client.draw(0, pack(b'a', 1, 0)).await.unwrap();
    client.draw(0, pack(b'b', 2, 0)).await.unwrap();
    client.draw(1, pack(b'c', 3, 0)).await.unwrap();
    assert_eq!(client.flush().await.unwrap(), 2);

    let seen = next_where(&mut raw, |m| matches!(m, ServerMessage::Draw(_))).await;
    assert_eq!(
        seen,
        ServerMessage::Draw(vec![
            Delta::new(0, pack(b'b', 2, 0)),
            Delta::new(1, pack(b'c', 3, 0)),
        ])
    );

    // A remote draw lands in the mirror.
    send(&mut raw, ClientMessage::Draw(vec![Delta::new(5, pack(b'z', 4, 0))])).await;
    loop {
        if let EditorEvent::Draw(deltas) = next_event(&mut events).await {
            if deltas.iter().any(|d| d.index == 5) {
                break;
            }
        }
    }
    assert_eq!(client.cell(5).await, Some(pack(b'z', 4, 0)));
    assert_eq!(client.cell(0).await, Some(pack(b'b', 2, 0)));

    let stored = server.broadcaster().with_store(|s| s.document().cell(1)).await;
    assert_eq!(stored, Some(pack(b'c', 3, 0)));
}

#[tokio::test]
async fn test_editor_client_replays_offline_edits() {
    let (server, url) = default_server().await;

    let mut client = EditorClient::new("alice", &url);
    client.draw(42, pack(b'q', 9, 1)).await.unwrap();
    assert_eq!(client.pending_edits().await, 1);
    client.connect().await.unwrap();
    assert_eq!(client.pending_edits().await, 0);

    timeout(WAIT, async {
        loop {
            let cell = server.broadcaster().with_store(|s| s.document().cell(42)).await;
            if cell == Some(pack(b'q', 9, 1)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
