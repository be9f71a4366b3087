use futures_util::{SinkExt, StreamExt};
use portcullis::realtime::{Connection, Connector, TransportError};
use portcullis_ws::WsConnector;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Accept one socket, push `greeting`, echo text until the client closes.
async fn echo_server(greeting: &'static str) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(Message::Ping(vec![1])).await.unwrap();
        ws.send(Message::Text(greeting.to_string())).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) => ws.send(Message::Text(text)).await.unwrap(),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });
    Url::parse(&format!("ws://{addr}/api/ws/switch-queue?token=t")).unwrap()
}

#[tokio::test]
async fn exchanges_text_frames() {
    let url = echo_server(r#"{"type":"queue_status","pendingCount":2}"#).await;
    let mut connection = WsConnector::new().connect(&url).await.unwrap();

    let first = connection.recv().await.unwrap().unwrap();
    assert!(first.contains("queue_status"));

    connection.send_text(r#"{"type":"ping"}"#).await.unwrap();
    assert_eq!(connection.recv().await.unwrap().unwrap(), r#"{"type":"ping"}"#);

    connection.close().await.unwrap();
    assert!(connection.recv().await.is_none());
    assert!(matches!(connection.send_text("x").await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn peer_close_ends_the_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.close(None).await.unwrap();
        // drain until the client acknowledges
        while ws.next().await.is_some() {}
    });

    let url = Url::parse(&format!("ws://{addr}/")).unwrap();
    let mut connection = WsConnector::new().connect(&url).await.unwrap();
    assert!(connection.recv().await.is_none());
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("ws://{addr}/")).unwrap();
    let connector = WsConnector::new().with_connect_timeout(Duration::from_secs(2));
    let err = connector.connect(&url).await.err().unwrap();
    assert!(matches!(err, TransportError::Connect(_)));
}
