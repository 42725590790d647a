use std::sync::Arc;
use std::time::Duration;

use picoweb::app::{App, WELCOME};
use picoweb::config::Config;
use picoweb::events::EventManager;
use picoweb::http::HttpClient;
use picoweb::net::{ClientTls, Connection, ServerIdentity, TransportMode};
use picoweb::router::Router;
use picoweb::server::listener::Listener;
use picoweb::server::Server;
use picoweb::storage::{LocalStorage, Storage};

const CA: &str = include_str!("fixtures/ca.pem");
const CERT: &str = include_str!("fixtures/server.pem");
const KEY: &str = include_str!("fixtures/server.key");

fn identity() -> ServerIdentity {
    ServerIdentity::from_pem(CERT, KEY).unwrap()
}

fn trust() -> ClientTls {
    ClientTls::from_root_ca_pem(CA).unwrap().with_handshake_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_secured_connection_round_trip() {
    let listener = Listener::bind("127.0.0.1:0", Some(identity())).await.unwrap();
    assert!(listener.is_secured());
    let port = listener.local_addr().unwrap().port();

    let tls = trust();
    let (client, server) = tokio::join!(
        Connection::connect("127.0.0.1", port, Some(&tls)),
        listener.accept(Duration::from_secs(2)),
    );
    let mut client = client.unwrap();
    let mut server = server.unwrap().unwrap();

    assert_eq!(client.mode(), Some(TransportMode::Secured));
    assert!(server.is_secured());
    assert_eq!(client.hostname(), Some("127.0.0.1"));

    // Larger than one TLS record, so reads are served from buffered data.
    let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        client.send(&payload).await.unwrap();
        client
    });

    let mut received = Vec::new();
    let mut buf = [0u8; 700];
    while received.len() < expected.len() {
        let n = server.receive(&mut buf, Duration::from_secs(2)).await.unwrap();
        assert!(n > 0);
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, expected);

    let mut client = writer.await.unwrap();
    client.close().await;
    assert_eq!(server.receive(&mut buf, Duration::from_secs(2)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_authority_is_rejected() {
    let listener = Listener::bind("127.0.0.1:0", Some(identity())).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // A leaf certificate is not a trust anchor for itself.
    let wrong = ClientTls::from_root_ca_pem(CERT).unwrap();
    let (client, server) = tokio::join!(
        Connection::connect("127.0.0.1", port, Some(&wrong)),
        listener.accept(Duration::from_secs(2)),
    );

    assert!(client.is_err());
    assert!(server.is_err());
}

#[tokio::test]
async fn test_https_server_end_to_end() {
    let cfg = Config::from_yaml("server:\n  listen_addr: 127.0.0.1:0\n  handshake_timeout_ms: 1000\n").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()));
    let events = Arc::new(EventManager::default());
    let router = Arc::new(Router::default());
    App::new(Arc::clone(&storage), Arc::clone(&events), "/programs.json")
        .register(&router)
        .await
        .unwrap();

    let handle = Server::new(&cfg, router, events, storage).with_tls(identity()).start().await.unwrap();
    let port = handle.local_addr().port();

    // A plaintext client fails the handshake; the server keeps going.
    assert!(HttpClient::new().get(&format!("http://127.0.0.1:{port}/hello")).await.is_err());

    let client = HttpClient::new().with_root_ca(trust());
    let res = client.get(&format!("https://127.0.0.1:{port}/hello")).await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.text(), WELCOME);

    let res = client.get(&format!("https://127.0.0.1:{port}/api/v1/programs")).await.unwrap();
    assert_eq!(res.text(), r#"{"success":true}"#);

    handle.shutdown().await;
}
