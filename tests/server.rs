//! Accept loop behavior

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use zero_mysql_proxy::ConnState;
use zero_mysql_proxy::server::Server;

use common::*;

async fn start(server: &Arc<Server>) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = Arc::clone(server);
    let running = tokio::spawn(async move { server.serve(listener).await.unwrap() });
    (addr, running)
}

#[tokio::test(flavor = "multi_thread")]
async fn keeps_accepting_after_sessions_end() {
    let server = Arc::new(Server::new(opts(&closed_addr())));
    let (addr, running) = start(&server).await;

    for round in 0..3 {
        let mut client = TcpStream::connect(&addr).await.unwrap();
        client
            .write_all(format!("hello {round}\n").as_bytes())
            .await
            .unwrap();
        client.write_all(&[0xFF, 0xFE, b'\n']).await.unwrap();
        client.shutdown().await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!running.is_finished());
    TcpStream::connect(&addr).await.unwrap();

    server.stop();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();

    // the backend was unreachable, serving went on regardless
    assert_eq!(server.backend().lock().unwrap().state(), ConnState::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn brings_up_the_backend() {
    let (backend_addr, backend) = spawn_backend(vec![session(|mut stream| {
        accept_login(&mut stream);
        let quit = expect_command(&mut stream, 0x01);
        assert_eq!(quit, vec![0x01]);
        wait_for_close(&mut stream);
    })]);

    let server = Arc::new(Server::new(opts(&backend_addr)));
    let (addr, running) = start(&server).await;

    // a client connection is accepted once the backend is up
    TcpStream::connect(&addr).await.unwrap();
    server.stop();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();

    let backend_conn = server.backend();
    let state = tokio::task::spawn_blocking(move || {
        let mut conn = backend_conn.lock().unwrap();
        let state = conn.state();
        conn.close();
        state
    })
    .await
    .unwrap();
    assert_eq!(state, ConnState::Ready);

    tokio::task::spawn_blocking(move || backend.join().unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn stop_before_serving() {
    let server = Arc::new(Server::new(opts(&closed_addr())));
    server.stop();
    let (_addr, running) = start(&server).await;
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
}
