//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Response, Uri};
use axum::Router;
use tap_proxy::lifecycle::Shutdown;
use tap_proxy::observation::{Observation, ObservationSink};
use tap_proxy::{ForwardingHandler, HttpServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// What an upstream received for one request.
#[derive(Debug)]
pub struct Seen {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Start an upstream that records each request and answers with `respond`.
pub async fn spawn_recording_upstream<F>(respond: F) -> (SocketAddr, mpsc::UnboundedReceiver<Seen>)
where
    F: Fn(&Seen) -> Response<Body> + Clone + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().fallback(move |request: Request<Body>| {
        let tx = tx.clone();
        let respond = respond.clone();
        async move {
            let (parts, body) = request.into_parts();
            let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
            let seen = Seen {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            };
            let response = respond(&seen);
            let _ = tx.send(seen);
            response
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, rx)
}

/// Start a backend that answers every connection with fixed raw bytes and
/// then closes it.
pub async fn start_raw_backend(response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let _ = socket.write_all(response).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start a backend that answers with a chunked body: one `first` chunk at
/// once, then a `more` chunk every 50ms until the connection breaks.
pub async fn start_streaming_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nfirst\r\n";
                if socket.write_all(head).await.is_err() {
                    return;
                }
                for _ in 0..200 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if socket.write_all(b"4\r\nmore\r\n").await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

/// Start a backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An address nothing is listening on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A running proxy instance; shuts down when dropped.
pub struct Proxy {
    pub addr: SocketAddr,
    pub records: mpsc::Receiver<Observation>,
    shutdown: Shutdown,
}

impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait for the next published record.
    pub async fn next_record(&mut self) -> Observation {
        tokio::time::timeout(Duration::from_secs(5), self.records.recv())
            .await
            .expect("no observation published in time")
            .expect("observation channel closed")
    }

    /// Assert nothing further is published within a short grace period.
    pub async fn assert_no_more_records(&mut self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(self.records.try_recv().is_err(), "unexpected extra observation");
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_proxy(target: &str, timeout: Duration) -> Proxy {
    let (sink, records) = ObservationSink::channel(64, Duration::from_secs(1));
    let handler = ForwardingHandler::new(target, timeout, sink).unwrap();
    spawn_proxy_with(handler, records).await
}

pub async fn spawn_proxy_with(handler: ForwardingHandler, records: mpsc::Receiver<Observation>) -> Proxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = HttpServer::from_handler(handler).run(listener, signal).await;
    });

    Proxy {
        addr,
        records,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
}
