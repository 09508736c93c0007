//! Bare TCP endpoints that misbehave below the HTTP layer.
//!
//! Each accepted connection is counted, so tests can assert how many attempts
//! the client made.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Response head promising more body bytes than are sent.
const TRUNCATED_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"a\":";

/// How the endpoint treats each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Read the request, then close without answering.
    Hangup,
    /// Answer with a head and part of the body, then close.
    TruncatedBody,
}

/// A local TCP endpoint with a fixed [`Behavior`].
#[derive(Debug)]
pub struct RawServer {
    url: String,
    accepted: Arc<AtomicUsize>,
}

impl RawServer {
    /// Binds to an ephemeral port and starts accepting.
    ///
    /// # Errors
    /// Returns error if the listener cannot be bound.
    pub async fn start(behavior: Behavior) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, behavior));
            }
        });

        Ok(Self { url, accepted })
    }

    /// Base URL to configure the client with.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve(mut stream: TcpStream, behavior: Behavior) {
    // Drain the request head so closing does not reset unread data.
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    if behavior == Behavior::TruncatedBody {
        let _ = stream.write_all(TRUNCATED_RESPONSE).await;
        let _ = stream.flush().await;
    }
    let _ = stream.shutdown().await;
    debug!(?behavior, "raw connection closed");
}
