// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP print client (JetDirect, port 9100).
//
// Does what a host spooler does when it prints to a raw socket: connect, dump
// the bytes, close. Used by `virtprint send` to smoke-test a running listener
// and by the end-to-end tests.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use virtprint_core::error::{Result, VirtprintError};

/// Bytes written per call; progress is logged per chunk.
const CHUNK_SIZE: usize = 8192;

/// Send `document_bytes` to `addr` (`host:port`) and close the connection.
///
/// `timeout` bounds the connect and each write. Returns the number of bytes
/// sent.
pub async fn send_raw(addr: &str, document_bytes: &[u8], timeout: Duration) -> Result<usize> {
    info!(%addr, total = document_bytes.len(), "connecting via raw TCP");

    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            VirtprintError::Connection(format!(
                "raw TCP connection to {addr} timed out after {} ms",
                timeout.as_millis()
            ))
        })?
        .map_err(|e| VirtprintError::Connection(format!("raw TCP connect to {addr}: {e}")))?;

    let mut sent = 0;
    for chunk in document_bytes.chunks(CHUNK_SIZE) {
        tokio::time::timeout(timeout, stream.write_all(chunk))
            .await
            .map_err(|_| {
                VirtprintError::Connection(format!("raw TCP send stalled at byte {sent}"))
            })?
            .map_err(|e| {
                VirtprintError::Connection(format!("raw TCP send failed at byte {sent}: {e}"))
            })?;
        sent += chunk.len();
        debug!(sent, total = document_bytes.len(), "raw TCP progress");
    }

    stream
        .flush()
        .await
        .map_err(|e| VirtprintError::Connection(format!("raw TCP flush: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| VirtprintError::Connection(format!("raw TCP shutdown: {e}")))?;

    info!(total = sent, "raw TCP print job sent");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_all_bytes_then_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.expect("read");
            received
        });

        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let sent = send_raw(&addr, &payload, Duration::from_secs(5))
            .await
            .expect("send");
        assert_eq!(sent, payload.len());
        assert_eq!(server.await.expect("server task"), payload);
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let err = send_raw(&format!("127.0.0.1:{port}"), b"%!PS", Duration::from_secs(5))
            .await
            .expect_err("nothing listening");
        assert!(matches!(err, VirtprintError::Connection(_)));
    }
}
