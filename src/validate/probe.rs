// ABOUTME: HTTP HEAD probe issued from the operator machine.
// ABOUTME: Any HTTP status counts as a response; only transport failures and timeouts do not.

use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connection to {address} failed: {message}")]
    Connect { address: String, message: String },

    #[error("HTTP exchange with {address} failed: {message}")]
    Http { address: String, message: String },

    #[error("no response from {address} within {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}

/// `HEAD /` against `host:port`.
pub async fn head(host: &str, port: u16, timeout: Duration) -> Result<StatusCode, ProbeError> {
    let address = format!("{}:{}", host, port);
    match tokio::time::timeout(timeout, exchange(host, &address)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout { address, timeout }),
    }
}

async fn exchange(host: &str, address: &str) -> Result<StatusCode, ProbeError> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| ProbeError::Connect {
            address: address.to_string(),
            message: e.to_string(),
        })?;
    let http_err = |e: hyper::Error| ProbeError::Http {
        address: address.to_string(),
        message: e.to_string(),
    };

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(http_err)?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("probe connection closed: {}", e);
        }
    });

    let req = hyper::Request::builder()
        .method("HEAD")
        .uri("/")
        .header("Host", host)
        .header("User-Agent", concat!("slipway/", env!("CARGO_PKG_VERSION")))
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| ProbeError::Http {
            address: address.to_string(),
            message: e.to_string(),
        })?;

    let resp = sender.send_request(req).await.map_err(http_err)?;
    Ok(resp.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn error_status_still_counts_as_response() {
        let port = serve_once(b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 0\r\n\r\n").await;
        let status = head("127.0.0.1", port, Duration::from_secs(2)).await.unwrap();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn closed_port_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(matches!(
            head("127.0.0.1", port, Duration::from_secs(2)).await,
            Err(ProbeError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        assert!(matches!(
            head("127.0.0.1", port, Duration::from_millis(200)).await,
            Err(ProbeError::Timeout { .. })
        ));
    }
}
