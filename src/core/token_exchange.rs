use crate::core::error::{ResolveError, ResolveResult};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Largest response the token server ever sends.
const MAX_RESPONSE: usize = 200;

/// Client for the binary token-minting protocol: send the hex-decoded
/// token bytes over a raw TCP connection, read one length-prefixed frame
/// back, XOR-decode it with a fixed 4-byte keystream.
///
/// Host, port and keystream are protocol constants dictated by the
/// upstream; they are injected here only so tests can stand up a loopback
/// server.
pub struct TokenExchange {
    pub host: String,
    pub port: u16,
    pub keystream: [u8; 4],
    pub timeout: Duration,
}

impl TokenExchange {
    pub fn new(host: impl Into<String>, port: u16, keystream: [u8; 4]) -> Self {
        Self { host: host.into(), port, keystream, timeout: Duration::from_secs(10) }
    }

    /// Exchange a hex-encoded session token for the raw token string.
    /// Transport errors and malformed frames are both fatal; this layer
    /// never retries.
    pub async fn exchange(&self, encoded_token: &str) -> ResolveResult<String> {
        let payload = hex::decode(encoded_token)
            .map_err(|e| ResolveError::protocol(format!("token is not valid hex: {e}")))?;

        let addr = format!("{}:{}", self.host, self.port);
        debug!("exchanging token at {}", addr);

        let mut sock = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| timeout_err("token server connect timed out"))??;

        // The socket is dropped on every path out of this scope, including
        // protocol-validation failures below.
        let data = timeout(self.timeout, async {
            sock.write_all(&payload).await?;
            let mut buf = vec![0u8; MAX_RESPONSE];
            let mut filled = 0;
            loop {
                let n = sock.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
                if filled == MAX_RESPONSE {
                    break;
                }
                // The length prefix marks the end of the frame; the server
                // does not always close the connection after sending it.
                if filled >= 2 {
                    let declared = u16::from_le_bytes([buf[0], buf[1]]) as usize;
                    if filled >= declared + 2 {
                        break;
                    }
                }
            }
            buf.truncate(filled);
            Ok::<_, std::io::Error>(buf)
        })
        .await
        .map_err(|_| timeout_err("token server read timed out"))??;

        decode_frame(&data, &self.keystream)
    }
}

fn timeout_err(msg: &str) -> ResolveError {
    ResolveError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, msg))
}

/// Decode one response frame: a little-endian u16 length prefix that must
/// equal the remaining byte count, then the token XORed with the cyclic
/// keystream.
pub fn decode_frame(data: &[u8], keystream: &[u8; 4]) -> ResolveResult<String> {
    if data.len() < 2 {
        return Err(ResolveError::protocol("failed to fetch real token"));
    }
    let declared = u16::from_le_bytes([data[0], data[1]]) as usize;
    if declared + 2 != data.len() {
        return Err(ResolveError::protocol("failed to fetch real token"));
    }
    Ok(data[2..]
        .iter()
        .enumerate()
        .map(|(i, b)| char::from(b ^ keystream[i % 4]))
        .collect())
}
