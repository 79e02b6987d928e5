use crate::core::config::TransferConfig;
use crate::core::error::ProtocolError;
use crate::protocol::message::Envelope;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

/// A peer connection: buffered for line reads, writable through the buffer
pub type Connection = BufReader<TcpStream>;

/// Timeouts and limits applied to every wire operation
#[derive(Debug, Clone, Copy)]
pub struct WireLimits {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for WireLimits {
    fn from(config: &TransferConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout),
            read_timeout: Duration::from_secs(config.io_timeout),
            write_timeout: Duration::from_secs(config.io_timeout),
            max_message_size: config.max_message_size,
        }
    }
}

pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    limits: &WireLimits,
) -> Result<Connection, ProtocolError> {
    let stream = timeout(limits.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ProtocolError::Timeout("connect"))??;
    stream.set_nodelay(true)?;
    Ok(BufReader::new(stream))
}

/// Serialize one envelope as a JSON line and flush it
pub async fn write_envelope<W>(
    writer: &mut W,
    envelope: &Envelope,
    limits: &WireLimits,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(envelope)?;
    if line.len() + 1 > limits.max_message_size {
        return Err(ProtocolError::MessageTooLarge {
            size: line.len() + 1,
            max: limits.max_message_size,
        });
    }
    line.push(b'\n');

    timeout(limits.write_timeout, async {
        writer.write_all(&line).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| ProtocolError::Timeout("write"))??;

    Ok(())
}

/// Read one JSON line, refusing lines longer than the message limit
pub async fn read_envelope<R>(
    reader: &mut R,
    limits: &WireLimits,
) -> Result<Envelope, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    let limit = limits.max_message_size as u64;

    let read = timeout(limits.read_timeout, async {
        let mut bounded = (&mut *reader).take(limit);
        bounded.read_until(b'\n', &mut buf).await
    })
    .await
    .map_err(|_| ProtocolError::Timeout("read"))??;

    if read == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }

    if buf.last() != Some(&b'\n') {
        if buf.len() as u64 >= limit {
            return Err(ProtocolError::MessageTooLarge {
                size: buf.len(),
                max: limits.max_message_size,
            });
        }
        return Err(ProtocolError::ConnectionClosed);
    }

    Ok(serde_json::from_slice(&buf[..buf.len() - 1])?)
}
