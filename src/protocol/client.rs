use crate::core::error::ProtocolError;
use crate::protocol::codec::{connect, read_envelope, write_envelope, Connection, WireLimits};
use crate::protocol::message::{
    Announcement, Envelope, Leave, MessageType, TransferRequest, TransferResponse,
};

/// Send PING and wait for PONG
pub async fn ping(addr: &str, sender: &str, limits: &WireLimits) -> Result<(), ProtocolError> {
    let mut conn = connect(addr, limits).await?;
    write_envelope(&mut conn, &Envelope::bare(MessageType::Ping, sender), limits).await?;
    read_envelope(&mut conn, limits).await?.expect(MessageType::Pong)?;
    Ok(())
}

/// Announce this node to a remote peer; the remote acknowledges with PONG
pub async fn announce(
    addr: &str,
    sender: &str,
    announcement: &Announcement,
    limits: &WireLimits,
) -> Result<(), ProtocolError> {
    let mut conn = connect(addr, limits).await?;
    let env = Envelope::new(MessageType::Announce, sender, announcement)?;
    write_envelope(&mut conn, &env, limits).await?;
    read_envelope(&mut conn, limits).await?.expect(MessageType::Pong)?;
    Ok(())
}

pub async fn leave(addr: &str, sender: &str, limits: &WireLimits) -> Result<(), ProtocolError> {
    let mut conn = connect(addr, limits).await?;
    let env = Envelope::new(
        MessageType::Leave,
        sender,
        &Leave {
            peer_id: sender.to_string(),
        },
    )?;
    write_envelope(&mut conn, &env, limits).await
}

/// Ask a remote peer for a file
///
/// On acceptance the returned connection is positioned at the first byte of
/// the file body.
pub async fn request_file(
    addr: &str,
    request: &TransferRequest,
    limits: &WireLimits,
) -> Result<(Connection, TransferResponse), ProtocolError> {
    let mut conn = connect(addr, limits).await?;
    let env = Envelope::new(MessageType::Request, &request.requester_id, request)?;
    write_envelope(&mut conn, &env, limits).await?;

    let response: TransferResponse = read_envelope(&mut conn, limits)
        .await?
        .expect(MessageType::Response)?
        .payload()?;

    Ok((conn, response))
}
