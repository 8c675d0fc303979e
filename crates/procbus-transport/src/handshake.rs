//! Registration handshake.
//!
//! Immediately after connecting, the initiating side writes its process id as
//! a 4-byte big-endian integer. The accepting side reads exactly those 4 bytes
//! before treating the connection as usable. The claimed id is not verified.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TransportError};

/// Size of the handshake on the wire.
pub const HANDSHAKE_SIZE: usize = 4;

/// Announce `process_id` to the accepting side.
pub async fn send_process_id<W>(stream: &mut W, process_id: u32) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&process_id.to_be_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read the peer's claimed process id, giving up after `timeout`.
pub async fn recv_process_id<R>(stream: &mut R, timeout: Duration) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_SIZE];
    match tokio::time::timeout(timeout, stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Ok(u32::from_be_bytes(buf)),
        Ok(Err(err)) => Err(TransportError::Io(err)),
        Err(_) => Err(TransportError::HandshakeTimeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_id_roundtrip_is_big_endian() {
        let (mut left, mut right) = tokio::io::duplex(16);

        send_process_id(&mut left, 0x0102_0304).await.unwrap();
        let mut raw = [0u8; HANDSHAKE_SIZE];
        right.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [1, 2, 3, 4]);

        send_process_id(&mut left, 7).await.unwrap();
        let pid = recv_process_id(&mut right, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pid, 7);
    }

    #[tokio::test]
    async fn short_handshake_is_an_io_error() {
        let (mut left, mut right) = tokio::io::duplex(16);
        left.write_all(&[0, 1]).await.unwrap();
        drop(left);

        let err = recv_process_id(&mut right, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (_left, mut right) = tokio::io::duplex(16);

        let err = recv_process_id(&mut right, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::HandshakeTimeout(_)));
    }
}
