//! Wire framing helpers: newline-terminated command lines, the control
//! tokens exchanged around them, and length-prefixed MessagePack blobs for
//! structured payloads.

use bytes::{Buf, BytesMut};
use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ring::ChordKey;
use crate::utils::CarillonError;

/// Acknowledgement token for completed commands.
pub const DONE: &str = "done";
/// Token inviting the peer to send the next blob.
pub const SEND: &str = "send";
/// Connection teardown token (request and acknowledgement).
pub const CLOSE: &str = "close";
/// Response to an unrecognized command; the connection stays open.
pub const INVALID: &str = "invalid";

/// Reads one newline-terminated UTF-8 line, buffering partial arrivals in
/// `read_buf` across calls. Returns `Ok(None)` on clean end-of-stream.
pub async fn read_line<Conn>(
    conn: &mut Conn,
    read_buf: &mut BytesMut,
) -> Result<Option<String>, CarillonError>
where
    Conn: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = read_buf.iter().position(|&b| b == b'\n') {
            let line = read_buf.split_to(pos + 1);
            let text = String::from_utf8(line[..pos].to_vec())?;
            return Ok(Some(text.trim_end_matches('\r').to_string()));
        }
        let n = conn.read_buf(read_buf).await?;
        if n == 0 {
            if read_buf.is_empty() {
                return Ok(None);
            }
            return Err(CarillonError::msg("connection closed mid-line"));
        }
    }
}

/// Writes one command line (or control token) terminated by a newline.
pub async fn write_line<Conn>(
    conn: &mut Conn,
    line: &str,
) -> Result<(), CarillonError>
where
    Conn: AsyncWrite + Unpin,
{
    conn.write_all(line.as_bytes()).await?;
    conn.write_all(b"\n").await?;
    conn.flush().await?;
    Ok(())
}

/// Reads one length-prefixed blob and decodes it, draining consumed bytes
/// from `read_buf` (which may already hold bytes past a prior line read).
pub async fn read_blob<T, Conn>(
    conn: &mut Conn,
    read_buf: &mut BytesMut,
) -> Result<T, CarillonError>
where
    T: DeserializeOwned,
    Conn: AsyncRead + Unpin,
{
    while read_buf.len() < 8 {
        if conn.read_buf(read_buf).await? == 0 {
            return Err(CarillonError::msg("connection closed awaiting blob"));
        }
    }
    let blob_len = u64::from_be_bytes(read_buf[..8].try_into().unwrap());
    let blob_end = 8 + blob_len as usize;
    while read_buf.len() < blob_end {
        if conn.read_buf(read_buf).await? == 0 {
            return Err(CarillonError::msg("connection closed mid-blob"));
        }
    }
    let obj = decode_from_slice(&read_buf[8..blob_end])?;
    read_buf.advance(blob_end);
    Ok(obj)
}

/// Encodes an object and writes it as one length-prefixed blob.
pub async fn write_blob<T, Conn>(
    conn: &mut Conn,
    obj: &T,
) -> Result<(), CarillonError>
where
    T: Serialize,
    Conn: AsyncWrite + Unpin,
{
    let blob = encode_to_vec(obj)?;
    conn.write_u64(blob.len() as u64).await?; // send length first
    conn.write_all(&blob[..]).await?;
    conn.flush().await?;
    Ok(())
}

/// Writes a ring key as a blob of its 16 big-endian bytes (MessagePack has
/// no native 128-bit integer).
pub async fn write_key_blob<Conn>(
    conn: &mut Conn,
    key: ChordKey,
) -> Result<(), CarillonError>
where
    Conn: AsyncWrite + Unpin,
{
    write_blob(conn, &key.to_be_bytes()).await
}

/// Counterpart of `write_key_blob`.
pub async fn read_key_blob<Conn>(
    conn: &mut Conn,
    read_buf: &mut BytesMut,
) -> Result<ChordKey, CarillonError>
where
    Conn: AsyncRead + Unpin,
{
    let bytes: [u8; 16] = read_blob(conn, read_buf).await?;
    Ok(u128::from_be_bytes(bytes))
}

/// Reads one line and checks it equals the expected control token.
pub async fn expect_token<Conn>(
    conn: &mut Conn,
    read_buf: &mut BytesMut,
    expected: &str,
) -> Result<(), CarillonError>
where
    Conn: AsyncRead + Unpin,
{
    match read_line(conn, read_buf).await? {
        Some(token) if token == expected => Ok(()),
        Some(token) => Err(CarillonError::msg(format!(
            "expected token '{}', got '{}'",
            expected, token
        ))),
        None => Err(CarillonError::msg(format!(
            "expected token '{}', got end-of-stream",
            expected
        ))),
    }
}

#[cfg(test)]
mod wire_tests {
    use super::*;
    use crate::ring::NodeInfo;

    #[tokio::test]
    async fn line_roundtrip_with_buffering() -> Result<(), CarillonError> {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let mut buf = BytesMut::new();
        // two lines arriving back-to-back get split correctly
        write_line(&mut a, "ping").await?;
        a.write_all(b"find_successor 42\nle").await?;
        assert_eq!(read_line(&mut b, &mut buf).await?.unwrap(), "ping");
        assert_eq!(
            read_line(&mut b, &mut buf).await?.unwrap(),
            "find_successor 42"
        );
        // the tail of a partial line waits for the rest
        a.write_all(b"ave\n").await?;
        assert_eq!(read_line(&mut b, &mut buf).await?.unwrap(), "leave");
        drop(a);
        assert_eq!(read_line(&mut b, &mut buf).await?, None);
        Ok(())
    }

    #[test]
    fn blob_roundtrip() -> Result<(), CarillonError> {
        tokio_test::block_on(async {
            let (mut a, mut b) = tokio::io::duplex(4096);
            let mut buf = BytesMut::new();
            let info = NodeInfo::new("127.0.0.1", 8000);
            write_blob(&mut a, &info).await?;
            write_key_blob(&mut a, u128::MAX - 7).await?;
            write_blob(&mut a, &vec!["x".to_string(), "y".to_string()])
                .await?;
            let got: NodeInfo = read_blob(&mut b, &mut buf).await?;
            assert_eq!(got, info);
            assert_eq!(read_key_blob(&mut b, &mut buf).await?, u128::MAX - 7);
            let list: Vec<String> = read_blob(&mut b, &mut buf).await?;
            assert_eq!(list, vec!["x", "y"]);
            Ok(())
        })
    }

    #[test]
    fn token_line_then_blob_share_buffer() -> Result<(), CarillonError> {
        tokio_test::block_on(async {
            let (mut a, mut b) = tokio::io::duplex(4096);
            let mut buf = BytesMut::new();
            write_line(&mut a, SEND).await?;
            write_blob(&mut a, &"payload".to_string()).await?;
            expect_token(&mut b, &mut buf, SEND).await?;
            let payload: String = read_blob(&mut b, &mut buf).await?;
            assert_eq!(payload, "payload");
            Ok(())
        })
    }

    #[tokio::test]
    async fn unexpected_token_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let mut buf = BytesMut::new();
        write_line(&mut a, INVALID).await.unwrap();
        assert!(expect_token(&mut b, &mut buf, DONE).await.is_err());
    }
}
