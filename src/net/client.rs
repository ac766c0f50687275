//! Outbound peer exchanges. Every call opens a short-lived connection,
//! runs one token/blob exchange, and closes; the whole exchange runs under
//! a single timeout scaled to the operation's criticality.

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use crate::net::wire::{self, CLOSE, DONE, SEND};
use crate::ring::{ChordKey, Value};
use crate::utils::CarillonError;

async fn connect(host: &str, port: u16) -> Result<TcpStream, CarillonError> {
    let conn = TcpStream::connect((host, port)).await?;
    conn.set_nodelay(true)?;
    Ok(conn)
}

/// Sends an ack-only command and runs the full close handshake.
/// Used for ping / initialize_network / join / notify / debug verbs.
pub async fn send_command(
    host: &str,
    port: u16,
    command: &str,
    dur: Duration,
) -> Result<(), CarillonError> {
    timeout(dur, async {
        let mut conn = connect(host, port).await?;
        let mut buf = BytesMut::new();
        wire::write_line(&mut conn, command).await?;
        wire::expect_token(&mut conn, &mut buf, DONE).await?;
        wire::write_line(&mut conn, CLOSE).await?;
        wire::expect_token(&mut conn, &mut buf, CLOSE).await?;
        Ok(())
    })
    .await?
}

/// Sends a one-way command: awaits only the ack, then drops the
/// connection. Used for propagate_lookup dispatch.
pub async fn send_command_async(
    host: &str,
    port: u16,
    command: &str,
    dur: Duration,
) -> Result<(), CarillonError> {
    timeout(dur, async {
        let mut conn = connect(host, port).await?;
        let mut buf = BytesMut::new();
        wire::write_line(&mut conn, command).await?;
        wire::expect_token(&mut conn, &mut buf, DONE).await?;
        Ok(())
    })
    .await?
}

/// Sends a command whose response is one serialized blob, runs the close
/// handshake, and returns the decoded object. Used for the routing verbs.
pub async fn send_command_with_response<T>(
    host: &str,
    port: u16,
    command: &str,
    dur: Duration,
) -> Result<T, CarillonError>
where
    T: DeserializeOwned,
{
    timeout(dur, async {
        let mut conn = connect(host, port).await?;
        let mut buf = BytesMut::new();
        wire::write_line(&mut conn, command).await?;
        let obj: T = wire::read_blob(&mut conn, &mut buf).await?;
        wire::write_line(&mut conn, CLOSE).await?;
        wire::expect_token(&mut conn, &mut buf, CLOSE).await?;
        Ok(obj)
    })
    .await?
}

/// Runs the three-blob store exchange. `verb` selects the ownership-checked
/// path (`store`) or the unconditional handoff path (`transfer_receive`).
pub async fn send_store(
    host: &str,
    port: u16,
    verb: &str,
    chord_key: ChordKey,
    data_key: &str,
    value: &str,
    dur: Duration,
) -> Result<(), CarillonError> {
    timeout(dur, async {
        let mut conn = connect(host, port).await?;
        let mut buf = BytesMut::new();
        wire::write_line(&mut conn, verb).await?;
        wire::expect_token(&mut conn, &mut buf, SEND).await?;
        wire::write_key_blob(&mut conn, chord_key).await?;
        wire::expect_token(&mut conn, &mut buf, SEND).await?;
        wire::write_blob(&mut conn, &data_key.to_string()).await?;
        wire::expect_token(&mut conn, &mut buf, SEND).await?;
        wire::write_blob(&mut conn, &value.to_string()).await?;
        wire::expect_token(&mut conn, &mut buf, CLOSE).await?;
        wire::write_line(&mut conn, CLOSE).await?;
        wire::expect_token(&mut conn, &mut buf, CLOSE).await?;
        Ok(())
    })
    .await?
}

/// Runs the two-blob lookup exchange and returns the result list.
pub async fn send_lookup(
    host: &str,
    port: u16,
    chord_key: ChordKey,
    data_key: &str,
    dur: Duration,
) -> Result<Vec<Value>, CarillonError> {
    timeout(dur, async {
        let mut conn = connect(host, port).await?;
        let mut buf = BytesMut::new();
        wire::write_line(&mut conn, "lookup").await?;
        wire::expect_token(&mut conn, &mut buf, SEND).await?;
        wire::write_key_blob(&mut conn, chord_key).await?;
        wire::expect_token(&mut conn, &mut buf, SEND).await?;
        wire::write_blob(&mut conn, &data_key.to_string()).await?;
        let values: Vec<Value> = wire::read_blob(&mut conn, &mut buf).await?;
        wire::write_line(&mut conn, CLOSE).await?;
        wire::expect_token(&mut conn, &mut buf, CLOSE).await?;
        Ok(values)
    })
    .await?
}

/// Pushes a lookup result back to the original caller's listener,
/// fulfilling its registered rendezvous promise.
pub async fn deliver_lookup_result(
    host: &str,
    port: u16,
    lookup_id: u64,
    values: &[Value],
    dur: Duration,
) -> Result<(), CarillonError> {
    timeout(dur, async {
        let mut conn = connect(host, port).await?;
        let mut buf = BytesMut::new();
        wire::write_line(&mut conn, &format!("lookup_result {}", lookup_id))
            .await?;
        wire::expect_token(&mut conn, &mut buf, SEND).await?;
        wire::write_blob(&mut conn, &values.to_vec()).await?;
        wire::expect_token(&mut conn, &mut buf, DONE).await?;
        wire::write_line(&mut conn, CLOSE).await?;
        wire::expect_token(&mut conn, &mut buf, CLOSE).await?;
        Ok(())
    })
    .await?
}
