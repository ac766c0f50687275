//! Per-connection protocol dispatcher: reads command lines, invokes the
//! matching ring operation, and writes back tokens or blobs.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::TcpStream;

use crate::net::wire::{self, CLOSE, DONE, INVALID, SEND};
use crate::node::NodeInner;
use crate::ring::{DataKey, NodeId, NodeInfo, Value};
use crate::utils::CarillonError;

/// What the dispatcher does with the connection after one command.
enum Flow {
    /// Keep reading commands on this connection.
    Continue,
    /// Close this connection; the node keeps serving others.
    CloseConn,
    /// Close this connection and stop the node's serve loop (leave).
    Shutdown,
}

/// Serves one inbound connection until the peer closes it or a command
/// decides otherwise.
pub(crate) async fn serve_connection(
    node: Arc<NodeInner>,
    mut conn: TcpStream,
    peer_addr: SocketAddr,
) {
    let mut read_buf = BytesMut::with_capacity(4096);
    loop {
        let line = match wire::read_line(&mut conn, &mut read_buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break, // peer hung up cleanly
            Err(e) => {
                pf_debug!("read error from {}: {}", peer_addr, e);
                break;
            }
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        match handle_command(&node, &tokens, &mut conn, &mut read_buf).await {
            Ok(Flow::Continue) => continue,
            Ok(Flow::CloseConn) => break,
            Ok(Flow::Shutdown) => {
                node.shutdown();
                break;
            }
            Err(e) => {
                pf_debug!(
                    "error handling '{}' from {}: {}",
                    tokens[0],
                    peer_addr,
                    e
                );
                break;
            }
        }
    }
}

/// Interprets one whitespace-split command, running its exchange on `conn`.
async fn handle_command(
    node: &Arc<NodeInner>,
    tokens: &[&str],
    conn: &mut TcpStream,
    read_buf: &mut BytesMut,
) -> Result<Flow, CarillonError> {
    match tokens[0] {
        "ping" => {
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        "find_successor" => {
            let id = parse_id(tokens, 1)?;
            let info = node.find_successor(id).await?;
            wire::write_blob(conn, &info).await?;
            Ok(Flow::Continue)
        }

        "find_predecessor" => {
            let id = parse_id(tokens, 1)?;
            let info = node.find_predecessor(id).await?;
            wire::write_blob(conn, &info).await?;
            Ok(Flow::Continue)
        }

        // the verb keeps its historical wire spelling
        "closest_preceeding_finger" => {
            let id = parse_id(tokens, 1)?;
            let info = {
                let state = node.state.lock().await;
                state.finger_table.closest_preceding(&node.me, id)
            };
            wire::write_blob(conn, &info).await?;
            Ok(Flow::Continue)
        }

        "get_your_successor" => {
            let info = { node.state.lock().await.successor() };
            wire::write_blob(conn, &info).await?;
            Ok(Flow::Continue)
        }

        "get_your_predecessor" => {
            let info = { node.state.lock().await.predecessor.clone() };
            wire::write_blob(conn, &info).await?;
            Ok(Flow::Continue)
        }

        "initialize_network" => {
            NodeInner::initialize_network(node).await;
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        "join" => {
            if tokens.len() < 3 {
                wire::write_line(conn, INVALID).await?;
                return Ok(Flow::Continue);
            }
            let host = tokens[1].to_string();
            let port: u16 = tokens[2].parse()?;
            // a failed join leaves the node isolated; ack either way
            if let Err(e) = NodeInner::join(node, &host, port).await {
                pf_error!("join via {}:{} failed: {}", host, port, e);
            }
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        "notify" => {
            if tokens.len() < 4 {
                wire::write_line(conn, INVALID).await?;
                return Ok(Flow::Continue);
            }
            let id = parse_id(tokens, 1)?;
            let host = tokens[2].to_string();
            let port: u16 = tokens[3].parse()?;
            node.notify(NodeInfo::with_id(id, host, port)).await;
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        "leave" => {
            node.leave().await;
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Shutdown)
        }

        "store" => {
            if node.is_leaving() {
                // refuse so the sender keeps its copy
                return Err(CarillonError::msg("node is leaving"));
            }
            let (chord_key, data_key, value) =
                read_store_blobs(conn, read_buf).await?;
            node.store(chord_key, data_key, value).await?;
            wire::write_line(conn, CLOSE).await?;
            Ok(Flow::Continue)
        }

        "transfer_receive" => {
            if node.is_leaving() {
                // refuse so the sender keeps its copy
                return Err(CarillonError::msg("node is leaving"));
            }
            let (chord_key, data_key, value) =
                read_store_blobs(conn, read_buf).await?;
            node.transfer_receive(chord_key, data_key, value).await;
            wire::write_line(conn, CLOSE).await?;
            Ok(Flow::Continue)
        }

        "lookup" => {
            wire::write_line(conn, SEND).await?;
            let chord_key = wire::read_key_blob(conn, read_buf).await?;
            wire::write_line(conn, SEND).await?;
            let data_key: DataKey = wire::read_blob(conn, read_buf).await?;
            let values = node.lookup(chord_key, &data_key).await?;
            wire::write_blob(conn, &values).await?;
            Ok(Flow::Continue)
        }

        "propagate_lookup" => {
            if tokens.len() < 6 {
                wire::write_line(conn, INVALID).await?;
                return Ok(Flow::Continue);
            }
            let chord_key = parse_id(tokens, 1)?;
            let data_key = tokens[2].to_string();
            let caller_host = tokens[3].to_string();
            let caller_port: u16 = tokens[4].parse()?;
            let lookup_id: u64 = tokens[5].parse()?;
            wire::write_line(conn, DONE).await?;
            // forwarding/delivery continues past this connection's lifetime
            let node = node.clone();
            tokio::spawn(async move {
                node.propagate_lookup(
                    chord_key,
                    data_key,
                    caller_host,
                    caller_port,
                    lookup_id,
                )
                .await;
            });
            Ok(Flow::CloseConn)
        }

        "lookup_result" => {
            let lookup_id: u64 = match tokens.get(1) {
                Some(token) => token.parse()?,
                None => {
                    wire::write_line(conn, INVALID).await?;
                    return Ok(Flow::Continue);
                }
            };
            wire::write_line(conn, SEND).await?;
            let values: Vec<Value> = wire::read_blob(conn, read_buf).await?;
            node.fulfill_lookup(lookup_id, values).await;
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        "close" => {
            wire::write_line(conn, CLOSE).await?;
            Ok(Flow::CloseConn)
        }

        // debug introspection
        "get_self" => {
            pf_info!("self: {}", node.me);
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        "get_finger_table" => {
            let state = node.state.lock().await;
            match tokens.get(1) {
                Some(token) => {
                    let idx: usize = token.parse()?;
                    if idx < state.finger_table.len() {
                        pf_info!("finger[{}]: {}", idx, state.finger_table.get(idx));
                    }
                }
                None => {
                    for idx in 0..state.finger_table.len() {
                        pf_info!("finger[{}]: {}", idx, state.finger_table.get(idx));
                    }
                }
            }
            drop(state);
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        "get_successor_list" => {
            let state = node.state.lock().await;
            match tokens.get(1) {
                Some(token) => {
                    let idx: usize = token.parse()?;
                    if idx < state.successor_list.len() {
                        pf_info!("successor[{}]: {}", idx, state.successor_list[idx]);
                    }
                }
                None => {
                    for (idx, info) in state.successor_list.iter().enumerate() {
                        pf_info!("successor[{}]: {}", idx, info);
                    }
                }
            }
            drop(state);
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        "get_predecessor" => {
            let info = { node.state.lock().await.predecessor.clone() };
            pf_info!("predecessor: {}", info);
            wire::write_line(conn, DONE).await?;
            Ok(Flow::Continue)
        }

        _ => {
            wire::write_line(conn, INVALID).await?;
            Ok(Flow::Continue)
        }
    }
}

/// Parses a ring id argument (decimal) at `tokens[idx]`.
fn parse_id(tokens: &[&str], idx: usize) -> Result<NodeId, CarillonError> {
    match tokens.get(idx) {
        Some(token) => Ok(token.parse::<u128>()?),
        None => Err(CarillonError::msg(format!(
            "command '{}' missing id argument",
            tokens[0]
        ))),
    }
}

/// Runs the receiving half of the three-blob store exchange.
async fn read_store_blobs(
    conn: &mut TcpStream,
    read_buf: &mut BytesMut,
) -> Result<(NodeId, DataKey, Value), CarillonError> {
    wire::write_line(conn, SEND).await?;
    let chord_key = wire::read_key_blob(conn, read_buf).await?;
    wire::write_line(conn, SEND).await?;
    let data_key: DataKey = wire::read_blob(conn, read_buf).await?;
    wire::write_line(conn, SEND).await?;
    let value: Value = wire::read_blob(conn, read_buf).await?;
    Ok((chord_key, data_key, value))
}

#[cfg(test)]
mod dispatch_tests {
    use crate::net::{client, wire};
    use crate::node::{ChordConfig, ChordNode, FingerUpdateMode};
    use crate::ring::{key_for, NodeInfo};
    use crate::utils::CarillonError;

    use bytes::BytesMut;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, Duration};

    fn test_config() -> ChordConfig {
        ChordConfig {
            size_successor_list: 3,
            stabilize_interval_ms: 100,
            fix_fingers_interval_ms: 100,
            ping_successors_interval_ms: 100,
            finger_update_mode: FingerUpdateMode::Aggressive,
            lookup_timeout_ms: 3000,
            max_route_retries: 4,
            max_store_retries: 4,
            backoff_min_ms: 20,
            backoff_max_ms: 60,
            ..Default::default()
        }
    }

    async fn launch(port: u16) -> Result<NodeInfo, CarillonError> {
        let node =
            ChordNode::new_and_setup("127.0.0.1", port, test_config()).await?;
        let info = node.info();
        tokio::spawn(node.run());
        Ok(info)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ping_runs_full_handshake() -> Result<(), CarillonError> {
        launch(56800).await?;
        client::send_command(
            "127.0.0.1",
            56800,
            "ping",
            Duration::from_secs(2),
        )
        .await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_verb_keeps_connection_open() -> Result<(), CarillonError>
    {
        launch(56801).await?;
        let mut conn = TcpStream::connect(("127.0.0.1", 56801)).await?;
        let mut buf = BytesMut::new();
        wire::write_line(&mut conn, "abracadabra").await?;
        wire::expect_token(&mut conn, &mut buf, wire::INVALID).await?;
        // same connection still serves further commands
        wire::write_line(&mut conn, "ping").await?;
        wire::expect_token(&mut conn, &mut buf, wire::DONE).await?;
        wire::write_line(&mut conn, "close").await?;
        wire::expect_token(&mut conn, &mut buf, wire::CLOSE).await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn singleton_routing_resolves_to_self() -> Result<(), CarillonError>
    {
        let info = launch(56802).await?;
        client::send_command(
            "127.0.0.1",
            56802,
            "initialize_network",
            Duration::from_secs(2),
        )
        .await?;
        for verb in ["find_successor", "find_predecessor"] {
            let answer: NodeInfo = client::send_command_with_response(
                "127.0.0.1",
                56802,
                &format!("{} {}", verb, key_for("anything")),
                Duration::from_secs(5),
            )
            .await?;
            assert_eq!(answer.id, info.id);
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn singleton_store_lookup_transfer() -> Result<(), CarillonError> {
        launch(56803).await?;
        client::send_command(
            "127.0.0.1",
            56803,
            "initialize_network",
            Duration::from_secs(2),
        )
        .await?;
        let chord_key = key_for("University of Manchester");
        for value in ["v1", "v2"] {
            client::send_store(
                "127.0.0.1",
                56803,
                "store",
                chord_key,
                "Alan_Turing",
                value,
                Duration::from_secs(5),
            )
            .await?;
        }
        let values = client::send_lookup(
            "127.0.0.1",
            56803,
            chord_key,
            "Alan_Turing",
            Duration::from_secs(5),
        )
        .await?;
        assert_eq!(values, vec!["v1", "v2"]);
        // the handoff path bypasses ownership and lands in the same bucket
        client::send_store(
            "127.0.0.1",
            56803,
            "transfer_receive",
            chord_key,
            "Alan_Turing",
            "v3",
            Duration::from_secs(5),
        )
        .await?;
        let values = client::send_lookup(
            "127.0.0.1",
            56803,
            chord_key,
            "Alan_Turing",
            Duration::from_secs(5),
        )
        .await?;
        assert_eq!(values, vec!["v1", "v2", "v3"]);
        // a never-written key reads as the empty list
        let empty = client::send_lookup(
            "127.0.0.1",
            56803,
            chord_key,
            "nobody",
            Duration::from_secs(5),
        )
        .await?;
        assert!(empty.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn leave_stops_serving() -> Result<(), CarillonError> {
        launch(56804).await?;
        client::send_command(
            "127.0.0.1",
            56804,
            "initialize_network",
            Duration::from_secs(2),
        )
        .await?;
        // leave acks and then closes, so no close handshake follows
        client::send_command_async(
            "127.0.0.1",
            56804,
            "leave",
            Duration::from_secs(5),
        )
        .await?;
        sleep(Duration::from_millis(300)).await;
        assert!(client::send_command(
            "127.0.0.1",
            56804,
            "ping",
            Duration::from_secs(1),
        )
        .await
        .is_err());
        Ok(())
    }
}
