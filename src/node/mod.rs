//! Ring node: configuration, state assembly, and the accept/serve loop.

mod dispatch;
mod maintenance;
mod membership;
mod routing;
mod storage;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rand::prelude::*;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::ring::{NodeInfo, RingState, Value};
use crate::utils::CarillonError;

/// How fix-fingers refreshes the table each tick: one random entry per tick
/// (amortized), or a full sweep (fast convergence, chattier).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerUpdateMode {
    Normal,
    Aggressive,
}

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ChordConfig {
    /// Length of the successor list (replica set size).
    pub size_successor_list: usize,

    /// Stabilize loop interval in millisecs.
    pub stabilize_interval_ms: u64,

    /// Fix-fingers loop interval in millisecs.
    pub fix_fingers_interval_ms: u64,

    /// Ping-successors loop interval in millisecs.
    pub ping_successors_interval_ms: u64,

    /// Finger refresh strategy.
    pub finger_update_mode: FingerUpdateMode,

    /// Timeout for liveness/ack-only peer calls in millisecs.
    pub rpc_short_timeout_ms: u64,

    /// Timeout for payload-bearing peer round trips in millisecs.
    pub rpc_long_timeout_ms: u64,

    /// How long a lookup caller waits for rendezvous delivery in millisecs.
    pub lookup_timeout_ms: u64,

    /// Maximum retry attempts for a routing chain before giving up.
    pub max_route_retries: usize,

    /// Maximum retry attempts for store forwarding / key handoff.
    pub max_store_retries: usize,

    /// Lower bound of the randomized retry backoff in millisecs.
    pub backoff_min_ms: u64,

    /// Upper bound of the randomized retry backoff in millisecs.
    pub backoff_max_ms: u64,
}

impl Default for ChordConfig {
    fn default() -> Self {
        ChordConfig {
            size_successor_list: 5,
            stabilize_interval_ms: 1000,
            fix_fingers_interval_ms: 1000,
            ping_successors_interval_ms: 1000,
            finger_update_mode: FingerUpdateMode::Normal,
            rpc_short_timeout_ms: 2000,
            rpc_long_timeout_ms: 5000,
            lookup_timeout_ms: 15000,
            max_route_retries: 8,
            max_store_retries: 8,
            backoff_min_ms: 100,
            backoff_max_ms: 1000,
        }
    }
}

impl ChordConfig {
    /// Timeout for liveness/ack-only peer calls.
    pub fn short_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_short_timeout_ms)
    }

    /// Timeout for payload-bearing peer round trips.
    pub fn long_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_long_timeout_ms)
    }

    /// Rendezvous delivery wait bound.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// Shared interior of a running node. Connection tasks and maintenance
/// loops all hold this behind an `Arc`.
pub(crate) struct NodeInner {
    /// My own addressable identity; immutable after startup.
    pub(crate) me: NodeInfo,

    /// Configuration parameters struct.
    pub(crate) config: ChordConfig,

    /// The coarse-locked mutable ring state block.
    pub(crate) state: Mutex<RingState>,

    /// Rendezvous promises for in-flight lookups, keyed by lookup id and
    /// fulfilled by the `lookup_result` delivery handler.
    pub(crate) pending_lookups:
        Mutex<HashMap<u64, oneshot::Sender<Vec<Value>>>>,

    /// Source of fresh lookup ids.
    next_lookup_id: AtomicU64,

    /// Set once leave begins; a leaving node refuses new writes so its
    /// key handoff cannot be raced by inbound transfers.
    leaving: AtomicBool,

    /// Stop signal for the three maintenance loops.
    tx_maint: watch::Sender<bool>,
    rx_maint: watch::Receiver<bool>,

    /// Stop signal for the accept/serve loop (fired by leave).
    tx_term: watch::Sender<bool>,
    rx_term: watch::Receiver<bool>,

    /// Join handles of the running maintenance loops.
    maint_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeInner {
    /// Allocates a fresh process-unique lookup id.
    pub(crate) fn fresh_lookup_id(&self) -> u64 {
        self.next_lookup_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Signals the accept/serve loop to exit.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx_term.send(true);
    }

    /// Marks the node as mid-leave.
    pub(crate) fn set_leaving(&self) {
        self.leaving.store(true, Ordering::Release);
    }

    /// Whether leave has begun.
    pub(crate) fn is_leaving(&self) -> bool {
        self.leaving.load(Ordering::Acquire)
    }

    /// Sleeps a randomized interval between retry attempts, so peers
    /// retrying against each other do not stay in lockstep.
    pub(crate) async fn backoff(&self) {
        let ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.config.backoff_min_ms..=self.config.backoff_max_ms)
        };
        sleep(Duration::from_millis(ms)).await;
    }

    pub(crate) fn maint_watch(&self) -> watch::Receiver<bool> {
        self.rx_maint.clone()
    }

    pub(crate) fn maint_stop_signal(&self) -> &watch::Sender<bool> {
        &self.tx_maint
    }

    pub(crate) fn maint_handles(&self) -> &Mutex<Vec<JoinHandle<()>>> {
        &self.maint_handles
    }
}

/// One ring node: a bound listener plus the shared interior.
pub struct ChordNode {
    inner: Arc<NodeInner>,
    listener: TcpListener,
}

impl ChordNode {
    /// Creates a node identity, validates the configuration, and binds the
    /// request listener. The node serves commands but participates in no
    /// ring until `initialize_network` or `join` arrives.
    pub async fn new_and_setup(
        host: impl Into<String>,
        port: u16,
        config: ChordConfig,
    ) -> Result<Self, CarillonError> {
        if config.size_successor_list == 0 {
            return logged_err!(
                "invalid config.size_successor_list '{}'",
                config.size_successor_list
            );
        }
        if config.stabilize_interval_ms == 0
            || config.fix_fingers_interval_ms == 0
            || config.ping_successors_interval_ms == 0
        {
            return logged_err!("maintenance intervals must be positive");
        }
        if config.backoff_min_ms > config.backoff_max_ms {
            return logged_err!(
                "invalid backoff range {}..={} ms",
                config.backoff_min_ms,
                config.backoff_max_ms
            );
        }
        if config.max_route_retries == 0 || config.max_store_retries == 0 {
            return logged_err!("retry bounds must be positive");
        }

        let host = host.into();
        let me = NodeInfo::new(host.clone(), port);
        let listener = TcpListener::bind((host.as_str(), port)).await?;

        let (tx_maint, rx_maint) = watch::channel(false);
        let (tx_term, rx_term) = watch::channel(false);
        let state = RingState::new(&me, config.size_successor_list);

        pf_info!("node {} listening on {}:{}", me, host, port);
        Ok(ChordNode {
            inner: Arc::new(NodeInner {
                me,
                config,
                state: Mutex::new(state),
                pending_lookups: Mutex::new(HashMap::new()),
                next_lookup_id: AtomicU64::new(0),
                leaving: AtomicBool::new(false),
                tx_maint,
                rx_maint,
                tx_term,
                rx_term,
                maint_handles: Mutex::new(Vec::new()),
            }),
            listener,
        })
    }

    /// This node's addressable identity.
    pub fn info(&self) -> NodeInfo {
        self.inner.me.clone()
    }

    /// Serves inbound connections until a `leave` command shuts the node
    /// down. Each accepted connection gets its own dispatcher task.
    pub async fn run(self) -> Result<(), CarillonError> {
        let mut rx_term = self.inner.rx_term.clone();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((conn, peer_addr)) => {
                            conn.set_nodelay(true)?;
                            tokio::spawn(dispatch::serve_connection(
                                self.inner.clone(),
                                conn,
                                peer_addr,
                            ));
                        }
                        Err(e) => {
                            pf_error!("error accepting connection: {}", e);
                        }
                    }
                },

                // leave shuts the serve loop down after the key handoff
                _ = rx_term.changed() => {
                    pf_info!("node {} stopped serving", self.inner.me);
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod config_mode_tests {
    use super::*;
    use crate::utils::CarillonError;

    #[test]
    fn defaults_are_sane() {
        let config = ChordConfig::default();
        assert_eq!(config.size_successor_list, 5);
        assert_eq!(config.finger_update_mode, FingerUpdateMode::Normal);
        assert_eq!(config.short_timeout(), Duration::from_millis(2000));
        assert_eq!(config.long_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn mode_parses_from_toml() -> Result<(), CarillonError> {
        let config_str = Some(
            "finger_update_mode = 'aggressive'\nsize_successor_list = 3",
        );
        let config = parsed_config!(config_str => ChordConfig;
                                    size_successor_list, stabilize_interval_ms,
                                    fix_fingers_interval_ms,
                                    ping_successors_interval_ms,
                                    finger_update_mode, rpc_short_timeout_ms,
                                    rpc_long_timeout_ms, lookup_timeout_ms,
                                    max_route_retries, max_store_retries,
                                    backoff_min_ms, backoff_max_ms)?;
        assert_eq!(config.finger_update_mode, FingerUpdateMode::Aggressive);
        assert_eq!(config.size_successor_list, 3);
        assert_eq!(config.stabilize_interval_ms, 1000);
        Ok(())
    }

    #[tokio::test]
    async fn setup_rejects_bad_config() {
        let config = ChordConfig {
            size_successor_list: 0,
            ..Default::default()
        };
        assert!(ChordNode::new_and_setup("127.0.0.1", 0, config)
            .await
            .is_err());
    }
}
