//! Ring membership: bootstrap, joining via an inviter, predecessor
//! candidacy, and graceful leave with key handoff.

use std::sync::Arc;

use crate::net::client;
use crate::node::NodeInner;
use crate::ring::{in_open_closed, in_open_open, NodeInfo};
use crate::utils::CarillonError;

impl NodeInner {
    /// Bootstraps a ring of one: every pointer back at self, then the
    /// maintenance loops start. Used by exactly one node per deployment.
    pub(crate) async fn initialize_network(node: &Arc<NodeInner>) {
        {
            let mut state = node.state.lock().await;
            state.reset_to_self(&node.me);
        }
        pf_info!("initialized a new ring as {}", node.me);
        NodeInner::start_maintenance(node).await;
    }

    /// Joins an existing ring through the inviter: asks it who should be
    /// this node's successor, then lets stabilization integrate us. Keys
    /// are not pulled here; the successor hands them over on its next
    /// stabilize/notify cycle.
    pub(crate) async fn join(
        node: &Arc<NodeInner>,
        inviter_host: &str,
        inviter_port: u16,
    ) -> Result<(), CarillonError> {
        if !node.maint_handles().lock().await.is_empty() {
            return logged_err!(
                "{} is already part of a ring, cannot join again",
                node.me
            );
        }

        let first_start = {
            let mut state = node.state.lock().await;
            state.predecessor = node.me.clone();
            state.finger_table.start(0)
        };
        let successor: NodeInfo = client::send_command_with_response(
            inviter_host,
            inviter_port,
            &format!("find_successor {}", first_start),
            node.config.long_timeout(),
        )
        .await
        .map_err(|e| {
            CarillonError::msg(format!(
                "inviter {}:{} cannot be accessed: {}",
                inviter_host, inviter_port, e
            ))
        })?;

        {
            let mut state = node.state.lock().await;
            state.successor_list[0] = successor.clone();
        }
        pf_info!(
            "joined ring via {}:{}, successor {}",
            inviter_host,
            inviter_port,
            successor
        );
        NodeInner::start_maintenance(node).await;
        Ok(())
    }

    /// Handles a predecessor candidacy. Adopting a closer predecessor hands
    /// it the keys in its range `(candidate.id, me.id]`; a rejected
    /// candidate still replaces a predecessor that fails a liveness probe.
    pub(crate) async fn notify(&self, candidate: NodeInfo) {
        let (adopted, rejected_pred) = {
            let mut state = self.state.lock().await;
            let adopt = state.predecessor.id == self.me.id
                || in_open_open(candidate.id, state.predecessor.id, self.me.id);
            if adopt {
                state.predecessor = candidate.clone();
                (true, None)
            } else {
                (false, Some(state.predecessor.clone()))
            }
        };

        if adopted {
            pf_debug!("adopted predecessor {}", candidate);
            if candidate.id != self.me.id {
                self.handover_predecessor_range(&candidate).await;
            }
        } else if let Some(pred) = rejected_pred {
            // the candidate lost; make sure the incumbent is still alive
            if client::send_command(
                &pred.host,
                pred.port,
                "ping",
                self.config.short_timeout(),
            )
            .await
            .is_err()
            {
                pf_debug!(
                    "predecessor {} silently departed, adopting {}",
                    pred,
                    candidate
                );
                let mut state = self.state.lock().await;
                state.predecessor = candidate;
            }
        }
    }

    /// Ships every bucket in the new predecessor's range to it.
    async fn handover_predecessor_range(&self, pred: &NodeInfo) {
        let buckets = {
            let state = self.state.lock().await;
            state
                .store
                .chord_keys()
                .into_iter()
                .filter(|&k| in_open_closed(k, pred.id, self.me.id))
                .filter_map(|k| state.store.bucket(k).map(|b| (k, b)))
                .collect::<Vec<_>>()
        };
        for (chord_key, bucket) in buckets {
            self.transfer_bucket(pred, chord_key, bucket).await;
        }
    }

    /// Gracefully departs: stops the maintenance loops, hands every held
    /// key to the current predecessor through the unconditional transfer
    /// path, and leaves serve-loop termination to the dispatcher.
    pub(crate) async fn leave(&self) {
        self.set_leaving();
        self.stop_maintenance().await;

        let (pred, buckets) = {
            let state = self.state.lock().await;
            let buckets = state
                .store
                .chord_keys()
                .into_iter()
                .filter_map(|k| state.store.bucket(k).map(|b| (k, b)))
                .collect::<Vec<_>>();
            (state.predecessor.clone(), buckets)
        };

        if pred.id == self.me.id {
            // ring of one: nowhere to hand off to
            if !buckets.is_empty() {
                pf_warn!(
                    "leaving as a singleton, {} bucket(s) have no new home",
                    buckets.len()
                );
            }
        } else {
            for (chord_key, bucket) in buckets {
                self.transfer_bucket(&pred, chord_key, bucket).await;
            }
            pf_info!("handed all keys to predecessor {}", pred);
        }
    }
}
