//! Ring routing: resolving the predecessor/successor of an id through the
//! finger-table shortcut chain, evicting unreachable peers along the way.

use crate::net::client;
use crate::node::NodeInner;
use crate::ring::{in_open_closed, short_id, NodeId, NodeInfo};
use crate::utils::CarillonError;

impl NodeInner {
    /// Finds the node holding `id`, i.e. the node `n` with
    /// `id ∈ (n.id, n.successor.id]`. Follows closest-preceding-finger hops
    /// outward; unreachable hops are evicted from the local finger table
    /// and the search resumes from the local table, up to
    /// `max_route_retries` failures.
    pub(crate) async fn find_predecessor(
        &self,
        id: NodeId,
    ) -> Result<NodeInfo, CarillonError> {
        let (successor, local_closest) = {
            let state = self.state.lock().await;
            (
                state.successor(),
                state.finger_table.closest_preceding(&self.me, id),
            )
        };
        if in_open_closed(id, self.me.id, successor.id) {
            return Ok(self.me.clone());
        }
        let mut n = local_closest;
        if n.id == self.me.id {
            return Ok(self.me.clone());
        }

        let mut attempts = 0;
        loop {
            let step: Result<Option<NodeInfo>, CarillonError> = async {
                let n_succ: NodeInfo = client::send_command_with_response(
                    &n.host,
                    n.port,
                    "get_your_successor",
                    self.config.long_timeout(),
                )
                .await?;
                if in_open_closed(id, n.id, n_succ.id) {
                    return Ok(None); // n holds id
                }
                let next: NodeInfo = client::send_command_with_response(
                    &n.host,
                    n.port,
                    &format!("closest_preceeding_finger {}", id),
                    self.config.long_timeout(),
                )
                .await?;
                Ok(Some(next))
            }
            .await;

            match step {
                Ok(None) => return Ok(n),
                Ok(Some(next)) => {
                    if next.id == n.id {
                        // n knows nothing closer yet its range misses id;
                        // its state is mid-convergence, try again shortly
                        attempts += 1;
                        if attempts > self.config.max_route_retries {
                            return logged_err!(
                                "routing to {} stalled at {}",
                                short_id(id),
                                n
                            );
                        }
                        self.backoff().await;
                    } else {
                        n = next;
                    }
                }
                Err(e) => {
                    attempts += 1;
                    if attempts > self.config.max_route_retries {
                        return logged_err!(
                            "routing to {} gave up after {} failures: {}",
                            short_id(id),
                            self.config.max_route_retries,
                            e
                        );
                    }
                    pf_debug!(
                        "evicting unreachable {} from finger table: {}",
                        n,
                        e
                    );
                    let local_next = {
                        let mut state = self.state.lock().await;
                        state.finger_table.evict(n.id, &self.me);
                        state.finger_table.closest_preceding(&self.me, id)
                    };
                    if local_next.id == self.me.id {
                        // no remaining finger precedes id
                        return Ok(self.me.clone());
                    }
                    self.backoff().await;
                    n = local_next;
                }
            }
        }
    }

    /// Finds the successor of `id`: the holder's current successor, i.e.
    /// the first node strictly clockwise of `id`'s holder range.
    pub(crate) async fn find_successor(
        &self,
        id: NodeId,
    ) -> Result<NodeInfo, CarillonError> {
        let mut attempts = 0;
        loop {
            let n = self.find_predecessor(id).await?;
            if n.id == self.me.id {
                return Ok(self.state.lock().await.successor());
            }
            match client::send_command_with_response::<NodeInfo>(
                &n.host,
                n.port,
                "get_your_successor",
                self.config.long_timeout(),
            )
            .await
            {
                Ok(successor) => return Ok(successor),
                Err(e) => {
                    attempts += 1;
                    if attempts > self.config.max_route_retries {
                        return logged_err!(
                            "find_successor({}) gave up after {} failures: {}",
                            short_id(id),
                            self.config.max_route_retries,
                            e
                        );
                    }
                    pf_debug!("holder {} unreachable, rerouting: {}", n, e);
                    {
                        let mut state = self.state.lock().await;
                        state.finger_table.evict(n.id, &self.me);
                    }
                    self.backoff().await;
                }
            }
        }
    }
}
