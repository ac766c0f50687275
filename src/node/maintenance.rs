//! The three background maintenance loops: stabilize, fix-fingers, and
//! ping-successors. Each runs as its own task, ticking on an interval and
//! exiting on the shared stop signal; a failed round is logged and retried
//! at the next tick, never killing the loop.

use std::sync::Arc;

use rand::prelude::*;
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::net::client;
use crate::node::{FingerUpdateMode, NodeInner};
use crate::ring::{in_open_closed, in_open_open, NodeInfo, HASH_BITS};
use crate::utils::CarillonError;

impl NodeInner {
    /// Spawns the three maintenance loops; a second call is a no-op.
    pub(crate) async fn start_maintenance(node: &Arc<NodeInner>) {
        let mut handles = node.maint_handles().lock().await;
        if !handles.is_empty() {
            pf_warn!("maintenance loops already running");
            return;
        }
        handles.push(tokio::spawn(Self::stabilize_thread(node.clone())));
        handles.push(tokio::spawn(Self::fix_fingers_thread(node.clone())));
        handles.push(tokio::spawn(Self::ping_successors_thread(node.clone())));
        pf_debug!("maintenance loops started");
    }

    /// Signals the loops to stop and waits for each to exit.
    pub(crate) async fn stop_maintenance(&self) {
        let _ = self.maint_stop_signal().send(true);
        let mut handles = self.maint_handles().lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        pf_debug!("maintenance loops stopped");
    }

    /// Stabilize loop task function.
    async fn stabilize_thread(node: Arc<NodeInner>) {
        let mut ticker = time::interval(Duration::from_millis(
            node.config.stabilize_interval_ms,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rx_stop = node.maint_watch();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = node.stabilize_round().await {
                        pf_debug!("stabilize round aborted: {}", e);
                    }
                },
                _ = rx_stop.changed() => break,
            }
        }
    }

    /// Fix-fingers loop task function.
    async fn fix_fingers_thread(node: Arc<NodeInner>) {
        let mut ticker = time::interval(Duration::from_millis(
            node.config.fix_fingers_interval_ms,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rx_stop = node.maint_watch();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = node.fix_fingers_round().await {
                        pf_debug!("fix-fingers round aborted: {}", e);
                    }
                },
                _ = rx_stop.changed() => break,
            }
        }
    }

    /// Ping-successors loop task function.
    async fn ping_successors_thread(node: Arc<NodeInner>) {
        let mut ticker = time::interval(Duration::from_millis(
            node.config.ping_successors_interval_ms,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rx_stop = node.maint_watch();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    node.ping_successors_round().await;
                },
                _ = rx_stop.changed() => break,
            }
        }
    }

    /// One stabilize pass: reconcile the successor pointer against the
    /// successor's reported predecessor, hand over buckets that left our
    /// range, refill the successor list, and notify the successor of us.
    async fn stabilize_round(&self) -> Result<(), CarillonError> {
        let me = &self.me;
        let mut successor = { self.state.lock().await.successor() };

        // learn the successor's view of its predecessor; ours if alone
        let reported = if successor.id != me.id {
            let sp: NodeInfo = client::send_command_with_response(
                &successor.host,
                successor.port,
                "get_your_predecessor",
                self.config.long_timeout(),
            )
            .await?;
            if sp.id != me.id
                && client::send_command(
                    &sp.host,
                    sp.port,
                    "ping",
                    self.config.short_timeout(),
                )
                .await
                .is_err()
            {
                // its predecessor has silently left; advertise ourselves
                // instead of adopting a dead node
                client::send_command(
                    &successor.host,
                    successor.port,
                    &format!("notify {} {} {}", me.id, me.host, me.port),
                    self.config.short_timeout(),
                )
                .await?;
                None
            } else {
                Some(sp)
            }
        } else {
            let pred = { self.state.lock().await.predecessor.clone() };
            if pred.id != me.id
                && client::send_command(
                    &pred.host,
                    pred.port,
                    "ping",
                    self.config.short_timeout(),
                )
                .await
                .is_err()
            {
                // a departed predecessor must never be re-adopted as
                // successor; forget it so the ring of one stays stable
                let mut state = self.state.lock().await;
                if state.predecessor.id == pred.id {
                    state.predecessor = me.clone();
                }
                None
            } else {
                Some(pred)
            }
        };

        if let Some(sp) = reported {
            if in_open_open(sp.id, me.id, successor.id) {
                successor = sp; // a closer successor has appeared
            }
        }
        {
            let mut state = self.state.lock().await;
            state.successor_list[0] = successor.clone();
        }

        // hand over every bucket that no longer lies in (me, successor];
        // this is how a newly joined node acquires the keys it now holds
        if successor.id != me.id {
            let buckets = {
                let state = self.state.lock().await;
                state
                    .store
                    .chord_keys()
                    .into_iter()
                    .filter(|&k| !in_open_closed(k, me.id, successor.id))
                    .filter_map(|k| state.store.bucket(k).map(|b| (k, b)))
                    .collect::<Vec<_>>()
            };
            for (chord_key, bucket) in buckets {
                self.transfer_bucket(&successor, chord_key, bucket).await;
            }
        }

        // refill the rest of the list by chaining get_your_successor calls;
        // a stalled hop leaves the tail as self placeholders for next round
        let size = self.config.size_successor_list;
        let mut refilled = Vec::with_capacity(size);
        refilled.push(successor.clone());
        while refilled.len() < size {
            let prev = refilled.last().unwrap().clone();
            match client::send_command_with_response::<NodeInfo>(
                &prev.host,
                prev.port,
                "get_your_successor",
                self.config.long_timeout(),
            )
            .await
            {
                Ok(next) => refilled.push(next),
                Err(e) => {
                    pf_warn!("successor-list refill stalled at {}: {}", prev, e);
                    break;
                }
            }
        }
        {
            let mut state = self.state.lock().await;
            while refilled.len() < size {
                refilled.push(me.clone());
            }
            state.successor_list = refilled;
        }

        // let the (possibly new) successor reconsider its predecessor
        if successor.id != me.id {
            client::send_command(
                &successor.host,
                successor.port,
                &format!("notify {} {} {}", me.id, me.host, me.port),
                self.config.short_timeout(),
            )
            .await?;
        }
        Ok(())
    }

    /// One fix-fingers pass, per the configured refresh strategy.
    async fn fix_fingers_round(&self) -> Result<(), CarillonError> {
        match self.config.finger_update_mode {
            FingerUpdateMode::Normal => {
                let idx = { rand::thread_rng().gen_range(0..HASH_BITS) };
                self.refresh_finger(idx).await
            }
            FingerUpdateMode::Aggressive => {
                for idx in 0..HASH_BITS {
                    self.refresh_finger(idx).await?;
                }
                Ok(())
            }
        }
    }

    /// Recomputes finger `idx` as the successor of its start id.
    async fn refresh_finger(&self, idx: usize) -> Result<(), CarillonError> {
        let start = { self.state.lock().await.finger_table.start(idx) };
        let node = self.find_successor(start).await?;
        let mut state = self.state.lock().await;
        state.finger_table.set_node(idx, node);
        Ok(())
    }

    /// One ping-successors pass: evict list entries that fail a liveness
    /// probe, shrinking the effective replica set until stabilize refills.
    async fn ping_successors_round(&self) {
        let entries = { self.state.lock().await.successor_list.clone() };
        for info in entries {
            if info.id == self.me.id {
                continue;
            }
            if client::send_command(
                &info.host,
                info.port,
                "ping",
                self.config.short_timeout(),
            )
            .await
            .is_err()
            {
                pf_debug!("successor {} failed liveness probe, evicting", info);
                let mut state = self.state.lock().await;
                state.evict_successor(info.id, &self.me);
            }
        }
    }
}

#[cfg(test)]
mod maintenance_tests {
    use crate::net::client;
    use crate::node::{ChordConfig, ChordNode, FingerUpdateMode};
    use crate::ring::NodeInfo;
    use crate::utils::CarillonError;

    use tokio::time::{sleep, Duration};

    fn test_config() -> ChordConfig {
        ChordConfig {
            size_successor_list: 3,
            stabilize_interval_ms: 100,
            fix_fingers_interval_ms: 100,
            ping_successors_interval_ms: 100,
            finger_update_mode: FingerUpdateMode::Aggressive,
            lookup_timeout_ms: 5000,
            max_route_retries: 6,
            max_store_retries: 6,
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

    async fn successor_of(port: u16) -> Result<NodeInfo, CarillonError> {
        client::send_command_with_response(
            "127.0.0.1",
            port,
            "get_your_successor",
            Duration::from_secs(5),
        )
        .await
    }

    async fn predecessor_of(port: u16) -> Result<NodeInfo, CarillonError> {
        client::send_command_with_response(
            "127.0.0.1",
            port,
            "get_your_predecessor",
            Duration::from_secs(5),
        )
        .await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_nodes_converge_store_and_leave() -> Result<(), CarillonError>
    {
        let a = launch(57810).await?;
        let b = launch(57811).await?;
        client::send_command(
            "127.0.0.1",
            57810,
            "initialize_network",
            Duration::from_secs(2),
        )
        .await?;
        client::send_command(
            "127.0.0.1",
            57811,
            "join 127.0.0.1 57810",
            Duration::from_secs(5),
        )
        .await?;

        // a few stabilize cycles wire the two nodes into one ring
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(successor_of(57810).await?.id, b.id);
        assert_eq!(successor_of(57811).await?.id, a.id);
        assert_eq!(predecessor_of(57810).await?.id, b.id);
        assert_eq!(predecessor_of(57811).await?.id, a.id);

        // a chord key equal to a's id lies in (b, a], so node b holds it;
        // storing through a exercises forwarding, looking up through a
        // exercises the full propagate/deliver rendezvous path
        let chord_key = a.id;
        client::send_store(
            "127.0.0.1",
            57810,
            "store",
            chord_key,
            "Alan_Turing",
            "x",
            Duration::from_secs(5),
        )
        .await?;
        let via_a = client::send_lookup(
            "127.0.0.1",
            57810,
            chord_key,
            "Alan_Turing",
            Duration::from_secs(8),
        )
        .await?;
        assert_eq!(via_a, vec!["x"]);
        let via_b = client::send_lookup(
            "127.0.0.1",
            57811,
            chord_key,
            "Alan_Turing",
            Duration::from_secs(8),
        )
        .await?;
        assert_eq!(via_b, vec!["x"]);

        // b departs, handing its keys back to its predecessor a; after the
        // ring shrinks to one, the key must still be reachable
        client::send_command_async(
            "127.0.0.1",
            57811,
            "leave",
            Duration::from_secs(5),
        )
        .await?;
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(successor_of(57810).await?.id, a.id);
        let after_leave = client::send_lookup(
            "127.0.0.1",
            57810,
            chord_key,
            "Alan_Turing",
            Duration::from_secs(8),
        )
        .await?;
        assert_eq!(after_leave, vec!["x"]);
        Ok(())
    }
}
