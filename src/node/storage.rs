//! Key storage and lookup: ownership-checked store with forwarding,
//! promise-based rendezvous lookup, hop-by-hop propagation, and the
//! unconditional transfer path used for ownership handoffs.

use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::net::client;
use crate::node::NodeInner;
use crate::ring::{Bucket, ChordKey, DataKey, NodeInfo, Value};
use crate::utils::CarillonError;

impl NodeInner {
    /// Stores a value: appended locally when `chord_key` is in our range,
    /// otherwise forwarded to the holder resolved by routing. Forwarding
    /// failures retry with backoff up to `max_store_retries`.
    pub(crate) async fn store(
        &self,
        chord_key: ChordKey,
        data_key: DataKey,
        value: Value,
    ) -> Result<(), CarillonError> {
        let mut attempts = 0;
        loop {
            {
                let mut state = self.state.lock().await;
                if state.owns(&self.me, chord_key) {
                    state.store.append(chord_key, data_key, value);
                    return Ok(());
                }
            }
            match self.find_predecessor(chord_key).await {
                Ok(holder) if holder.id == self.me.id => {
                    // routing points at us but the range check disagreed:
                    // the successor pointer moved in between, look again
                    attempts += 1;
                    if attempts > self.config.max_store_retries {
                        return logged_err!(
                            "store of {:#x} cannot settle on a holder",
                            chord_key
                        );
                    }
                    self.backoff().await;
                }
                Ok(holder) => {
                    match client::send_store(
                        &holder.host,
                        holder.port,
                        "store",
                        chord_key,
                        &data_key,
                        &value,
                        self.config.long_timeout(),
                    )
                    .await
                    {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            attempts += 1;
                            if attempts > self.config.max_store_retries {
                                return logged_err!(
                                    "store forwarding to {} gave up: {}",
                                    holder,
                                    e
                                );
                            }
                            pf_debug!(
                                "store forwarding to {} failed ({}), retrying",
                                holder,
                                e
                            );
                            self.backoff().await;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Looks a key up. Locally owned keys answer synchronously; otherwise a
    /// rendezvous promise is registered under a fresh lookup id, a one-way
    /// propagate command is dispatched toward the holder, and the caller
    /// blocks until the holder pushes the result back. If the wait times
    /// out, the caller sees the timeout; retrying is the caller's call.
    pub(crate) async fn lookup(
        &self,
        chord_key: ChordKey,
        data_key: &str,
    ) -> Result<Vec<Value>, CarillonError> {
        {
            let state = self.state.lock().await;
            if state.owns(&self.me, chord_key) {
                return Ok(state.store.get(chord_key, data_key));
            }
        }

        let lookup_id = self.fresh_lookup_id();
        let (tx, rx) = oneshot::channel();
        self.pending_lookups.lock().await.insert(lookup_id, tx);
        let command = format!(
            "propagate_lookup {} {} {} {} {}",
            chord_key, data_key, self.me.host, self.me.port, lookup_id
        );

        let mut attempts = 0;
        loop {
            match self.find_predecessor(chord_key).await {
                Ok(holder) if holder.id == self.me.id => {
                    // ownership settled on us while routing; answer locally
                    self.pending_lookups.lock().await.remove(&lookup_id);
                    let state = self.state.lock().await;
                    return Ok(state.store.get(chord_key, data_key));
                }
                Ok(holder) => {
                    match client::send_command_async(
                        &holder.host,
                        holder.port,
                        &command,
                        self.config.short_timeout(),
                    )
                    .await
                    {
                        Ok(()) => break,
                        Err(e) => {
                            attempts += 1;
                            if attempts > self.config.max_store_retries {
                                self.pending_lookups
                                    .lock()
                                    .await
                                    .remove(&lookup_id);
                                return logged_err!(
                                    "lookup dispatch to {} gave up: {}",
                                    holder,
                                    e
                                );
                            }
                            pf_debug!(
                                "lookup dispatch to {} failed ({}), retrying",
                                holder,
                                e
                            );
                            self.backoff().await;
                        }
                    }
                }
                Err(e) => {
                    self.pending_lookups.lock().await.remove(&lookup_id);
                    return Err(e);
                }
            }
        }

        match timeout(self.config.lookup_timeout(), rx).await {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(_)) => {
                logged_err!("lookup {} delivery channel dropped", lookup_id)
            }
            Err(_) => {
                self.pending_lookups.lock().await.remove(&lookup_id);
                logged_err!("lookup {} timed out awaiting delivery", lookup_id)
            }
        }
    }

    /// Carries a lookup one hop further, or delivers the result straight
    /// back to the original caller if the key is ours. One-way: failures
    /// are logged and dropped, since the caller's bounded wait already
    /// reports them as a timeout.
    pub(crate) async fn propagate_lookup(
        &self,
        chord_key: ChordKey,
        data_key: String,
        caller_host: String,
        caller_port: u16,
        lookup_id: u64,
    ) {
        let local = {
            let state = self.state.lock().await;
            if state.owns(&self.me, chord_key) {
                Some(state.store.get(chord_key, &data_key))
            } else {
                None
            }
        };
        if let Some(values) = local {
            self.deliver_back(&caller_host, caller_port, lookup_id, values)
                .await;
            return;
        }

        let command = format!(
            "propagate_lookup {} {} {} {} {}",
            chord_key, data_key, caller_host, caller_port, lookup_id
        );
        let mut attempts = 0;
        loop {
            match self.find_predecessor(chord_key).await {
                Ok(holder) if holder.id == self.me.id => {
                    // ownership settled on us while routing
                    let values = {
                        self.state.lock().await.store.get(chord_key, &data_key)
                    };
                    self.deliver_back(
                        &caller_host,
                        caller_port,
                        lookup_id,
                        values,
                    )
                    .await;
                    return;
                }
                Ok(holder) => {
                    match client::send_command_async(
                        &holder.host,
                        holder.port,
                        &command,
                        self.config.short_timeout(),
                    )
                    .await
                    {
                        Ok(()) => return,
                        Err(e) => {
                            attempts += 1;
                            if attempts > self.config.max_store_retries {
                                pf_warn!(
                                    "dropping lookup {} forward to {}: {}",
                                    lookup_id,
                                    holder,
                                    e
                                );
                                return;
                            }
                            self.backoff().await;
                        }
                    }
                }
                Err(e) => {
                    pf_warn!("cannot route lookup {}: {}", lookup_id, e);
                    return;
                }
            }
        }
    }

    async fn deliver_back(
        &self,
        caller_host: &str,
        caller_port: u16,
        lookup_id: u64,
        values: Vec<Value>,
    ) {
        if let Err(e) = client::deliver_lookup_result(
            caller_host,
            caller_port,
            lookup_id,
            &values,
            self.config.long_timeout(),
        )
        .await
        {
            pf_warn!(
                "delivering lookup {} to {}:{} failed: {}",
                lookup_id,
                caller_host,
                caller_port,
                e
            );
        }
    }

    /// Resolves an inbound `lookup_result` delivery to its waiting caller.
    pub(crate) async fn fulfill_lookup(
        &self,
        lookup_id: u64,
        values: Vec<Value>,
    ) {
        match self.pending_lookups.lock().await.remove(&lookup_id) {
            Some(tx) => {
                let _ = tx.send(values);
            }
            None => {
                pf_warn!("lookup {} unknown or already timed out", lookup_id);
            }
        }
    }

    /// Accepts a handed-off entry unconditionally, bypassing the ownership
    /// check (the sender is mid-handoff and not authoritative for routing).
    pub(crate) async fn transfer_receive(
        &self,
        chord_key: ChordKey,
        data_key: DataKey,
        value: Value,
    ) {
        let mut state = self.state.lock().await;
        state.store.append(chord_key, data_key, value);
    }

    /// Ships one bucket to `dest` entry by entry over the transfer path.
    /// Each value is removed locally only after its delivery is confirmed,
    /// so nothing is ever silently dropped; a persistently failing transfer
    /// keeps the remainder local for the next maintenance cycle.
    pub(crate) async fn transfer_bucket(
        &self,
        dest: &NodeInfo,
        chord_key: ChordKey,
        bucket: Bucket,
    ) {
        for (data_key, values) in bucket {
            for value in values {
                let mut attempts = 0;
                let sent = loop {
                    match client::send_store(
                        &dest.host,
                        dest.port,
                        "transfer_receive",
                        chord_key,
                        &data_key,
                        &value,
                        self.config.long_timeout(),
                    )
                    .await
                    {
                        Ok(()) => break true,
                        Err(e) => {
                            attempts += 1;
                            if attempts > self.config.max_store_retries {
                                pf_error!(
                                    "transfer of {:#x} to {} stuck, keeping remainder: {}",
                                    chord_key,
                                    dest,
                                    e
                                );
                                break false;
                            }
                            self.backoff().await;
                        }
                    }
                };
                if !sent {
                    return;
                }
                let mut state = self.state.lock().await;
                state.store.remove_first(chord_key, &data_key, &value);
            }
        }
    }
}
