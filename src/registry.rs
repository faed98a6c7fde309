//! Node registry - the membership directory of test nodes
//!
//! Every registered node is one message in a [`QueueStore`]. Entries expire
//! through the store's TTL one hour after insertion; nothing here sweeps them.
//!
//! Listing leases entries only long enough to page through them and then
//! releases them. A reader listing concurrently still re-issues pop receipts,
//! so a handle from an earlier listing may come back as `MessageNotFound`.
//!
//! Replacing a stale duplicate (delete, then insert) is not atomic against the
//! store. Two registrations for the same node racing each other can both pass
//! the conflict check; the last delete-then-insert wins. The registrar assumes
//! one request per node in flight at a time.

use crate::config::{RegistryConfig, ENTRY_TTL, EXPIRY_WINDOW};
use crate::error::{ConflictReason, DispatchError, Result};
use crate::node::{NodeRecord, RegistryEntry};
use crate::queue::QueueStore;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CRUD layer over the registrar queue
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn QueueStore>,
    config: RegistryConfig,
}

impl NodeRegistry {
    /// Create a registry over the given store
    pub fn new(store: Arc<dyn QueueStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// List every live entry.
    ///
    /// Entries are leased for `list_visibility` while the listing pages
    /// through the queue, then released, so listing never hides nodes from
    /// other readers. Undecodable payloads are logged and skipped.
    pub async fn list_active(&self) -> Result<Vec<RegistryEntry>> {
        let batch_size = self.config.receive_batch.max(1);
        let mut seen: HashMap<String, Option<usize>> = HashMap::new();
        let mut entries: Vec<RegistryEntry> = Vec::new();

        loop {
            let batch = self
                .store
                .receive(batch_size, self.config.list_visibility)
                .await?;
            let batch_len = batch.len();
            let mut found_new = false;

            for message in batch {
                if let Some(slot) = seen.get(&message.handle.message_id) {
                    // Re-received: only the newest pop receipt is valid
                    if let Some(index) = *slot {
                        entries[index].handle = message.handle;
                    }
                    continue;
                }
                found_new = true;

                match NodeRecord::from_payload(&message.payload) {
                    Ok(record) => {
                        seen.insert(message.handle.message_id.clone(), Some(entries.len()));
                        entries.push(RegistryEntry {
                            record,
                            handle: message.handle,
                            expires_at: message.expires_at,
                        });
                    }
                    Err(e) => {
                        seen.insert(message.handle.message_id.clone(), None);
                        warn!(
                            "Failed to process node in registrar. Entry malformed: {} ({})",
                            message.payload, e
                        );
                    }
                }
            }

            // A zero visibility window hands back the same messages on every receive
            if !found_new || batch_len < batch_size {
                break;
            }
        }

        if !self.config.list_visibility.is_zero() {
            self.release_all(&entries).await;
        }

        debug!("Registrar holds {} active nodes", entries.len());
        Ok(entries)
    }

    /// Hand listed entries back to the queue so other readers see them at once.
    /// A failed release only leaves that entry hidden until its lease lapses.
    async fn release_all(&self, entries: &[RegistryEntry]) {
        let results = join_all(entries.iter().map(|entry| self.store.release(&entry.handle))).await;

        for (entry, result) in entries.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    "Failed to release lease on node {} in registrar: {}",
                    entry.record.name, e
                );
            }
        }
    }

    /// Register a node.
    ///
    /// A live entry with the same name but another IP is a conflict. A live
    /// entry for the same node is replaced only if it expires within
    /// [`EXPIRY_WINDOW`]; otherwise the registration is refused.
    pub async fn register(&self, record: NodeRecord) -> Result<RegistryEntry> {
        record.validate()?;

        let current = self.list_active().await?;
        let same_name: Vec<&RegistryEntry> = current
            .iter()
            .filter(|entry| entry.record.name == record.name)
            .collect();

        if let Some(existing) = same_name.iter().find(|entry| entry.record.ip != record.ip) {
            info!(
                "Request to add node made for existing node with a different IP address. \
                 Disregarding... node info: {:?}",
                existing.record
            );
            return Err(DispatchError::Conflict(ConflictReason::IpMismatch));
        }

        let now = Utc::now();
        if let Some(existing) = same_name
            .iter()
            .find(|entry| !entry.expires_within(EXPIRY_WINDOW, now))
        {
            info!(
                "Request to add node made for existing node that is not expiring \
                 within 5 minutes (expires {}). node info: {:?}",
                existing.expires_at, existing.record
            );
            return Err(DispatchError::Conflict(ConflictReason::NotExpiring));
        }

        for stale in same_name {
            info!(
                "Replacing registrar entry expiring at {}: {:?}",
                stale.expires_at, stale.record
            );
            match self.remove(stale).await {
                Ok(()) | Err(DispatchError::MessageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let payload = record.to_payload()?;
        let sent = self.store.enqueue(&payload, ENTRY_TTL).await.map_err(|e| {
            warn!("Failed to add node to registrar: {}", e);
            e
        })?;

        info!(
            "Registered node {} ({}:{}), expires {}",
            record.name, record.ip, record.port, sent.expires_at
        );
        Ok(RegistryEntry {
            record,
            handle: sent.handle,
            expires_at: sent.expires_at,
        })
    }

    /// Rewrite an entry in place. The entry's expiry is unchanged.
    pub async fn update(&self, entry: &RegistryEntry, record: &NodeRecord) -> Result<()> {
        record.validate()?;
        let payload = record.to_payload()?;

        match self.store.update(&entry.handle, &payload).await {
            Ok(()) => {
                debug!("Updated registrar entry {}: {:?}", entry.handle, record);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to update node {} in registrar: {}", entry.record.name, e);
                Err(e)
            }
        }
    }

    /// Flip an entry's busy flag
    pub async fn set_busy(&self, entry: &RegistryEntry, busy: bool) -> Result<()> {
        let record = entry.record.clone().with_busy(busy);
        self.update(entry, &record).await
    }

    /// Delete an entry
    pub async fn remove(&self, entry: &RegistryEntry) -> Result<()> {
        match self.store.delete(&entry.handle).await {
            Ok(()) => {
                debug!("Removed registrar entry {}", entry.handle);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to remove node {} from registrar: {}", entry.record.name, e);
                Err(e)
            }
        }
    }

    /// Apply a node's own report (e.g. `busy=false` after a job) to its live entry
    pub async fn report(&self, record: NodeRecord) -> Result<()> {
        record.validate()?;

        let current = self.list_active().await?;
        let entry = current
            .iter()
            .find(|entry| entry.has_identity(&record.ip, &record.name))
            .ok_or_else(|| {
                DispatchError::MessageNotFound(format!("{}@{}", record.name, record.ip))
            })?;

        self.update(entry, &record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueStore;
    use std::time::Duration;

    fn registry_over(store: Arc<InMemoryQueueStore>) -> NodeRegistry {
        let config = RegistryConfig {
            list_visibility: Duration::ZERO,
            ..Default::default()
        };
        NodeRegistry::new(store, config)
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let store = Arc::new(InMemoryQueueStore::new());
        store.enqueue("{not json", ENTRY_TTL).await.unwrap();
        store
            .enqueue(r#"{"node_name":"no-ip","node_sig_key":"k"}"#, ENTRY_TTL)
            .await
            .unwrap();
        let registry = registry_over(store.clone());
        registry
            .register(NodeRecord::new("10.0.0.1", "k1").unwrap().with_name("rpi1"))
            .await
            .unwrap();

        let entries = registry.list_active().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.name, "rpi1");
    }

    #[tokio::test]
    async fn test_listing_pages_through_large_registrar() {
        let store = Arc::new(InMemoryQueueStore::new());
        let registry = NodeRegistry::new(
            store.clone(),
            RegistryConfig {
                list_visibility: Duration::from_secs(5),
                receive_batch: 4,
            },
        );
        for i in 0..10 {
            let record = NodeRecord::new(&format!("10.0.0.{}", i), "k")
                .unwrap()
                .with_name(&format!("node{}", i));
            store.enqueue(&record.to_payload().unwrap(), ENTRY_TTL).await.unwrap();
        }

        let entries = registry.list_active().await.unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].record.name, "node0");
        assert_eq!(entries[9].record.name, "node9");
    }

    #[tokio::test]
    async fn test_listing_with_zero_visibility_terminates() {
        let store = Arc::new(InMemoryQueueStore::new());
        let registry = NodeRegistry::new(
            store.clone(),
            RegistryConfig {
                list_visibility: Duration::ZERO,
                receive_batch: 2,
            },
        );
        for i in 0..3 {
            let record = NodeRecord::new(&format!("10.0.1.{}", i), "k")
                .unwrap()
                .with_name(&format!("n{}", i));
            store.enqueue(&record.to_payload().unwrap(), ENTRY_TTL).await.unwrap();
        }

        // Only the first page is reachable without a lease window
        let entries = registry.list_active().await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_entry_near_expiry_is_replaced() {
        let store = Arc::new(InMemoryQueueStore::new());
        let registry = registry_over(store.clone());
        let record = NodeRecord::new("10.0.0.1", "k1").unwrap().with_name("rpi1");
        store
            .enqueue(&record.to_payload().unwrap(), Duration::from_secs(60))
            .await
            .unwrap();

        let entry = registry.register(record.clone()).await.unwrap();
        assert_eq!(entry.record, record);
        assert_eq!(store.len().await, 1);
    }
}
