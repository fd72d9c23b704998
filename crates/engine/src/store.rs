//! Per-owner state
//!
//! Each owner has one [`OwnerWorkspace`]: plan mappings, the append-only event
//! log, the delivery outcome log and the endpoint configuration. The
//! [`OwnerStore`] keeps workspaces in memory and, when opened on a data
//! directory, writes a JSON snapshot per owner after every change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::delivery::EndpointConfig;
use crate::error::{EngineError, EngineResult};
use crate::event::{customer_key, DeliveryOutcome, LifecycleEvent, OwnerId, Platform};
use crate::mapping::PlanMappingTable;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerWorkspace {
    pub mappings: PlanMappingTable,
    events: Vec<LifecycleEvent>,
    deliveries: Vec<DeliveryOutcome>,
    pub endpoint: Option<EndpointConfig>,
    next_sequence: u64,
}

impl OwnerWorkspace {
    /// Event log in append order
    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    pub fn deliveries(&self) -> &[DeliveryOutcome] {
        &self.deliveries
    }

    pub fn event(&self, event_id: Uuid) -> Option<&LifecycleEvent> {
        self.events.iter().find(|e| e.id == event_id)
    }

    pub fn delivery(&self, outcome_id: Uuid) -> Option<&DeliveryOutcome> {
        self.deliveries.iter().find(|d| d.id == outcome_id)
    }

    /// Append an event, assigning its log sequence. The only way events enter the log.
    pub fn append_event(&mut self, mut event: LifecycleEvent) -> &LifecycleEvent {
        event.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.events.push(event);
        // just pushed
        &self.events[self.events.len() - 1]
    }

    pub fn record_outcome(&mut self, outcome: DeliveryOutcome) {
        self.deliveries.push(outcome);
    }

    /// Event already recorded for the same platform notification
    pub fn find_duplicate(&self, platform: Platform, source_event_id: &str) -> Option<Uuid> {
        self.events
            .iter()
            .find(|e| e.platform == platform && e.source_event_id.as_deref() == Some(source_event_id))
            .map(|e| e.id)
    }

    /// Most recent expiry known for a customer (latest event carrying one)
    pub fn last_known_expiry(&self, email: &str) -> Option<OffsetDateTime> {
        let key = customer_key(email);
        self.events
            .iter()
            .filter(|e| e.expiry_date.is_some() && e.customer_key() == key)
            .max_by_key(|e| (e.timestamp, e.sequence))
            .and_then(|e| e.expiry_date)
    }

    /// Wipe the event log. Mappings, endpoint and delivery history are kept.
    pub fn clear_log(&mut self) -> usize {
        let removed = self.events.len();
        self.events.clear();
        removed
    }
}

/// Shared handle over every owner's workspace
#[derive(Clone, Default)]
pub struct OwnerStore {
    workspaces: Arc<RwLock<HashMap<OwnerId, OwnerWorkspace>>>,
    data_dir: Option<PathBuf>,
}

impl OwnerStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Load every `<owner>.json` snapshot in `data_dir`, creating it if needed
    pub async fn open(data_dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        let mut workspaces = HashMap::new();
        let mut entries = tokio::fs::read_dir(&data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(owner) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<OwnerId>().ok())
            else {
                tracing::warn!(path = %path.display(), "Skipping snapshot with unrecognized name");
                continue;
            };

            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<OwnerWorkspace>(&bytes) {
                Ok(workspace) => {
                    workspaces.insert(owner, workspace);
                }
                Err(e) => {
                    tracing::error!(
                        owner_id = %owner,
                        path = %path.display(),
                        error = %e,
                        "Failed to parse owner snapshot"
                    );
                    return Err(EngineError::Storage(format!(
                        "corrupt snapshot {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }

        tracing::info!(
            owners = workspaces.len(),
            data_dir = %data_dir.display(),
            "Owner store loaded"
        );

        Ok(Self {
            workspaces: Arc::new(RwLock::new(workspaces)),
            data_dir: Some(data_dir),
        })
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Run `f` against an owner's workspace (an empty one if the owner is new)
    pub async fn read<R>(&self, owner: OwnerId, f: impl FnOnce(&OwnerWorkspace) -> R) -> R {
        let guard = self.workspaces.read().await;
        match guard.get(&owner) {
            Some(workspace) => f(workspace),
            None => f(&OwnerWorkspace::default()),
        }
    }

    /// Run `f` against an owner's workspace and persist the snapshot.
    /// With a data directory the change only becomes visible once the snapshot is written.
    pub async fn write<R>(
        &self,
        owner: OwnerId,
        f: impl FnOnce(&mut OwnerWorkspace) -> R,
    ) -> EngineResult<R> {
        let mut guard = self.workspaces.write().await;

        let Some(dir) = &self.data_dir else {
            return Ok(f(guard.entry(owner).or_default()));
        };

        let mut staged = guard.get(&owner).cloned().unwrap_or_default();
        let result = f(&mut staged);

        let bytes = serde_json::to_vec_pretty(&staged)?;
        if let Err(e) = write_snapshot(dir, owner, &bytes).await {
            tracing::error!(owner_id = %owner, error = %e, "Failed to persist owner snapshot");
            return Err(e);
        }

        guard.insert(owner, staged);
        Ok(result)
    }

    pub async fn owners(&self) -> Vec<OwnerId> {
        let mut owners: Vec<OwnerId> = self.workspaces.read().await.keys().copied().collect();
        owners.sort();
        owners
    }
}

/// Write via a temp file and rename so a crash never leaves a torn snapshot
async fn write_snapshot(dir: &Path, owner: OwnerId, bytes: &[u8]) -> EngineResult<()> {
    let path = dir.join(format!("{}.json", owner));
    let temp_path = dir.join(format!("{}.json.tmp", owner));
    tokio::fs::write(&temp_path, bytes).await?;
    tokio::fs::rename(&temp_path, &path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, PlanRef};
    use time::macros::datetime;

    fn event(email: &str, at: OffsetDateTime, expiry: Option<OffsetDateTime>) -> LifecycleEvent {
        LifecycleEvent {
            id: Uuid::new_v4(),
            sequence: 0,
            source_event_id: None,
            timestamp: at,
            platform: Platform::Custom,
            customer_email: email.to_string(),
            customer_name: None,
            plan: PlanRef::Unresolved {
                product_id: "p".to_string(),
            },
            event_type: EventType::Approved,
            expiry_date: expiry,
        }
    }

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let mut ws = OwnerWorkspace::default();
        let t = datetime!(2024-01-01 0:00 UTC);
        let a = ws.append_event(event("a@x.com", t, None)).sequence;
        let b = ws.append_event(event("a@x.com", t, None)).sequence;
        assert!(b > a);

        ws.clear_log();
        let c = ws.append_event(event("a@x.com", t, None)).sequence;
        assert!(c > b, "sequence keeps increasing after a clear");
    }

    #[test]
    fn test_last_known_expiry_uses_latest_event_by_time() {
        let mut ws = OwnerWorkspace::default();
        let t0 = datetime!(2024-01-01 0:00 UTC);
        let t1 = datetime!(2024-02-01 0:00 UTC);
        ws.append_event(event("A@x.com", t1, Some(datetime!(2024-03-02 0:00 UTC))));
        // backfill of an older approval arrives later
        ws.append_event(event("a@x.com", t0, Some(datetime!(2024-01-31 0:00 UTC))));
        ws.append_event(event("other@x.com", t1, Some(datetime!(2030-01-01 0:00 UTC))));

        assert_eq!(
            ws.last_known_expiry("a@X.com"),
            Some(datetime!(2024-03-02 0:00 UTC))
        );
        assert_eq!(ws.last_known_expiry("nobody@x.com"), None);
    }

    #[tokio::test]
    async fn test_owners_are_isolated() {
        let store = OwnerStore::new_in_memory();
        let owner_a = OwnerId::new();
        let owner_b = OwnerId::new();
        let t = datetime!(2024-01-01 0:00 UTC);

        store
            .write(owner_a, |ws| {
                ws.append_event(event("a@x.com", t, None));
            })
            .await
            .unwrap();

        assert_eq!(store.read(owner_a, |ws| ws.events().len()).await, 1);
        assert_eq!(store.read(owner_b, |ws| ws.events().len()).await, 0);
        assert_eq!(store.owners().await, {
            let mut v = vec![owner_a];
            v.sort();
            v
        });
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_data_dir() {
        let dir = std::env::temp_dir().join(format!("planautomator-store-{}", Uuid::new_v4()));
        let owner = OwnerId::new();
        let t = datetime!(2024-01-01 0:00 UTC);

        {
            let store = OwnerStore::open(&dir).await.unwrap();
            store
                .write(owner, |ws| {
                    ws.append_event(event("a@x.com", t, None));
                    ws.append_event(event("b@x.com", t, None));
                })
                .await
                .unwrap();
        }

        let reopened = OwnerStore::open(&dir).await.unwrap();
        let sequences = reopened
            .read(owner, |ws| ws.events().iter().map(|e| e.sequence).collect::<Vec<_>>())
            .await;
        assert_eq!(sequences, vec![0, 1]);

        // sequence counter survives the reload
        let next = reopened
            .write(owner, |ws| ws.append_event(event("c@x.com", t, None)).sequence)
            .await
            .unwrap();
        assert_eq!(next, 2);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_memory_unchanged() {
        let dir = std::env::temp_dir().join(format!("planautomator-store-{}", Uuid::new_v4()));
        let owner = OwnerId::new();
        let t = datetime!(2024-01-01 0:00 UTC);

        let store = OwnerStore::open(&dir).await.unwrap();
        store
            .write(owner, |ws| {
                ws.append_event(event("a@x.com", t, None));
            })
            .await
            .unwrap();

        tokio::fs::remove_dir_all(&dir).await.unwrap();

        let result = store
            .write(owner, |ws| {
                ws.append_event(event("b@x.com", t, None));
                ws.clear_log()
            })
            .await;
        assert!(matches!(result, Err(EngineError::Storage(_))));

        let emails = store
            .read(owner, |ws| {
                ws.events().iter().map(|e| e.customer_email.clone()).collect::<Vec<_>>()
            })
            .await;
        assert_eq!(emails, vec!["a@x.com".to_string()]);

        // new owners are not registered either
        let other = OwnerId::new();
        assert!(store.write(other, |_| ()).await.is_err());
        assert_eq!(store.owners().await, vec![owner]);
    }
}
