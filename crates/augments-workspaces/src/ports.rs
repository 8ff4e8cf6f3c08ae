use std::sync::Arc;

use augments_common::{Result, WorkspaceError};
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::WorkspaceStore;

/// Half-open range of host ports reserved for workspace desktops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start >= end {
            return Err(WorkspaceError::Config(format!(
                "empty port range {start}..{end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        usize::from(self.end.saturating_sub(self.start))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 10000,
            end: 20000,
        }
    }
}

/// Hands out the lowest free port in the range.
///
/// Allocation is serialized in-process, and each candidate is committed through
/// the store's atomic reservation so a port taken by another writer is skipped.
pub struct PortAllocator {
    store: Arc<dyn WorkspaceStore>,
    range: PortRange,
    lock: Mutex<()>,
}

impl PortAllocator {
    pub fn new(store: Arc<dyn WorkspaceStore>, range: PortRange) -> Self {
        Self {
            store,
            range,
            lock: Mutex::new(()),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Reserve a port for `workspace_id` and record it on the workspace.
    pub async fn allocate(&self, workspace_id: &str) -> Result<u16> {
        let _guard = self.lock.lock().await;
        let held = self.store.held_ports().await?;

        for port in (self.range.start..self.range.end).filter(|p| !held.contains(p)) {
            if self.store.try_reserve_port(workspace_id, port).await? {
                debug!(%workspace_id, port, "Reserved port");
                return Ok(port);
            }
            debug!(%workspace_id, port, "Port taken concurrently, trying next");
        }

        Err(WorkspaceError::PortExhaustion {
            start: self.range.start,
            end: self.range.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorage, WorkspaceUpdate};
    use augments_common::Workspace;

    async fn store_with(users: &[&str]) -> (Arc<InMemoryStorage>, Vec<String>) {
        let store = Arc::new(InMemoryStorage::new());
        let mut ids = Vec::new();
        for user in users {
            let ws = store
                .insert_for_user(Workspace::new(*user, "ws", None))
                .await
                .unwrap();
            ids.push(ws.id);
        }
        (store, ids)
    }

    #[test]
    fn test_port_range_validation() {
        assert!(PortRange::new(10000, 10000).is_err());
        assert!(PortRange::new(20000, 10000).is_err());
        assert_eq!(PortRange::new(10000, 10003).unwrap().len(), 3);
        assert_eq!(PortRange::default().len(), 10000);
    }

    #[tokio::test]
    async fn test_allocates_lowest_free_port() {
        let (store, ids) = store_with(&["a", "b", "c"]).await;
        let allocator = PortAllocator::new(store.clone(), PortRange::new(10000, 10010).unwrap());

        assert_eq!(allocator.allocate(&ids[0]).await.unwrap(), 10000);
        assert_eq!(allocator.allocate(&ids[1]).await.unwrap(), 10001);

        // A released port is handed out again before higher ones
        store.update(&ids[0], WorkspaceUpdate::failed()).await.unwrap();
        assert_eq!(allocator.allocate(&ids[2]).await.unwrap(), 10000);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let (store, ids) = store_with(&["a", "b"]).await;
        let allocator = PortAllocator::new(store, PortRange::new(10000, 10001).unwrap());

        assert_eq!(allocator.allocate(&ids[0]).await.unwrap(), 10000);
        let result = allocator.allocate(&ids[1]).await;
        assert!(matches!(
            result,
            Err(WorkspaceError::PortExhaustion {
                start: 10000,
                end: 10001
            })
        ));
    }
}
