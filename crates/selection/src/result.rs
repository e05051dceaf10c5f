use std::collections::BTreeSet;
use std::sync::Arc;

use foundation::ids::ListingId;
use layers::cluster::ClusterSnapshot;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Listings inside one finalized region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionResult {
    /// Finalize counter of the region that produced this result.
    pub generation: u64,
    pub included_ids: BTreeSet<ListingId>,
}

impl SelectionResult {
    pub fn new(generation: u64, included_ids: BTreeSet<ListingId>) -> Self {
        Self {
            generation,
            included_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.included_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.included_ids.is_empty()
    }

    pub fn contains(&self, id: &ListingId) -> bool {
        self.included_ids.contains(id)
    }
}

type ClusterSlot = Option<Arc<ClusterSnapshot>>;
type SelectionSlot = Option<Arc<SelectionResult>>;

/// Write side of the published map state.
///
/// Both slots are last-write-wins by generation: a value older than the one
/// already published is dropped.
#[derive(Debug)]
pub struct SelectionPublisher {
    clusters: watch::Sender<ClusterSlot>,
    selection: watch::Sender<SelectionSlot>,
}

impl Default for SelectionPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPublisher {
    pub fn new() -> Self {
        let (clusters, _) = watch::channel(None);
        let (selection, _) = watch::channel(None);
        Self {
            clusters,
            selection,
        }
    }

    pub fn subscribe(&self) -> SelectionView {
        SelectionView {
            clusters: self.clusters.subscribe(),
            selection: self.selection.subscribe(),
        }
    }

    /// Returns `false` if a newer snapshot is already published.
    pub fn publish_clusters(&self, snapshot: Arc<ClusterSnapshot>) -> bool {
        self.clusters.send_if_modified(|slot| {
            if slot.as_ref().is_some_and(|cur| {
                Arc::ptr_eq(cur, &snapshot) || cur.generation > snapshot.generation
            }) {
                return false;
            }
            *slot = Some(Arc::clone(&snapshot));
            true
        })
    }

    /// Publishes `result` unless a newer one is already visible.
    pub fn publish_selection(&self, result: SelectionResult) -> Option<Arc<SelectionResult>> {
        let result = Arc::new(result);
        let published = self.selection.send_if_modified(|slot| {
            if slot
                .as_ref()
                .is_some_and(|cur| cur.generation > result.generation)
            {
                return false;
            }
            *slot = Some(Arc::clone(&result));
            true
        });
        if !published {
            debug!(generation = result.generation, "dropped stale selection");
            return None;
        }
        Some(result)
    }

    /// Clears the published selection. Returns `false` if nothing was
    /// published.
    pub fn clear_selection(&self) -> bool {
        self.selection.send_if_modified(|slot| slot.take().is_some())
    }

    pub fn clusters(&self) -> ClusterSlot {
        self.clusters.borrow().clone()
    }

    pub fn selection(&self) -> SelectionSlot {
        self.selection.borrow().clone()
    }
}

/// Read side handed to whatever renders the listing table and the markers.
#[derive(Debug, Clone)]
pub struct SelectionView {
    clusters: watch::Receiver<ClusterSlot>,
    selection: watch::Receiver<SelectionSlot>,
}

impl SelectionView {
    pub fn selection(&self) -> SelectionSlot {
        self.selection.borrow().clone()
    }

    /// Empty when no region has been finalized.
    pub fn included_ids(&self) -> BTreeSet<ListingId> {
        self.selection
            .borrow()
            .as_ref()
            .map(|r| r.included_ids.clone())
            .unwrap_or_default()
    }

    pub fn clusters(&self) -> ClusterSlot {
        self.clusters.borrow().clone()
    }

    /// Rows whose id is in the current selection, in their original order.
    /// With no selection every row passes.
    pub fn select_rows<'a, T>(
        &self,
        rows: &'a [T],
        id_of: impl Fn(&T) -> ListingId,
    ) -> Vec<&'a T> {
        let guard = self.selection.borrow();
        match guard.as_ref() {
            Some(result) => rows.iter().filter(|r| result.contains(&id_of(r))).collect(),
            None => rows.iter().collect(),
        }
    }

    /// Waits for the next selection change.
    pub async fn selection_changed(&mut self) -> Result<SelectionSlot, watch::error::RecvError> {
        self.selection.changed().await?;
        Ok(self.selection.borrow_and_update().clone())
    }

    /// Waits for the next cluster snapshot.
    pub async fn clusters_changed(&mut self) -> Result<ClusterSlot, watch::error::RecvError> {
        self.clusters.changed().await?;
        Ok(self.clusters.borrow_and_update().clone())
    }
}
