// ===========================================================================
// Per-run workspace and the namespaced store it commits into
// ===========================================================================

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::GraphBuildError;
use crate::model::GraphTables;

/// Node and edge tables committed by one run.
#[derive(Debug, Clone, Serialize)]
pub struct CommittedGraph {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
    pub tables: GraphTables,
}

/// Thread-safe registry of committed graphs, one per namespace.
/// Clones share the same underlying maps.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    committed: Arc<DashMap<String, Arc<CommittedGraph>>>,
    reservations: Arc<DashMap<String, Uuid>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<CommittedGraph>> {
        self.committed.get(namespace).map(|entry| Arc::clone(entry.value()))
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.committed.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_reserved(&self, namespace: &str) -> bool {
        self.reservations.contains_key(namespace)
    }

    fn release(&self, namespace: &str, run_id: Uuid) {
        self.reservations.remove_if(namespace, |_, holder| *holder == run_id);
    }
}

/// Isolated context of one run. Nothing becomes visible in the store until
/// [`RunWorkspace::commit`]; dropping the workspace discards it.
#[derive(Debug)]
pub struct RunWorkspace {
    store: GraphStore,
    namespace: String,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    staged: Option<GraphTables>,
}

impl RunWorkspace {
    /// Reserves `namespace` for a new run. Fails while another run holds it.
    pub fn create(store: &GraphStore, namespace: impl Into<String>) -> Result<Self, GraphBuildError> {
        let namespace = namespace.into();
        if namespace.trim().is_empty() {
            return Err(GraphBuildError::Workspace {
                namespace,
                reason: "namespace must not be empty".to_string(),
            });
        }

        let run_id = Uuid::new_v4();
        match store.reservations.entry(namespace.clone()) {
            Entry::Occupied(holder) => {
                return Err(GraphBuildError::Workspace {
                    namespace,
                    reason: format!("already reserved by run {}", holder.get()),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(run_id);
            }
        }

        debug!(%namespace, %run_id, "workspace created");
        Ok(Self {
            store: store.clone(),
            namespace,
            run_id,
            started_at: Utc::now(),
            staged: None,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Replaces whatever was staged before.
    pub fn stage(&mut self, tables: GraphTables) {
        self.staged = Some(tables);
    }

    pub fn staged(&self) -> Option<&GraphTables> {
        self.staged.as_ref()
    }

    /// Swaps the staged tables into the store in a single insertion.
    pub fn commit(mut self) -> Result<Arc<CommittedGraph>, GraphBuildError> {
        let Some(tables) = self.staged.take() else {
            return Err(GraphBuildError::Workspace {
                namespace: self.namespace.clone(),
                reason: "nothing staged to commit".to_string(),
            });
        };
        let committed = Arc::new(CommittedGraph {
            run_id: self.run_id,
            started_at: self.started_at,
            committed_at: Utc::now(),
            tables,
        });
        self.store
            .committed
            .insert(self.namespace.clone(), Arc::clone(&committed));
        info!(
            namespace = %self.namespace,
            run_id = %self.run_id,
            nodes = committed.tables.nodes.len(),
            edges = committed.tables.edges.len(),
            "committed graph"
        );
        Ok(committed)
    }

    /// Drops staged tables and releases the namespace.
    pub fn discard(self) {
        debug!(namespace = %self.namespace, run_id = %self.run_id, "workspace discarded");
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        self.store.release(&self.namespace, self.run_id);
    }
}
