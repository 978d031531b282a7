use thiserror::Error;

use crate::store::StoreError;

/// Fatal failure of a clustering call. The ingestion run must stop: cluster
/// ids can no longer be guaranteed disjoint.
#[derive(Debug, Error)]
pub enum ClusteringError {
    #[error("cluster store failure for component {component:?} during {operation}: {source}")]
    Store {
        component: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("clustering invariant violated: {0}")]
    Invariant(String),
}
