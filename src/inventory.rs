use ahash::AHashMap;
use binding_policy_k8s_api::labels;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Workload {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: labels::Map,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ManagedCluster {
    pub name: String,
    #[serde(default)]
    pub labels: labels::Map,
    #[serde(default)]
    pub status: String,
}

/// The workloads and clusters a view currently knows about.
///
/// Entries keep the order they were listed in; the name index only speeds up
/// exact lookups.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    workloads: Vec<Workload>,
    clusters: Vec<ManagedCluster>,
    workloads_by_name: AHashMap<String, usize>,
    clusters_by_name: AHashMap<String, usize>,
}

// === impl Inventory ===

impl Inventory {
    pub fn new(workloads: Vec<Workload>, clusters: Vec<ManagedCluster>) -> Self {
        let workloads_by_name = index_by_name(workloads.iter().map(|w| w.name.as_str()));
        let clusters_by_name = index_by_name(clusters.iter().map(|c| c.name.as_str()));
        Self {
            workloads,
            clusters,
            workloads_by_name,
            clusters_by_name,
        }
    }

    pub fn workloads(&self) -> &[Workload] {
        &self.workloads
    }

    pub fn clusters(&self) -> &[ManagedCluster] {
        &self.clusters
    }

    /// Finds a workload by exact name, falling back to the first workload
    /// whose name contains `id` or is contained in it.
    ///
    /// Canvas identifiers sometimes carry only part of a hyphenated workload
    /// name (or extra decoration around it), so the fallback tolerates that
    /// drift. An empty id or name never takes part in a partial match.
    pub fn find_workload(&self, id: &str) -> Option<&Workload> {
        if let Some(&i) = self.workloads_by_name.get(id) {
            return Some(&self.workloads[i]);
        }
        if id.is_empty() {
            return None;
        }
        let found = self.workloads.iter().find(|w| {
            !w.name.is_empty() && (w.name.contains(id) || id.contains(w.name.as_str()))
        });
        if let Some(w) = found {
            tracing::debug!(%id, workload = %w.name, "resolved workload by partial name");
        }
        found
    }

    /// Finds a cluster by exact name.
    pub fn find_cluster(&self, id: &str) -> Option<&ManagedCluster> {
        self.clusters_by_name.get(id).map(|&i| &self.clusters[i])
    }
}

fn index_by_name<'a>(names: impl Iterator<Item = &'a str>) -> AHashMap<String, usize> {
    let mut index = AHashMap::new();
    for (i, name) in names.enumerate() {
        // The first entry with a given name wins, as with a linear search.
        index.entry(name.to_string()).or_insert(i);
    }
    index
}
