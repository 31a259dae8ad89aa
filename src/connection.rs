//! Tracks the workload-to-cluster connection a user is drawing and drives
//! the policy dialog that follows from it.

use crate::{
    form::PolicyForm,
    inventory::Inventory,
    policy::PolicyConfiguration,
    validate::Invalid,
};
use serde::{Deserialize, Serialize};
use std::fmt;


#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Workload,
    Cluster,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub kind: EndpointKind,
}

/// A resolved workload/cluster pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub workload: Endpoint,
    pub workload_namespace: String,
    pub cluster: Endpoint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,

    /// One end has been picked; waiting for an endpoint of the other kind.
    PendingOtherEnd { source_id: String, source_kind: EndpointKind },

    /// Both ends are resolved and the policy dialog is open.
    AwaitingPolicy {
        connection: Connection,
        form: Box<PolicyForm>,
    },
}

/// A message to show the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Warning(String),
    Success(String),
}

/// Receives completed policies, e.g. by writing them to the backend API.
pub trait PolicySink {
    fn persist(&self, config: &PolicyConfiguration) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("no policy is awaiting configuration")]
    NotAwaiting,

    #[error(transparent)]
    Invalid(#[from] Invalid),

    #[error("failed to save binding policy: {0}")]
    Persist(#[source] anyhow::Error),
}

/// The connection state machine.
///
/// Only one connection is ever pending. Connection mode stays enabled after
/// a policy is saved; it is only turned off by [`Coordinator::toggle_mode`].
#[derive(Debug)]
pub struct Coordinator {
    state: State,
    enabled: bool,
}

// === impl EndpointKind ===

impl EndpointKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workload => "workload",
            Self::Cluster => "cluster",
        }
    }

    pub const fn opposite(&self) -> Self {
        match self {
            Self::Workload => Self::Cluster,
            Self::Cluster => Self::Workload,
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Endpoint ===

impl Endpoint {
    pub fn workload(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: EndpointKind::Workload,
        }
    }

    pub fn cluster(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: EndpointKind::Cluster,
        }
    }
}

// === impl Coordinator ===

impl Coordinator {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            enabled: true,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Switches connection mode on or off, dropping any pending connection.
    pub fn toggle_mode(&mut self) {
        self.enabled = !self.enabled;
        self.state = State::Idle;
        tracing::debug!(enabled = self.enabled, "connection mode toggled");
    }

    /// A hint describing what the user should click next.
    pub fn prompt(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        match self.state {
            State::Idle => Some("Click on a workload or cluster to start a connection".to_string()),
            State::PendingOtherEnd { source_kind, .. } => Some(format!(
                "Select a {} to complete the connection",
                source_kind.opposite()
            )),
            State::AwaitingPolicy { .. } => None,
        }
    }

    /// The resolved connection while its policy dialog is open.
    pub fn connection(&self) -> Option<&Connection> {
        match self.state {
            State::AwaitingPolicy { ref connection, .. } => Some(connection),
            _ => None,
        }
    }

    /// The open policy form, if a connection is awaiting its policy.
    pub fn form(&self) -> Option<&PolicyForm> {
        match self.state {
            State::AwaitingPolicy { ref form, .. } => Some(form.as_ref()),
            _ => None,
        }
    }

    pub fn form_mut(&mut self) -> Option<&mut PolicyForm> {
        match self.state {
            State::AwaitingPolicy { ref mut form, .. } => Some(form.as_mut()),
            _ => None,
        }
    }

    /// Handles a click on a workload or cluster.
    ///
    /// Returns a warning when the selection completes a connection but one of
    /// its ends cannot be found in `inventory`.
    pub fn select(&mut self, inventory: &Inventory, kind: EndpointKind, id: &str) -> Option<Notice> {
        if !self.enabled {
            tracing::trace!(%kind, %id, "ignoring selection outside connection mode");
            return None;
        }

        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {
                tracing::debug!(%kind, %id, "connection started");
                self.state = State::PendingOtherEnd {
                    source_id: id.to_string(),
                    source_kind: kind,
                };
                None
            }

            State::PendingOtherEnd { source_kind, .. } if source_kind == kind => {
                tracing::debug!(%kind, %id, "connection source replaced");
                self.state = State::PendingOtherEnd {
                    source_id: id.to_string(),
                    source_kind: kind,
                };
                None
            }

            State::PendingOtherEnd { source_id, .. } => {
                let (workload_id, cluster_id) = match kind {
                    EndpointKind::Cluster => (source_id.as_str(), id),
                    EndpointKind::Workload => (id, source_id.as_str()),
                };
                match resolve(inventory, workload_id, cluster_id) {
                    Ok(connection) => {
                        tracing::info!(
                            workload = %connection.workload.name,
                            cluster = %connection.cluster.name,
                            "connection completed"
                        );
                        let form = Box::new(PolicyForm::for_connection(&connection));
                        self.state = State::AwaitingPolicy { connection, form };
                        None
                    }
                    Err(missing) => {
                        tracing::warn!(%workload_id, %cluster_id, %missing, "connection endpoint not found");
                        Some(Notice::Warning(format!(
                            "Could not find {missing} with the specified ID. Please try again."
                        )))
                    }
                }
            }

            awaiting @ State::AwaitingPolicy { .. } => {
                // The policy dialog is modal.
                tracing::trace!(%kind, %id, "ignoring selection while a policy is pending");
                self.state = awaiting;
                None
            }
        }
    }

    /// Submits the pending form and hands the policy to `sink`.
    ///
    /// The connection is only released when the sink accepts the policy; on
    /// validation or persistence errors the dialog stays open.
    pub fn save<S: PolicySink + ?Sized>(&mut self, sink: &S) -> Result<Notice, SaveError> {
        let (connection, form) = match self.state {
            State::AwaitingPolicy {
                ref connection,
                ref mut form,
            } => (connection, form),
            _ => return Err(SaveError::NotAwaiting),
        };

        // Submitting resets the form, so keep a copy to restore on failure.
        let before = form.clone();
        let config = form.submit()?;
        if let Err(error) = sink.persist(&config) {
            tracing::warn!(%error, policy = %config.name, "failed to persist binding policy");
            *form = before;
            return Err(SaveError::Persist(error));
        }

        let notice = Notice::Success(format!(
            "Successfully created binding policy \"{}\" connecting {} to {}",
            config.name, connection.workload.name, connection.cluster.name
        ));
        tracing::info!(policy = %config.name, namespace = %config.namespace, "binding policy created");
        self.state = State::Idle;
        Ok(notice)
    }

    /// Abandons the pending connection without saving anything.
    pub fn cancel(&mut self) {
        if !matches!(self.state, State::Idle) {
            tracing::debug!("connection cancelled");
        }
        self.state = State::Idle;
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves both ends of a connection, returning the kind of the first end
/// that could not be found. Empty ids never resolve.
fn resolve(
    inventory: &Inventory,
    workload_id: &str,
    cluster_id: &str,
) -> Result<Connection, EndpointKind> {
    if workload_id.is_empty() {
        return Err(EndpointKind::Workload);
    }
    if cluster_id.is_empty() {
        return Err(EndpointKind::Cluster);
    }
    let workload = inventory
        .find_workload(workload_id)
        .ok_or(EndpointKind::Workload)?;
    let cluster = inventory
        .find_cluster(cluster_id)
        .ok_or(EndpointKind::Cluster)?;
    Ok(Connection {
        workload: Endpoint::workload(workload_id, &workload.name),
        workload_namespace: if workload.namespace.is_empty() {
            crate::policy::DEFAULT_NAMESPACE.to_string()
        } else {
            workload.namespace.clone()
        },
        cluster: Endpoint::cluster(cluster_id, &cluster.name),
    })
}
