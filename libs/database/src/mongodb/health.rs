use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, instrument};

use super::{
    ConnectionHandle, LogicalDatabase,
    driver::{Connection, ReadyState},
};

/// Per-database status reported by the health check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DbStatus {
    Disconnected,
    Connected,
    Connecting,
    Disconnecting,
    /// The reachability probe itself failed
    #[serde(rename = "op_failed")]
    #[strum(serialize = "op_failed")]
    OperationFailed,
}

impl DbStatus {
    /// Driver states outside the known vocabulary map to `None`
    pub fn from_ready_state(state: ReadyState) -> Option<Self> {
        match state {
            ReadyState::DISCONNECTED => Some(DbStatus::Disconnected),
            ReadyState::CONNECTED => Some(DbStatus::Connected),
            ReadyState::CONNECTING => Some(DbStatus::Connecting),
            ReadyState::DISCONNECTING => Some(DbStatus::Disconnecting),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    ServiceUnavailable,
}

impl HealthStatus {
    pub fn http_status(self) -> u16 {
        match self {
            HealthStatus::Ok => 200,
            HealthStatus::ServiceUnavailable => 503,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub mongodb: BTreeMap<LogicalDatabase, DbStatus>,
}

/// Aggregate health of every held connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,
    pub details: HealthDetails,
}

impl HealthVerdict {
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }

    pub fn http_status(&self) -> u16 {
        self.status.http_status()
    }
}

/// Probe one connection and derive its status
///
/// A failing probe yields [`DbStatus::OperationFailed`] without consulting
/// the driver state; `None` means the driver state has no mapping.
pub async fn check_connection<C: Connection>(id: LogicalDatabase, connection: &C) -> Option<DbStatus> {
    let start = Instant::now();

    match connection.probe().await {
        Ok(()) => {
            let state = connection.ready_state();
            let status = DbStatus::from_ready_state(state);
            debug!(
                database = %id,
                ready_state = state.0,
                status = ?status,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Database probe finished"
            );
            status
        }
        Err(err) => {
            error!(database = %id, error = %err, "Database operation failed");
            Some(DbStatus::OperationFailed)
        }
    }
}

/// Probe every handle concurrently
///
/// The verdict is `Ok` only if every held database is `Connected`. A database
/// whose state has no mapping is left out of the details but still counts as
/// not connected.
#[instrument(skip_all, fields(databases = handles.len()))]
pub async fn check_health<C: Connection>(
    handles: &BTreeMap<LogicalDatabase, ConnectionHandle<C>>,
) -> HealthVerdict {
    let probes = handles.iter().map(|(id, handle)| async move {
        (*id, check_connection(*id, &handle.connection).await)
    });
    let results = join_all(probes).await;

    let all_connected = results
        .iter()
        .all(|(_, status)| *status == Some(DbStatus::Connected));

    let mongodb = results
        .into_iter()
        .filter_map(|(id, status)| status.map(|status| (id, status)))
        .collect();

    HealthVerdict {
        status: if all_connected {
            HealthStatus::Ok
        } else {
            HealthStatus::ServiceUnavailable
        },
        details: HealthDetails { mongodb },
    }
}
