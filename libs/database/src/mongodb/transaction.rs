use tracing::{error, instrument, warn};

use super::{
    LogicalDatabase,
    driver::{Connection, TransactionSession},
};
use crate::common::{DatabaseError, DatabaseResult};

/// Acquire a session on `connection` and start a transaction on it
///
/// - No connection: [`DatabaseError::ConnectionUndefined`], nothing is called.
/// - Session acquisition fails: wrapped as [`DatabaseError::Transaction`], no cleanup.
/// - Starting the transaction fails: the transaction is aborted and the session
///   ended before the wrapped error is returned.
///
/// On success the caller owns the session, including commit/abort/end.
#[instrument(skip(connection), fields(database = %id))]
pub async fn begin_transaction<C: Connection>(
    id: LogicalDatabase,
    connection: Option<&C>,
) -> DatabaseResult<C::Session> {
    let connection = connection.ok_or(DatabaseError::ConnectionUndefined(id))?;

    let mut session = connection
        .start_session()
        .await
        .map_err(|source| DatabaseError::Transaction {
            database: id,
            source,
        })?;

    if let Err(source) = session.start_transaction().await {
        error!(database = %id, error = %source, "Unable to begin transaction");

        if let Err(err) = session.abort_transaction().await {
            warn!(database = %id, error = %err, "Failed to abort transaction");
        }
        session.end_session().await;

        return Err(DatabaseError::Transaction {
            database: id,
            source,
        });
    }

    Ok(session)
}
