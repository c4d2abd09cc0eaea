//! Reuse-or-create resolution for both sides of a session.

use tracing::{debug, info};

use super::provider::ConnectionProvider;
use super::{BoxConnection, Connection, ConnectionInfo, Side};
use crate::error::ProxyError;

/// A ready connection and what its role handler is told about it.
pub struct Resolved {
    /// The connection.
    pub connection: BoxConnection,
    /// Handed to the role handler's `connected` hook.
    pub info: ConnectionInfo,
}

/// Probe a connection; `false` means it must not be reused.
pub async fn validate(conn: &mut dyn Connection) -> bool {
    match conn.probe().await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, endpoint = ?conn.endpoint(), "liveness probe failed");
            false
        }
    }
}

/// Reuse `existing` if it passes [`validate`], otherwise acquire a fresh
/// connection from `provider`.
pub async fn resolve(
    side: Side,
    existing: Option<BoxConnection>,
    provider: &mut (dyn ConnectionProvider + '_),
) -> Result<Resolved, ProxyError> {
    if let Some(mut conn) = existing {
        if validate(conn.as_mut()).await {
            debug!(side = side.as_str(), "reusing supplied connection");
            return Ok(ready(side, conn, true));
        }
        info!(side = side.as_str(), "supplied connection is dead, replacing it");
    }
    let conn = provider.acquire().await?;
    Ok(ready(side, conn, false))
}

fn ready(side: Side, connection: BoxConnection, reused: bool) -> Resolved {
    let info = ConnectionInfo {
        side,
        endpoint: connection.endpoint().map(str::to_owned),
        reused,
    };
    Resolved { connection, info }
}
