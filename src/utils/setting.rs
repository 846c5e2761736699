// Connectivity pre-check run before a dump
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::ConnectionDescriptor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn connect_options(conn: &ConnectionDescriptor) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&conn.host)
        .port(conn.port)
        .username(&conn.username)
        .database(&conn.database);
    match &conn.password {
        Some(password) => options.password(password),
        None => options,
    }
}

pub async fn connect(conn: &ConnectionDescriptor) -> Result<PgConnection, sqlx::Error> {
    connect_options(conn).connect().await
}

/// Returns whether the target database accepts a connection. Never fails:
/// the dump tool has the final word on reachability.
pub async fn check_db_connection(conn: &ConnectionDescriptor) -> bool {
    match timeout(CONNECT_TIMEOUT, connect(conn)).await {
        Ok(Ok(connection)) => {
            let _ = connection.close().await;
            info!(
                "Connected to {}@{}:{}/{}",
                conn.username, conn.host, conn.port, conn.database
            );
            true
        }
        Ok(Err(e)) => {
            warn!(
                "Failed to connect to {}:{}/{}: {}",
                conn.host, conn.port, conn.database, e
            );
            false
        }
        Err(_) => {
            warn!(
                "Connecting to {}:{}/{} timed out after {}s",
                conn.host,
                conn.port,
                conn.database,
                CONNECT_TIMEOUT.as_secs()
            );
            false
        }
    }
}
