//! Async SQLite connection factory.
//!
//! Uses diesel-async's SyncConnectionWrapper to provide an async
//! interface over SQLite. SQLite connections are lightweight, so a new
//! connection is established per request rather than pooled; the wrapper
//! runs blocking work on the runtime's blocking pool.

use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::AsyncConnection;
use std::path::Path;

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Async SQLite connection.
pub type AsyncSqliteConnection = SyncConnectionWrapper<SqliteConnection>;

/// Connection factory for one SQLite database file.
#[derive(Clone)]
pub struct AsyncSqlitePool {
    database_url: String,
}

impl AsyncSqlitePool {
    /// Create a factory for a database URL. A `sqlite:` prefix is
    /// stripped for diesel.
    pub fn new(database_url: &str) -> Self {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    /// Create a factory from a file path.
    pub fn from_path(db_path: &Path) -> Self {
        Self::new(&db_path.display().to_string())
    }

    /// Open a new connection.
    pub async fn get(&self) -> Result<AsyncSqliteConnection, DieselError> {
        AsyncSqliteConnection::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Fold connection-establishment errors into the diesel error type the
/// rest of the store layer speaks.
fn to_diesel_error(e: diesel::ConnectionError) -> DieselError {
    DieselError::DatabaseError(DatabaseErrorKind::UnableToSendCommand, Box::new(e.to_string()))
}
