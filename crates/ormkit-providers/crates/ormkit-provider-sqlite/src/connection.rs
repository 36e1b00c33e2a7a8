//! SQLite connection implementation

use std::any::Any;
use std::path::{Path, PathBuf};

use ormkit_core::{ConnectionState, ConnectionStringBuilder, DbConnection, OrmError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags};

/// Invariant name of the SQLite provider
pub const SQLITE_PROVIDER: &str = "Sqlite";

const MEMORY_DATA_SOURCE: &str = ":memory:";

/// Keywords accepted for the database path, in lookup order
const DATA_SOURCE_KEYWORDS: [&str; 3] = ["Data Source", "DataSource", "Filename"];

struct Inner {
    connection_string: String,
    conn: Option<RusqliteConnection>,
    disposed: bool,
}

/// SQLite connection wrapper.
///
/// The connection string names the database file with `Data Source=<path>`;
/// `Data Source=:memory:` opens a private in-memory database whose contents
/// live only while the connection is open.
pub struct SqliteConnection {
    inner: Mutex<Inner>,
}

impl SqliteConnection {
    /// Create a closed connection with an empty connection string
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                connection_string: String::new(),
                conn: None,
                disposed: false,
            }),
        }
    }

    /// Create a closed connection for a connection string
    pub fn with_connection_string(connection_string: &str) -> Result<Self> {
        let connection = Self::new();
        connection.set_connection_string(connection_string)?;
        Ok(connection)
    }

    /// Path of the database file, or `:memory:`
    pub fn data_source_path(&self) -> Result<String> {
        let connection_string = self.inner.lock().connection_string.clone();
        data_source_of(&connection_string)
    }

    pub fn is_in_memory(&self) -> bool {
        self.data_source_path()
            .is_ok_and(|path| path == MEMORY_DATA_SOURCE)
    }

    /// Whether the database file exists (an open in-memory database always exists)
    pub fn file_exists(&self) -> Result<bool> {
        let path = self.data_source_path()?;
        if path == MEMORY_DATA_SOURCE {
            return Ok(self.state() == ConnectionState::Open);
        }
        Ok(Path::new(&path).exists())
    }

    /// Run an operation against the database.
    ///
    /// Uses the open connection if there is one; otherwise a connection is
    /// opened for the duration of the call. With `create` unset, a missing
    /// database file is reported as an error instead of being created.
    pub fn with_connection<R>(
        &self,
        create: bool,
        operation: impl FnOnce(&RusqliteConnection) -> rusqlite::Result<R>,
    ) -> Result<R> {
        let inner = self.inner.lock();
        if inner.disposed {
            return Err(OrmError::ConnectionDisposed(inner.connection_string.clone()));
        }

        if let Some(conn) = inner.conn.as_ref() {
            return operation(conn).map_err(|e| OrmError::Provider(format!("SQLite error: {e}")));
        }

        let path = data_source_of(&inner.connection_string)?;
        drop(inner);

        let conn = open_database(&path, create)?;
        operation(&conn).map_err(|e| OrmError::Provider(format!("SQLite error: {e}")))
    }

    /// Remove the database file and its journal files
    pub(crate) fn delete_files(&self) -> Result<()> {
        let path = self.data_source_path()?;
        if path == MEMORY_DATA_SOURCE {
            return Ok(());
        }
        self.close()?;
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let file = PathBuf::from(format!("{path}{suffix}"));
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }
        tracing::info!(path = %path, "deleted SQLite database");
        Ok(())
    }
}

impl Default for SqliteConnection {
    fn default() -> Self {
        Self::new()
    }
}

fn data_source_of(connection_string: &str) -> Result<String> {
    let builder = ConnectionStringBuilder::parse(connection_string)?;
    DATA_SOURCE_KEYWORDS
        .iter()
        .find_map(|keyword| builder.get(keyword))
        .map(str::to_string)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| {
            OrmError::InvalidConnectionString(format!(
                "SQLite connection string '{connection_string}' has no Data Source"
            ))
        })
}

fn open_database(path: &str, create: bool) -> Result<RusqliteConnection> {
    if path == MEMORY_DATA_SOURCE {
        return RusqliteConnection::open_in_memory().map_err(|e| {
            OrmError::Connection(format!("Failed to open in-memory database: {e}"))
        });
    }

    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            return Err(OrmError::Connection(format!(
                "Parent directory does not exist: {}",
                parent.display()
            )));
        }
    }

    let conn = RusqliteConnection::open_with_flags(path, flags).map_err(|e| {
        OrmError::Connection(format!("Failed to open SQLite database at '{path}': {e}"))
    })?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| OrmError::Connection(format!("Failed to enable foreign keys: {e}")))?;
    Ok(conn)
}

impl DbConnection for SqliteConnection {
    fn provider_invariant_name(&self) -> &str {
        SQLITE_PROVIDER
    }

    fn type_name(&self) -> &str {
        "SqliteConnection"
    }

    fn connection_string(&self) -> String {
        self.inner.lock().connection_string.clone()
    }

    fn set_connection_string(&self, connection_string: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(OrmError::ConnectionDisposed(inner.connection_string.clone()));
        }
        if inner.conn.is_some() {
            return Err(OrmError::Connection(
                "The connection string cannot be changed while the connection is open".into(),
            ));
        }
        ConnectionStringBuilder::parse(connection_string)?;
        inner.connection_string = connection_string.to_string();
        Ok(())
    }

    /// File stem of the database, `main` for in-memory databases
    fn database(&self) -> String {
        match self.data_source_path() {
            Ok(path) if path == MEMORY_DATA_SOURCE => "main".to_string(),
            Ok(path) => Path::new(&path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    fn data_source(&self) -> String {
        self.data_source_path().unwrap_or_default()
    }

    fn state(&self) -> ConnectionState {
        if self.inner.lock().conn.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(OrmError::ConnectionDisposed(inner.connection_string.clone()));
        }
        if inner.conn.is_some() {
            return Ok(());
        }
        let path = data_source_of(&inner.connection_string)?;
        tracing::info!(path = %path, "opening SQLite database");
        inner.conn = Some(open_database(&path, true)?);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let conn = self.inner.lock().conn.take();
        if let Some(conn) = conn {
            tracing::debug!("closing SQLite connection");
            conn.close()
                .map_err(|(_, e)| OrmError::Connection(format!("Failed to close SQLite connection: {e}")))?;
        }
        Ok(())
    }

    fn dispose(&self) {
        let mut inner = self.inner.lock();
        if !inner.disposed {
            inner.conn = None;
            inner.disposed = true;
            tracing::debug!("disposed SQLite connection");
        }
    }

    fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
