//! Store services for SQLite: database lifecycle, model history and change application
//!
//! Each entity set is stored as a table of JSON documents keyed by the entity
//! key. The model hash written by code-first initializers lives in the
//! history table.

use ormkit_core::{
    DbConnection, EntityChange, EntityState, HISTORY_TABLE, MetadataWorkspace, OrmError,
    ProviderServices, Result, SaveError, UpdateError,
};
use rusqlite::{OptionalExtension, params};

use crate::SqliteConnection;

/// Quote an identifier for use in SQL
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sqlite_connection(connection: &dyn DbConnection) -> Result<&SqliteConnection> {
    connection
        .as_any()
        .downcast_ref::<SqliteConnection>()
        .ok_or_else(|| {
            OrmError::Provider(format!(
                "expected a SqliteConnection but got '{}'",
                connection.type_name()
            ))
        })
}

fn table_exists_sql(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// SQLite implementation of [`ProviderServices`]
#[derive(Debug, Default)]
pub struct SqliteProviderServices;

impl SqliteProviderServices {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderServices for SqliteProviderServices {
    fn manifest_token(&self, _connection: &dyn DbConnection) -> Result<String> {
        Ok(rusqlite::version().to_string())
    }

    fn database_exists(&self, connection: &dyn DbConnection) -> Result<bool> {
        sqlite_connection(connection)?.file_exists()
    }

    #[tracing::instrument(skip(self, connection, workspace), fields(container = %workspace.container_name))]
    fn create_database(
        &self,
        connection: &dyn DbConnection,
        workspace: &MetadataWorkspace,
    ) -> Result<()> {
        let connection = sqlite_connection(connection)?;
        let mut script = String::new();
        for entity_set in &workspace.entity_sets {
            script.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY NOT NULL, entity_type TEXT NOT NULL, data TEXT NOT NULL);\n",
                quote_identifier(&entity_set.name)
            ));
        }
        script.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {} (context_key TEXT PRIMARY KEY NOT NULL, model_hash TEXT NOT NULL, created_on TEXT NOT NULL);\n",
            quote_identifier(HISTORY_TABLE)
        ));

        connection.with_connection(true, |conn| conn.execute_batch(&script))?;
        tracing::info!(
            tables = workspace.entity_sets.len(),
            "created SQLite database"
        );
        Ok(())
    }

    fn delete_database(&self, connection: &dyn DbConnection) -> Result<()> {
        let connection = sqlite_connection(connection)?;
        if connection.is_in_memory() {
            return connection.with_connection(false, |conn| {
                let tables: Vec<String> = {
                    let mut stmt = conn.prepare(
                        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                    )?;
                    let rows = stmt.query_map([], |row| row.get(0))?;
                    rows.collect::<rusqlite::Result<_>>()?
                };
                for table in tables {
                    conn.execute_batch(&format!("DROP TABLE {}", quote_identifier(&table)))?;
                }
                Ok(())
            });
        }
        connection.delete_files()
    }

    fn table_exists(&self, connection: &dyn DbConnection, table: &str) -> Result<bool> {
        let connection = sqlite_connection(connection)?;
        if !connection.file_exists()? {
            return Ok(false);
        }
        connection.with_connection(false, |conn| table_exists_sql(conn, table))
    }

    fn read_model_hash(
        &self,
        connection: &dyn DbConnection,
        context_key: &str,
    ) -> Result<Option<String>> {
        let connection = sqlite_connection(connection)?;
        if !connection.file_exists()? {
            return Ok(None);
        }
        connection.with_connection(false, |conn| {
            if !table_exists_sql(conn, HISTORY_TABLE)? {
                return Ok(None);
            }
            conn.query_row(
                &format!(
                    "SELECT model_hash FROM {} WHERE context_key = ?1",
                    quote_identifier(HISTORY_TABLE)
                ),
                params![context_key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn write_model_hash(
        &self,
        connection: &dyn DbConnection,
        context_key: &str,
        hash: &str,
    ) -> Result<()> {
        let connection = sqlite_connection(connection)?;
        let created_on = chrono::Utc::now().to_rfc3339();
        connection.with_connection(false, |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (context_key, model_hash, created_on) VALUES (?1, ?2, ?3)",
                    quote_identifier(HISTORY_TABLE)
                ),
                params![context_key, hash, created_on],
            )
        })?;
        tracing::debug!(context_key = %context_key, "recorded model hash");
        Ok(())
    }

    fn apply_changes(
        &self,
        connection: &dyn DbConnection,
        changes: &[EntityChange],
    ) -> std::result::Result<usize, SaveError> {
        let connection = sqlite_connection(connection)?;

        let outcome = connection.with_connection(false, |conn| {
            let tx = conn.unchecked_transaction()?;
            for change in changes {
                let table = quote_identifier(&change.entity_set);
                let result = match change.state {
                    EntityState::Added => tx.execute(
                        &format!("INSERT INTO {table} (key, entity_type, data) VALUES (?1, ?2, ?3)"),
                        params![change.key, change.entity_type, change.values.to_string()],
                    ),
                    EntityState::Modified => tx.execute(
                        &format!("UPDATE {table} SET entity_type = ?2, data = ?3 WHERE key = ?1"),
                        params![change.key, change.entity_type, change.values.to_string()],
                    ),
                    EntityState::Deleted => {
                        tx.execute(&format!("DELETE FROM {table} WHERE key = ?1"), params![change.key])
                    }
                };

                match result {
                    Ok(0) if change.state != EntityState::Added => {
                        return Ok(Err(UpdateError::concurrency(
                            format!(
                                "Store update for '{}' with key '{}' affected 0 rows",
                                change.entity_set, change.key
                            ),
                            vec![change.state_entry()],
                        )));
                    }
                    Ok(_) => {}
                    Err(rusqlite::Error::SqliteFailure(failure, message))
                        if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        return Ok(Err(UpdateError::new(
                            message.unwrap_or_else(|| failure.to_string()),
                            vec![change.state_entry()],
                        )));
                    }
                    Err(e) => return Err(e),
                }
            }
            tx.commit()?;
            Ok(Ok(changes.len()))
        })?;

        match outcome {
            Ok(count) => {
                tracing::debug!(count, "applied changes");
                Ok(count)
            }
            Err(update) => {
                tracing::warn!(error = %update, "update failed; transaction rolled back");
                Err(SaveError::Update(update))
            }
        }
    }
}
