//! The reference Script Driver: a single long-lived `sqlx` Postgres connection,
//! serialized by a mutex, holding a session-scoped advisory lock across the
//! whole run the same way the reference crate's `PostgresEngine` keeps one
//! connection (and one open transaction) for the lifetime of a migration.

use super::{split_statements, Driver, DriverError, DriverErrorKind, ScriptDriver};
use crate::migration::{BoxFuture, VersionState};

use sqlx::{Connection, PgConnection};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Arbitrary odd 64-bit constant mixed into the advisory-lock key derivation,
/// so two runners computing the key for the same `(schema, table, database)`
/// always land on the same `pg_advisory_lock` argument.
const LOCK_KEY_MULTIPLIER: i64 = 0x2545_F491_4F6C_DD1D_u64 as i64;

pub struct PostgresDriver {
    conn_str: String,
    conn: Mutex<Option<PgConnection>>,
    schema: String,
    table: String,
    lock_timeout: Duration,
    use_transactions: bool,
    multi_statement: bool,
    max_statement_len: usize,
    lock_key: Option<i64>,
    locked: bool,
}

impl PostgresDriver {
    pub fn new(conn_str: impl Into<String>) -> Self {
        PostgresDriver {
            conn_str: conn_str.into(),
            conn: Mutex::new(None),
            schema: "public".to_string(),
            table: "schema_migrations".to_string(),
            lock_timeout: Duration::from_secs(15),
            use_transactions: true,
            multi_statement: false,
            max_statement_len: 0,
            lock_key: None,
            locked: false,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_transactions(mut self, enabled: bool) -> Self {
        self.use_transactions = enabled;
        self
    }

    pub fn with_multi_statement(mut self, enabled: bool, max_statement_len: usize) -> Self {
        self.multi_statement = enabled;
        self.max_statement_len = max_statement_len;
        self
    }

    /// Quoted `"schema"."table"` reference, defensively quoted on every use
    /// per the Script Driver contract.
    fn qualified_table(&self) -> String {
        qualify(&self.schema, &self.table)
    }

    async fn connect_if_needed(conn_str: &str, guard: &mut Option<PgConnection>) -> Result<(), DriverError> {
        if guard.is_none() {
            *guard = Some(PgConnection::connect(conn_str).await?);
        }
        Ok(())
    }

    async fn bootstrap_version_table(conn: &mut PgConnection, schema: &str, table: &str) -> Result<(), DriverError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\"")).execute(&mut *conn).await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version BIGINT PRIMARY KEY, dirty BOOLEAN NOT NULL)",
            qualify(schema, table)
        ))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn derive_lock_key(conn: &mut PgConnection, schema: &str, table: &str) -> Result<i64, DriverError> {
        let database: String = sqlx::query_scalar("SELECT current_database()").fetch_one(&mut *conn).await?;
        let seed = format!("{schema}.{table}.{database}");
        Ok((crc32fast::hash(seed.as_bytes()) as i64).wrapping_mul(LOCK_KEY_MULTIPLIER))
    }
}

fn qualify(schema: &str, table: &str) -> String {
    format!("\"{schema}\".\"{table}\"")
}

impl Driver for PostgresDriver {
    fn lock(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            // Re-entrant: calling lock twice without an intervening unlock is a no-op.
            if self.locked {
                return Ok(());
            }

            let conn_str = self.conn_str.clone();
            let schema = self.schema.clone();
            let table = self.table.clone();
            let lock_timeout = self.lock_timeout;
            let cached_key = self.lock_key;

            let mut guard = self.conn.lock().await;
            Self::connect_if_needed(&conn_str, &mut guard).await?;
            let conn = guard.as_mut().expect("connection established above");
            Self::bootstrap_version_table(conn, &schema, &table).await?;

            let key = match cached_key {
                Some(key) => key,
                None => Self::derive_lock_key(conn, &schema, &table).await?,
            };

            let deadline = Instant::now() + lock_timeout;

            loop {
                let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                    .bind(key)
                    .fetch_one(&mut *conn)
                    .await?;

                if acquired {
                    drop(guard);
                    self.lock_key = Some(key);
                    self.locked = true;
                    tracing::debug!(key, "acquired migration lock");
                    return Ok(());
                }

                if Instant::now() >= deadline {
                    return Err(DriverError { kind: DriverErrorKind::LockTimeout { timeout: lock_timeout } });
                }

                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
    }

    fn unlock(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            if !self.locked {
                return Ok(());
            }

            let key = self.lock_key;

            let mut guard = self.conn.lock().await;
            if let (Some(conn), Some(key)) = (guard.as_mut(), key) {
                sqlx::query("SELECT pg_advisory_unlock($1)").bind(key).execute(&mut *conn).await?;
            }
            drop(guard);

            self.locked = false;
            tracing::debug!("released migration lock");
            Ok(())
        })
    }

    fn version_state(&mut self) -> BoxFuture<'_, Result<VersionState, DriverError>> {
        Box::pin(async move {
            let conn_str = self.conn_str.clone();
            let schema = self.schema.clone();
            let table = self.table.clone();

            let mut guard = self.conn.lock().await;
            Self::connect_if_needed(&conn_str, &mut guard).await?;
            let conn = guard.as_mut().expect("connection established above");
            Self::bootstrap_version_table(conn, &schema, &table).await?;

            let row: Option<(i64, bool)> = sqlx::query_as(&format!("SELECT version, dirty FROM {} LIMIT 1", qualify(&schema, &table)))
                .fetch_optional(&mut *conn)
                .await?;

            Ok(match row {
                Some((version, dirty)) => VersionState::from_wire(version, dirty),
                None => VersionState::BASELINE,
            })
        })
    }

    fn set_version(&mut self, state: VersionState) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            let conn_str = self.conn_str.clone();
            let schema = self.schema.clone();
            let table = self.table.clone();

            let mut guard = self.conn.lock().await;
            Self::connect_if_needed(&conn_str, &mut guard).await?;
            let conn = guard.as_mut().expect("connection established above");
            Self::bootstrap_version_table(conn, &schema, &table).await?;

            let mut tx = conn.begin().await?;
            sqlx::query(&format!("TRUNCATE TABLE {}", qualify(&schema, &table))).execute(&mut *tx).await?;

            if state.has_row() {
                let (version, dirty) = state.to_wire();
                sqlx::query(&format!("INSERT INTO {} (version, dirty) VALUES ($1, $2)", qualify(&schema, &table)))
                    .bind(version)
                    .bind(dirty)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(())
        })
    }

    fn drop_all(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            let conn_str = self.conn_str.clone();
            let schema = self.schema.clone();
            let table = self.table.clone();

            let mut guard = self.conn.lock().await;
            Self::connect_if_needed(&conn_str, &mut guard).await?;
            let conn = guard.as_mut().expect("connection established above");

            let tables: Vec<String> = sqlx::query_scalar(
                "SELECT table_name FROM information_schema.tables WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
            )
            .bind(&schema)
            .fetch_all(&mut *conn)
            .await?;

            for found in tables {
                if found == table {
                    continue;
                }
                sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", qualify(&schema, &found))).execute(&mut *conn).await?;
            }

            // The version table itself is dropped too; it is recreated lazily
            // the next time any operation calls `bootstrap_version_table`.
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", qualify(&schema, &table))).execute(&mut *conn).await?;
            Ok(())
        })
    }

    fn as_script_driver(&mut self) -> Option<&mut dyn ScriptDriver> {
        Some(self)
    }
}

impl ScriptDriver for PostgresDriver {
    fn execute_script(&mut self, body: &str) -> BoxFuture<'_, Result<(), DriverError>> {
        let body = body.to_string();
        Box::pin(async move {
            if body.trim().is_empty() {
                return Ok(());
            }

            let conn_str = self.conn_str.clone();
            let multi_statement = self.multi_statement;
            let max_statement_len = self.max_statement_len;
            let use_transactions = self.use_transactions;

            let mut guard = self.conn.lock().await;
            Self::connect_if_needed(&conn_str, &mut guard).await?;
            let conn = guard.as_mut().expect("connection established above");

            let statements = if multi_statement { split_statements(&body, max_statement_len) } else { vec![body] };

            if use_transactions {
                let mut tx = conn.begin().await?;
                for statement in &statements {
                    sqlx::raw_sql(statement).execute(&mut *tx).await?;
                }
                tx.commit().await?;
            } else {
                for statement in &statements {
                    sqlx::raw_sql(statement).execute(&mut *conn).await?;
                }
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_table_quotes_schema_and_table() {
        let driver = PostgresDriver::new("postgres://localhost/db");
        assert_eq!(driver.qualified_table(), "\"public\".\"schema_migrations\"");
    }

    #[test]
    fn builder_overrides_defaults() {
        let driver = PostgresDriver::new("postgres://localhost/db")
            .with_schema("custom")
            .with_table("versions")
            .with_lock_timeout(Duration::from_secs(5));
        assert_eq!(driver.qualified_table(), "\"custom\".\"versions\"");
        assert_eq!(driver.lock_timeout, Duration::from_secs(5));
    }
}
