//! Capability flags and migration locking for SQLite.

use sqlbridge_core::{Cx, DatabaseConnection, DialectAdapter, Error, MigrationLockOptions, Outcome};

/// Capabilities of the SQLite dialect.
///
/// Migration locking is a no-op: the driver's single serialized connection
/// already rules out two migrators running at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAdapter;

impl DialectAdapter for SqliteAdapter {
    fn supports_create_if_not_exists(&self) -> bool {
        true
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn supports_output(&self) -> bool {
        false
    }

    async fn acquire_migration_lock<C: DatabaseConnection>(
        &self,
        _cx: &Cx,
        _connection: &C,
        options: &MigrationLockOptions,
    ) -> Outcome<(), Error> {
        tracing::trace!(lock_table = %options.lock_table, "migration lock (no-op)");
        Outcome::Ok(())
    }

    async fn release_migration_lock<C: DatabaseConnection>(
        &self,
        _cx: &Cx,
        _connection: &C,
        options: &MigrationLockOptions,
    ) -> Outcome<(), Error> {
        tracing::trace!(lock_table = %options.lock_table, "migration unlock (no-op)");
        Outcome::Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SqliteConnection, SqliteDatabase};
    use sqlbridge_core::Capabilities;
    use std::sync::Arc;

    #[test]
    fn test_capabilities() {
        assert_eq!(
            SqliteAdapter.capabilities(),
            Capabilities {
                create_if_not_exists: true,
                transactional_ddl: true,
                returning: true,
                output: false,
            }
        );
    }

    #[test]
    fn test_migration_lock_touches_nothing() {
        let db = Arc::new(SqliteDatabase::open_memory().unwrap());
        let conn = SqliteConnection::new(Arc::clone(&db));
        let cx = Cx::for_testing();
        let options = MigrationLockOptions::default();
        let locked = futures::executor::block_on(SqliteAdapter.acquire_migration_lock(&cx, &conn, &options));
        assert!(matches!(locked, Outcome::Ok(())));
        let unlocked = futures::executor::block_on(SqliteAdapter.release_migration_lock(&cx, &conn, &options));
        assert!(matches!(unlocked, Outcome::Ok(())));

        let rows = db
            .query("select count(*) from sqlite_master", &[])
            .unwrap();
        assert_eq!(rows[0].get_as::<i64>(0).unwrap(), 0);
    }
}
