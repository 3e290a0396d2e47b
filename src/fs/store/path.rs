use crate::db::DbHandle;
use crate::dialect::Dialect;
use crate::fs::errors::{FsError, FsResult};
use crate::fs::inode::InodeId;
use sqlx::{Any, AnyConnection, Executor, Row};

/// One directory entry joined with the mode of its referent, which is
/// what listing and the empty-directory check need in a single query.
#[derive(Debug, Clone)]
pub struct ChildRow {
    pub inode: InodeId,
    pub name: String,
    pub mode: u32,
}

/// Direct access to the `path` table: the many-to-one mapping of directory
/// entries to inodes. A hard link is simply a second row.
#[derive(Clone)]
pub struct PathStore {
    db: DbHandle,
}

impl PathStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    /// Entry names may not contain the path separator; it is replaced on
    /// insert rather than rejected, matching the table's contract.
    pub fn sanitize(name: &str) -> String {
        name.replace('/', "_")
    }

    pub async fn insert(
        &self,
        conn: &mut AnyConnection,
        parent: Option<InodeId>,
        name: &str,
        ino: InodeId,
    ) -> FsResult<()> {
        let d = self.dialect();
        let stmt = format!(
            "INSERT INTO path (inode, parent, name) VALUES ({}, {}, {})",
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3)
        );
        sqlx::query(&stmt)
            .bind(ino)
            .bind(parent)
            .bind(Self::sanitize(name))
            .execute(conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    FsError::Exists
                }
                other => FsError::from(other),
            })?;
        Ok(())
    }

    pub async fn lookup<'e, E>(
        &self,
        exec: E,
        parent: InodeId,
        name: &str,
    ) -> FsResult<InodeId>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "SELECT inode FROM path WHERE parent = {} AND name = {}",
            d.placeholder(1),
            d.placeholder(2)
        );
        let row = sqlx::query(&stmt)
            .bind(parent)
            .bind(name)
            .fetch_optional(exec)
            .await?
            .ok_or(FsError::NotFound)?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    pub async fn exists<'e, E>(&self, exec: E, parent: InodeId, name: &str) -> FsResult<bool>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "SELECT 1 FROM path WHERE parent = {} AND name = {}",
            d.placeholder(1),
            d.placeholder(2)
        );
        let row = sqlx::query(&stmt)
            .bind(parent)
            .bind(name)
            .fetch_optional(exec)
            .await?;
        Ok(row.is_some())
    }

    /// Delete one entry. NotFound if no row matched.
    pub async fn remove(
        &self,
        conn: &mut AnyConnection,
        parent: InodeId,
        name: &str,
    ) -> FsResult<()> {
        let d = self.dialect();
        let stmt = format!(
            "DELETE FROM path WHERE parent = {} AND name = {}",
            d.placeholder(1),
            d.placeholder(2)
        );
        let result = sqlx::query(&stmt)
            .bind(parent)
            .bind(name)
            .execute(conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FsError::NotFound);
        }
        Ok(())
    }

    pub async fn children<'e, E>(&self, exec: E, parent: InodeId) -> FsResult<Vec<ChildRow>>
    where
        E: Executor<'e, Database = Any>,
    {
        let stmt = format!(
            "SELECT p.inode, p.name, m.mode FROM path p \
             JOIN metadata m ON m.inode = p.inode \
             WHERE p.parent = {} ORDER BY p.name",
            self.dialect().placeholder(1)
        );
        let rows = sqlx::query(&stmt).bind(parent).fetch_all(exec).await?;
        rows.iter()
            .map(|row| {
                Ok(ChildRow {
                    inode: row.try_get::<i64, _>(0)?,
                    name: row.try_get::<String, _>(1)?,
                    mode: row.try_get::<i64, _>(2)? as u32,
                })
            })
            .collect()
    }

    pub async fn count_children<'e, E>(&self, exec: E, parent: InodeId) -> FsResult<i64>
    where
        E: Executor<'e, Database = Any>,
    {
        let stmt = format!(
            "SELECT COUNT(*) FROM path WHERE parent = {}",
            self.dialect().placeholder(1)
        );
        let row = sqlx::query(&stmt).bind(parent).fetch_one(exec).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    /// Every (parent, name) entry referencing an inode: one per hard link.
    /// Served by the `path_inode_idx` index.
    pub async fn entries_for<'e, E>(
        &self,
        exec: E,
        ino: InodeId,
    ) -> FsResult<Vec<(Option<InodeId>, String)>>
    where
        E: Executor<'e, Database = Any>,
    {
        let stmt = format!(
            "SELECT parent, name FROM path WHERE inode = {}",
            self.dialect().placeholder(1)
        );
        let rows = sqlx::query(&stmt).bind(ino).fetch_all(exec).await?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<Option<i64>, _>(0)?,
                    row.try_get::<String, _>(1)?,
                ))
            })
            .collect()
    }
}
