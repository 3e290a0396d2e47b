use crate::db::DbHandle;
use crate::dialect::Dialect;
use crate::fs::errors::{FsError, FsResult};
use crate::fs::inode::{InodeId, InodeRow};
use sqlx::{Any, AnyConnection, Executor, Row};

/// Direct access to the `metadata` table. One row per inode; every
/// statement here touches exactly one row, so callers decide whether to
/// wrap in a transaction.
#[derive(Clone)]
pub struct MetadataStore {
    db: DbHandle,
}

impl MetadataStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    /// Insert a fresh inode row; timestamps are set to "now" server-side.
    /// Returns the server-assigned inode number.
    pub async fn insert(
        &self,
        conn: &mut AnyConnection,
        mode: u32,
        uid: u32,
        gid: u32,
        rdev: u32,
        links: i64,
        length: i64,
    ) -> FsResult<InodeId> {
        let dialect = self.dialect();
        let stmt = dialect.insert_metadata_stmt();
        let query = sqlx::query(&stmt)
            .bind(mode as i64)
            .bind(uid as i64)
            .bind(gid as i64)
            .bind(rdev as i64)
            .bind(links)
            .bind(length);

        match dialect.last_insert_query() {
            None => {
                let row = query.fetch_one(&mut *conn).await?;
                Ok(row.try_get::<i64, _>(0)?)
            }
            Some(last_id) => {
                query.execute(&mut *conn).await?;
                let row = sqlx::query(last_id).fetch_one(&mut *conn).await?;
                Ok(row.try_get::<i64, _>(0)?)
            }
        }
    }

    pub async fn get<'e, E>(&self, exec: E, ino: InodeId) -> FsResult<InodeRow>
    where
        E: Executor<'e, Database = Any>,
    {
        let stmt = format!(
            "SELECT inode, mode, uid, gid, rdev, links, inuse, length, mtime, ctime, atime \
             FROM metadata WHERE inode = {}",
            self.dialect().placeholder(1)
        );
        let row = sqlx::query(&stmt)
            .bind(ino)
            .fetch_optional(exec)
            .await?
            .ok_or(FsError::NotFound)?;
        InodeRow::from_row(&row)
    }

    /// Set the permission bits, preserving the type bits. Touches ctime.
    pub async fn set_mode<'e, E>(&self, exec: E, ino: InodeId, mode: u32) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "UPDATE metadata SET mode = {}, ctime = {} WHERE inode = {}",
            d.placeholder(1),
            d.now_expr(),
            d.placeholder(2)
        );
        sqlx::query(&stmt)
            .bind(mode as i64)
            .bind(ino)
            .execute(exec)
            .await?;
        Ok(())
    }

    pub async fn set_owner<'e, E>(
        &self,
        exec: E,
        ino: InodeId,
        uid: u32,
        gid: u32,
    ) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "UPDATE metadata SET uid = {}, gid = {}, ctime = {} WHERE inode = {}",
            d.placeholder(1),
            d.placeholder(2),
            d.now_expr(),
            d.placeholder(3)
        );
        sqlx::query(&stmt)
            .bind(uid as i64)
            .bind(gid as i64)
            .bind(ino)
            .execute(exec)
            .await?;
        Ok(())
    }

    /// The Dialect Adapter's parameterized atime/mtime statement.
    pub async fn set_times<'e, E>(
        &self,
        exec: E,
        ino: InodeId,
        atime: i64,
        mtime: i64,
    ) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let stmt = self.dialect().update_times_stmt();
        sqlx::query(&stmt)
            .bind(atime)
            .bind(mtime)
            .bind(ino)
            .execute(exec)
            .await?;
        Ok(())
    }

    pub async fn set_atime_now<'e, E>(&self, exec: E, ino: InodeId) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "UPDATE metadata SET atime = {} WHERE inode = {}",
            d.now_expr(),
            d.placeholder(1)
        );
        sqlx::query(&stmt).bind(ino).execute(exec).await?;
        Ok(())
    }

    /// Touch mtime and ctime, the bookkeeping a parent gets when its entry
    /// list changes.
    pub async fn touch<'e, E>(&self, exec: E, ino: InodeId) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "UPDATE metadata SET mtime = {now}, ctime = {now} WHERE inode = {}",
            d.placeholder(1),
            now = d.now_expr()
        );
        sqlx::query(&stmt).bind(ino).execute(exec).await?;
        Ok(())
    }

    pub async fn adjust_links<'e, E>(&self, exec: E, ino: InodeId, delta: i64) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "UPDATE metadata SET links = links + {}, ctime = {} WHERE inode = {}",
            d.placeholder(1),
            d.now_expr(),
            d.placeholder(2)
        );
        sqlx::query(&stmt)
            .bind(delta)
            .bind(ino)
            .execute(exec)
            .await?;
        Ok(())
    }

    pub async fn adjust_inuse<'e, E>(&self, exec: E, ino: InodeId, delta: i64) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "UPDATE metadata SET inuse = inuse + {} WHERE inode = {}",
            d.placeholder(1),
            d.placeholder(2)
        );
        sqlx::query(&stmt)
            .bind(delta)
            .bind(ino)
            .execute(exec)
            .await?;
        Ok(())
    }

    pub async fn set_length<'e, E>(&self, exec: E, ino: InodeId, length: i64) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "UPDATE metadata SET length = {}, mtime = {} WHERE inode = {}",
            d.placeholder(1),
            d.now_expr(),
            d.placeholder(2)
        );
        sqlx::query(&stmt)
            .bind(length)
            .bind(ino)
            .execute(exec)
            .await?;
        Ok(())
    }

    /// Raise `length` to the flushed high-water mark (never lowers it) and
    /// stamp mtime, the §4.5 flush epilogue.
    pub async fn raise_length<'e, E>(&self, exec: E, ino: InodeId, hwm: i64) -> FsResult<()>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "UPDATE metadata SET length = {greatest}(length, {}), mtime = {} WHERE inode = {}",
            d.placeholder(1),
            d.now_expr(),
            d.placeholder(2),
            greatest = d.greatest_fn()
        );
        sqlx::query(&stmt)
            .bind(hwm)
            .bind(ino)
            .execute(exec)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, conn: &mut AnyConnection, ino: InodeId) -> FsResult<()> {
        let stmt = format!(
            "DELETE FROM metadata WHERE inode = {}",
            self.dialect().placeholder(1)
        );
        sqlx::query(&stmt).bind(ino).execute(conn).await?;
        Ok(())
    }
}
