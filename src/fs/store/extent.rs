use crate::db::DbHandle;
use crate::dialect::Dialect;
use crate::fs::errors::FsResult;
use crate::fs::inode::InodeId;
use sqlx::{Any, AnyConnection, Executor, Row};

/// Direct access to the `extents` table: file content, one row per
/// non-empty block. Rows that were never written represent holes.
#[derive(Clone)]
pub struct ExtentStore {
    db: DbHandle,
}

impl ExtentStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    /// Upsert one extent row through the dialect's native mechanism.
    pub async fn write_block(
        &self,
        conn: &mut AnyConnection,
        ino: InodeId,
        block: i64,
        contents: &[u8],
    ) -> FsResult<()> {
        let d = self.dialect();
        let query = sqlx::query(d.upsert_extent_stmt())
            .bind(ino)
            .bind(block)
            .bind(contents);
        // MySQL's upsert clause re-binds the candidate contents.
        let query = match d {
            Dialect::Mysql => query.bind(contents),
            _ => query,
        };
        query.execute(conn).await?;
        Ok(())
    }

    pub async fn get<'e, E>(&self, exec: E, ino: InodeId, block: i64) -> FsResult<Option<Vec<u8>>>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "SELECT contents FROM extents WHERE inode = {} AND block = {}",
            d.placeholder(1),
            d.placeholder(2)
        );
        let row = sqlx::query(&stmt)
            .bind(ino)
            .bind(block)
            .fetch_optional(exec)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<Vec<u8>, _>(0)?)),
            None => Ok(None),
        }
    }

    /// All populated blocks in `[first, last]`, ordered by block index.
    /// Gaps in the returned sequence are holes.
    pub async fn range<'e, E>(
        &self,
        exec: E,
        ino: InodeId,
        first: i64,
        last: i64,
    ) -> FsResult<Vec<(i64, Vec<u8>)>>
    where
        E: Executor<'e, Database = Any>,
    {
        let d = self.dialect();
        let stmt = format!(
            "SELECT block, contents FROM extents \
             WHERE inode = {} AND block BETWEEN {} AND {} ORDER BY block",
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3)
        );
        let rows = sqlx::query(&stmt)
            .bind(ino)
            .bind(first)
            .bind(last)
            .fetch_all(exec)
            .await?;
        rows.iter()
            .map(|row| Ok((row.try_get::<i64, _>(0)?, row.try_get::<Vec<u8>, _>(1)?)))
            .collect()
    }

    /// Drop every block strictly past `last_block` (the truncate fast path).
    pub async fn delete_after(
        &self,
        conn: &mut AnyConnection,
        ino: InodeId,
        last_block: i64,
    ) -> FsResult<()> {
        let d = self.dialect();
        let stmt = format!(
            "DELETE FROM extents WHERE inode = {} AND block > {}",
            d.placeholder(1),
            d.placeholder(2)
        );
        sqlx::query(&stmt)
            .bind(ino)
            .bind(last_block)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn delete_all(&self, conn: &mut AnyConnection, ino: InodeId) -> FsResult<()> {
        let stmt = format!(
            "DELETE FROM extents WHERE inode = {}",
            self.dialect().placeholder(1)
        );
        sqlx::query(&stmt).bind(ino).execute(conn).await?;
        Ok(())
    }

    /// Trim the tail block to `keep` bytes. A tail trimmed to nothing is
    /// deleted so no empty rows accumulate.
    pub async fn trim_block(
        &self,
        conn: &mut AnyConnection,
        ino: InodeId,
        block: i64,
        keep: usize,
    ) -> FsResult<()> {
        let Some(mut contents) = self.get(&mut *conn, ino, block).await? else {
            return Ok(());
        };
        if contents.len() <= keep {
            return Ok(());
        }
        contents.truncate(keep);
        if contents.is_empty() {
            let d = self.dialect();
            let stmt = format!(
                "DELETE FROM extents WHERE inode = {} AND block = {}",
                d.placeholder(1),
                d.placeholder(2)
            );
            sqlx::query(&stmt)
                .bind(ino)
                .bind(block)
                .execute(conn)
                .await?;
        } else {
            self.write_block(conn, ino, block, &contents).await?;
        }
        Ok(())
    }
}
