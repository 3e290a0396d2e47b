use crate::db::Database;
use crate::fs::inode::{InodeId, ROOT_INODE, S_IFDIR};
use crate::fs::types::RequestContext;
use anyhow::{bail, Context};
use tracing::info;

/// Drop any existing schema, create the three tables, and seed the root
/// directory: inode 1, mode 0777 masked by the creator's umask, link
/// count 2, with the single parentless row in `path`.
pub async fn initialize(db: &Database, ctx: &RequestContext) -> anyhow::Result<()> {
    let dialect = db.dialect();
    {
        let mut conn = db.pool().acquire().await?;
        for stmt in dialect.drop_ddl() {
            sqlx::query(stmt)
                .execute(&mut *conn)
                .await
                .context("failed to drop existing schema")?;
        }
        for stmt in dialect.ddl() {
            sqlx::query(stmt)
                .execute(&mut *conn)
                .await
                .context("failed to create schema")?;
        }
    }

    let mut tx = db.begin().await?;
    let metadata = crate::fs::store::MetadataStore::new(std::sync::Arc::new(db.clone()));
    let paths = crate::fs::store::PathStore::new(std::sync::Arc::new(db.clone()));

    let root_mode = S_IFDIR | (0o777 & !ctx.umask);
    let root: InodeId = metadata
        .insert(&mut *tx, root_mode, ctx.uid, ctx.gid, 0, 2, 0)
        .await
        .context("failed to insert root inode")?;
    if root != ROOT_INODE {
        bail!("fresh schema assigned inode {root} to the root, expected {ROOT_INODE}");
    }
    paths
        .insert(&mut *tx, None, "/", root)
        .await
        .context("failed to insert root path entry")?;
    tx.commit().await.context("failed to commit root bootstrap")?;

    info!(uid = ctx.uid, gid = ctx.gid, mode = root_mode, "schema initialized");
    Ok(())
}

/// Read-only probe run before mounting: the three tables must exist and
/// the root row must be present.
pub async fn check(db: &Database) -> anyhow::Result<()> {
    for table in ["metadata", "path", "extents"] {
        let probe = format!("SELECT COUNT(*) FROM {table}");
        sqlx::query(&probe)
            .fetch_one(db.pool())
            .await
            .with_context(|| format!("schema check failed: table '{table}' is not usable"))?;
    }

    let stmt = format!(
        "SELECT inode FROM metadata WHERE inode = {}",
        db.dialect().placeholder(1)
    );
    let root = sqlx::query(&stmt)
        .bind(ROOT_INODE)
        .fetch_optional(db.pool())
        .await?;
    if root.is_none() {
        bail!("schema check failed: root inode missing (run with --initialize first)");
    }

    let root_path = sqlx::query("SELECT inode FROM path WHERE parent IS NULL")
        .fetch_optional(db.pool())
        .await?;
    if root_path.is_none() {
        bail!("schema check failed: root path entry missing");
    }

    Ok(())
}
