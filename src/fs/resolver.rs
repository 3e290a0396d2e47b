//! Path-string to inode translation. An N-component path resolves in a
//! single statement by nesting one correlated subquery per component, so a
//! deep path costs one round-trip instead of N.

use crate::db::DbHandle;
use crate::dialect::Dialect;
use crate::fs::errors::{FsError, FsResult};
use crate::fs::inode::{InodeId, ROOT_INODE};
use crate::fs::permissions::{check_access_bits, Credentials, ACCESS_EXECUTE};
use sqlx::Row;

/// The row a path resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub inode: InodeId,
    pub parent: Option<InodeId>,
    pub name: String,
}

#[derive(Clone)]
pub struct Resolver {
    db: DbHandle,
    /// Skip the ancestor execute walk entirely (mount option).
    ignore_permissions: bool,
}

impl Resolver {
    pub fn new(db: DbHandle, ignore_permissions: bool) -> Self {
        Self {
            db,
            ignore_permissions,
        }
    }

    fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    /// Split an absolute path into components. A trailing slash is
    /// stripped; doubled separators collapse.
    pub fn components(path: &str) -> Vec<&str> {
        path.split('/').filter(|c| !c.is_empty()).collect()
    }

    /// Split into (parent path, entry name), for the operations that
    /// address an entry rather than an existing object.
    pub fn split_parent(path: &str) -> FsResult<(String, &str)> {
        let trimmed = path.trim_end_matches('/');
        let mut comps = Self::components(trimmed);
        let name = comps.pop().ok_or(FsError::InvalidArgument)?;
        let parent = if comps.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", comps.join("/"))
        };
        Ok((parent, name))
    }

    /// Resolve a path to its row, then run the ancestor execute-bit walk
    /// from the target's parent up to the root.
    pub async fn resolve(&self, path: &str, creds: &Credentials) -> FsResult<ResolvedPath> {
        let comps = Self::components(path);

        let resolved = if comps.is_empty() {
            ResolvedPath {
                inode: ROOT_INODE,
                parent: None,
                name: "/".to_string(),
            }
        } else {
            let sql = Self::lookup_sql(self.dialect(), comps.len());
            let mut query = sqlx::query(&sql);
            for component in comps.iter().rev() {
                query = query.bind(*component);
            }
            let row = query
                .fetch_optional(self.db.pool())
                .await?
                .ok_or(FsError::NotFound)?;
            ResolvedPath {
                inode: row.try_get::<i64, _>(0)?,
                parent: row.try_get::<Option<i64>, _>(1)?,
                name: row.try_get::<String, _>(2)?,
            }
        };

        self.check_ancestors(resolved.parent, creds).await?;
        Ok(resolved)
    }

    /// One nested subquery per component, anchored at the root inode. The
    /// outermost SELECT carries the final component; binds are supplied in
    /// reverse component order.
    fn lookup_sql(dialect: Dialect, components: usize) -> String {
        let mut sql = format!("SELECT {ROOT_INODE}");
        for depth in 0..components {
            let placeholder = dialect.placeholder(components - depth);
            let projection = if depth == components - 1 {
                "p.inode, p.parent, p.name"
            } else {
                "p.inode"
            };
            sql = format!(
                "SELECT {projection} FROM path p \
                 WHERE p.name = {placeholder} AND p.parent IN ({sql})"
            );
        }
        sql
    }

    /// Walk from `start` to the root requiring the execute bit on every
    /// directory along the way. Root identity and the ignore_permissions
    /// mount flag short-circuit to success. The statement is prepared once
    /// and reused across ancestors.
    pub async fn check_ancestors(
        &self,
        start: Option<InodeId>,
        creds: &Credentials,
    ) -> FsResult<()> {
        if self.ignore_permissions || creds.uid == 0 {
            return Ok(());
        }

        let d = self.dialect();
        let stmt = format!(
            "SELECT m.mode, m.uid, m.gid, p.parent \
             FROM metadata m JOIN path p ON p.inode = m.inode \
             WHERE m.inode = {}",
            d.placeholder(1)
        );

        let mut current = start;
        while let Some(ino) = current {
            let row = sqlx::query(&stmt)
                .bind(ino)
                .fetch_optional(self.db.pool())
                .await?
                .ok_or(FsError::NotFound)?;
            let mode = row.try_get::<i64, _>(0)? as u32;
            let uid = row.try_get::<i64, _>(1)? as u32;
            let gid = row.try_get::<i64, _>(2)? as u32;
            check_access_bits(mode, uid, gid, creds, ACCESS_EXECUTE)?;

            if ino == ROOT_INODE {
                break;
            }
            current = row.try_get::<Option<i64>, _>(3)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_splitting() {
        assert_eq!(Resolver::components("/a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(Resolver::components("/a/b/"), vec!["a", "b"]);
        assert_eq!(Resolver::components("/"), Vec::<&str>::new());
        assert_eq!(Resolver::components("//a//b"), vec!["a", "b"]);
    }

    #[test]
    fn parent_splitting() {
        assert_eq!(
            Resolver::split_parent("/a/b/c").unwrap(),
            ("/a/b".to_string(), "c")
        );
        assert_eq!(Resolver::split_parent("/a").unwrap(), ("/".to_string(), "a"));
        assert_eq!(
            Resolver::split_parent("/a/b/").unwrap(),
            ("/a".to_string(), "b")
        );
        assert!(Resolver::split_parent("/").is_err());
    }

    #[test]
    fn nested_lookup_sql_shape() {
        let sql = Resolver::lookup_sql(Dialect::Sqlite, 2);
        assert_eq!(
            sql,
            "SELECT p.inode, p.parent, p.name FROM path p \
             WHERE p.name = ? AND p.parent IN (\
             SELECT p.inode FROM path p WHERE p.name = ? AND p.parent IN (SELECT 1))"
        );
    }

    #[test]
    fn nested_lookup_sql_numbers_postgres_binds_outermost_first() {
        let sql = Resolver::lookup_sql(Dialect::Postgres, 3);
        let outer = sql.find("$1").unwrap();
        let middle = sql.find("$2").unwrap();
        let inner = sql.find("$3").unwrap();
        assert!(outer < middle && middle < inner);
    }
}
