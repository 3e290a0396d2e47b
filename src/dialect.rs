//! Backend-specific SQL. Everything that differs between SQLite, MySQL and
//! PostgreSQL — DDL, upsert syntax, the "now" expression, placeholder style,
//! last-insert-id retrieval, session setup — is emitted here so the rest of
//! the crate speaks one dialect-free surface.

/// The three supported SQL engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Mysql,
    Postgres,
}

impl Dialect {
    /// Map the `dbi:<driver>:` token to a dialect. Recognized drivers are
    /// `SQLite`, `mysql` and `Pg` (matched case-insensitively).
    pub fn from_driver(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "sqlite" => Some(Dialect::Sqlite),
            "mysql" => Some(Dialect::Mysql),
            "pg" | "postgres" | "postgresql" => Some(Dialect::Postgres),
            _ => None,
        }
    }

    /// Extent width in bytes, fixed at initialization.
    pub fn block_size(self) -> usize {
        match self {
            Dialect::Sqlite => 4096,
            Dialect::Mysql => 16384,
            Dialect::Postgres => 4096,
        }
    }

    /// Buffered blocks per inode that force a write-back. Chatty
    /// client/server engines flush earlier than the embedded one.
    pub fn flush_threshold(self) -> usize {
        match self {
            Dialect::Sqlite => 256,
            Dialect::Mysql | Dialect::Postgres => 64,
        }
    }

    /// SQL scalar evaluating to the current UNIX epoch second.
    pub fn now_expr(self) -> &'static str {
        match self {
            Dialect::Sqlite => "CAST(strftime('%s','now') AS INTEGER)",
            Dialect::Mysql => "UNIX_TIMESTAMP()",
            Dialect::Postgres => "CAST(EXTRACT(EPOCH FROM NOW()) AS BIGINT)",
        }
    }

    /// Positional placeholder for the i-th bind (1-based).
    pub fn placeholder(self, i: usize) -> String {
        match self {
            Dialect::Postgres => format!("${i}"),
            _ => "?".to_string(),
        }
    }

    /// Two-argument greatest-of, for the high-water-mark length update.
    pub fn greatest_fn(self) -> &'static str {
        match self {
            Dialect::Sqlite => "MAX",
            Dialect::Mysql | Dialect::Postgres => "GREATEST",
        }
    }

    /// Parameterized statement setting `atime` and `mtime` from two epoch
    /// integers for one inode.
    pub fn update_times_stmt(self) -> String {
        format!(
            "UPDATE metadata SET atime = {}, mtime = {} WHERE inode = {}",
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3)
        )
    }

    /// Upsert one extent row. Binds: inode, block, contents (and contents
    /// again on MySQL, whose upsert clause cannot reference the candidate
    /// row by name across all supported server versions).
    pub fn upsert_extent_stmt(self) -> &'static str {
        match self {
            Dialect::Sqlite => {
                "INSERT INTO extents (inode, block, contents) VALUES (?, ?, ?) \
                 ON CONFLICT (inode, block) DO UPDATE SET contents = excluded.contents"
            }
            Dialect::Mysql => {
                "INSERT INTO extents (inode, block, contents) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE contents = VALUES(contents)"
            }
            Dialect::Postgres => {
                "INSERT INTO extents (inode, block, contents) VALUES ($1, $2, $3) \
                 ON CONFLICT (inode, block) DO UPDATE SET contents = EXCLUDED.contents"
            }
        }
    }

    /// Insert a metadata row. On PostgreSQL the statement yields the new
    /// inode directly via RETURNING; the other engines pair it with
    /// [`Dialect::last_insert_query`] on the same connection.
    /// Binds: mode, uid, gid, rdev, links, length (timestamps come from
    /// `now_expr`).
    pub fn insert_metadata_stmt(self) -> String {
        let now = self.now_expr();
        match self {
            Dialect::Postgres => format!(
                "INSERT INTO metadata (mode, uid, gid, rdev, links, inuse, length, mtime, ctime, atime) \
                 VALUES ($1, $2, $3, $4, $5, 0, $6, {now}, {now}, {now}) RETURNING inode"
            ),
            _ => format!(
                "INSERT INTO metadata (mode, uid, gid, rdev, links, inuse, length, mtime, ctime, atime) \
                 VALUES (?, ?, ?, ?, ?, 0, ?, {now}, {now}, {now})"
            ),
        }
    }

    /// Query returning the primary key of the most recent metadata insert
    /// on this connection. None where the insert itself returns it.
    pub fn last_insert_query(self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => Some("SELECT last_insert_rowid()"),
            Dialect::Mysql => Some("SELECT CAST(LAST_INSERT_ID() AS SIGNED)"),
            Dialect::Postgres => None,
        }
    }

    /// DDL for one table (plus its indexes), in creation order.
    pub fn ddl(self) -> Vec<&'static str> {
        let mut stmts = vec![
            match self {
                Dialect::Sqlite => {
                    "CREATE TABLE metadata (
                        inode INTEGER PRIMARY KEY AUTOINCREMENT,
                        mode INTEGER NOT NULL,
                        uid INTEGER NOT NULL,
                        gid INTEGER NOT NULL,
                        rdev INTEGER NOT NULL DEFAULT 0,
                        links INTEGER NOT NULL DEFAULT 0,
                        inuse INTEGER NOT NULL DEFAULT 0,
                        length BIGINT NOT NULL DEFAULT 0,
                        mtime BIGINT NOT NULL,
                        ctime BIGINT NOT NULL,
                        atime BIGINT NOT NULL
                    )"
                }
                Dialect::Mysql => {
                    "CREATE TABLE metadata (
                        inode BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                        mode BIGINT NOT NULL,
                        uid BIGINT NOT NULL,
                        gid BIGINT NOT NULL,
                        rdev BIGINT NOT NULL DEFAULT 0,
                        links BIGINT NOT NULL DEFAULT 0,
                        inuse BIGINT NOT NULL DEFAULT 0,
                        length BIGINT NOT NULL DEFAULT 0,
                        mtime BIGINT NOT NULL,
                        ctime BIGINT NOT NULL,
                        atime BIGINT NOT NULL
                    ) ENGINE=InnoDB"
                }
                Dialect::Postgres => {
                    "CREATE TABLE metadata (
                        inode BIGSERIAL PRIMARY KEY,
                        mode BIGINT NOT NULL,
                        uid BIGINT NOT NULL,
                        gid BIGINT NOT NULL,
                        rdev BIGINT NOT NULL DEFAULT 0,
                        links BIGINT NOT NULL DEFAULT 0,
                        inuse BIGINT NOT NULL DEFAULT 0,
                        length BIGINT NOT NULL DEFAULT 0,
                        mtime BIGINT NOT NULL,
                        ctime BIGINT NOT NULL,
                        atime BIGINT NOT NULL
                    )"
                }
            },
            match self {
                Dialect::Mysql => {
                    "CREATE TABLE path (
                        inode BIGINT NOT NULL,
                        parent BIGINT NULL,
                        name VARCHAR(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL,
                        UNIQUE KEY path_parent_name (parent, name)
                    ) ENGINE=InnoDB"
                }
                _ => {
                    "CREATE TABLE path (
                        inode BIGINT NOT NULL,
                        parent BIGINT NULL,
                        name VARCHAR(255) NOT NULL,
                        UNIQUE (parent, name)
                    )"
                }
            },
            "CREATE INDEX path_inode_idx ON path (inode)",
            match self {
                Dialect::Sqlite => {
                    "CREATE TABLE extents (
                        inode BIGINT NOT NULL,
                        block BIGINT NOT NULL,
                        contents BLOB NOT NULL,
                        UNIQUE (inode, block)
                    )"
                }
                Dialect::Mysql => {
                    "CREATE TABLE extents (
                        inode BIGINT NOT NULL,
                        block BIGINT NOT NULL,
                        contents LONGBLOB NOT NULL,
                        UNIQUE KEY extents_inode_block (inode, block)
                    ) ENGINE=InnoDB"
                }
                Dialect::Postgres => {
                    "CREATE TABLE extents (
                        inode BIGINT NOT NULL,
                        block BIGINT NOT NULL,
                        contents BYTEA NOT NULL,
                        UNIQUE (inode, block)
                    )"
                }
            },
        ];
        stmts.push("CREATE INDEX extents_inode_idx ON extents (inode)");
        stmts
    }

    /// Drop statements, safe to run against a database without the schema.
    pub fn drop_ddl(self) -> [&'static str; 3] {
        [
            "DROP TABLE IF EXISTS extents",
            "DROP TABLE IF EXISTS path",
            "DROP TABLE IF EXISTS metadata",
        ]
    }

    /// Per-connection session setup, run on every pooled connection.
    pub fn on_connect(self) -> &'static [&'static str] {
        match self {
            Dialect::Sqlite => &["PRAGMA synchronous = OFF", "PRAGMA foreign_keys = ON"],
            Dialect::Mysql => &["SET SESSION sql_notes = 0"],
            Dialect::Postgres => &["SET client_min_messages TO WARNING"],
        }
    }
}
