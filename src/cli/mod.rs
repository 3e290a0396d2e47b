use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod mount;

#[derive(Parser)]
#[command(name = "sqlfs")]
#[command(author, version, about = "Mount a POSIX filesystem stored in a relational database", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mount the filesystem
    ///
    /// The data source selects the backend, e.g.:
    ///
    /// sqlfs mount dbi:SQLite:/var/lib/sqlfs.db /mnt/sqlfs
    ///
    /// sqlfs mount dbi:mysql:user:pw@db.example.com/fs /mnt/sqlfs
    Mount {
        /// Data source in dbi:<driver>:<rest> form (SQLite, mysql, Pg)
        dsn: String,
        /// Where to mount
        mountpoint: PathBuf,
        /// Destroy any existing schema and create a fresh filesystem
        #[arg(long)]
        initialize: bool,
        /// Skip the confirmation prompt when initializing
        #[arg(long)]
        quiet: bool,
        /// Stay attached to the terminal (sqlfs always runs foreground)
        #[arg(long)]
        foreground: bool,
        /// Serve kernel requests strictly serially
        #[arg(long)]
        nothreads: bool,
        /// Verbose request logging
        #[arg(long)]
        debug: bool,
        /// Skip all permission checks
        #[arg(long)]
        ignore_permissions: bool,
        /// Comma-joined mount options (allow_other, default_permissions,
        /// fsname=..., ro, auto_unmount, nonempty); repeatable
        #[arg(short = 'o', long = "option")]
        options: Vec<String>,
    },
    /// Create (or recreate) the schema without mounting
    Init {
        /// Data source in dbi:<driver>:<rest> form
        dsn: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        quiet: bool,
    },
    /// Unmount a previously mounted filesystem
    Unmount {
        mountpoint: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
