use crate::db::{DataSource, Database};
use crate::fs::store::schema;
use crate::fs::types::RequestContext;
use crate::fs::{SqlFs, SqlFsOptions};
use crate::fuse;
use anyhow::{bail, Context};
use std::io::{BufRead, Write};
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::info;

fn confirm_destroy(dsn: &str) -> anyhow::Result<bool> {
    eprint!("This will destroy any filesystem in {dsn}. Continue? [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub fn run_init(dsn: &str, quiet: bool) -> anyhow::Result<()> {
    if !quiet && !confirm_destroy(dsn)? {
        bail!("aborted");
    }
    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let source = DataSource::parse(dsn)?;
        let db = Database::connect(&source).await?;
        schema::initialize(&db, &RequestContext::current()).await
    })?;
    println!("Filesystem created in {dsn}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn run_mount(
    dsn: &str,
    mountpoint: &Path,
    initialize: bool,
    quiet: bool,
    nothreads: bool,
    ignore_permissions: bool,
    option_specs: &[String],
) -> anyhow::Result<()> {
    let mut options = Vec::new();
    for spec in option_specs {
        options.extend(fuse::parse_mount_options(spec)?);
    }

    if initialize && !quiet && !confirm_destroy(dsn)? {
        bail!("aborted");
    }

    // The FUSE session loop owns the main thread; the runtime serves the
    // async core from the adapter's callbacks.
    let runtime = Runtime::new()?;
    let fs = runtime.block_on(async {
        let source = DataSource::parse(dsn)?;
        let db = Database::connect(&source).await?;
        if initialize {
            schema::initialize(&db, &RequestContext::current()).await?;
        }
        schema::check(&db)
            .await
            .context("refusing to mount an uninitialized database")?;
        Ok::<_, anyhow::Error>(SqlFs::new(db, SqlFsOptions { ignore_permissions }))
    })?;

    if nothreads {
        // fuser's session loop dispatches serially already; the flag is
        // accepted for compatibility with other launchers.
        info!("nothreads requested; serving requests serially");
    }

    info!(mountpoint = %mountpoint.display(), dsn, "mounting");
    fuse::mount(fs, runtime, mountpoint, options)
}

pub fn run_unmount(mountpoint: &Path) -> anyhow::Result<()> {
    let status = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mountpoint)
        .status()
        .context("failed to run fusermount")?;
    if !status.success() {
        bail!("fusermount -u {} failed", mountpoint.display());
    }
    Ok(())
}
