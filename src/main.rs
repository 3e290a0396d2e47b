use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod cli;
mod db;
mod dialect;
mod fs;
mod fuse;

#[cfg(test)]
mod posix_tests;

fn init_tracing(debug: bool) {
    let default = if debug { "sqlfs=debug" } else { "sqlfs=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = cli::Cli::parse_args();

    match cli.command {
        cli::Commands::Mount {
            dsn,
            mountpoint,
            initialize,
            quiet,
            foreground: _,
            nothreads,
            debug,
            ignore_permissions,
            options,
        } => {
            init_tracing(debug);
            cli::mount::run_mount(
                &dsn,
                &mountpoint,
                initialize,
                quiet,
                nothreads,
                ignore_permissions,
                &options,
            )?;
        }
        cli::Commands::Init { dsn, quiet } => {
            init_tracing(false);
            cli::mount::run_init(&dsn, quiet)?;
        }
        cli::Commands::Unmount { mountpoint } => {
            init_tracing(false);
            cli::mount::run_unmount(&mountpoint)?;
        }
    }

    Ok(())
}
