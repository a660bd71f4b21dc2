use clap::Parser;
use tracing::metadata::LevelFilter;

use drover::commands::{run_command, CommandError};
use drover::console_utils::{init_logging, level_filter};
use drover::opt::Opts;

#[tokio::main]
async fn main() {
    let opts = Opts::parse();

    let default_level = if opts.common.very_quiet {
        LevelFilter::OFF
    } else if opts.common.very_verbose {
        LevelFilter::TRACE
    } else {
        level_filter(&opts.common.verbosity)
    };
    init_logging(default_level, opts.common.color);

    let cancel = tokio_util::sync::CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; stopping");
                cancel.cancel();
            }
        });
    }

    let result = run_command(opts, cancel).await;
    match result {
        Ok(()) => {}
        Err(CommandError::Build(drover::builder::BuildError::Cancelled)) => {
            tracing::error!("cancelled");
            std::process::exit(1);
        }
        Err(err) => {
            report(&err);
            std::process::exit(err.exit_code());
        }
    }
}

/// Print the error and its cause chain. Document errors display with
/// file, line and column.
fn report(err: &CommandError) {
    use std::error::Error;

    eprintln!("error: {err}");
    let mut cause = err.source();
    while let Some(inner) = cause {
        eprintln!("  caused by: {inner}");
        cause = inner.source();
    }
}
