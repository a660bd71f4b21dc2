//! Logging and terminal output configuration.

use clap::ValueEnum;
use clap_verbosity_flag::{InfoLevel, Verbosity, VerbosityFilter};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// When to emit ANSI colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Color {
    Never,
    #[default]
    Auto,
    Always,
}

impl Color {
    pub fn enabled(self) -> bool {
        match self {
            Color::Never => false,
            Color::Always => true,
            Color::Auto => console::Term::stderr().features().colors_supported(),
        }
    }
}

/// Map the shared `-v`/`-q` flag stack onto a tracing level filter.
/// `--vquiet` and `--vverbose` extend the stack beyond one step.
pub fn level_filter(verbosity: &Verbosity<InfoLevel>) -> LevelFilter {
    match verbosity.filter() {
        VerbosityFilter::Off => LevelFilter::OFF,
        VerbosityFilter::Error => LevelFilter::ERROR,
        VerbosityFilter::Warn => LevelFilter::WARN,
        VerbosityFilter::Info => LevelFilter::INFO,
        VerbosityFilter::Debug => LevelFilter::DEBUG,
        VerbosityFilter::Trace => LevelFilter::TRACE,
    }
}

/// Install the global tracing subscriber. `DROVER_LOG` overrides the
/// verbosity-derived default filter.
pub fn init_logging(default_level: LevelFilter, color: Color) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("DROVER_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(color.enabled())
                .with_target(false)
                .without_time(),
        )
        .init();
}
