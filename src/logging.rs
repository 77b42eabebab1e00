use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console logging. `RUST_LOG` overrides the default `ans_expenses=info`.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ans_expenses={}", default_level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
