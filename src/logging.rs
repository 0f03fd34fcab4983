use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "info,sqlx=warn";
const VERBOSE_FILTER: &str = "debug,sqlx=info,hyper=info,reqwest=info";

/// Handle to the live log filter; cloneable so the settings route can
/// flip verbosity at runtime.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    pub fn set_verbose(&self, verbose: bool) {
        let filter = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
        if let Err(e) = self.handle.reload(EnvFilter::new(filter)) {
            tracing::warn!("failed to reload log filter: {}", e);
        } else {
            tracing::info!(verbose, "log level changed");
        }
    }
}

/// Sets up the global tracing subscriber with a fmt formatter and a
/// reloadable env filter.
///
/// `RUST_LOG` takes precedence over the built-in default when set.
pub fn init_tracing() -> Result<LogHandle, anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    Ok(LogHandle { handle })
}
