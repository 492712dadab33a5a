use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,h2=warn";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter;
/// `LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_tracing() {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
	let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);

	let (plain, structured) = if json {
		(None, Some(fmt::layer().with_target(false).json()))
	} else {
		(Some(fmt::layer().with_target(false).with_level(true)), None)
	};
	let subscriber = Registry::default().with(env_filter).with(plain).with(structured);
	let _ = tracing::subscriber::set_global_default(subscriber);
}
