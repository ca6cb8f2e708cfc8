use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter directive for a `-v` count.
pub fn default_filter(verbosity: u8) -> &'static str {
	// 0 = bridge lifecycle only (attach, reconnect, warnings)
	// 1 (-v) = info everywhere
	// 2+ (-vv) = debug, including protocol traffic
	match verbosity {
		0 => "warn,antenna=info,antenna_cli=info",
		1 => "info",
		_ => "debug",
	}
}

pub fn init_logging(verbosity: u8) {
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verbosity_widens_filter() {
		assert!(default_filter(0).starts_with("warn"));
		assert_eq!(default_filter(1), "info");
		assert_eq!(default_filter(2), "debug");
		assert_eq!(default_filter(7), "debug");
		for level in 0..3 {
			assert!(EnvFilter::try_new(default_filter(level)).is_ok());
		}
	}
}
