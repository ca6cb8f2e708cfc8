use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "antenna")]
#[command(about = "Mirror a remote-debuggable editor window and drive it from other devices")]
#[command(version)]
#[command(styles = help_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (default: ~/.config/antenna/config.json when present)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Debugger port to probe; repeat to probe several, in order
	#[arg(long = "cdp-port", global = true, value_name = "PORT")]
	pub cdp_ports: Vec<u16>,

	#[command(subcommand)]
	pub command: Command,
}

fn help_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Yellow.on_default().bold())
		.usage(AnsiColor::Yellow.on_default().bold())
		.literal(AnsiColor::Green.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.error(AnsiColor::Red.on_default().bold())
		.invalid(AnsiColor::Red.on_default())
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Run the bridge and serve the HTTP/WebSocket surface
	Serve(ServeArgs),
	/// Locate a debuggable target once and print it as JSON
	Probe,
	/// Print the role descriptors in effect as JSON
	Roles,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
	/// Address to bind
	#[arg(long, default_value = "0.0.0.0")]
	pub bind: String,

	/// Port to listen on
	#[arg(short, long, env = "PORT", default_value_t = 3000)]
	pub port: u16,

	/// Shared secret required by every route except /health (falls back to APP_PASSWORD;
	/// a temporary passcode is generated when neither is set)
	#[arg(long, env = "ANTENNA_SECRET", hide_env_values = true)]
	pub secret: Option<String>,

	/// Do not print the startup banner
	#[arg(long)]
	pub quiet: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serve_defaults() {
		let cli = Cli::try_parse_from(["antenna", "serve"]).unwrap();
		let Command::Serve(args) = cli.command else {
			panic!("expected serve");
		};
		assert_eq!(args.bind, "0.0.0.0");
		assert!(cli.cdp_ports.is_empty());
		assert_eq!(cli.verbose, 0);
	}

	#[test]
	fn repeated_cdp_ports_keep_order() {
		let cli = Cli::try_parse_from(["antenna", "probe", "--cdp-port", "9222", "--cdp-port", "9000", "-vv"])
			.unwrap();
		assert_eq!(cli.cdp_ports, vec![9222, 9000]);
		assert_eq!(cli.verbose, 2);
		assert!(matches!(cli.command, Command::Probe));
	}

	#[test]
	fn serve_accepts_secret_and_port() {
		let cli = Cli::try_parse_from(["antenna", "serve", "--port", "8080", "--secret", "s3cret"]).unwrap();
		let Command::Serve(args) = cli.command else {
			panic!("expected serve");
		};
		assert_eq!(args.port, 8080);
		assert_eq!(args.secret.as_deref(), Some("s3cret"));
	}
}
