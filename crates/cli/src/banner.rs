//! Startup banner: LAN and tailnet URLs, a scannable QR code, passcode generation.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use colored::Colorize;
use qrcode::QrCode;
use qrcode::render::unicode::Dense1x2;

/// Best-effort LAN address: the local end of a UDP "connection" to a public
/// address. No packet is sent.
pub fn local_ip() -> Option<IpAddr> {
	let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
	socket.connect("8.8.8.8:80").ok()?;
	socket.local_addr().ok().map(|addr| addr.ip())
}

/// IPv4 address of this machine on a Tailscale network, if the `tailscale`
/// CLI is installed and up.
pub fn tailscale_ip() -> Option<IpAddr> {
	let output = Command::new("tailscale").args(["ip", "-4"]).output().ok()?;
	if !output.status.success() {
		return None;
	}
	parse_tailnet_ip(&String::from_utf8_lossy(&output.stdout))
}

/// First line of `tailscale ip -4` output that lies in the tailnet range.
pub fn parse_tailnet_ip(output: &str) -> Option<IpAddr> {
	output
		.lines()
		.filter_map(|line| line.trim().parse::<Ipv4Addr>().ok())
		.find(|ip| is_tailnet(*ip))
		.map(IpAddr::V4)
}

/// Tailscale hands out addresses from the 100.64.0.0/10 shared range.
fn is_tailnet(ip: Ipv4Addr) -> bool {
	let [a, b, ..] = ip.octets();
	a == 100 && (b & 0xC0) == 64
}

/// Terminal rendering of `url` as a QR code, two modules per character row.
pub fn qr_code(url: &str) -> Option<String> {
	let code = QrCode::new(url.as_bytes()).ok()?;
	Some(
		code.render::<Dense1x2>()
			.dark_color(Dense1x2::Light)
			.light_color(Dense1x2::Dark)
			.build(),
	)
}

/// Six-digit numeric passcode for runs without a configured secret.
pub fn generate_passcode() -> String {
	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_nanos())
		.unwrap_or_default();
	let mixed = nanos ^ u128::from(std::process::id()).rotate_left(17);
	format!("{:06}", mixed % 1_000_000)
}

/// Resolves the secret: explicit flag or `ANTENNA_SECRET`, then `APP_PASSWORD`,
/// then a generated passcode. The flag reports whether it was generated.
pub fn resolve_secret(explicit: Option<String>) -> (String, bool) {
	let configured = explicit
		.or_else(|| std::env::var("APP_PASSWORD").ok())
		.filter(|s| !s.trim().is_empty());
	match configured {
		Some(secret) => (secret, false),
		None => (generate_passcode(), true),
	}
}

/// URL a phone on the same network should open.
pub fn display_url(bound: SocketAddr, lan: Option<IpAddr>) -> String {
	let host = if bound.ip().is_unspecified() {
		lan.unwrap_or(bound.ip())
	} else {
		bound.ip()
	};
	format!("http://{}", SocketAddr::new(host, bound.port()))
}

pub fn print(bound: SocketAddr, secret: &str, generated: bool) {
	let url = display_url(bound, local_ip());
	let tailnet = if bound.ip().is_unspecified() {
		tailscale_ip().map(|ip| display_url(SocketAddr::new(ip, bound.port()), None))
	} else {
		None
	};

	eprintln!();
	eprintln!("  {}", "antenna".green().bold());
	eprintln!();
	eprintln!("  {} {}", "Local URL:".bold(), url.cyan());
	if let Some(tailnet) = &tailnet {
		eprintln!("  {} {}", "Tailnet:  ".bold(), tailnet.cyan());
	}
	if generated {
		eprintln!("  {} {}", "Passcode: ".bold(), secret.yellow().bold());
		eprintln!(
			"  {}",
			"(temporary; set ANTENNA_SECRET or APP_PASSWORD to fix it)".dimmed()
		);
	} else {
		eprintln!("  {} {}", "Passcode: ".bold(), "configured".dimmed());
	}

	// Tailnet address first when there is one.
	let scan_url = tailnet.as_deref().unwrap_or(&url);
	if let Some(qr) = qr_code(scan_url) {
		eprintln!();
		eprintln!("  {}", "Scan to connect:".bold());
		for line in qr.lines() {
			eprintln!("  {line}");
		}
	}
	eprintln!();
}

#[cfg(test)]
mod tests {
	use std::net::Ipv4Addr;

	use super::*;

	#[test]
	fn passcode_is_six_digits() {
		let code = generate_passcode();
		assert_eq!(code.len(), 6);
		assert!(code.chars().all(|c| c.is_ascii_digit()));
	}

	#[test]
	fn explicit_secret_wins() {
		let (secret, generated) = resolve_secret(Some("hunter2".into()));
		assert_eq!(secret, "hunter2");
		assert!(!generated);
	}

	#[test]
	fn unspecified_bind_uses_lan_address() {
		let bound = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000);
		let lan = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
		assert_eq!(display_url(bound, lan), "http://192.168.1.20:3000");
		assert_eq!(display_url(bound, None), "http://0.0.0.0:3000");

		let loopback = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
		assert_eq!(display_url(loopback, lan), "http://127.0.0.1:8080");
	}

	#[test]
	fn tailnet_address_is_picked_from_cli_output() {
		let output = "100.101.102.103\n";
		assert_eq!(
			parse_tailnet_ip(output),
			Some(IpAddr::V4(Ipv4Addr::new(100, 101, 102, 103)))
		);
		assert_eq!(
			parse_tailnet_ip("fd7a:115c:a1e0::1\n100.64.0.7\n"),
			Some(IpAddr::V4(Ipv4Addr::new(100, 64, 0, 7)))
		);
	}

	#[test]
	fn addresses_outside_the_tailnet_range_are_ignored() {
		assert_eq!(parse_tailnet_ip("192.168.1.20\n"), None);
		assert_eq!(parse_tailnet_ip("100.128.0.1\n"), None);
		assert_eq!(parse_tailnet_ip("100.63.255.255\n"), None);
		assert_eq!(parse_tailnet_ip(""), None);
		assert_eq!(parse_tailnet_ip("tailscale is stopped"), None);
	}

	#[test]
	fn qr_code_renders_as_square_block() {
		let qr = qr_code("http://192.168.1.20:3000").unwrap();
		let lines: Vec<&str> = qr.lines().collect();
		assert!(lines.len() > 10);
		let width = lines[0].chars().count();
		assert!(lines.iter().all(|line| line.chars().count() == width));
		assert!(qr.chars().all(|c| matches!(c, ' ' | '\u{2580}' | '\u{2584}' | '\u{2588}' | '\n')));
	}
}
