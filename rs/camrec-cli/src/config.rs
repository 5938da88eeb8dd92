use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use camrec::{OutputConfig, RetryPolicy, RtspConnector, SessionConfig, TrackPolicy, TransportKind};
use clap::{ArgMatches, FromArgMatches};
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_PORT: u16 = 554;
const DEFAULT_PATH: &str = "Preview_01_main";

/// Where to record from and how.
///
/// Every field can come from a TOML file (`--config`), the environment, or a flag.
/// Flags and the environment win over the file.
#[derive(clap::Parser, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RecordConfig {
	/// Load the configuration from a TOML file.
	#[arg(long, env = "CAMREC_CONFIG")]
	#[serde(skip)]
	pub config: Option<PathBuf>,

	/// The full RTSP URL, ex. `rtsp://camera:554/Preview_01_main`.
	/// Takes precedence over `--host`, `--port` and `--path`.
	#[arg(long, env = "CAM_URL")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,

	/// The camera's host name or IP address.
	#[arg(long, env = "CAM_HOST")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub host: Option<String>,

	/// The camera's RTSP port [default: 554].
	#[arg(long, env = "CAM_PORT")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,

	#[arg(long, env = "CAM_USER")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,

	#[arg(long, env = "CAM_PASS", hide_env_values = true)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,

	/// The stream path on the camera [default: Preview_01_main].
	#[arg(long)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,

	/// The directory recordings are written to [default: .].
	#[arg(long, env = "CAMREC_OUTPUT_DIR")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub output_dir: Option<PathBuf>,

	/// Appended to each file name [default: living_room].
	#[arg(long)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub label: Option<String>,

	/// The RTP transport, `tcp` or `udp` [default: tcp].
	#[arg(long)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transport: Option<TransportKind>,

	/// Access units each track may hold back to fix up ordering [default: 4].
	#[arg(long)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reorder_depth: Option<usize>,

	/// Payload units each track may buffer while waiting for a timestamp [default: 256].
	#[arg(long)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pending_limit: Option<usize>,

	/// `first` picks the first matching track, `unique` refuses ambiguous descriptions [default: first].
	#[arg(long)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub track_policy: Option<TrackPolicy>,

	/// The delay before the first reconnect [default: 0s].
	#[arg(long, value_parser = humantime::parse_duration)]
	#[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
	pub retry_delay: Option<Duration>,

	/// The reconnect delay never grows past this [default: 30s].
	#[arg(long, value_parser = humantime::parse_duration)]
	#[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
	pub retry_max_delay: Option<Duration>,

	/// The reconnect delay is multiplied by this after each failure [default: 2].
	#[arg(long)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retry_multiplier: Option<f64>,

	/// Give up after this many consecutive reconnects [default: never].
	#[arg(long)]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retry_limit: Option<u32>,

	/// The timeout for connecting and for each RTSP request [default: 10s].
	#[arg(long, value_parser = humantime::parse_duration)]
	#[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
	pub connect_timeout: Option<Duration>,

	/// How often the recorded duration is logged [default: 10s].
	#[arg(long, value_parser = humantime::parse_duration)]
	#[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
	pub progress_interval: Option<Duration>,
}

impl RecordConfig {
	/// Merge with the `--config` file, if any; `matches` are re-applied on top.
	pub fn load(self, matches: &ArgMatches) -> anyhow::Result<Self> {
		let Some(path) = self.config.clone() else {
			return Ok(self);
		};

		let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
		let mut config: Self = toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
		config.update_from_arg_matches(matches)?;
		config.config = Some(path);

		Ok(config)
	}

	/// The endpoint, with percent-encoded credentials.
	pub fn url(&self) -> anyhow::Result<Url> {
		let mut url = match (&self.url, &self.host) {
			(Some(url), _) => Url::parse(url).with_context(|| format!("invalid url: {url}"))?,
			(None, Some(host)) => {
				let port = self.port.unwrap_or(DEFAULT_PORT);
				let path = self.path.as_deref().unwrap_or(DEFAULT_PATH);
				let path = path.trim_start_matches('/');

				// Bracket bare IPv6 addresses.
				let url = match host.contains(':') && !host.starts_with('[') {
					true => format!("rtsp://[{host}]:{port}/{path}"),
					false => format!("rtsp://{host}:{port}/{path}"),
				};
				Url::parse(&url).with_context(|| format!("invalid camera address: {host}"))?
			}
			(None, None) => anyhow::bail!("either --url or --host (CAM_HOST) is required"),
		};

		if let Some(username) = &self.username {
			url.set_username(username)
				.map_err(|_| anyhow::anyhow!("url can't carry credentials: {url}"))?;
		}

		if let Some(password) = &self.password {
			url.set_password(Some(password))
				.map_err(|_| anyhow::anyhow!("url can't carry credentials: {url}"))?;
		}

		Ok(url)
	}

	pub fn session(&self, observer: Arc<dyn camrec::Observer>) -> anyhow::Result<SessionConfig> {
		let mut config = SessionConfig::new(self.url()?);

		let defaults = OutputConfig::default();
		config.output = OutputConfig {
			dir: self.output_dir.clone().unwrap_or(defaults.dir),
			label: self.label.clone().unwrap_or(defaults.label),
		};

		if let Some(depth) = self.reorder_depth {
			config.reorder_depth = depth;
		}
		if let Some(limit) = self.pending_limit {
			config.pending_limit = limit;
		}
		if let Some(policy) = self.track_policy {
			config.track_policy = policy;
		}
		if let Some(interval) = self.progress_interval {
			config.progress_interval = interval;
		}
		config.observer = observer;

		Ok(config)
	}

	pub fn retry(&self) -> RetryPolicy {
		let defaults = RetryPolicy::immediate();

		RetryPolicy {
			initial: self.retry_delay.unwrap_or(defaults.initial),
			max: self.retry_max_delay.unwrap_or(defaults.max),
			multiplier: self.retry_multiplier.unwrap_or(defaults.multiplier),
			limit: self.retry_limit.or(defaults.limit),
		}
	}

	pub fn connector(&self) -> RtspConnector {
		let mut connector = RtspConnector::new(self.transport.unwrap_or_default());
		if let Some(timeout) = self.connect_timeout {
			connector = connector.with_timeout(timeout);
		}
		connector
	}
}
