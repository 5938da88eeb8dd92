use clap::Args;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Args, Clone, Debug)]
pub struct Log {
	/// The default log level. Individual targets can be tuned with `RUST_LOG`.
	#[arg(long = "log-level", env = "CAMREC_LOG_LEVEL", default_value = "info", global = true)]
	pub level: LevelFilter,
}

impl Default for Log {
	fn default() -> Self {
		Self { level: LevelFilter::INFO }
	}
}

impl Log {
	pub fn init(&self) {
		let filter = EnvFilter::builder()
			.with_default_directive(self.level.into())
			.from_env_lossy();

		// Also installs the `log` bridge, so the RTSP exchanges show up at debug/trace.
		tracing_subscriber::fmt()
			.with_writer(std::io::stderr)
			.with_env_filter(filter)
			.init();
	}
}
