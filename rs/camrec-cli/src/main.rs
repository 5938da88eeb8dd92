mod config;
mod inspect;
mod log;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use camrec::{Reconnect, Session, TracingObserver};
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use config::RecordConfig;
use log::Log;

#[derive(Parser, Clone)]
#[command(version, about)]
pub struct Cli {
	#[command(flatten)]
	log: Log,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Clone)]
pub enum Command {
	/// Record a camera until interrupted, reconnecting whenever the stream drops.
	Record(RecordConfig),

	/// Summarize the streams of a recording.
	Inspect {
		/// The MPEG-TS file to read.
		file: PathBuf,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let matches = Cli::command().get_matches();
	let cli = Cli::from_arg_matches(&matches)?;
	cli.log.init();

	match cli.command {
		Command::Record(config) => {
			let matches = subcommand(&matches, "record")?;
			record(config.load(matches)?).await
		}
		Command::Inspect { file } => {
			let summary = inspect::inspect(&file).await?;
			inspect::print(&file, &summary);
			Ok(())
		}
	}
}

fn subcommand<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a ArgMatches> {
	matches
		.subcommand_matches(name)
		.with_context(|| format!("missing {name} arguments"))
}

async fn record(config: RecordConfig) -> anyhow::Result<()> {
	let observer = Arc::new(TracingObserver);
	let session_config = config.session(observer.clone())?;
	let connector = config.connector();
	let reconnect = Reconnect::new(config.retry()).with_observer(observer);

	let output = &session_config.output;
	std::fs::create_dir_all(&output.dir)
		.with_context(|| format!("failed to create output directory {}", output.dir.display()))?;

	tracing::info!(
		url = %camrec::observe::redact(&config.url()?),
		dir = %output.dir.display(),
		retry = ?reconnect.policy(),
		"recording"
	);

	let cancel = CancellationToken::new();
	tokio::spawn({
		let cancel = cancel.clone();
		async move {
			match tokio::signal::ctrl_c().await {
				Ok(()) => {
					tracing::info!("interrupted, finishing the current file");
					cancel.cancel();
				}
				Err(err) => tracing::warn!(%err, "failed to listen for ctrl-c"),
			}
		}
	});

	let res = reconnect
		.run(
			|attempt| {
				tracing::debug!(attempt, "starting session");
				let session = Session::new(session_config.clone());
				let connector = &connector;
				let cancel = &cancel;
				async move { session.run(connector, cancel).await }
			},
			&cancel,
		)
		.await;

	// Cameras only allow a few concurrent sessions; don't leave ours dangling.
	connector.await_teardown().await;

	res.context("recording failed")
}
