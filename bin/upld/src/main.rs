use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::UpldConfig;
use indicatif::MultiProgress;
use presenter::BarPresenter;
use std::{path::PathBuf, process::exit, sync::Arc};
use tracing::{debug, info, warn};
use upld_client::{
	MultiUploader, PathInput, ReqwestTransport, Status, UploadContext, UploaderConfig,
};
use upld_util::load_env;
use url::Url;

mod config;
mod presenter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Upload files one at a time, in order
	Upload {
		#[arg(required = true)]
		files: Vec<PathBuf>,

		/// The upload servlet
		#[arg(long, default_value = "http://localhost:3030/upload")]
		servlet: Url,

		/// Only accept these extensions, like `jpg,png`
		#[arg(long, value_delimiter = ',')]
		ext: Vec<String>,

		/// Wait a moment after selecting each file
		#[arg(long)]
		auto: bool,

		/// Skip files that were already uploaded
		#[arg(long)]
		avoid_repeat: bool,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Args::parse();

	let config = match load_env::<UpldConfig>() {
		Ok(x) => x.into_config(),

		#[expect(clippy::print_stderr)]
		Err(err) => {
			eprintln!("Error while loading .env: {err}");
			exit(1);
		}
	};

	tracing_subscriber::fmt()
		.with_env_filter(config.upld_loglevel.get_config())
		.without_time()
		.with_ansi(true)
		.init();

	match cli.command {
		Commands::Upload {
			files,
			servlet,
			ext,
			auto,
			avoid_repeat,
		} => {
			let mut uploader_config = config.uploader_config(servlet);
			uploader_config.valid_extensions = ext;
			uploader_config.auto_submit = auto;
			uploader_config.avoid_repeat = avoid_repeat;

			upload(Arc::new(uploader_config), files).await
		}
	}
}

async fn upload(config: Arc<UploaderConfig>, files: Vec<PathBuf>) -> Result<()> {
	let transport = ReqwestTransport::new().context("could not create http client")?;
	let bars = MultiProgress::new();

	let mut uploader = MultiUploader::new(
		config,
		UploadContext::new(transport),
		PathInput::new(),
		BarPresenter::new(bars),
	);

	for path in &files {
		uploader.input_mut().select(path);
		let status = uploader.select();
		debug!(
			message = "Selected file",
			path = %path.display(),
			%status
		);
	}

	let finished = tokio::select! {
		x = uploader.join() => x,

		_ = tokio::signal::ctrl_c() => {
			warn!(message = "Interrupted, canceling uploads", running = uploader.running());
			uploader.cancel_all();
			uploader.join().await
		}
	};

	let mut failed = 0;
	for u in &finished {
		let session = u.session();
		let file = session.file_name().unwrap_or_default();

		if session.status() == Status::Success {
			info!(
				message = "Uploaded file",
				file,
				url = session
					.server_info()
					.and_then(|x| x.file_url.as_ref())
					.map(|x| x.as_str())
			);
		} else {
			failed += 1;
			warn!(
				message = "Upload did not succeed",
				file,
				status = %session.status(),
				error = session.message()
			);
		}
	}

	if failed != 0 {
		bail!("{failed} of {} uploads did not succeed", finished.len());
	}

	return Ok(());
}
