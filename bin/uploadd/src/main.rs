use api::RouterState;
use config::UploaddConfig;
use std::{process::exit, sync::Arc};
use store::{spawn_session_sweeper, UploadStore};
use tracing::{debug, error, info};
use upld_util::{load_env, LoadedEnv};

mod api;
mod config;
mod listener;
mod store;

#[tokio::main]
async fn main() {
	let config_res = match load_env::<UploaddConfig>() {
		Ok(x) => x,

		#[expect(clippy::print_stderr)]
		Err(err) => {
			eprintln!("Error while loading .env: {err}");
			exit(1);
		}
	};

	let config = Arc::new(config_res.get_config().clone());

	tracing_subscriber::fmt()
		.with_env_filter(config.uploadd_loglevel.get_config())
		.without_time()
		.with_ansi(true)
		.init();

	match &config_res {
		LoadedEnv::FoundFile { path, .. } => {
			debug!(message = "Loaded config from .env", ?path, ?config);
		}
		LoadedEnv::OnlyVars(_) => {
			debug!(
				message = "No `.env` found, loaded config from environment",
				?config
			);
		}
	};

	if let Err(e) = tokio::fs::create_dir_all(&config.uploadd_tmp_dir).await {
		error!(
			message = "Could not create upload directory",
			tmp_dir = %config.uploadd_tmp_dir.display(),
			error = %e
		);
		exit(1);
	}

	let listener = match tokio::net::TcpListener::bind(config.uploadd_server_addr.as_str()).await
	{
		Ok(x) => x,
		Err(e) => {
			match e.kind() {
				std::io::ErrorKind::AddrInUse => {
					error!(
						message = "Cannot bind to address, already in use",
						server_addr = config.uploadd_server_addr.as_str()
					);
				}
				_ => {
					error!(message = "Error while binding to address", error = %e);
				}
			}

			exit(1);
		}
	};

	match listener.local_addr() {
		Ok(addr) => info!("listening on http://{addr}"),
		Err(e) => error!(message = "Could not get local address", error = %e),
	}

	let store = Arc::new(UploadStore::new(config.uploadd_tmp_dir.clone()));
	if let Some(max_idle) = config.session_timeout() {
		spawn_session_sweeper(&store, config.watchdog_interval(), max_idle);
	}

	let app = api::router(RouterState { store, config });

	match axum::serve(listener, app).await {
		Ok(_) => {}
		Err(e) => {
			error!(message = "Main loop exited with error", error = %e)
		}
	};
}
