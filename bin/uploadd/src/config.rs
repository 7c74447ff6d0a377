use serde::Deserialize;
use smartstring::{LazyCompact, SmartString};
use std::{path::PathBuf, time::Duration};
use upld_util::logging::LoggingPreset;

/// Note that the field of this struct are not capitalized.
/// Envy is case-insensitive, and expects Rust fields to be snake_case.
#[derive(Debug, Deserialize, Clone)]
pub struct UploaddConfig {
	/// The logging level to run with
	#[serde(default)]
	pub uploadd_loglevel: LoggingPreset,

	/// IP and port to bind to
	/// Should look like `127.0.0.1:3030`
	pub uploadd_server_addr: SmartString<LazyCompact>,

	/// The path uploads are sent to
	#[serde(default = "UploaddConfig::default_servlet_path")]
	pub uploadd_servlet_path: SmartString<LazyCompact>,

	/// Maximum request body size, in bytes
	/// If you're using a reverse proxy, make sure it
	/// also accepts requests of this size!
	#[serde(default = "UploaddConfig::default_request_body_limit")]
	pub uploadd_request_body_limit: usize,

	/// Maximum size of one uploaded file, in bytes
	#[serde(default = "UploaddConfig::default_request_body_limit")]
	pub uploadd_max_file_size: usize,

	/// Where to keep uploaded files.
	/// Every session gets a subdirectory.
	#[serde(default = "UploaddConfig::default_tmp_dir")]
	pub uploadd_tmp_dir: PathBuf,

	/// Cancel an upload if we receive no data for this many milliseconds
	#[serde(default = "UploaddConfig::default_no_data_timeout_ms")]
	pub uploadd_no_data_timeout_ms: u64,

	/// How often the watchdog checks an upload
	#[serde(default = "UploaddConfig::default_watchdog_interval_ms")]
	pub uploadd_watchdog_interval_ms: u64,

	/// Forget a session and delete its files once it
	/// has not been used for this many milliseconds.
	/// Zero keeps sessions forever.
	#[serde(default = "UploaddConfig::default_session_timeout_ms")]
	pub uploadd_session_timeout_ms: u64,

	/// Sleep this many milliseconds after every received chunk.
	/// Useful to watch progress bars on fast networks.
	#[serde(default)]
	pub uploadd_slow_uploads_ms: u64,

	/// If set, clients are told to send their files to this path
	/// instead of the servlet path.
	#[serde(default)]
	pub uploadd_upload_target: Option<SmartString<LazyCompact>>,
}

impl UploaddConfig {
	pub fn default_servlet_path() -> SmartString<LazyCompact> {
		"/upload".into()
	}

	pub fn default_request_body_limit() -> usize {
		5 * 1024 * 1024
	}

	pub fn default_tmp_dir() -> PathBuf {
		std::env::temp_dir().join("uploadd")
	}

	pub fn default_no_data_timeout_ms() -> u64 {
		20_000
	}

	pub fn default_watchdog_interval_ms() -> u64 {
		5_000
	}

	pub fn default_session_timeout_ms() -> u64 {
		30 * 60 * 1000
	}

	pub fn no_data_timeout(&self) -> Duration {
		Duration::from_millis(self.uploadd_no_data_timeout_ms)
	}

	pub fn watchdog_interval(&self) -> Duration {
		Duration::from_millis(self.uploadd_watchdog_interval_ms)
	}

	pub fn session_timeout(&self) -> Option<Duration> {
		if self.uploadd_session_timeout_ms == 0 {
			return None;
		}
		return Some(Duration::from_millis(self.uploadd_session_timeout_ms));
	}

	pub fn slow_uploads(&self) -> Duration {
		Duration::from_millis(self.uploadd_slow_uploads_ms)
	}
}
