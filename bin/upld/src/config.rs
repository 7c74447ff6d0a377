use serde::Deserialize;
use std::time::Duration;
use upld_client::UploaderConfig;
use upld_util::logging::LoggingPreset;
use url::Url;

/// Note that the field of this struct are not capitalized.
/// Envy is case-insensitive, and expects Rust fields to be snake_case.
#[derive(Debug, Deserialize, Clone)]
pub struct UpldConfig {
	/// The logging level to run with
	#[serde(default)]
	pub upld_loglevel: LoggingPreset,

	/// Delay between status requests
	#[serde(default = "UpldConfig::default_status_interval_ms")]
	pub upld_status_interval_ms: u64,

	/// Delay between status requests if the server
	/// sends uploads to a separate target
	#[serde(default = "UpldConfig::default_blobstore_status_interval_ms")]
	pub upld_blobstore_status_interval_ms: u64,

	/// Give up on an upload that makes no progress for this long.
	/// Zero waits forever.
	#[serde(default = "UpldConfig::default_stall_timeout_ms")]
	pub upld_stall_timeout_ms: u64,

	#[serde(default = "UpldConfig::default_request_timeout_ms")]
	pub upld_request_timeout_ms: u64,

	/// With `--auto`, wait this long before sending a file
	#[serde(default = "UpldConfig::default_settle_delay_ms")]
	pub upld_settle_delay_ms: u64,

	/// Form fields are named `<prefix>-<random>`
	#[serde(default = "UpldConfig::default_field_prefix")]
	pub upld_field_prefix: String,
}

impl UpldConfig {
	pub fn default_status_interval_ms() -> u64 {
		500
	}

	pub fn default_blobstore_status_interval_ms() -> u64 {
		5_000
	}

	pub fn default_stall_timeout_ms() -> u64 {
		60_000
	}

	pub fn default_request_timeout_ms() -> u64 {
		10_000
	}

	pub fn default_settle_delay_ms() -> u64 {
		600
	}

	pub fn default_field_prefix() -> String {
		"UPLD".into()
	}

	/// Uploader settings for `servlet`.
	/// Everything set from the command line is left at its default.
	pub fn uploader_config(&self, servlet: Url) -> UploaderConfig {
		let mut config = UploaderConfig::new(servlet);
		config.field_prefix = self.upld_field_prefix.clone();
		config.status_interval = Duration::from_millis(self.upld_status_interval_ms);
		config.blobstore_status_interval =
			Duration::from_millis(self.upld_blobstore_status_interval_ms);
		config.stall_timeout = Duration::from_millis(self.upld_stall_timeout_ms);
		config.request_timeout = Duration::from_millis(self.upld_request_timeout_ms);
		config.settle_delay = Duration::from_millis(self.upld_settle_delay_ms);
		return config;
	}
}
