use std::{fmt::Display, str::FromStr};

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
	Trace,
	Debug,
	#[default]
	Info,
	Warn,
	Error,
}

impl Display for LogLevel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Trace => write!(f, "trace"),
			Self::Debug => write!(f, "debug"),
			Self::Info => write!(f, "info"),
			Self::Warn => write!(f, "warn"),
			Self::Error => write!(f, "error"),
		}
	}
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub enum LoggingPreset {
	#[default]
	Default,
	Verbose,
	Develop,
	Trace,
}

impl LoggingPreset {
	pub fn get_config(&self) -> LoggingConfig {
		match self {
			Self::Default => LoggingConfig {
				other: LogLevel::Warn,
				http: LogLevel::Warn,

				uploadd: LogLevel::Info,
				listener: LogLevel::Info,
				client: LogLevel::Info,
				poller: LogLevel::Warn,
				wire: LogLevel::Warn,
				cli: LogLevel::Info,
			},

			Self::Verbose => LoggingConfig {
				other: LogLevel::Warn,
				http: LogLevel::Warn,

				uploadd: LogLevel::Debug,
				listener: LogLevel::Debug,
				client: LogLevel::Debug,
				poller: LogLevel::Info,
				wire: LogLevel::Warn,
				cli: LogLevel::Debug,
			},

			Self::Develop => LoggingConfig {
				other: LogLevel::Debug,
				http: LogLevel::Warn,

				uploadd: LogLevel::Trace,
				listener: LogLevel::Debug,
				client: LogLevel::Trace,
				poller: LogLevel::Debug,
				wire: LogLevel::Debug,
				cli: LogLevel::Trace,
			},

			Self::Trace => LoggingConfig {
				other: LogLevel::Trace,
				http: LogLevel::Warn,

				uploadd: LogLevel::Trace,
				listener: LogLevel::Trace,
				client: LogLevel::Trace,
				poller: LogLevel::Trace,
				wire: LogLevel::Trace,
				cli: LogLevel::Trace,
			},
		}
	}
}

pub struct LoggingConfig {
	other: LogLevel,
	http: LogLevel,

	uploadd: LogLevel,
	listener: LogLevel,
	client: LogLevel,
	poller: LogLevel,
	wire: LogLevel,
	cli: LogLevel,
}

impl LoggingConfig {
	fn directives(&self) -> String {
		[
			//
			// Non-configurable sources
			//
			format!("hyper={}", LogLevel::Warn),
			format!("hyper_util={}", LogLevel::Warn),
			format!("reqwest={}", LogLevel::Warn),
			format!("cookie_store={}", LogLevel::Warn),
			//
			// Configurable sources
			//
			format!("tower_http={}", self.http),
			// // Server
			format!("uploadd::listener={}", self.listener),
			format!("uploadd={}", self.uploadd),
			// // Client
			format!("upld_client::poller={}", self.poller),
			format!("upld_client={}", self.client),
			format!("upld_wire={}", self.wire),
			format!("upld={}", self.cli),
			self.other.to_string(),
		]
		.join(",")
	}
}

impl From<LoggingConfig> for EnvFilter {
	fn from(value: LoggingConfig) -> Self {
		// Every directive above is static and well-formed,
		// fall back to the catch-all level if that ever changes.
		EnvFilter::from_str(&value.directives())
			.unwrap_or_else(|_| EnvFilter::new(value.other.to_string()))
	}
}
