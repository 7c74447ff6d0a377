use async_trait::async_trait;
use ::reqwest::StatusCode;
use std::{error::Error, time::Duration};
use thiserror::Error;
use url::Url;

use crate::FileSource;

mod reqwest;
pub use self::reqwest::ReqwestTransport;

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("request timed out")]
	Timeout,

	#[error("request failed with code {code}")]
	GenericHttp {
		code: StatusCode,
		message: Option<String>,
	},

	#[error("could not read the file to upload")]
	Io(#[from] std::io::Error),

	#[error("request failed: {error}")]
	Other {
		#[source]
		error: Box<dyn Error + Sync + Send + 'static>,
	},
}

impl TransportError {
	/// A timeout is a soft failure, anything else is fatal to an upload
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout)
	}

	/// The most useful description of this error, for humans
	pub fn detail(&self) -> String {
		match self {
			Self::GenericHttp {
				code,
				message: Some(m),
			} if !m.trim().is_empty() => format!("{code}: {}", m.trim()),
			_ => self.to_string(),
		}
	}
}

/// A multipart form with a single file
#[derive(Debug, Clone)]
pub struct SubmitForm {
	/// Form field that carries the file
	pub field_name: String,

	/// File name to send, without any path
	pub file_name: String,

	pub source: FileSource,

	/// Extra fields, sent before the file
	pub fields: Vec<(String, String)>,
}

/// Everything the uploader needs from an http client
#[async_trait]
pub trait UploadTransport: Send + Sync + 'static {
	/// GET `url`, returning the body of a successful response
	async fn get(&self, url: Url, timeout: Duration) -> Result<String, TransportError>;

	/// POST `form` to `url` as `multipart/form-data`,
	/// returning the body of a successful response.
	async fn submit(&self, url: Url, form: SubmitForm) -> Result<String, TransportError>;
}
