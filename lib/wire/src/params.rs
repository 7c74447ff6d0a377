use std::fmt::Display;
use url::Url;

/// Query parameters understood by the upload servlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
	/// Ask for a fresh session
	NewSession,
	/// Ask for an upload target
	Blobstore,
	/// Download a stored file, by field or file name
	Show,
	/// Cancel the upload in progress
	Cancel,
	/// Delete a stored file, by field or file name
	Remove,
	/// Forget the current listener
	Clean,
	/// Status of the upload sent through this form field
	Filename,
	/// Per-chunk delay in milliseconds, for testing slow uploads
	Delay,
	/// Force the response content type (`xml`, `html` or `text`)
	ContentType,
	Name,
	BlobKey,
	/// Cache buster, incremented on every poll
	Counter,
}

impl Param {
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::NewSession => "new_session",
			Self::Blobstore => "blobstore",
			Self::Show => "show",
			Self::Cancel => "cancel",
			Self::Remove => "remove",
			Self::Clean => "clean",
			Self::Filename => "filename",
			Self::Delay => "delay",
			Self::ContentType => "ctype",
			Self::Name => "name",
			Self::BlobKey => "blob-key",
			Self::Counter => "c",
		}
	}
}

impl Display for Param {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// Append `params` to the query string of `base`,
/// keeping whatever query `base` already has.
pub fn compose_url(base: &Url, params: &[(Param, &str)]) -> Url {
	let mut url = base.clone();
	if !params.is_empty() {
		let mut pairs = url.query_pairs_mut();
		for (param, value) in params {
			pairs.append_pair(param.as_str(), value);
		}
	}
	return url;
}
