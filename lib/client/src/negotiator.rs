use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;
use upld_wire::{compose_url, decode, strip_html_tags, Param, Tag, WireMessage};
use url::Url;

use crate::UploadTransport;

#[derive(Debug, Error)]
pub enum NegotiationError {
	#[error("Unable to contact the server at {servlet}: {detail}")]
	ServerUnavailable { servlet: Url, detail: String },

	#[error(
		"The storage backend did not provide an upload target: {detail}. \
		If it is quota-gated, make sure billing is enabled for this application."
	)]
	StorageBackend { detail: String },
}

/// What the server told us about our session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
	pub session_id: Option<String>,

	/// Uploads must be sent to a target obtained with
	/// [`SessionNegotiator::ensure_upload_target`]
	pub blobstore: bool,
}

/// Where to send the multipart form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
	pub url: Url,

	/// Use this field name instead of the upload's own
	pub field_name: Option<String>,

	/// True if this target came from the indirection
	pub blobstore: bool,

	/// Extra form fields the target expects, sent before the file
	pub fields: Vec<(String, String)>,
}

/// Establishes a server session before the first upload,
/// and an upload target before every upload if the server wants one.
///
/// Methods take `&mut self`, so one negotiator can never
/// run two negotiations at the same time.
pub struct SessionNegotiator<T: UploadTransport> {
	transport: Arc<T>,
	servlet: Url,
	request_timeout: Duration,
	session: Option<SessionInfo>,
}

impl<T: UploadTransport> SessionNegotiator<T> {
	pub fn new(transport: Arc<T>, servlet: Url, request_timeout: Duration) -> Self {
		Self {
			transport,
			servlet,
			request_timeout,
			session: None,
		}
	}

	/// The cached session, if we have one
	pub fn session(&self) -> Option<&SessionInfo> {
		self.session.as_ref()
	}

	/// Forget the cached session
	pub fn reset(&mut self) {
		self.session = None;
	}

	fn unavailable(&self, detail: String) -> NegotiationError {
		NegotiationError::ServerUnavailable {
			servlet: self.servlet.clone(),
			detail,
		}
	}

	/// Ask the server for a session, unless we already have one
	pub async fn ensure_session(&mut self) -> Result<SessionInfo, NegotiationError> {
		if let Some(session) = &self.session {
			return Ok(session.clone());
		}

		let url = compose_url(&self.servlet, &[(Param::NewSession, "true")]);
		let text = self
			.transport
			.get(url, self.request_timeout)
			.await
			.map_err(|e| self.unavailable(strip_html_tags(&e.detail())))?;

		let msg = parse(&text).map_err(|detail| self.unavailable(detail))?;

		let session = SessionInfo {
			session_id: msg
				.get(Tag::SessionId)
				.map(|x| x.trim().to_owned())
				.filter(|x| !x.is_empty()),
			blobstore: msg.get_bool(Tag::Blobstore),
		};

		debug!(
			message = "Negotiated session",
			servlet = self.servlet.as_str(),
			session_id = session.session_id.as_deref(),
			blobstore = session.blobstore
		);

		self.session = Some(session.clone());
		return Ok(session);
	}

	/// Find out where the form for `file_name` should be sent.
	/// This is the servlet itself unless the session says otherwise.
	pub async fn ensure_upload_target(
		&mut self,
		file_name: &str,
	) -> Result<UploadTarget, NegotiationError> {
		let session = self.ensure_session().await?;
		if !session.blobstore {
			return Ok(UploadTarget {
				url: self.servlet.clone(),
				field_name: None,
				blobstore: false,
				fields: Vec::new(),
			});
		}

		let url = compose_url(
			&self.servlet,
			&[(Param::Blobstore, "true"), (Param::Name, file_name)],
		);
		let text = self
			.transport
			.get(url, self.request_timeout)
			.await
			.map_err(|e| NegotiationError::StorageBackend {
				detail: strip_html_tags(&e.detail()),
			})?;

		let msg = parse(&text).map_err(|detail| NegotiationError::StorageBackend { detail })?;

		let path = msg
			.get(Tag::BlobPath)
			.map(|x| x.trim())
			.filter(|x| !x.is_empty())
			.ok_or_else(|| NegotiationError::StorageBackend {
				detail: "the response has no upload path".into(),
			})?;

		let url = self
			.servlet
			.join(path)
			.map_err(|e| NegotiationError::StorageBackend {
				detail: format!("invalid upload path `{path}`: {e}"),
			})?;

		let target = UploadTarget {
			url,
			field_name: msg
				.get(Tag::BlobName)
				.map(|x| x.trim().to_owned())
				.filter(|x| !x.is_empty()),
			blobstore: true,
			fields: msg
				.named_values(Tag::BlobParam)
				.map(|(k, v)| (k.to_owned(), v.to_owned()))
				.collect(),
		};

		debug!(
			message = "Got upload target",
			url = target.url.as_str(),
			field_name = target.field_name.as_deref(),
			fields = target.fields.len()
		);

		return Ok(target);
	}
}

/// Decode a negotiation response, turning `<error>` into an error
fn parse(text: &str) -> Result<WireMessage, String> {
	let msg = decode(text).map_err(|e| {
		format!(
			"invalid response ({e}): {}",
			strip_html_tags(text).trim()
		)
	})?;

	if let Some(error) = msg.get(Tag::Error) {
		return Err(strip_html_tags(error).trim().to_owned());
	}

	return Ok(msg);
}
