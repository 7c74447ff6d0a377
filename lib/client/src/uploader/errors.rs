use thiserror::Error;
use url::Url;

use crate::NegotiationError;

/// Shown when a summary-less response came back from an upload target indirection
pub const BILLING_HINT: &str =
	"Uploads are sent to a storage backend, make sure billing is enabled for it.";

/// Shown when a summary-less response came back from the servlet itself
pub const PARSING_HINT: &str =
	"The server did not parse the request, make sure it accepts multipart uploads at this path.";

/// Why an upload did not succeed.
/// These are never returned, they become the message of a terminal status.
#[derive(Debug, Error)]
pub enum UploadFailure {
	#[error("No file selected")]
	NoFile,

	#[error("This file was already uploaded: {0}")]
	AlreadyUploaded(String),

	#[error("Invalid file.\nOnly these types are allowed:\n{allowed}")]
	InvalidExtension { allowed: String },

	#[error(transparent)]
	Negotiation(#[from] NegotiationError),

	/// The server reported an error
	#[error("{0}")]
	Server(String),

	#[error("Unable to contact the server at {servlet}: {detail}")]
	Unavailable { servlet: Url, detail: String },

	#[error("Invalid server response. Action: {servlet}\n{detail}")]
	InvalidResponse { servlet: Url, detail: String },

	/// The form submission answered with progress instead of a summary
	#[error("Bad server response: {detail}\n{hint}")]
	BadSummary { detail: String, hint: &'static str },

	#[error("Timeout sending the file: no progress for {seconds} seconds")]
	Stalled { seconds: u64 },

	#[error("The upload task failed: {0}")]
	Task(String),
}
