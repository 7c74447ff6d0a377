use std::fmt::Display;

/// Every element name the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
	/// Progress, 0-100
	Percent,
	CurrentBytes,
	TotalBytes,

	/// Terminal marker. Value is `ok`, `OK`, `error` or `canceled`.
	Finished,
	Canceled,

	/// The server does not know about this upload (yet)
	Wait,
	Error,

	/// Session answer: does this server use an upload target indirection?
	Blobstore,
	/// Upload target answer: where the multipart form should be sent
	BlobPath,
	/// Upload target answer: field name the target expects
	BlobName,
	/// Upload target answer: extra hidden form fields
	BlobParam,

	Name,
	ContentType,
	Size,
	Field,
	Message,
	Key,
	SessionId,
	Deleted,

	/// Group of `file` elements in a POST summary
	Files,
	File,

	/// Document root
	Response,
}

impl Tag {
	pub const ALL: [Tag; 22] = [
		Self::Percent,
		Self::CurrentBytes,
		Self::TotalBytes,
		Self::Finished,
		Self::Canceled,
		Self::Wait,
		Self::Error,
		Self::Blobstore,
		Self::BlobPath,
		Self::BlobName,
		Self::BlobParam,
		Self::Name,
		Self::ContentType,
		Self::Size,
		Self::Field,
		Self::Message,
		Self::Key,
		Self::SessionId,
		Self::Deleted,
		Self::Files,
		Self::File,
		Self::Response,
	];

	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Percent => "percent",
			Self::CurrentBytes => "currentBytes",
			Self::TotalBytes => "totalBytes",
			Self::Finished => "finished",
			Self::Canceled => "canceled",
			Self::Wait => "wait",
			Self::Error => "error",
			Self::Blobstore => "blobstore",
			Self::BlobPath => "blobpath",
			Self::BlobName => "blobname",
			Self::BlobParam => "blobparam",
			Self::Name => "name",
			Self::ContentType => "ctype",
			Self::Size => "size",
			Self::Field => "field",
			Self::Message => "message",
			Self::Key => "key",
			Self::SessionId => "sessionid",
			Self::Deleted => "deleted",
			Self::Files => "files",
			Self::File => "file",
			Self::Response => "response",
		}
	}

	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|t| t.as_str() == name)
	}
}

impl Display for Tag {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}
