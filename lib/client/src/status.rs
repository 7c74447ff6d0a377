use std::fmt::Display;

/// The lifecycle of a single upload.
///
/// `UNINITIALIZED -> CHANGED -> QUEUED -> SUBMITTING -> IN_PROGRESS`
/// and from there into one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
	/// No file selected yet
	#[default]
	Uninitialized,

	/// A valid file was selected
	Changed,

	/// Waiting for the uploads before this one
	Queued,

	/// Session negotiated, the form is about to be sent
	Submitting,

	/// The form is being sent and progress is being polled
	InProgress,

	/// Cancellation was requested while in progress,
	/// waiting for the server to acknowledge it
	Canceling,

	Success,
	Error,
	Canceled,

	/// This file was already uploaded successfully
	Repeated,

	/// This file does not match the extension allow-list
	Invalid,

	/// A finished upload was removed
	Deleted,
}

impl Status {
	/// Once reached, only a delete (or a reuse) leaves these states
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			Self::Success
				| Self::Error
				| Self::Canceled
				| Self::Repeated
				| Self::Invalid
				| Self::Deleted
		)
	}

	/// Is this upload in the queue or on the wire?
	pub fn is_active(&self) -> bool {
		matches!(
			self,
			Self::Queued | Self::Submitting | Self::InProgress | Self::Canceling
		)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Uninitialized => "UNINITIALIZED",
			Self::Changed => "CHANGED",
			Self::Queued => "QUEUED",
			Self::Submitting => "SUBMITTING",
			Self::InProgress => "IN_PROGRESS",
			Self::Canceling => "CANCELING",
			Self::Success => "SUCCESS",
			Self::Error => "ERROR",
			Self::Canceled => "CANCELED",
			Self::Repeated => "REPEATED",
			Self::Invalid => "INVALID",
			Self::Deleted => "DELETED",
		}
	}
}

impl Display for Status {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}
