use rand::{distributions::Alphanumeric, Rng};
use smartstring::{LazyCompact, SmartString};
use std::fmt::Display;
use tokio::time::Instant;
use upld_wire::{compose_url, Param, Tag, WireMessage};
use url::Url;

use crate::Status;

//
// MARK: UploadId
//

const UPLOAD_ID_LENGTH: usize = 12;

/// The form field name of one upload.
/// The server tracks progress by this name, so it must be unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UploadId {
	id: SmartString<LazyCompact>,
}

impl UploadId {
	#[inline(always)]
	pub fn new(prefix: &str) -> Self {
		let suffix: SmartString<LazyCompact> = rand::thread_rng()
			.sample_iter(&Alphanumeric)
			.take(UPLOAD_ID_LENGTH)
			.map(char::from)
			.collect();

		let mut id = SmartString::new();
		if !prefix.is_empty() {
			id.push_str(prefix);
			id.push('-');
		}
		id.push_str(&suffix);

		Self { id }
	}

	pub fn as_str(&self) -> &str {
		&self.id
	}
}

impl From<&str> for UploadId {
	fn from(value: &str) -> Self {
		Self { id: value.into() }
	}
}

impl Display for UploadId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.id)
	}
}

//
// MARK: ServerInfo
//

/// What the server told us about a stored file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
	pub name: Option<String>,
	pub content_type: Option<String>,
	pub size: Option<u64>,
	pub field: Option<String>,
	pub key: Option<String>,
	pub message: Option<String>,

	/// Where the stored file can be downloaded
	pub file_url: Option<Url>,
}

impl ServerInfo {
	pub fn from_message(msg: &WireMessage, servlet: &Url) -> Self {
		let field = msg.get(Tag::Field).map(|x| x.trim().to_owned());
		let key = msg
			.get(Tag::Key)
			.map(|x| x.trim().to_owned())
			.filter(|x| !x.is_empty());

		let file_url = field.as_deref().map(|field| match &key {
			Some(key) => compose_url(servlet, &[(Param::Show, field), (Param::BlobKey, key)]),
			None => compose_url(servlet, &[(Param::Show, field)]),
		});

		Self {
			name: msg.get(Tag::Name).map(|x| x.to_owned()),
			content_type: msg.get(Tag::ContentType).map(|x| x.to_owned()),
			size: msg.get_u64(Tag::Size),
			field,
			key,
			message: msg.get(Tag::Message).map(|x| x.to_owned()),
			file_url,
		}
	}
}

//
// MARK: UploadSession
//

/// The state of one upload, as seen by the client.
#[derive(Debug, Clone)]
pub struct UploadSession {
	id: UploadId,
	status: Status,

	/// Base name of the selected file
	file_name: Option<String>,

	bytes_transferred: u64,
	bytes_total: u64,

	/// When `bytes_transferred` last increased
	last_progress: Option<Instant>,

	server_info: Option<ServerInfo>,

	/// The last payload received for the form submission
	raw_response: Option<String>,

	/// Last error shown to the user
	message: Option<String>,

	finished: bool,
	cancelled: bool,
	successful: bool,
}

impl UploadSession {
	pub fn new(prefix: &str) -> Self {
		Self::with_id(UploadId::new(prefix))
	}

	pub fn with_id(id: UploadId) -> Self {
		Self {
			id,
			status: Status::Uninitialized,
			file_name: None,
			bytes_transferred: 0,
			bytes_total: 0,
			last_progress: None,
			server_info: None,
			raw_response: None,
			message: None,
			finished: false,
			cancelled: false,
			successful: false,
		}
	}

	pub fn id(&self) -> &UploadId {
		&self.id
	}

	pub fn status(&self) -> Status {
		self.status
	}

	pub fn file_name(&self) -> Option<&str> {
		self.file_name.as_deref()
	}

	pub fn bytes_transferred(&self) -> u64 {
		self.bytes_transferred
	}

	pub fn bytes_total(&self) -> u64 {
		self.bytes_total
	}

	pub fn last_progress(&self) -> Option<Instant> {
		self.last_progress
	}

	pub fn server_info(&self) -> Option<&ServerInfo> {
		self.server_info.as_ref()
	}

	pub fn raw_response(&self) -> Option<&str> {
		self.raw_response.as_deref()
	}

	pub fn message(&self) -> Option<&str> {
		self.message.as_deref()
	}

	pub fn is_finished(&self) -> bool {
		self.finished
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled
	}

	pub fn is_successful(&self) -> bool {
		self.successful
	}

	/// Progress as an integer in `0..=100`
	pub fn percent(&self) -> u64 {
		if self.bytes_total == 0 {
			return 0;
		}
		return (self.bytes_transferred.saturating_mul(100) / self.bytes_total).min(100);
	}

	/// `(transferred, total)` in KiB, rounded down
	pub fn kib(&self) -> (u64, u64) {
		(self.bytes_transferred / 1024, self.bytes_total / 1024)
	}

	pub(crate) fn set_status(&mut self, status: Status) {
		self.status = status;
	}

	pub(crate) fn set_file_name(&mut self, name: Option<String>) {
		self.file_name = name;
	}

	pub(crate) fn set_server_info(&mut self, info: ServerInfo) {
		self.server_info = Some(info);
	}

	pub(crate) fn set_raw_response(&mut self, raw: String) {
		self.raw_response = Some(raw);
	}

	pub(crate) fn set_message(&mut self, message: String) {
		self.message = Some(message);
	}

	/// Start the stall clock
	pub(crate) fn start_progress_clock(&mut self, now: Instant) {
		self.last_progress = Some(now);
	}

	/// Record a progress report.
	/// Counters never go backwards. The stall clock is only reset
	/// when the transferred count strictly increases.
	/// Returns true if it did.
	pub(crate) fn record_progress(&mut self, current: u64, total: u64, now: Instant) -> bool {
		if total > 0 {
			self.bytes_total = self.bytes_total.max(total);
		}

		if current > self.bytes_transferred {
			self.bytes_transferred = current;
			self.last_progress = Some(now);
			return true;
		}

		return false;
	}

	/// Mark this session as done
	pub(crate) fn finish(&mut self, status: Status) {
		self.finished = true;
		self.cancelled = status == Status::Canceled;
		self.successful = status == Status::Success;
		self.status = status;
	}
}
