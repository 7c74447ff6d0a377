use std::time::Duration;
use url::Url;

/// How an [`crate::Uploader`] behaves
#[derive(Debug, Clone)]
pub struct UploaderConfig {
	/// The upload servlet. Sessions, status and cancellation go here.
	pub servlet: Url,

	/// Form field names are `<prefix>-<random>`
	pub field_prefix: String,

	/// Submit by itself, shortly after a file is selected
	pub auto_submit: bool,

	/// Refuse files that were already uploaded successfully
	pub avoid_repeat: bool,

	/// Treat an empty selection as invalid
	pub avoid_empty: bool,

	/// Allowed extensions, like `jpg` or `.png`.
	/// Empty means everything is allowed.
	pub valid_extensions: Vec<String>,

	/// Delay between selection and automatic submission.
	/// Also the interval at which a queued upload checks
	/// if it reached the head of the queue.
	pub settle_delay: Duration,

	/// Delay between status polls
	pub status_interval: Duration,

	/// Delay between status polls when the server uses
	/// an upload target indirection
	pub blobstore_status_interval: Duration,

	/// Fail an upload if its byte count does not increase for this long.
	/// Zero disables the check.
	pub stall_timeout: Duration,

	/// Timeout for every request except the form submission
	pub request_timeout: Duration,

	/// Start over with a fresh input and presenter
	/// every time an upload reaches a terminal state
	pub reuse_on_finish: bool,
}

impl UploaderConfig {
	pub fn new(servlet: Url) -> Self {
		Self {
			servlet,
			field_prefix: "UPLD".into(),
			auto_submit: false,
			avoid_repeat: false,
			avoid_empty: true,
			valid_extensions: Vec::new(),
			settle_delay: Duration::from_millis(600),
			status_interval: Duration::from_millis(500),
			blobstore_status_interval: Duration::from_millis(5000),
			stall_timeout: Duration::from_millis(60_000),
			request_timeout: Duration::from_millis(10_000),
			reuse_on_finish: false,
		}
	}
}
