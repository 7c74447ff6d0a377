use tracing::{info, warn};

use crate::{CancelHandle, Status};

/// Anything that shows the state of one upload to a user.
pub trait StatusPresenter: Send + 'static {
	fn set_status(&mut self, status: Status);

	/// Progress in KiB
	fn set_progress(&mut self, done_kib: u64, total_kib: u64);

	fn set_error(&mut self, message: &str);

	fn set_file_name(&mut self, name: &str);

	/// A fresh presenter of the same kind, for the next upload
	fn new_instance(&self) -> Self
	where
		Self: Sized;

	/// Called with a handle the presenter may use
	/// to request cancellation of its upload.
	fn set_cancel_handle(&mut self, _handle: CancelHandle) {}
}

/// Reports uploads through `tracing`
#[derive(Debug, Default)]
pub struct LogPresenter {
	file_name: Option<String>,
	last_percent: Option<u64>,
}

impl LogPresenter {
	pub fn new() -> Self {
		Self::default()
	}
}

impl StatusPresenter for LogPresenter {
	fn set_status(&mut self, status: Status) {
		info!(
			message = "Upload status changed",
			file = self.file_name.as_deref().unwrap_or(""),
			%status
		);
	}

	fn set_progress(&mut self, done_kib: u64, total_kib: u64) {
		let percent = if total_kib == 0 {
			0
		} else {
			done_kib.saturating_mul(100) / total_kib
		};

		// Only report every ten percent
		let bucket = percent / 10;
		if self.last_percent != Some(bucket) {
			self.last_percent = Some(bucket);
			info!(
				message = "Upload progress",
				file = self.file_name.as_deref().unwrap_or(""),
				done_kib,
				total_kib,
				percent
			);
		}
	}

	fn set_error(&mut self, message: &str) {
		warn!(
			message = "Upload error",
			file = self.file_name.as_deref().unwrap_or(""),
			error = message
		);
	}

	fn set_file_name(&mut self, name: &str) {
		self.file_name = Some(name.to_owned());
	}

	fn new_instance(&self) -> Self {
		Self::new()
	}
}
