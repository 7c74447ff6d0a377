use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{CancelHandle, UploadContext, Uploader};
use crate::{FileInput, Status, StatusPresenter, UploadTransport, UploaderConfig, UploaderHandlers};

/// Accepts many files, one selection at a time.
///
/// Every accepted selection is handed to its own [`Uploader`],
/// and a fresh one takes its place. The shared queue makes sure
/// only one of them sends at a time.
pub struct MultiUploader<T: UploadTransport, I: FileInput, P: StatusPresenter> {
	config: Arc<UploaderConfig>,
	context: UploadContext<T>,
	handlers: Arc<UploaderHandlers>,

	current: Uploader<T, I, P>,
	running: JoinSet<Uploader<T, I, P>>,
	cancel: Vec<CancelHandle>,
	finished: Vec<Uploader<T, I, P>>,
}

impl<T: UploadTransport, I: FileInput, P: StatusPresenter> MultiUploader<T, I, P> {
	pub fn new(config: Arc<UploaderConfig>, context: UploadContext<T>, input: I, presenter: P) -> Self {
		let handlers = Arc::new(UploaderHandlers::default());
		let current = Uploader::with_handlers(
			config.clone(),
			context.clone(),
			input,
			presenter,
			handlers.clone(),
		);

		Self {
			config,
			context,
			handlers,
			current,
			running: JoinSet::new(),
			cancel: Vec::new(),
			finished: Vec::new(),
		}
	}

	/// Handlers shared by every uploader we create
	pub fn handlers(&self) -> &UploaderHandlers {
		&self.handlers
	}

	pub fn context(&self) -> &UploadContext<T> {
		&self.context
	}

	/// The uploader waiting for the next selection
	pub fn current(&self) -> &Uploader<T, I, P> {
		&self.current
	}

	pub fn input_mut(&mut self) -> &mut I {
		self.current.input_mut()
	}

	/// How many uploads have not finished yet
	pub fn running(&self) -> usize {
		self.running.len()
	}

	/// Accept the file selected in the current input.
	/// Must be called inside a tokio runtime.
	pub fn select(&mut self) -> Status {
		let status = self.current.select();
		if status != Status::Changed && !status.is_terminal() {
			return status;
		}

		let next = Uploader::with_handlers(
			self.config.clone(),
			self.context.clone(),
			self.current.input().new_instance(),
			self.current.presenter().new_instance(),
			self.handlers.clone(),
		);
		let mut uploader = std::mem::replace(&mut self.current, next);

		if status == Status::Changed {
			debug!(
				message = "Starting upload",
				upload_id = %uploader.session().id(),
				file = uploader.session().file_name().unwrap_or_default()
			);

			// Spawned tasks may start in any order,
			// so the upload takes its place in line here.
			self.context.queue.enqueue(uploader.session().id());
			self.cancel.push(uploader.cancel_handle());
			self.running.spawn(async move {
				uploader.run().await;
				uploader
			});
		} else {
			self.finished.push(uploader);
		}

		return status;
	}

	/// Cancel every upload that has not finished
	pub fn cancel_all(&self) {
		for handle in &self.cancel {
			handle.cancel();
		}
	}

	/// Wait for every upload to finish.
	/// Returns every finished uploader, in the order they finished.
	pub async fn join(&mut self) -> Vec<Uploader<T, I, P>> {
		while let Some(res) = self.running.join_next().await {
			match res {
				Ok(uploader) => self.finished.push(uploader),
				Err(error) => warn!(message = "Upload task failed", %error),
			}
		}

		self.cancel.clear();
		return std::mem::take(&mut self.finished);
	}
}
