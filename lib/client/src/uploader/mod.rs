use std::sync::Arc;
use tokio::{
	task::{JoinError, JoinHandle},
	time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use upld_wire::{compose_url, decode, strip_html_tags, Param, Tag, WireMessage};

use crate::{
	basename, describe_extensions, validate_extension, CompletedFileRegistry, FileInput,
	PollEvent, Poller, ServerInfo, SessionNegotiator, Status, StatusPresenter, SubmitForm,
	TransportError, UploadQueue, UploadSession, UploadTransport, UploaderConfig,
	UploaderHandlers,
};

pub mod errors;
mod multi;

use errors::{UploadFailure, BILLING_HINT, PARSING_HINT};
pub use multi::MultiUploader;

//
// MARK: Context
//

/// State shared by every uploader that talks to the same server
pub struct UploadContext<T: UploadTransport> {
	pub transport: Arc<T>,
	pub queue: Arc<UploadQueue>,
	pub registry: Arc<CompletedFileRegistry>,
}

// We need to impl this manually, since `T` isn't `Clone`
impl<T: UploadTransport> Clone for UploadContext<T> {
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			queue: self.queue.clone(),
			registry: self.registry.clone(),
		}
	}
}

impl<T: UploadTransport> UploadContext<T> {
	pub fn new(transport: T) -> Self {
		Self::from_arc(Arc::new(transport))
	}

	pub fn from_arc(transport: Arc<T>) -> Self {
		Self {
			transport,
			queue: Arc::new(UploadQueue::new()),
			registry: Arc::new(CompletedFileRegistry::new()),
		}
	}

	/// Forget every queued upload and every completed file
	pub fn reset(&self) {
		self.queue.clear();
		self.registry.clear();
	}
}

//
// MARK: CancelHandle
//

/// Requests cancellation of one upload from anywhere
#[derive(Debug, Clone)]
pub struct CancelHandle {
	token: CancellationToken,
}

impl CancelHandle {
	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}
}

//
// MARK: Uploader
//

enum Step {
	Cancel,
	Submitted(Result<Result<String, TransportError>, JoinError>),
	Poll(Option<PollEvent>),
}

/// Drives one upload at a time through its lifecycle.
///
/// Selection is synchronous ([`Uploader::select`]), everything after
/// that happens inside [`Uploader::run`] or [`Uploader::submit`],
/// which return once the upload reached a terminal state.
pub struct Uploader<T: UploadTransport, I: FileInput, P: StatusPresenter> {
	config: Arc<UploaderConfig>,
	context: UploadContext<T>,
	negotiator: SessionNegotiator<T>,
	handlers: Arc<UploaderHandlers>,

	input: I,
	presenter: P,

	session: UploadSession,
	cancel: CancellationToken,

	/// Finished sessions, kept when `reuse_on_finish` is set
	history: Vec<UploadSession>,
}

impl<T: UploadTransport, I: FileInput, P: StatusPresenter> Uploader<T, I, P> {
	pub fn new(config: Arc<UploaderConfig>, context: UploadContext<T>, input: I, presenter: P) -> Self {
		Self::with_handlers(
			config,
			context,
			input,
			presenter,
			Arc::new(UploaderHandlers::default()),
		)
	}

	/// Create an uploader that reports to existing handlers
	pub fn with_handlers(
		config: Arc<UploaderConfig>,
		context: UploadContext<T>,
		mut input: I,
		mut presenter: P,
		handlers: Arc<UploaderHandlers>,
	) -> Self {
		let session = UploadSession::new(&config.field_prefix);
		let cancel = CancellationToken::new();

		input.set_name(session.id().as_str());
		input.set_enabled(true);
		presenter.set_cancel_handle(CancelHandle {
			token: cancel.clone(),
		});

		let negotiator = SessionNegotiator::new(
			context.transport.clone(),
			config.servlet.clone(),
			config.request_timeout,
		);

		Self {
			config,
			context,
			negotiator,
			handlers,
			input,
			presenter,
			session,
			cancel,
			history: Vec::new(),
		}
	}

	pub fn session(&self) -> &UploadSession {
		&self.session
	}

	pub fn status(&self) -> Status {
		self.session.status()
	}

	pub fn config(&self) -> &UploaderConfig {
		&self.config
	}

	pub fn context(&self) -> &UploadContext<T> {
		&self.context
	}

	pub fn handlers(&self) -> &UploaderHandlers {
		&self.handlers
	}

	pub fn input(&self) -> &I {
		&self.input
	}

	pub fn input_mut(&mut self) -> &mut I {
		&mut self.input
	}

	pub fn presenter(&self) -> &P {
		&self.presenter
	}

	pub fn presenter_mut(&mut self) -> &mut P {
		&mut self.presenter
	}

	pub fn history(&self) -> &[UploadSession] {
		&self.history
	}

	/// A handle that cancels the current upload
	pub fn cancel_handle(&self) -> CancelHandle {
		CancelHandle {
			token: self.cancel.clone(),
		}
	}

	fn set_status(&mut self, status: Status) {
		debug!(
			message = "Status changed",
			upload_id = %self.session.id(),
			from = %self.session.status(),
			to = %status
		);

		self.session.set_status(status);
		self.presenter.set_status(status);
		self.handlers.on_status_changed.fire(&self.session);
	}

	/// Start over with a fresh session on the same input and presenter
	fn restart_session(&mut self) {
		self.context.queue.dequeue(self.session.id());
		self.session = UploadSession::new(&self.config.field_prefix);
		self.cancel = CancellationToken::new();

		self.input.set_name(self.session.id().as_str());
		self.input.set_enabled(true);
		self.presenter.set_cancel_handle(CancelHandle {
			token: self.cancel.clone(),
		});

		debug!(message = "Started a new session", upload_id = %self.session.id());
	}

	/// Prepare this uploader for another file,
	/// with a fresh input and a fresh presenter.
	pub fn reuse(&mut self) {
		self.input = self.input.new_instance();
		self.presenter = self.presenter.new_instance();
		self.restart_session();
	}

	//
	// MARK: Selection
	//

	/// Handle a change of the file input
	pub fn select(&mut self) -> Status {
		let status = self.session.status();
		if status.is_active() {
			warn!(
				message = "Ignoring file selection during an upload",
				upload_id = %self.session.id(),
				%status
			);
			return status;
		}

		if status.is_terminal() {
			self.restart_session();
		}

		let filename = self.input.filename().unwrap_or_default();
		let name = basename(&filename).to_owned();

		if name.is_empty() {
			self.session.set_file_name(None);
			if self.config.avoid_empty {
				return self.finish(Status::Invalid, Some(UploadFailure::NoFile));
			}
			return self.session.status();
		}

		self.session.set_file_name(Some(name.clone()));
		self.presenter.set_file_name(&name);

		if self.config.avoid_repeat && self.context.registry.contains(&name) {
			return self.finish(Status::Repeated, Some(UploadFailure::AlreadyUploaded(name)));
		}

		self.set_status(Status::Changed);

		if !validate_extension(&self.config.valid_extensions, &name) {
			let allowed = describe_extensions(&self.config.valid_extensions);
			return self.finish(
				Status::Invalid,
				Some(UploadFailure::InvalidExtension { allowed }),
			);
		}

		self.handlers.on_change.fire(&self.session);
		return Status::Changed;
	}

	/// Cancel an upload that is not running.
	/// Running uploads are canceled through a [`CancelHandle`].
	pub fn cancel(&mut self) -> Status {
		let status = self.session.status();
		if status == Status::Changed || status.is_active() {
			self.cancel.cancel();
			return self.cancel_locally();
		}
		return status;
	}

	//
	// MARK: Upload
	//

	/// Upload the selected file, after the settle delay if auto-submit is on.
	pub async fn run(&mut self) -> Status {
		if self.session.status() != Status::Changed {
			return self.session.status();
		}

		if self.config.auto_submit {
			tokio::select! {
				_ = self.cancel.cancelled() => return self.cancel_locally(),
				_ = tokio::time::sleep(self.config.settle_delay) => {}
			}
		}

		return self.submit().await;
	}

	/// Upload the selected file now
	pub async fn submit(&mut self) -> Status {
		if self.session.status() != Status::Changed {
			debug!(
				message = "Nothing to submit",
				upload_id = %self.session.id(),
				status = %self.session.status()
			);
			return self.session.status();
		}

		let source = match self.input.source() {
			Some(x) => x,
			None => return self.finish(Status::Invalid, Some(UploadFailure::NoFile)),
		};

		let id = self.session.id().clone();
		let file_name = self.session.file_name().unwrap_or_default().to_owned();

		self.context.queue.enqueue(&id);
		self.input.set_enabled(false);
		self.set_status(Status::Queued);
		self.presenter.set_progress(0, 0);
		self.handlers.on_start.fire(&self.session);

		// Wait for our turn
		while !self.context.queue.is_head(&id) {
			tokio::select! {
				_ = self.cancel.cancelled() => return self.cancel_locally(),
				_ = tokio::time::sleep(self.config.settle_delay) => {}
			}
		}

		let negotiated = tokio::select! {
			_ = self.cancel.cancelled() => return self.cancel_locally(),
			r = self.negotiator.ensure_upload_target(&file_name) => r,
		};

		let target = match negotiated {
			Ok(x) => x,
			Err(error) => {
				warn!(message = "Could not negotiate upload", upload_id = %id, %error);
				return self.finish(Status::Error, Some(error.into()));
			}
		};

		self.set_status(Status::Submitting);

		let form = SubmitForm {
			field_name: target
				.field_name
				.clone()
				.unwrap_or_else(|| id.to_string()),
			file_name,
			source,
			fields: target.fields.clone(),
		};

		let transport = self.context.transport.clone();
		let url = target.url.clone();
		let mut submission = tokio::spawn(async move { transport.submit(url, form).await });

		self.set_status(Status::InProgress);
		self.session.start_progress_clock(Instant::now());

		let interval = if target.blobstore {
			self.config.blobstore_status_interval
		} else {
			self.config.status_interval
		};

		let mut poller = Poller::start(
			self.context.transport.clone(),
			self.config.servlet.clone(),
			id.clone(),
			interval,
			self.config.request_timeout,
		);

		let status = self
			.drive(&mut submission, &mut poller, target.blobstore)
			.await;

		poller.stop();
		if !submission.is_finished() {
			debug!(message = "Abandoning form submission", upload_id = %id);
			submission.abort();
		}

		return status;
	}

	async fn drive(
		&mut self,
		submission: &mut JoinHandle<Result<String, TransportError>>,
		poller: &mut Poller,
		indirect: bool,
	) -> Status {
		let mut submitted = false;

		loop {
			let step = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => Step::Cancel,
				res = &mut *submission, if !submitted => Step::Submitted(res),
				ev = poller.next() => Step::Poll(ev),
			};

			let done = match step {
				Step::Cancel => return self.cancel_in_flight(poller).await,

				Step::Submitted(res) => {
					submitted = true;
					self.on_submitted(res, poller, indirect)
				}

				Step::Poll(Some(event)) => self.on_poll(event, indirect),

				Step::Poll(None) => Some(self.finish(
					Status::Error,
					Some(UploadFailure::Task("status polling stopped".into())),
				)),
			};

			if let Some(status) = done {
				return status;
			}
		}
	}

	/// Handle the response to the form submission
	fn on_submitted(
		&mut self,
		res: Result<Result<String, TransportError>, JoinError>,
		poller: &Poller,
		indirect: bool,
	) -> Option<Status> {
		let body = match res {
			Ok(Ok(body)) => body,

			// The server may have dropped the connection because it
			// canceled the upload. Let it tell us.
			Ok(Err(error @ TransportError::Timeout))
			| Ok(Err(error @ TransportError::Other { .. })) => {
				info!(
					message = "Form submission failed, asking the server",
					upload_id = %self.session.id(),
					%error
				);
				poller.poll_now();
				return None;
			}

			Ok(Err(error)) => {
				let failure = UploadFailure::Unavailable {
					servlet: self.config.servlet.clone(),
					detail: strip_html_tags(&error.detail()).trim().to_owned(),
				};
				return Some(self.finish(Status::Error, Some(failure)));
			}

			Err(error) => {
				let failure = UploadFailure::Task(error.to_string());
				return Some(self.finish(Status::Error, Some(failure)));
			}
		};

		if body.trim().is_empty() {
			debug!(
				message = "Ignoring empty form response",
				upload_id = %self.session.id()
			);
			return None;
		}

		self.session.set_raw_response(body.clone());

		match decode(&body) {
			Ok(msg) => return self.evaluate(&msg, true, indirect),
			Err(error) => {
				debug!(
					message = "Could not decode form response, asking the server",
					upload_id = %self.session.id(),
					%error
				);
				poller.poll_now();
				return None;
			}
		}
	}

	/// Handle the outcome of a status request
	fn on_poll(&mut self, event: PollEvent, indirect: bool) -> Option<Status> {
		match event {
			PollEvent::Response(text) => match decode(&text) {
				Ok(msg) => return self.evaluate(&msg, false, indirect),
				Err(error) => {
					if text.trim().eq_ignore_ascii_case("error") {
						let failure = UploadFailure::InvalidResponse {
							servlet: self.config.servlet.clone(),
							detail: strip_html_tags(&text).trim().to_owned(),
						};
						return Some(self.finish(Status::Error, Some(failure)));
					}

					debug!(
						message = "Could not decode status response",
						upload_id = %self.session.id(),
						%error
					);
					return self.check_stall();
				}
			},

			PollEvent::TimedOut => {
				debug!(message = "Status request timed out", upload_id = %self.session.id());
				return self.check_stall();
			}

			PollEvent::Failed(error) => {
				let failure = UploadFailure::Unavailable {
					servlet: self.config.servlet.clone(),
					detail: strip_html_tags(&error.detail()).trim().to_owned(),
				};
				return Some(self.finish(Status::Error, Some(failure)));
			}
		}
	}

	/// React to a decoded message.
	/// `from_submit` is true if it is the response to the form submission.
	fn evaluate(&mut self, msg: &WireMessage, from_submit: bool, indirect: bool) -> Option<Status> {
		if let Some(error) = msg.get(Tag::Error) {
			let failure = UploadFailure::Server(strip_html_tags(error).trim().to_owned());
			return Some(self.finish(Status::Error, Some(failure)));
		}

		if msg.has(Tag::Canceled) {
			return Some(self.finish(Status::Canceled, None));
		}

		if msg.has(Tag::Finished) {
			return Some(self.succeed(msg));
		}

		if msg.has(Tag::Wait) {
			// The server forgot about us, but we already have its answer
			if from_submit || self.session.raw_response().is_some() {
				return Some(self.succeed(msg));
			}
			return self.check_stall();
		}

		if msg.has(Tag::Percent) || msg.has(Tag::CurrentBytes) {
			if from_submit {
				let failure = UploadFailure::BadSummary {
					detail: strip_html_tags(self.session.raw_response().unwrap_or_default())
						.trim()
						.to_owned(),
					hint: if indirect { BILLING_HINT } else { PARSING_HINT },
				};
				return Some(self.finish(Status::Error, Some(failure)));
			}

			let current = msg.get_u64(Tag::CurrentBytes).unwrap_or(0);
			let total = msg.get_u64(Tag::TotalBytes).unwrap_or(0);
			self.session.record_progress(current, total, Instant::now());

			let (done, total) = self.session.kib();
			self.presenter.set_progress(done, total);
			return self.check_stall();
		}

		debug!(
			message = "Unrecognized response",
			upload_id = %self.session.id(),
			from_submit
		);
		return self.check_stall();
	}

	/// Fail the upload if it made no progress for too long
	fn check_stall(&mut self) -> Option<Status> {
		let timeout = self.config.stall_timeout;
		if timeout.is_zero() {
			return None;
		}

		let last = self.session.last_progress()?;
		if Instant::now().saturating_duration_since(last) <= timeout {
			return None;
		}

		warn!(
			message = "Upload stalled",
			upload_id = %self.session.id(),
			bytes_transferred = self.session.bytes_transferred(),
			timeout_secs = timeout.as_secs()
		);

		self.send_cancel_detached();
		return Some(self.finish(
			Status::Error,
			Some(UploadFailure::Stalled {
				seconds: timeout.as_secs(),
			}),
		));
	}

	fn succeed(&mut self, msg: &WireMessage) -> Status {
		// The form response carries the full summary, a status poll may not
		let summary = self
			.session
			.raw_response()
			.and_then(|raw| decode(raw).ok())
			.filter(|m| m.has(Tag::Field));

		let info = ServerInfo::from_message(summary.as_ref().unwrap_or(msg), &self.config.servlet);
		self.session.set_server_info(info);

		let total = self.session.bytes_total();
		if total > 0 {
			self.session.record_progress(total, total, Instant::now());
			let (done, total) = self.session.kib();
			self.presenter.set_progress(done, total);
		}

		return self.finish(Status::Success, None);
	}

	fn cancel_locally(&mut self) -> Status {
		info!(
			message = "Upload canceled before it was sent",
			upload_id = %self.session.id()
		);
		self.handlers.on_cancel.fire(&self.session);
		return self.finish(Status::Canceled, None);
	}

	async fn cancel_in_flight(&mut self, poller: &mut Poller) -> Status {
		poller.stop();
		self.handlers.on_cancel.fire(&self.session);
		self.set_status(Status::Canceling);

		let url = compose_url(&self.config.servlet, &[(Param::Cancel, "true")]);
		let timeout = self.config.request_timeout;
		let res = tokio::time::timeout(timeout, self.context.transport.get(url, timeout)).await;

		match res {
			Ok(Ok(text)) => {
				let acknowledged = decode(&text)
					.map(|m| m.get_bool(Tag::Canceled))
					.unwrap_or(false);
				debug!(
					message = "Server answered cancellation",
					upload_id = %self.session.id(),
					acknowledged
				);
			}
			Ok(Err(error)) => {
				info!(message = "Cancel request failed", upload_id = %self.session.id(), %error);
			}
			Err(_) => {
				info!(message = "Cancel request timed out", upload_id = %self.session.id());
			}
		}

		return self.finish(Status::Canceled, None);
	}

	/// Tell the server to stop receiving, without waiting for an answer
	fn send_cancel_detached(&self) {
		let transport = self.context.transport.clone();
		let url = compose_url(&self.config.servlet, &[(Param::Cancel, "true")]);
		let timeout = self.config.request_timeout;

		tokio::spawn(async move {
			if let Err(error) = transport.get(url, timeout).await {
				debug!(message = "Cancel request failed", %error);
			}
		});
	}

	/// Enter a terminal state
	fn finish(&mut self, status: Status, failure: Option<UploadFailure>) -> Status {
		self.context.queue.dequeue(self.session.id());

		if let Some(failure) = failure {
			let message = failure.to_string();
			self.presenter.set_error(&message);
			self.session.set_message(message);
		}

		self.session.finish(status);
		self.presenter.set_status(status);
		self.handlers.on_status_changed.fire(&self.session);

		if status == Status::Success && self.config.avoid_repeat {
			if let Some(name) = self.session.file_name() {
				self.context.registry.add(name);
			}
		}

		self.input.set_enabled(true);

		info!(
			message = "Upload finished",
			upload_id = %self.session.id(),
			file = self.session.file_name().unwrap_or_default(),
			%status,
			error = self.session.message()
		);

		self.handlers.on_finish.fire(&self.session);

		if self.config.reuse_on_finish {
			self.history.push(self.session.clone());
			self.reuse();
		}

		return status;
	}

	//
	// MARK: Delete
	//

	/// Remove a finished upload.
	/// Successful uploads are also removed from the server.
	pub async fn delete(&mut self) -> Status {
		let status = self.session.status();
		if !status.is_terminal() || status == Status::Deleted {
			return status;
		}

		if self.session.is_successful() {
			let field = self
				.session
				.server_info()
				.and_then(|x| x.field.clone())
				.unwrap_or_else(|| self.session.id().to_string());

			let url = compose_url(&self.config.servlet, &[(Param::Remove, &field)]);
			let timeout = self.config.request_timeout;
			let res =
				tokio::time::timeout(timeout, self.context.transport.get(url, timeout)).await;

			match res {
				Ok(Ok(text)) => {
					let deleted = decode(&text)
						.map(|m| m.get_bool(Tag::Deleted))
						.unwrap_or(false);
					debug!(
						message = "Removed file from server",
						field = field.as_str(),
						deleted
					);

					if let Some(name) = self.session.file_name() {
						self.context.registry.remove(name);
					}
				}
				Ok(Err(error)) => {
					warn!(
						message = "Could not remove file from server",
						field = field.as_str(),
						%error
					);
				}
				Err(_) => {
					warn!(message = "Remove request timed out", field = field.as_str());
				}
			}
		}

		self.set_status(Status::Deleted);
		return Status::Deleted;
	}
}

#[cfg(test)]
mod tests;
