use std::{
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex, PoisonError, Weak,
	},
	time::Duration,
};
use thiserror::Error;
use tokio::{
	task::JoinHandle,
	time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::SessionId;

/// Why an upload was stopped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
	#[error("Upload canceled by the user")]
	Canceled,

	#[error("No new data received after {seconds} seconds")]
	Timeout { seconds: u64 },

	#[error("The request was rejected because its size ({actual_kb} KB) exceeds the configured maximum ({allowed_kb} KB)")]
	SizeLimit { allowed_kb: u64, actual_kb: u64 },

	#[error("{0}")]
	Failed(String),
}

/// The state of a listener as of its last save
#[derive(Debug, Clone, Copy)]
pub struct ListenerSnapshot {
	pub bytes_read: u64,
	pub content_length: u64,
	pub saved_at: Instant,
}

impl ListenerSnapshot {
	pub fn percent(&self) -> u64 {
		percent(self.bytes_read, self.content_length)
	}
}

fn percent(done: u64, total: u64) -> u64 {
	if total == 0 {
		return 0;
	}
	return done.saturating_mul(100) / total;
}

/// Tracks the progress of the one upload a session may run at a time.
///
/// The request that receives the file writes progress with [`UploadListener::update`].
/// Status requests read the last published [`ListenerSnapshot`].
/// Anyone may stop the upload with [`UploadListener::cancel`].
#[derive(Debug)]
pub struct UploadListener {
	session: SessionId,

	bytes_read: AtomicU64,
	content_length: AtomicU64,

	/// The decile of our last save
	saved_decile: AtomicU64,
	snapshot: Mutex<ListenerSnapshot>,

	error: Mutex<Option<ListenerError>>,
	canceled: CancellationToken,

	/// True once `update` has returned our error
	raised: AtomicBool,

	finished: AtomicBool,
	post_response: Mutex<Option<String>>,

	frozen_timeout: Duration,
}

impl UploadListener {
	pub fn new(session: SessionId, content_length: u64, frozen_timeout: Duration) -> Self {
		info!(
			message = "Created upload listener",
			session = %session,
			content_length
		);

		Self {
			session,
			bytes_read: AtomicU64::new(0),
			content_length: AtomicU64::new(content_length),
			saved_decile: AtomicU64::new(0),
			snapshot: Mutex::new(ListenerSnapshot {
				bytes_read: 0,
				content_length,
				saved_at: Instant::now(),
			}),
			error: Mutex::new(None),
			canceled: CancellationToken::new(),
			raised: AtomicBool::new(false),
			finished: AtomicBool::new(false),
			post_response: Mutex::new(None),
			frozen_timeout,
		}
	}

	pub fn session(&self) -> &SessionId {
		&self.session
	}

	pub fn bytes_read(&self) -> u64 {
		self.bytes_read.load(Ordering::Acquire)
	}

	pub fn content_length(&self) -> u64 {
		self.content_length.load(Ordering::Acquire)
	}

	/// Live progress, not the published one
	pub fn percent(&self) -> u64 {
		percent(self.bytes_read(), self.content_length())
	}

	pub fn snapshot(&self) -> ListenerSnapshot {
		*self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn error(&self) -> Option<ListenerError> {
		self.error
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub fn is_canceled(&self) -> bool {
		self.canceled.is_cancelled()
	}

	/// Resolves once this upload is canceled
	pub async fn cancelled(&self) {
		self.canceled.cancelled().await
	}

	pub fn is_finished(&self) -> bool {
		self.finished.load(Ordering::Acquire)
	}

	/// The response sent to the form that uploaded our file
	pub fn post_response(&self) -> Option<String> {
		self.post_response
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	/// True if this upload started but has not
	/// been saved for a long time
	pub fn is_frozen(&self) -> bool {
		let snapshot = self.snapshot();
		let percent = snapshot.percent();
		return percent > 0
			&& percent < 100
			&& Instant::now().saturating_duration_since(snapshot.saved_at) > self.frozen_timeout;
	}

	/// False once this upload can be replaced by a new one
	pub fn is_receiving(&self) -> bool {
		return !(self.is_frozen()
			|| self.is_canceled()
			|| self.percent() >= 100
			|| self.is_finished());
	}

	/// Publish our current state
	fn save(&self) {
		let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
		*snapshot = ListenerSnapshot {
			bytes_read: self.bytes_read(),
			content_length: self.content_length(),
			saved_at: Instant::now(),
		};

		debug!(
			message = "Saved listener",
			session = %self.session,
			bytes_read = snapshot.bytes_read,
			content_length = snapshot.content_length
		);
	}

	/// Record that `done` of `total` bytes were received.
	///
	/// Returns an error if this upload was canceled,
	/// in which case the caller must stop receiving.
	pub fn update(&self, done: u64, total: u64) -> Result<(), ListenerError> {
		if self.raised.load(Ordering::Acquire) {
			return Err(self.error().unwrap_or(ListenerError::Canceled));
		}

		let previous = self.bytes_read.swap(done, Ordering::AcqRel);
		self.content_length.store(total, Ordering::Release);

		// Save on the first byte, on every new decile and at the end
		let decile = percent(done, total) / 10;
		let save = (previous == 0 && done > 0)
			|| done >= total
			|| decile > self.saved_decile.load(Ordering::Acquire);

		if save {
			self.saved_decile.store(decile, Ordering::Release);
			self.save();
		}

		if let Some(error) = self.error() {
			info!(
				message = "Upload was canceled, stopping",
				session = %self.session,
				bytes_read = done,
				reason = %error
			);
			self.raised.store(true, Ordering::Release);
			return Err(error);
		}

		return Ok(());
	}

	/// Stop this upload. Only the first reason is kept.
	pub fn cancel(&self, reason: ListenerError) {
		{
			let mut error = self.error.lock().unwrap_or_else(PoisonError::into_inner);
			if error.is_none() {
				info!(
					message = "Canceling upload",
					session = %self.session,
					reason = %reason
				);
				*error = Some(reason);
			}
		}

		self.canceled.cancel();
		self.save();
	}

	/// Mark this upload as done, keeping the response we sent
	pub fn finish(&self, post_response: String) {
		*self
			.post_response
			.lock()
			.unwrap_or_else(PoisonError::into_inner) = Some(post_response);
		self.finished.store(true, Ordering::Release);
		self.save();
	}
}

//
// MARK: Watchdog
//

/// Cancel `listener` if it receives no new bytes for `no_data_timeout`.
///
/// The watchdog stops by itself once the upload is complete, canceled or dropped.
pub fn spawn_watchdog(
	listener: &Arc<UploadListener>,
	interval: Duration,
	no_data_timeout: Duration,
) -> JoinHandle<()> {
	let listener = Arc::downgrade(listener);
	tokio::spawn(watchdog(listener, interval, no_data_timeout))
}

async fn watchdog(listener: Weak<UploadListener>, interval: Duration, no_data_timeout: Duration) {
	let mut last_bytes = 0;
	let mut last_data = Instant::now();

	let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		ticker.tick().await;

		let listener = match listener.upgrade() {
			Some(x) => x,
			None => {
				debug!(message = "Listener is gone, stopping watchdog");
				return;
			}
		};

		let bytes_read = listener.bytes_read();
		if (bytes_read > 0 && listener.percent() >= 100)
			|| listener.is_canceled()
			|| listener.is_finished()
		{
			debug!(
				message = "Upload is over, stopping watchdog",
				session = %listener.session()
			);
			return;
		}

		if bytes_read > last_bytes {
			last_bytes = bytes_read;
			last_data = Instant::now();
		} else if last_data.elapsed() > no_data_timeout {
			info!(
				message = "Upload seems frozen",
				session = %listener.session(),
				bytes_read,
				content_length = listener.content_length(),
				percent = listener.percent()
			);

			listener.cancel(ListenerError::Timeout {
				seconds: no_data_timeout.as_secs(),
			});
			return;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn listener(content_length: u64) -> Arc<UploadListener> {
		Arc::new(UploadListener::new(
			SessionId::new(),
			content_length,
			Duration::from_secs(60),
		))
	}

	#[tokio::test(start_paused = true)]
	async fn saves_on_first_byte_deciles_and_end() {
		let l = listener(1000);

		l.update(5, 1000).unwrap();
		assert_eq!(l.snapshot().bytes_read, 5);

		// Same decile, not published
		l.update(50, 1000).unwrap();
		assert_eq!(l.snapshot().bytes_read, 5);
		assert_eq!(l.bytes_read(), 50);

		l.update(120, 1000).unwrap();
		assert_eq!(l.snapshot().bytes_read, 120);
		assert_eq!(l.snapshot().percent(), 12);

		l.update(1000, 1000).unwrap();
		assert_eq!(l.snapshot().percent(), 100);
	}

	#[tokio::test(start_paused = true)]
	async fn cancel_stops_updates() {
		let l = listener(1000);
		l.update(100, 1000).unwrap();

		l.cancel(ListenerError::Canceled);
		l.cancel(ListenerError::Failed("later".into()));
		assert!(l.is_canceled());
		assert_eq!(l.error(), Some(ListenerError::Canceled));

		assert_eq!(l.update(150, 1000), Err(ListenerError::Canceled));
		assert_eq!(l.update(200, 1000), Err(ListenerError::Canceled));

		// Resolves immediately
		l.cancelled().await;
	}

	#[tokio::test(start_paused = true)]
	async fn frozen_after_timeout() {
		let l = listener(1000);
		l.update(100, 1000).unwrap();
		assert!(!l.is_frozen());

		tokio::time::sleep(Duration::from_secs(61)).await;
		assert!(l.is_frozen());

		l.update(1000, 1000).unwrap();
		assert!(!l.is_frozen());
	}

	#[tokio::test(start_paused = true)]
	async fn watchdog_cancels_frozen_upload() {
		let l = listener(1000);
		l.update(10, 1000).unwrap();

		let _watchdog = spawn_watchdog(&l, Duration::from_secs(5), Duration::from_secs(20));

		tokio::time::sleep(Duration::from_secs(20)).await;
		assert!(!l.is_canceled());

		tokio::time::sleep(Duration::from_secs(11)).await;
		assert!(l.is_canceled());
		assert_eq!(l.error(), Some(ListenerError::Timeout { seconds: 20 }));
	}

	#[tokio::test(start_paused = true)]
	async fn watchdog_stops_when_done() {
		let l = listener(1000);
		l.update(1000, 1000).unwrap();

		let watchdog = spawn_watchdog(&l, Duration::from_secs(5), Duration::from_secs(20));
		tokio::time::sleep(Duration::from_secs(6)).await;
		assert!(watchdog.is_finished());
		assert!(!l.is_canceled());
	}

	#[tokio::test(start_paused = true)]
	async fn watchdog_stops_when_dropped() {
		let l = listener(1000);
		let watchdog = spawn_watchdog(&l, Duration::from_secs(5), Duration::from_secs(20));
		drop(l);

		tokio::time::sleep(Duration::from_secs(6)).await;
		assert!(watchdog.is_finished());
	}
}
