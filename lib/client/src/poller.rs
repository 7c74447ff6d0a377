use std::{sync::Arc, time::Duration};
use tokio::{
	sync::mpsc,
	task::JoinHandle,
	time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use upld_wire::{compose_url, Param};
use url::Url;

use crate::{TransportError, UploadId, UploadTransport};

/// The outcome of one status request
#[derive(Debug)]
pub enum PollEvent {
	/// The server answered
	Response(String),

	/// The request timed out. Polling goes on.
	TimedOut,

	/// The request failed
	Failed(TransportError),
}

/// Periodically asks the server for the status of one upload.
///
/// At most one status request is in flight at a time.
/// Polling stops when [`Poller::stop`] is called or the poller is dropped.
pub struct Poller {
	cancel: CancellationToken,
	events: mpsc::Receiver<PollEvent>,
	now: mpsc::Sender<()>,
	task: JoinHandle<()>,
}

impl Poller {
	/// Start polling. The first request is sent after `interval`.
	pub fn start<T: UploadTransport>(
		transport: Arc<T>,
		servlet: Url,
		field: UploadId,
		interval: Duration,
		request_timeout: Duration,
	) -> Self {
		let cancel = CancellationToken::new();
		let (events_send, events) = mpsc::channel(1);
		let (now, now_recv) = mpsc::channel(1);

		let task = tokio::spawn(
			PollLoop {
				transport,
				servlet,
				field,
				interval,
				request_timeout,
			}
			.run(cancel.clone(), events_send, now_recv),
		);

		return Self {
			cancel,
			events,
			now,
			task,
		};
	}

	/// Send a status request as soon as possible,
	/// without waiting for the next tick.
	pub fn poll_now(&self) {
		// If the channel is full, a request is already pending
		let _ = self.now.try_send(());
	}

	/// Wait for the next status.
	/// Returns `None` once polling has stopped.
	pub async fn next(&mut self) -> Option<PollEvent> {
		self.events.recv().await
	}

	pub fn stop(&mut self) {
		self.cancel.cancel();
		self.events.close();
	}

	pub fn is_stopped(&self) -> bool {
		self.cancel.is_cancelled() || self.task.is_finished()
	}
}

impl Drop for Poller {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

struct PollLoop<T: UploadTransport> {
	transport: Arc<T>,
	servlet: Url,
	field: UploadId,
	interval: Duration,
	request_timeout: Duration,
}

impl<T: UploadTransport> PollLoop<T> {
	async fn run(
		self,
		cancel: CancellationToken,
		events: mpsc::Sender<PollEvent>,
		mut now: mpsc::Receiver<()>,
	) {
		let Self {
			transport,
			servlet,
			field,
			interval,
			request_timeout,
		} = self;

		let mut counter: u64 = 0;
		let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = ticker.tick() => {}
				Some(()) = now.recv() => {}
			}

			let c = counter.to_string();
			let url = compose_url(&servlet, &[(Param::Filename, field.as_str()), (Param::Counter, &c)]);
			trace!(message = "Polling status", upload_id = %field, counter);
			counter += 1;

			let event = tokio::select! {
				_ = cancel.cancelled() => break,
				res = tokio::time::timeout(request_timeout, transport.get(url, request_timeout)) => {
					match res {
						Ok(Ok(text)) => PollEvent::Response(text),
						Ok(Err(e)) if e.is_timeout() => PollEvent::TimedOut,
						Ok(Err(e)) => PollEvent::Failed(e),
						Err(_) => PollEvent::TimedOut,
					}
				}
			};

			if events.send(event).await.is_err() {
				break;
			}
		}

		trace!(message = "Poller stopped", upload_id = %field);
	}
}
