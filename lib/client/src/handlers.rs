use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc, Mutex, PoisonError, Weak,
};

use crate::UploadSession;

type Handler = Arc<dyn Fn(&UploadSession) + Send + Sync>;
type HandlerSlots = Mutex<Vec<(u64, Handler)>>;

/// A list of observers for one kind of event
#[derive(Default)]
pub struct HandlerList {
	handlers: Arc<HandlerSlots>,
	next_id: AtomicU64,
}

impl HandlerList {
	pub fn add(&self, handler: impl Fn(&UploadSession) + Send + Sync + 'static) -> HandlerRegistration {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.handlers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push((id, Arc::new(handler)));

		return HandlerRegistration {
			handlers: Arc::downgrade(&self.handlers),
			id,
		};
	}

	/// Call every handler, in registration order
	pub fn fire(&self, session: &UploadSession) {
		// Handlers may register or remove handlers,
		// so don't hold the lock while calling them.
		let handlers: Vec<Handler> = self
			.handlers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.iter()
			.map(|(_, h)| h.clone())
			.collect();

		for h in handlers {
			h(session);
		}
	}

	pub fn len(&self) -> usize {
		self.handlers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Returned when a handler is added.
/// Dropping this does NOT remove the handler, call [`HandlerRegistration::remove`].
#[derive(Debug)]
pub struct HandlerRegistration {
	handlers: Weak<HandlerSlots>,
	id: u64,
}

impl HandlerRegistration {
	pub fn remove(self) {
		if let Some(handlers) = self.handlers.upgrade() {
			handlers
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.retain(|(id, _)| *id != self.id);
		}
	}
}

/// Every event an uploader reports
#[derive(Default)]
pub struct UploaderHandlers {
	/// A file was selected and accepted
	pub on_change: HandlerList,

	/// The upload was queued
	pub on_start: HandlerList,

	/// Any status transition
	pub on_status_changed: HandlerList,

	/// Cancellation was requested
	pub on_cancel: HandlerList,

	/// A terminal state was reached
	pub on_finish: HandlerList,
}
