use std::{
	collections::{HashSet, VecDeque},
	sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::trace;

use crate::UploadId;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	// The guarded collections are always left consistent,
	// a panic elsewhere does not invalidate them.
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//
// MARK: UploadQueue
//

/// FIFO of pending uploads, shared by every uploader of a context.
/// Only the head of the queue may submit.
#[derive(Debug, Default)]
pub struct UploadQueue {
	ids: Mutex<VecDeque<UploadId>>,
}

impl UploadQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append `id` to the queue.
	/// Does nothing if it is already queued, returns false in that case.
	pub fn enqueue(&self, id: &UploadId) -> bool {
		let mut ids = lock(&self.ids);
		if ids.contains(id) {
			return false;
		}

		ids.push_back(id.clone());
		trace!(message = "Enqueued upload", upload_id = %id, queue_len = ids.len());
		return true;
	}

	/// Remove `id` from the queue, wherever it is.
	/// Returns false if it wasn't queued.
	pub fn dequeue(&self, id: &UploadId) -> bool {
		let mut ids = lock(&self.ids);
		let before = ids.len();
		ids.retain(|x| x != id);
		let removed = ids.len() != before;
		if removed {
			trace!(message = "Dequeued upload", upload_id = %id, queue_len = ids.len());
		}
		return removed;
	}

	pub fn is_head(&self, id: &UploadId) -> bool {
		lock(&self.ids).front() == Some(id)
	}

	pub fn peek_head(&self) -> Option<UploadId> {
		lock(&self.ids).front().cloned()
	}

	pub fn contains(&self, id: &UploadId) -> bool {
		lock(&self.ids).contains(id)
	}

	pub fn len(&self) -> usize {
		lock(&self.ids).len()
	}

	pub fn is_empty(&self) -> bool {
		lock(&self.ids).is_empty()
	}

	pub fn clear(&self) {
		lock(&self.ids).clear();
	}
}

//
// MARK: CompletedFileRegistry
//

/// Base names of files that were uploaded successfully
#[derive(Debug, Default)]
pub struct CompletedFileRegistry {
	names: Mutex<HashSet<String>>,
}

impl CompletedFileRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, name: &str) -> bool {
		lock(&self.names).insert(name.to_owned())
	}

	pub fn remove(&self, name: &str) -> bool {
		lock(&self.names).remove(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		lock(&self.names).contains(name)
	}

	pub fn len(&self) -> usize {
		lock(&self.names).len()
	}

	pub fn is_empty(&self) -> bool {
		lock(&self.names).is_empty()
	}

	pub fn clear(&self) {
		lock(&self.names).clear();
	}
}
