use rand::{distributions::Alphanumeric, Rng};
use smartstring::{LazyCompact, SmartString};
use std::{
	collections::BTreeMap,
	fmt::Display,
	io::ErrorKind,
	path::PathBuf,
	sync::{Arc, Weak},
	time::Duration,
};
use tokio::{
	sync::Mutex,
	task::JoinHandle,
	time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::listener::UploadListener;

//
// MARK: Ids
//

const SESSION_ID_LENGTH: usize = 24;
const MAX_SESSION_ID_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId {
	id: SmartString<LazyCompact>,
}

impl SessionId {
	#[inline(always)]
	pub fn new() -> Self {
		Self { id: random_id(SESSION_ID_LENGTH) }
	}

	/// Accept a session id sent by a client.
	/// Session ids name directories, so only short alphanumeric ids are valid.
	pub fn parse(id: &str) -> Option<Self> {
		if id.is_empty()
			|| id.len() > MAX_SESSION_ID_LENGTH
			|| !id.chars().all(|c| c.is_ascii_alphanumeric())
		{
			return None;
		}

		return Some(Self { id: id.into() });
	}

	pub fn as_str(&self) -> &str {
		&self.id
	}
}

impl Display for SessionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.id)
	}
}

pub fn random_id(length: usize) -> SmartString<LazyCompact> {
	rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(length)
		.map(char::from)
		.collect()
}

//
// MARK: Store
//

/// A file we received
#[derive(Debug, Clone)]
pub struct StoredFile {
	/// The form field that carried this file
	pub field: String,

	/// The file name the client sent
	pub name: String,

	pub content_type: String,
	pub size: u64,

	/// Where this file is on disk
	pub path: PathBuf,
}

impl StoredFile {
	/// Files are found by field name, or by file name ignoring case
	pub fn matches(&self, name: &str) -> bool {
		self.field == name || self.name.eq_ignore_ascii_case(name)
	}
}

struct SessionState {
	listener: Option<Arc<UploadListener>>,
	files: Vec<StoredFile>,

	/// The last time a request used this session
	last_seen: Instant,
}

impl SessionState {
	fn new() -> Self {
		Self {
			listener: None,
			files: Vec::new(),
			last_seen: Instant::now(),
		}
	}

	fn is_receiving(&self) -> bool {
		self.listener
			.as_ref()
			.map(|l| l.is_receiving())
			.unwrap_or(false)
	}
}

/// Get this session's state, creating it if needed
fn entry<'a>(
	sessions: &'a mut BTreeMap<SessionId, SessionState>,
	session: &SessionId,
) -> &'a mut SessionState {
	let state = sessions
		.entry(session.clone())
		.or_insert_with(SessionState::new);
	state.last_seen = Instant::now();
	return state;
}

/// Get this session's state if it exists
fn existing<'a>(
	sessions: &'a mut BTreeMap<SessionId, SessionState>,
	session: &SessionId,
) -> Option<&'a mut SessionState> {
	let state = sessions.get_mut(session)?;
	state.last_seen = Instant::now();
	return Some(state);
}

/// Everything we know about every session
pub struct UploadStore {
	tmp_dir: PathBuf,
	sessions: Mutex<BTreeMap<SessionId, SessionState>>,
}

impl UploadStore {
	pub fn new(tmp_dir: PathBuf) -> Self {
		Self {
			tmp_dir,
			sessions: Mutex::new(BTreeMap::new()),
		}
	}

	/// The directory this session's files are stored in
	pub fn session_dir(&self, session: &SessionId) -> PathBuf {
		self.tmp_dir.join(session.as_str())
	}

	pub async fn listener(&self, session: &SessionId) -> Option<Arc<UploadListener>> {
		let mut sessions = self.sessions.lock().await;
		existing(&mut sessions, session).and_then(|s| s.listener.clone())
	}

	/// Make `listener` this session's listener, unless the
	/// current one is still receiving. That one is returned as the error.
	///
	/// Listeners that are done, canceled or frozen are replaced.
	pub async fn begin_upload(
		&self,
		session: &SessionId,
		listener: Arc<UploadListener>,
	) -> Result<(), Arc<UploadListener>> {
		let mut sessions = self.sessions.lock().await;
		let state = entry(&mut sessions, session);

		if let Some(old) = &state.listener {
			if old.is_receiving() {
				return Err(old.clone());
			}

			debug!(
				message = "Replacing stale listener",
				session = %session,
				percent = old.percent(),
				canceled = old.is_canceled(),
				finished = old.is_finished()
			);
		}

		state.listener = Some(listener);
		return Ok(());
	}

	pub async fn remove_listener(&self, session: &SessionId) -> Option<Arc<UploadListener>> {
		let mut sessions = self.sessions.lock().await;
		let listener = existing(&mut sessions, session).and_then(|s| s.listener.take());

		if let Some(listener) = &listener {
			debug!(
				message = "Removed listener",
				session = %session,
				bytes_read = listener.bytes_read(),
				canceled = listener.is_canceled(),
				finished = listener.is_finished()
			);
		}

		return listener;
	}

	pub async fn add_files(&self, session: &SessionId, files: Vec<StoredFile>) {
		let mut sessions = self.sessions.lock().await;
		let state = entry(&mut sessions, session);

		for f in &files {
			debug!(
				message = "Stored file",
				session = %session,
				field = f.field.as_str(),
				name = f.name.as_str(),
				size = f.size
			);
		}

		state.files.extend(files);
	}

	pub async fn has_files(&self, session: &SessionId) -> bool {
		let mut sessions = self.sessions.lock().await;
		existing(&mut sessions, session)
			.map(|s| !s.files.is_empty())
			.unwrap_or(false)
	}

	/// True if a file was received through `field`
	pub async fn has_field(&self, session: &SessionId, field: &str) -> bool {
		let mut sessions = self.sessions.lock().await;
		existing(&mut sessions, session)
			.map(|s| s.files.iter().any(|f| f.field == field))
			.unwrap_or(false)
	}

	/// Find the latest file matching `name`
	pub async fn find_file(&self, session: &SessionId, name: &str) -> Option<StoredFile> {
		let mut sessions = self.sessions.lock().await;
		existing(&mut sessions, session)
			.and_then(|s| s.files.iter().rev().find(|f| f.matches(name)).cloned())
	}

	/// Forget every file matching `name` and delete it from disk.
	/// Returns false if there was no such file.
	pub async fn remove_file(&self, session: &SessionId, name: &str) -> std::io::Result<bool> {
		let removed: Vec<StoredFile> = {
			let mut sessions = self.sessions.lock().await;
			match existing(&mut sessions, session) {
				None => Vec::new(),
				Some(state) => {
					let (removed, kept) = std::mem::take(&mut state.files)
						.into_iter()
						.partition(|f| f.matches(name));
					state.files = kept;
					removed
				}
			}
		};

		for f in &removed {
			match tokio::fs::remove_file(&f.path).await {
				Ok(()) => {}
				Err(e) if e.kind() == ErrorKind::NotFound => {}
				Err(e) => return Err(e),
			}

			info!(
				message = "Removed file",
				session = %session,
				field = f.field.as_str(),
				name = f.name.as_str()
			);
		}

		return Ok(!removed.is_empty());
	}

	/// Forget every session that was not used for `max_idle`
	/// and delete its files. Sessions that are receiving a file are kept.
	/// Returns the number of sessions we forgot.
	pub async fn expire_idle(&self, max_idle: Duration) -> usize {
		// Hold the lock until the files are gone,
		// a new request for this session must start from scratch.
		let mut sessions = self.sessions.lock().await;
		let now = Instant::now();

		let expired: Vec<SessionId> = sessions
			.iter()
			.filter(|(_, s)| {
				now.saturating_duration_since(s.last_seen) >= max_idle && !s.is_receiving()
			})
			.map(|(id, _)| id.clone())
			.collect();

		for id in &expired {
			let state = sessions.remove(id);
			let files = state.map(|s| s.files.len()).unwrap_or(0);

			match tokio::fs::remove_dir_all(self.session_dir(id)).await {
				Ok(()) => {}
				Err(e) if e.kind() == ErrorKind::NotFound => {}
				Err(error) => {
					warn!(
						message = "Could not delete files of expired session",
						session = %id,
						%error
					);
				}
			}

			info!(message = "Expired idle session", session = %id, files);
		}

		return expired.len();
	}
}

//
// MARK: Sweeper
//

/// Expire idle sessions of `store` every `interval`.
///
/// The sweeper stops by itself once the store is dropped.
pub fn spawn_session_sweeper(
	store: &Arc<UploadStore>,
	interval: Duration,
	max_idle: Duration,
) -> JoinHandle<()> {
	let store = Arc::downgrade(store);
	tokio::spawn(sweeper(store, interval, max_idle))
}

async fn sweeper(store: Weak<UploadStore>, interval: Duration, max_idle: Duration) {
	let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		ticker.tick().await;

		let store = match store.upgrade() {
			Some(x) => x,
			None => {
				debug!(message = "Store is gone, stopping session sweeper");
				return;
			}
		};

		let expired = store.expire_idle(max_idle).await;
		if expired != 0 {
			debug!(message = "Swept idle sessions", expired);
		}
	}
}
