//! Scripted collaborators for tests

use async_trait::async_trait;
use reqwest::StatusCode;
use std::{
	collections::VecDeque,
	sync::{Arc, Mutex},
	time::Duration,
};
use tokio::time::Instant;
use url::Url;

use crate::{CancelHandle, Status, StatusPresenter, SubmitForm, TransportError, UploadTransport};

//
// MARK: Transport
//

#[derive(Debug, Clone)]
pub(crate) enum Reply {
	Body(String),
	/// Answer with this http status
	Fail(u16),
	/// Never answer
	Hang,
	/// Answer with a transport timeout
	TimeOut,
}

impl Reply {
	pub(crate) fn xml(body: &str) -> Self {
		Self::Body(format!(
			"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<response>{body}</response>\n"
		))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RequestKind {
	NewSession,
	Blobstore,
	Status,
	Cancel,
	Remove,
	Submit,
	Other,
}

#[derive(Debug, Clone)]
pub(crate) struct Request {
	pub at: Instant,
	pub kind: RequestKind,
	pub url: Url,
	/// Form field for submissions, `filename` for status polls
	pub field: Option<String>,
	/// Extra form fields of a submission
	pub form_fields: Vec<(String, String)>,
}

pub(crate) struct Script {
	pub session: Reply,
	pub target: Reply,
	/// Replies to status polls, in order. The last one repeats.
	pub status: VecDeque<Reply>,
	pub submit_delay: Duration,
	pub submit: Reply,
	pub cancel: Reply,
	pub remove: Reply,
}

pub(crate) struct ScriptedTransport {
	pub script: Mutex<Script>,
	pub log: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
	pub(crate) fn new() -> Self {
		Self {
			script: Mutex::new(Script {
				session: Reply::xml("<blobstore>false</blobstore><sessionid>s1</sessionid>"),
				target: Reply::Fail(404),
				status: VecDeque::from([Reply::xml("<wait>listener is null</wait>")]),
				submit_delay: Duration::ZERO,
				submit: Reply::xml("<finished>OK</finished>"),
				cancel: Reply::xml("<canceled>true</canceled>"),
				remove: Reply::xml("<deleted>true</deleted>"),
			}),
			log: Mutex::new(Vec::new()),
		}
	}

	pub(crate) fn edit(&self, f: impl FnOnce(&mut Script)) {
		f(&mut self.script.lock().unwrap());
	}

	pub(crate) fn requests(&self, kind: RequestKind) -> Vec<Request> {
		self.log
			.lock()
			.unwrap()
			.iter()
			.filter(|r| r.kind == kind)
			.cloned()
			.collect()
	}

	fn record(
		&self,
		kind: RequestKind,
		url: &Url,
		field: Option<String>,
		form_fields: Vec<(String, String)>,
	) {
		self.log.lock().unwrap().push(Request {
			at: Instant::now(),
			kind,
			url: url.clone(),
			field,
			form_fields,
		});
	}

	async fn answer(reply: Reply) -> Result<String, TransportError> {
		match reply {
			Reply::Body(text) => Ok(text),
			Reply::Fail(code) => Err(TransportError::GenericHttp {
				code: StatusCode::from_u16(code).unwrap(),
				message: Some(format!("<h1>Error {code}</h1>")),
			}),
			Reply::Hang => std::future::pending().await,
			Reply::TimeOut => Err(TransportError::Timeout),
		}
	}
}

fn query(url: &Url, key: &str) -> Option<String> {
	url.query_pairs()
		.find(|(k, _)| k == key)
		.map(|(_, v)| v.into_owned())
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
	async fn get(&self, url: Url, _timeout: Duration) -> Result<String, TransportError> {
		let (kind, field) = if query(&url, "new_session").is_some() {
			(RequestKind::NewSession, None)
		} else if query(&url, "blobstore").is_some() {
			(RequestKind::Blobstore, None)
		} else if query(&url, "cancel").is_some() {
			(RequestKind::Cancel, None)
		} else if let Some(field) = query(&url, "remove") {
			(RequestKind::Remove, Some(field))
		} else if let Some(field) = query(&url, "filename") {
			(RequestKind::Status, Some(field))
		} else {
			(RequestKind::Other, None)
		};

		self.record(kind.clone(), &url, field, Vec::new());

		let reply = {
			let mut script = self.script.lock().unwrap();
			match kind {
				RequestKind::NewSession => script.session.clone(),
				RequestKind::Blobstore => script.target.clone(),
				RequestKind::Cancel => script.cancel.clone(),
				RequestKind::Remove => script.remove.clone(),
				RequestKind::Status => {
					if script.status.len() > 1 {
						script.status.pop_front().unwrap()
					} else {
						script.status.front().cloned().unwrap()
					}
				}
				_ => Reply::Fail(400),
			}
		};

		return Self::answer(reply).await;
	}

	async fn submit(&self, url: Url, form: SubmitForm) -> Result<String, TransportError> {
		self.record(
			RequestKind::Submit,
			&url,
			Some(form.field_name.clone()),
			form.fields.clone(),
		);

		let (delay, reply) = {
			let script = self.script.lock().unwrap();
			(script.submit_delay, script.submit.clone())
		};

		tokio::time::sleep(delay).await;
		return Self::answer(reply).await;
	}
}

//
// MARK: Presenter
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Shown {
	Status(Status),
	Progress(u64, u64),
	Error(String),
	FileName(String),
}

/// Records everything it is asked to show.
/// New instances share the same record.
#[derive(Clone, Default)]
pub(crate) struct RecordingPresenter {
	pub shown: Arc<Mutex<Vec<Shown>>>,
	pub cancel: Arc<Mutex<Option<CancelHandle>>>,
}

impl RecordingPresenter {
	pub(crate) fn statuses(&self) -> Vec<Status> {
		self.shown
			.lock()
			.unwrap()
			.iter()
			.filter_map(|x| match x {
				Shown::Status(s) => Some(*s),
				_ => None,
			})
			.collect()
	}

	pub(crate) fn errors(&self) -> Vec<String> {
		self.shown
			.lock()
			.unwrap()
			.iter()
			.filter_map(|x| match x {
				Shown::Error(e) => Some(e.clone()),
				_ => None,
			})
			.collect()
	}

	pub(crate) fn has(&self, item: &Shown) -> bool {
		self.shown.lock().unwrap().contains(item)
	}
}

impl StatusPresenter for RecordingPresenter {
	fn set_status(&mut self, status: Status) {
		self.shown.lock().unwrap().push(Shown::Status(status));
	}

	fn set_progress(&mut self, done_kib: u64, total_kib: u64) {
		self.shown
			.lock()
			.unwrap()
			.push(Shown::Progress(done_kib, total_kib));
	}

	fn set_error(&mut self, message: &str) {
		self.shown
			.lock()
			.unwrap()
			.push(Shown::Error(message.to_owned()));
	}

	fn set_file_name(&mut self, name: &str) {
		self.shown
			.lock()
			.unwrap()
			.push(Shown::FileName(name.to_owned()));
	}

	fn new_instance(&self) -> Self {
		Self {
			shown: self.shown.clone(),
			cancel: Arc::new(Mutex::new(None)),
		}
	}

	fn set_cancel_handle(&mut self, handle: CancelHandle) {
		*self.cancel.lock().unwrap() = Some(handle);
	}
}

/// Panics if `statuses` contains a transition the state machine does not allow.
/// The path implicitly starts at `UNINITIALIZED`.
pub(crate) fn assert_valid_path(statuses: &[Status]) {
	use Status::*;

	let mut prev = Uninitialized;
	for next in statuses.iter().copied() {
		let ok = match (prev, next) {
			(Uninitialized, Changed | Repeated | Invalid | Uninitialized) => true,
			(Changed, Changed | Queued | Invalid | Repeated | Canceled) => true,
			(Queued, Submitting | Canceled | Error) => true,
			(Submitting, InProgress | Canceled | Error) => true,
			(InProgress, Success | Error | Canceling | Canceled) => true,
			(Canceling, Canceled) => true,
			(Success | Error | Canceled | Repeated | Invalid, Deleted) => true,
			// Reuse starts over
			(s, Uninitialized) if s.is_terminal() => true,
			(s, Changed | Repeated | Invalid) if s.is_terminal() => true,
			_ => false,
		};

		if !ok {
			let path: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
			panic!("invalid transition {prev} -> {next} in {}", path.join(" -> "));
		}
		prev = next;
	}
}
