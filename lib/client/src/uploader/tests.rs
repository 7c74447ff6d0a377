use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};
use tokio::time::Instant;
use upld_wire::{encode, Tag};
use url::Url;

use super::*;
use crate::{
	testing::{assert_valid_path, Reply, RecordingPresenter, RequestKind, ScriptedTransport, Shown},
	MemoryInput, UploadId,
};

type TestUploader = Uploader<ScriptedTransport, MemoryInput, RecordingPresenter>;

fn servlet() -> Url {
	Url::parse("http://localhost:3030/upload").unwrap()
}

struct Harness {
	transport: Arc<ScriptedTransport>,
	context: UploadContext<ScriptedTransport>,
	config: Arc<UploaderConfig>,
}

impl Harness {
	fn new(edit: impl FnOnce(&mut UploaderConfig)) -> Self {
		let mut config = UploaderConfig::new(servlet());
		edit(&mut config);

		let transport = Arc::new(ScriptedTransport::new());
		Self {
			context: UploadContext::from_arc(transport.clone()),
			transport,
			config: Arc::new(config),
		}
	}

	/// An uploader with `file` selected in its input
	fn uploader(&self, file: &str) -> (TestUploader, RecordingPresenter) {
		let presenter = RecordingPresenter::default();
		let mut u = Uploader::new(
			self.config.clone(),
			self.context.clone(),
			MemoryInput::new(),
			presenter.clone(),
		);

		if !file.is_empty() {
			u.input_mut().select(file, "hello");
		}

		return (u, presenter);
	}
}

fn summary(field: &str, name: &str, size: &str) -> Reply {
	Reply::Body(encode(
		&[
			(Tag::Field, Some(field)),
			(Tag::Name, Some(name)),
			(Tag::Size, Some(size)),
			(Tag::Finished, Some("ok")),
		],
		true,
	))
}

//
// MARK: Selection
//

#[tokio::test]
async fn selection_strips_fake_path() {
	let h = Harness::new(|_| {});
	let (mut u, presenter) = h.uploader("C:\\fakepath\\photo.jpg");

	assert_eq!(u.select(), Status::Changed);
	assert_eq!(u.session().file_name(), Some("photo.jpg"));
	assert!(presenter.has(&Shown::FileName("photo.jpg".into())));
	assert_eq!(u.input().name(), u.session().id().as_str());
}

#[tokio::test]
async fn repeated_file_is_rejected() {
	let h = Harness::new(|c| c.avoid_repeat = true);
	h.context.registry.add("photo.jpg");
	let (mut u, presenter) = h.uploader("photo.jpg");

	assert_eq!(u.select(), Status::Repeated);
	assert_eq!(presenter.statuses(), vec![Status::Repeated]);
	assert!(presenter.errors()[0].contains("already uploaded"));
	assert!(h.context.queue.is_empty());
	assert!(h.transport.log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn repeats_are_allowed_by_default() {
	let h = Harness::new(|_| {});
	h.context.registry.add("photo.jpg");
	let (mut u, _) = h.uploader("photo.jpg");
	assert_eq!(u.select(), Status::Changed);
}

#[tokio::test]
async fn invalid_extension_then_valid() {
	let h = Harness::new(|c| c.valid_extensions = vec!["jpg".into(), ".png".into()]);
	let (mut u, presenter) = h.uploader("notes.txt");

	assert_eq!(u.select(), Status::Invalid);
	assert!(presenter.errors()[0].contains(".jpg,.png"));

	let first_id = u.session().id().clone();
	u.input_mut().select("photo.JPG", "hello");
	assert_eq!(u.select(), Status::Changed);
	assert_ne!(u.session().id(), &first_id);

	assert_eq!(
		presenter.statuses(),
		vec![Status::Changed, Status::Invalid, Status::Changed]
	);
	assert_valid_path(&presenter.statuses());
}

#[tokio::test]
async fn empty_selection() {
	let h = Harness::new(|_| {});
	let (mut u, presenter) = h.uploader("");
	assert_eq!(u.select(), Status::Invalid);
	assert_eq!(presenter.errors(), vec!["No file selected".to_owned()]);

	let h = Harness::new(|c| c.avoid_empty = false);
	let (mut u, presenter) = h.uploader("");
	assert_eq!(u.select(), Status::Uninitialized);
	assert!(presenter.statuses().is_empty());
}

#[tokio::test]
async fn cancel_before_submit() {
	let h = Harness::new(|_| {});
	let (mut u, presenter) = h.uploader("a.txt");

	let canceled = Arc::new(AtomicUsize::new(0));
	let c = canceled.clone();
	u.handlers().on_cancel.add(move |_| {
		c.fetch_add(1, Ordering::SeqCst);
	});

	u.select();
	assert_eq!(u.cancel(), Status::Canceled);
	assert!(u.session().is_cancelled());
	assert_eq!(canceled.load(Ordering::SeqCst), 1);
	assert_eq!(presenter.statuses(), vec![Status::Changed, Status::Canceled]);

	// Nothing left to cancel
	assert_eq!(u.cancel(), Status::Canceled);
	assert_eq!(u.submit().await, Status::Canceled);
	assert!(h.transport.log.lock().unwrap().is_empty());
}

//
// MARK: Upload
//

#[tokio::test(start_paused = true)]
async fn successful_upload_reports_progress() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.status = [Reply::xml(
			"<percent>40</percent><currentBytes>4096</currentBytes><totalBytes>10240</totalBytes>",
		)]
		.into();
		s.submit_delay = Duration::from_millis(1200);
		s.submit = summary("UPLD-x", "photo.jpg", "10240");
	});

	let (mut u, presenter) = h.uploader("C:\\fakepath\\photo.jpg");
	assert_eq!(u.select(), Status::Changed);
	assert_eq!(u.submit().await, Status::Success);

	assert_eq!(
		presenter.statuses(),
		vec![
			Status::Changed,
			Status::Queued,
			Status::Submitting,
			Status::InProgress,
			Status::Success
		]
	);
	assert!(presenter.has(&Shown::Progress(0, 0)));
	assert!(presenter.has(&Shown::Progress(4, 10)));
	assert!(presenter.has(&Shown::Progress(10, 10)));

	let info = u.session().server_info().unwrap();
	assert_eq!(info.field.as_deref(), Some("UPLD-x"));
	assert_eq!(info.name.as_deref(), Some("photo.jpg"));
	assert_eq!(info.size, Some(10240));
	assert_eq!(
		info.file_url.as_ref().unwrap().as_str(),
		"http://localhost:3030/upload?show=UPLD-x"
	);

	assert!(u.session().is_successful());
	assert_eq!(u.session().percent(), 100);
	assert!(u.input().is_enabled());
	assert!(h.context.queue.is_empty());

	let submits = h.transport.requests(RequestKind::Submit);
	assert_eq!(submits.len(), 1);
	assert_eq!(submits[0].url, servlet());
	assert_eq!(submits[0].field.as_deref(), Some(u.session().id().as_str()));

	// The session is negotiated once
	assert_eq!(h.transport.requests(RequestKind::NewSession).len(), 1);
	assert_valid_path(&presenter.statuses());
}

#[tokio::test(start_paused = true)]
async fn auto_submit_waits_for_settle_delay() {
	let h = Harness::new(|c| c.auto_submit = true);
	let (mut u, _) = h.uploader("a.txt");

	let start = Instant::now();
	u.select();
	assert_eq!(u.run().await, Status::Success);

	let submits = h.transport.requests(RequestKind::Submit);
	assert!(submits[0].at - start >= Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn run_without_auto_submit_is_immediate() {
	let h = Harness::new(|_| {});
	let (mut u, _) = h.uploader("a.txt");

	let start = Instant::now();
	u.select();
	assert_eq!(u.run().await, Status::Success);
	assert!(Instant::now() - start < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn uploads_are_sent_one_at_a_time() {
	let h = Harness::new(|_| {});
	h.transport
		.edit(|s| s.submit_delay = Duration::from_secs(2));

	let (mut a, _) = h.uploader("a.txt");
	let (mut b, pb) = h.uploader("b.txt");
	a.select();
	b.select();

	let a_done = Arc::new(Mutex::new(None));
	let d = a_done.clone();
	a.handlers().on_finish.add(move |_| {
		*d.lock().unwrap() = Some(Instant::now());
	});

	let (sa, sb) = tokio::join!(a.submit(), b.submit());
	assert_eq!(sa, Status::Success);
	assert_eq!(sb, Status::Success);

	let submits = h.transport.requests(RequestKind::Submit);
	assert_eq!(submits.len(), 2);
	assert_eq!(submits[0].field.as_deref(), Some(a.session().id().as_str()));
	assert_eq!(submits[1].field.as_deref(), Some(b.session().id().as_str()));

	let a_done = a_done.lock().unwrap().unwrap();
	assert!(submits[1].at >= a_done);

	assert_eq!(
		pb.statuses(),
		vec![
			Status::Changed,
			Status::Queued,
			Status::Submitting,
			Status::InProgress,
			Status::Success
		]
	);
	assert!(h.context.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_server_fails_while_queued() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| s.session = Reply::Fail(503));

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Error);

	assert_eq!(
		presenter.statuses(),
		vec![Status::Changed, Status::Queued, Status::Error]
	);
	let error = &presenter.errors()[0];
	assert!(error.contains("http://localhost:3030/upload"), "{error}");
	assert_eq!(u.session().message(), Some(error.as_str()));

	assert!(h.transport.requests(RequestKind::Submit).is_empty());
	assert!(h.context.queue.is_empty());
	assert!(u.input().is_enabled());
}

#[tokio::test(start_paused = true)]
async fn stalled_upload_fails_and_cancels() {
	let h = Harness::new(|c| c.stall_timeout = Duration::from_secs(3));
	h.transport.edit(|s| {
		s.status = [Reply::xml(
			"<percent>40</percent><currentBytes>4096</currentBytes><totalBytes>10240</totalBytes>",
		)]
		.into();
		s.submit = Reply::Hang;
	});

	let (mut u, presenter) = h.uploader("a.txt");
	let start = Instant::now();
	u.select();
	assert_eq!(u.submit().await, Status::Error);

	// Progress was last seen at the first poll
	let elapsed = Instant::now() - start;
	assert!(elapsed > Duration::from_millis(3500));
	assert!(elapsed <= Duration::from_millis(4500));
	assert!(presenter.errors()[0].contains("no progress for 3 seconds"));

	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(h.transport.requests(RequestKind::Cancel).len(), 1);
	assert_valid_path(&presenter.statuses());
}

#[tokio::test(start_paused = true)]
async fn cancel_in_flight() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| s.submit = Reply::Hang);

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();

	// Cancel like a user would, through the presenter
	let handle = presenter.cancel.lock().unwrap().clone().unwrap();
	let canceller = async {
		tokio::time::sleep(Duration::from_secs(1)).await;
		handle.cancel();
	};

	let (status, ()) = tokio::join!(u.submit(), canceller);
	assert_eq!(status, Status::Canceled);
	assert!(u.session().is_cancelled());

	let statuses = presenter.statuses();
	assert_eq!(
		&statuses[statuses.len() - 3..],
		&[Status::InProgress, Status::Canceling, Status::Canceled]
	);
	assert_eq!(h.transport.requests(RequestKind::Cancel).len(), 1);
	assert!(h.context.queue.is_empty());
	assert_valid_path(&statuses);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_queued() {
	let h = Harness::new(|_| {});
	let other = UploadId::from("someone-else");
	h.context.queue.enqueue(&other);

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();

	let handle = u.cancel_handle();
	let canceller = async {
		tokio::time::sleep(Duration::from_secs(3)).await;
		handle.cancel();
	};

	let (status, ()) = tokio::join!(u.submit(), canceller);
	assert_eq!(status, Status::Canceled);
	assert_eq!(
		presenter.statuses(),
		vec![Status::Changed, Status::Queued, Status::Canceled]
	);

	assert!(h.transport.log.lock().unwrap().is_empty());
	assert_eq!(h.context.queue.len(), 1);
	assert!(h.context.queue.is_head(&other));
}

//
// MARK: Responses
//

#[tokio::test(start_paused = true)]
async fn server_error_is_shown() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.status = [Reply::xml("<error>disk full</error><finished>error</finished>")].into();
		s.submit = Reply::Hang;
	});

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Error);
	assert_eq!(presenter.errors(), vec!["disk full".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn server_side_cancel() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.status = [Reply::xml("<canceled>true</canceled><finished>canceled</finished>")].into();
		s.submit = Reply::Hang;
	});

	let (mut u, _) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Canceled);
	assert!(u.session().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn failed_status_request_is_an_error() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.status = [Reply::Fail(500)].into();
		s.submit = Reply::Hang;
	});

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Error);
	assert!(presenter.errors()[0].contains("http://localhost:3030/upload"));
}

#[tokio::test(start_paused = true)]
async fn bare_error_status_is_fatal() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.status = [Reply::Body(" ERROR\n".into())].into();
		s.submit = Reply::Hang;
	});

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Error);
	assert!(presenter.errors()[0].starts_with("Invalid server response"));
}

#[tokio::test(start_paused = true)]
async fn garbled_status_mentioning_error_is_retried() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.status = [
			Reply::Body("Gateway error, try again later".into()),
			Reply::Body("Internal Server Error: boom".into()),
			Reply::xml("<finished>ok</finished>"),
		]
		.into();
		s.submit = Reply::Hang;
	});

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Success);
	assert!(presenter.errors().is_empty());
	assert_eq!(h.transport.requests(RequestKind::Status).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn timed_out_polls_are_not_fatal() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.status = [Reply::TimeOut, Reply::TimeOut, Reply::xml("<finished>ok</finished>")].into();
		s.submit = Reply::Hang;
	});

	let (mut u, _) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Success);
	assert_eq!(h.transport.requests(RequestKind::Status).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn unreadable_form_response_polls_now() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.submit_delay = Duration::from_millis(100);
		s.submit = Reply::Body("garbage".into());
		s.status = [Reply::xml("<finished>ok</finished><field>UPLD-z</field>")].into();
	});

	let (mut u, _) = h.uploader("a.txt");
	let start = Instant::now();
	u.select();
	assert_eq!(u.submit().await, Status::Success);

	assert!(Instant::now() - start < Duration::from_millis(500));
	assert_eq!(u.session().raw_response(), Some("garbage"));
	assert_eq!(
		u.session().server_info().unwrap().field.as_deref(),
		Some("UPLD-z")
	);
}

#[tokio::test(start_paused = true)]
async fn empty_form_response_is_ignored() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.submit = Reply::Body("  ".into());
		s.status = [
			Reply::xml("<percent>50</percent><currentBytes>5</currentBytes><totalBytes>10</totalBytes>"),
			Reply::xml("<finished>ok</finished><field>UPLD-z</field><size>10</size>"),
		]
		.into();
	});

	let (mut u, _) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Success);
	assert_eq!(u.session().raw_response(), None);

	let info = u.session().server_info().unwrap();
	assert_eq!(info.field.as_deref(), Some("UPLD-z"));
	assert_eq!(info.size, Some(10));
}

#[tokio::test(start_paused = true)]
async fn wait_after_form_response_is_success() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.submit = Reply::xml("<field>UPLD-q</field><message>stored</message>");
	});

	let (mut u, _) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Success);

	let info = u.session().server_info().unwrap();
	assert_eq!(info.field.as_deref(), Some("UPLD-q"));
	assert_eq!(info.message.as_deref(), Some("stored"));
}

#[tokio::test(start_paused = true)]
async fn progress_as_form_response_through_blobstore() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| {
		s.session = Reply::xml("<blobstore>true</blobstore><sessionid>s1</sessionid>");
		s.target = Reply::xml(
			"<blobpath>/store/up?token=1</blobpath><blobname>file</blobname>\
			<blobparam name=\"acl\">private</blobparam><blobparam name=\"key\">k1</blobparam>",
		);
		s.submit = Reply::Body(encode(&[(Tag::Percent, Some("100"))], true));
	});

	let (mut u, presenter) = h.uploader("photo.jpg");
	u.select();
	assert_eq!(u.submit().await, Status::Error);
	assert!(presenter.errors()[0].contains(BILLING_HINT));

	let targets = h.transport.requests(RequestKind::Blobstore);
	assert_eq!(targets.len(), 1);
	assert!(targets[0].url.as_str().ends_with("blobstore=true&name=photo.jpg"));

	let submits = h.transport.requests(RequestKind::Submit);
	assert_eq!(
		submits[0].url.as_str(),
		"http://localhost:3030/store/up?token=1"
	);
	assert_eq!(submits[0].field.as_deref(), Some("file"));
	assert_eq!(
		submits[0].form_fields,
		vec![
			("acl".to_owned(), "private".to_owned()),
			("key".to_owned(), "k1".to_owned())
		]
	);
}

#[tokio::test(start_paused = true)]
async fn progress_as_form_response() {
	let h = Harness::new(|_| {});
	h.transport
		.edit(|s| s.submit = Reply::xml("<percent>100</percent>"));

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Error);
	assert!(presenter.errors()[0].contains(PARSING_HINT));
}

#[tokio::test(start_paused = true)]
async fn rejected_form_is_an_error() {
	let h = Harness::new(|_| {});
	h.transport.edit(|s| s.submit = Reply::Fail(413));

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Error);
	assert!(presenter.errors()[0].contains("413"));
}

//
// MARK: After upload
//

#[tokio::test(start_paused = true)]
async fn delete_removes_from_server() {
	let h = Harness::new(|c| c.avoid_repeat = true);
	h.transport
		.edit(|s| s.submit = summary("UPLD-x", "a.txt", "5"));

	let (mut u, presenter) = h.uploader("a.txt");
	u.select();
	assert_eq!(u.submit().await, Status::Success);
	assert!(h.context.registry.contains("a.txt"));

	assert_eq!(u.delete().await, Status::Deleted);
	let removes = h.transport.requests(RequestKind::Remove);
	assert_eq!(removes.len(), 1);
	assert_eq!(removes[0].field.as_deref(), Some("UPLD-x"));
	assert!(!h.context.registry.contains("a.txt"));

	assert_eq!(presenter.statuses().last(), Some(&Status::Deleted));
	assert_valid_path(&presenter.statuses());

	// Only once
	assert_eq!(u.delete().await, Status::Deleted);
	assert_eq!(h.transport.requests(RequestKind::Remove).len(), 1);
}

#[tokio::test]
async fn delete_failed_upload_is_local() {
	let h = Harness::new(|c| c.valid_extensions = vec!["jpg".into()]);
	let (mut u, _) = h.uploader("a.txt");

	assert_eq!(u.delete().await, Status::Uninitialized);
	assert_eq!(u.select(), Status::Invalid);
	assert_eq!(u.delete().await, Status::Deleted);
	assert!(h.transport.requests(RequestKind::Remove).is_empty());
}

#[tokio::test(start_paused = true)]
async fn reuse_on_finish_starts_over() {
	let h = Harness::new(|c| c.reuse_on_finish = true);
	let (mut u, presenter) = h.uploader("a.txt");

	u.select();
	let first_id = u.session().id().clone();
	assert_eq!(u.submit().await, Status::Success);

	assert_eq!(u.status(), Status::Uninitialized);
	assert_ne!(u.session().id(), &first_id);
	assert_eq!(u.input().name(), u.session().id().as_str());
	assert!(u.input().filename().is_none());

	assert_eq!(u.history().len(), 1);
	assert_eq!(u.history()[0].id(), &first_id);
	assert_eq!(u.history()[0].status(), Status::Success);
	assert_valid_path(&presenter.statuses());
}

#[tokio::test(start_paused = true)]
async fn handlers_see_every_event() {
	let h = Harness::new(|_| {});
	let (mut u, _) = h.uploader("a.txt");

	let counts = Arc::new(Mutex::new(Vec::new()));
	for (name, list) in [
		("change", &u.handlers().on_change),
		("start", &u.handlers().on_start),
		("status", &u.handlers().on_status_changed),
		("finish", &u.handlers().on_finish),
	] {
		let c = counts.clone();
		list.add(move |_| c.lock().unwrap().push(name));
	}

	u.select();
	u.submit().await;

	let counts = counts.lock().unwrap();
	let count = |name: &str| counts.iter().filter(|x| **x == name).count();
	assert_eq!(count("change"), 1);
	assert_eq!(count("start"), 1);
	assert_eq!(count("status"), 5);
	assert_eq!(count("finish"), 1);
}

#[test]
fn context_reset() {
	let context = UploadContext::new(ScriptedTransport::new());
	context.queue.enqueue(&UploadId::from("a"));
	context.registry.add("a.txt");

	let other = context.clone();
	other.reset();
	assert!(context.queue.is_empty());
	assert!(context.registry.is_empty());
}
