use axum::{
	body::Body,
	extract::{Query, State},
	http::{header, StatusCode},
	response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};
use upld_wire::{Param, ResponseBuilder, Tag};

use super::{param, render, render_raw, session, Params, ResponseType, RouterState};
use crate::{
	listener::{ListenerError, UploadListener},
	store::SessionId,
};

/// Answer a GET to the servlet.
/// If a request carries more than one known parameter,
/// the first one in this order wins.
pub(super) async fn servlet_get(
	jar: CookieJar,
	State(state): State<RouterState>,
	Query(params): Query<Params>,
) -> (CookieJar, Response) {
	let (jar, session) = session(jar);
	let kind = ResponseType::from_params(&params, ResponseType::Xml);
	let has = |p: Param| params.contains_key(p.as_str());
	let target = state.config.uploadd_upload_target.as_ref();

	let listener = state.store.listener(&session).await;
	let mut res = ResponseBuilder::new();

	if has(Param::NewSession) {
		debug!(
			message = "New session",
			session = %session,
			blobstore = target.is_some()
		);
		res.tag(Tag::Blobstore, target.is_some())
			.tag(Tag::SessionId, &session);
	} else if let (true, Some(target)) = (has(Param::Blobstore), target) {
		debug!(message = "Sent upload target", session = %session, target = target.as_str());
		res.tag(Tag::BlobPath, target);
	} else if let Some(name) = param(&params, Param::Show) {
		return (jar, show(&state, &session, name).await);
	} else if has(Param::Cancel) {
		match &listener {
			Some(listener) => listener.cancel(ListenerError::Canceled),
			None => debug!(message = "Nothing to cancel", session = %session),
		}
		res.tag(Tag::Canceled, true);
	} else if let Some(name) = param(&params, Param::Remove) {
		match state.store.remove_file(&session, name).await {
			Ok(true) => {
				res.tag(Tag::Deleted, true);
			}
			Ok(false) => {
				res.tag(Tag::Error, format!("File not found: {name}"));
			}
			Err(error) => {
				error!(message = "Could not delete file", session = %session, name, %error);
				return (jar, StatusCode::INTERNAL_SERVER_ERROR.into_response());
			}
		}
	} else if has(Param::Clean) {
		state.store.remove_listener(&session).await;
		res.tag(Tag::Finished, "ok");
	} else if let Some(listener) = listener.as_ref().filter(|l| l.is_finished()) {
		// Hand out the summary once
		state.store.remove_listener(&session).await;
		return (
			jar,
			render_raw(kind, listener.post_response().unwrap_or_default()),
		);
	} else {
		status(
			&state,
			&session,
			listener,
			param(&params, Param::Filename),
			&mut res,
		)
		.await;
	}

	return (jar, render(kind, &res, false));
}

/// Report the progress of this session's upload
async fn status(
	state: &RouterState,
	session: &SessionId,
	listener: Option<Arc<UploadListener>>,
	field: Option<&str>,
	res: &mut ResponseBuilder,
) {
	let mut finished = false;

	if let Some(listener) = listener {
		match listener.error() {
			Some(ListenerError::Canceled) => {
				res.tag(Tag::Canceled, true)
					.tag(Tag::Finished, Tag::Canceled);
				finished = true;
			}

			Some(error) => {
				warn!(
					message = "Upload finished with error",
					session = %session,
					field,
					%error
				);
				res.tag(Tag::Error, &error).tag(Tag::Finished, Tag::Error);
				finished = true;
			}

			None => {
				let snapshot = listener.snapshot();
				res.tag(Tag::Percent, snapshot.percent())
					.tag(Tag::CurrentBytes, snapshot.bytes_read)
					.tag(Tag::TotalBytes, snapshot.content_length);
			}
		}
	} else if state.store.has_files(session).await {
		let known = match field {
			None => true,
			Some(field) => state.store.has_field(session, field).await,
		};

		if known {
			res.tag(Tag::Finished, "ok");
			finished = true;
		} else {
			res.tag(Tag::Wait, "listener is null");
		}
	} else {
		res.tag(Tag::Wait, "listener is null");
	}

	if finished {
		state.store.remove_listener(session).await;
	}
}

/// Stream a stored file back to the client
async fn show(state: &RouterState, session: &SessionId, name: &str) -> Response {
	let file = match state.store.find_file(session, name).await {
		Some(x) => x,
		None => {
			let body = ResponseBuilder::new()
				.tag(Tag::Error, format!("File not found: {name}"))
				.finish(false);
			return (
				StatusCode::NOT_FOUND,
				[(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
				body,
			)
				.into_response();
		}
	};

	let handle = match tokio::fs::File::open(&file.path).await {
		Ok(x) => x,
		Err(error) => {
			error!(
				message = "Could not open stored file",
				session = %session,
				path = %file.path.display(),
				%error
			);
			return StatusCode::INTERNAL_SERVER_ERROR.into_response();
		}
	};

	let safe_name: String = file
		.name
		.chars()
		.map(|c| {
			if c.is_ascii_graphic() && c != '"' {
				c
			} else {
				'_'
			}
		})
		.collect();

	return (
		StatusCode::OK,
		[
			(header::CONTENT_TYPE, file.content_type),
			(
				header::CONTENT_DISPOSITION,
				format!("inline; filename=\"{safe_name}\""),
			),
		],
		Body::from_stream(ReaderStream::new(handle)),
	)
		.into_response();
}
