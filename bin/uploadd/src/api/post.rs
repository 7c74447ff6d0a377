use axum::{
	body::Bytes,
	extract::{
		multipart::{Field, MultipartError},
		Multipart, Query, State,
	},
	http::{header, HeaderMap, StatusCode},
	response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use std::{path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use upld_wire::{Param, ResponseBuilder, Tag};

use super::{param, render, render_raw, session, Params, ResponseType, RouterState};
use crate::{
	listener::{spawn_watchdog, ListenerError, UploadListener},
	store::{random_id, StoredFile},
};

#[derive(Debug, Error)]
enum ReceiveError {
	#[error(transparent)]
	Listener(#[from] ListenerError),

	#[error("could not read request: {0}")]
	Multipart(#[from] MultipartError),

	#[error("could not write file: {0}")]
	Io(#[from] std::io::Error),
}

/// Receive a multipart form.
///
/// Every file in the form is stored under this request's session,
/// and the response is the summary of everything we received.
pub(super) async fn servlet_post(
	jar: CookieJar,
	State(state): State<RouterState>,
	Query(params): Query<Params>,
	headers: HeaderMap,
	multipart: Multipart,
) -> (CookieJar, Response) {
	let (jar, session) = session(jar);
	let kind = ResponseType::from_params(&params, ResponseType::Html);
	let mut res = ResponseBuilder::new();

	let delay = param(&params, Param::Delay)
		.and_then(|x| x.parse::<u64>().ok())
		.map(Duration::from_millis)
		.unwrap_or(state.config.slow_uploads());

	let content_length = headers
		.get(header::CONTENT_LENGTH)
		.and_then(|x| x.to_str().ok())
		.and_then(|x| x.parse::<u64>().ok())
		.unwrap_or(0);

	let listener = Arc::new(UploadListener::new(
		session.clone(),
		content_length,
		state.config.no_data_timeout(),
	));

	// One upload per session at a time, unless the last one is stuck
	if let Err(old) = state.store.begin_upload(&session, listener.clone()).await {
		warn!(
			message = "Rejected upload, session is busy",
			session = %session,
			percent = old.percent()
		);
		res.tag(
			Tag::Error,
			"The server is already receiving a file for this session, wait until it finishes",
		);
		return (jar, render(kind, &res, true));
	}

	spawn_watchdog(
		&listener,
		state.config.watchdog_interval(),
		state.config.no_data_timeout(),
	);

	let limit = u64::try_from(state.config.uploadd_request_body_limit).unwrap_or(u64::MAX);
	if content_length > limit {
		let error = ListenerError::SizeLimit {
			allowed_kb: limit / 1024,
			actual_kb: content_length / 1024,
		};
		listener.cancel(error.clone());
		res.tag(Tag::Error, &error);
		return (jar, render(kind, &res, true));
	}

	let dir = state.store.session_dir(&session);
	let result = match tokio::fs::create_dir_all(&dir).await {
		Ok(()) => receive(&state, &listener, multipart, &dir, content_length, delay).await,
		Err(error) => Err(error.into()),
	};

	match result {
		Ok(files) if files.is_empty() => {
			let error = ListenerError::Failed("No data received".into());
			listener.cancel(error.clone());
			res.tag(Tag::Error, &error);
		}

		Ok(files) => {
			res.group(Tag::Files, |g| {
				for f in &files {
					g.group(Tag::File, |x| {
						x.tag(Tag::ContentType, &f.content_type)
							.tag(Tag::Size, f.size)
							.tag(Tag::Name, &f.name)
							.tag(Tag::Field, &f.field);
					});
				}
			})
			.tag(Tag::Finished, "ok");

			info!(
				message = "Received upload",
				session = %session,
				files = files.len(),
				bytes = listener.bytes_read()
			);

			state.store.add_files(&session, files).await;
			let body = res.finish(true);
			listener.finish(body.clone());
			return (jar, render_raw(kind, body));
		}

		Err(ReceiveError::Listener(ListenerError::Canceled)) => {
			res.tag(Tag::Canceled, true);
		}

		Err(ReceiveError::Listener(error)) => {
			res.tag(Tag::Error, &error);
		}

		Err(ReceiveError::Multipart(error)) => {
			warn!(message = "Could not read upload", session = %session, %error);
			let error = ListenerError::Failed(error.body_text());
			listener.cancel(error.clone());
			res.tag(Tag::Error, &error);
		}

		Err(ReceiveError::Io(error)) => {
			error!(message = "Could not store upload", session = %session, %error);
			listener.cancel(ListenerError::Failed(error.to_string()));
			return (jar, StatusCode::INTERNAL_SERVER_ERROR.into_response());
		}
	}

	return (jar, render(kind, &res, true));
}

/// Store every file in `multipart`.
/// If we fail, files written so far are deleted.
async fn receive(
	state: &RouterState,
	listener: &UploadListener,
	mut multipart: Multipart,
	dir: &Path,
	content_length: u64,
	delay: Duration,
) -> Result<Vec<StoredFile>, ReceiveError> {
	let mut files = Vec::new();
	let result = receive_into(
		state,
		listener,
		&mut multipart,
		&mut files,
		dir,
		content_length,
		delay,
	)
	.await;

	if result.is_err() {
		for f in &files {
			if let Err(error) = tokio::fs::remove_file(&f.path).await {
				warn!(
					message = "Could not clean up partial file",
					path = %f.path.display(),
					%error
				);
			}
		}
	}

	return result.map(|()| files);
}

async fn receive_into(
	state: &RouterState,
	listener: &UploadListener,
	multipart: &mut Multipart,
	files: &mut Vec<StoredFile>,
	dir: &Path,
	content_length: u64,
	delay: Duration,
) -> Result<(), ReceiveError> {
	let max_file_size = u64::try_from(state.config.uploadd_max_file_size).unwrap_or(u64::MAX);
	let mut done: u64 = 0;

	loop {
		let next = tokio::select! {
			_ = listener.cancelled() => {
				return Err(listener.error().unwrap_or(ListenerError::Canceled).into());
			}
			x = multipart.next_field() => x?,
		};

		let mut field = match next {
			Some(x) => x,
			None => break,
		};

		let field_name = field.name().unwrap_or_default().to_owned();
		let file_name = match field.file_name() {
			Some(x) if !x.is_empty() => basename(x).to_owned(),

			// Plain form fields only count towards progress
			_ => {
				while let Some(chunk) = next_chunk(listener, &mut field).await? {
					done += chunk.len() as u64;
					listener.update(done, content_length.max(done))?;
				}
				continue;
			}
		};

		let content_type = field
			.content_type()
			.unwrap_or("application/octet-stream")
			.to_owned();

		let path = dir.join(random_id(16).as_str());
		let mut file = tokio::fs::File::create(&path).await?;
		debug!(
			message = "Receiving file",
			field = field_name.as_str(),
			name = file_name.as_str(),
			path = %path.display()
		);

		files.push(StoredFile {
			field: field_name,
			name: file_name,
			content_type,
			size: 0,
			path,
		});

		let mut size: u64 = 0;
		while let Some(chunk) = next_chunk(listener, &mut field).await? {
			size += chunk.len() as u64;
			if size > max_file_size {
				let error = ListenerError::SizeLimit {
					allowed_kb: max_file_size / 1024,
					actual_kb: size / 1024,
				};
				listener.cancel(error.clone());
				return Err(error.into());
			}

			file.write_all(&chunk).await?;
			done += chunk.len() as u64;
			listener.update(done, content_length.max(done))?;

			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
		}

		file.flush().await?;
		if let Some(f) = files.last_mut() {
			f.size = size;
		}
	}

	// Multipart framing is not counted above
	let total = content_length.max(done);
	listener.update(total, total)?;

	return Ok(());
}

async fn next_chunk(
	listener: &UploadListener,
	field: &mut Field<'_>,
) -> Result<Option<Bytes>, ReceiveError> {
	tokio::select! {
		_ = listener.cancelled() => {
			Err(listener.error().unwrap_or(ListenerError::Canceled).into())
		}
		chunk = field.chunk() => Ok(chunk?),
	}
}

/// Some clients send a full path
fn basename(name: &str) -> &str {
	name.rsplit(['/', '\\']).next().unwrap_or(name)
}
