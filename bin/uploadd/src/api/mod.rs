use axum::{
	extract::DefaultBodyLimit,
	http::{header, StatusCode},
	response::{IntoResponse, Response},
	routing::{get, post},
	Router,
};
use axum_extra::extract::{cookie::Cookie, CookieJar};
use std::{collections::BTreeMap, sync::Arc};
use tower_http::trace::TraceLayer;
use upld_wire::{Param, ResponseBuilder};

use crate::{
	config::UploaddConfig,
	store::{SessionId, UploadStore},
};

mod get;
mod post;

use get::*;
use post::*;

/// Session ids are kept in this cookie
pub const SESSION_COOKIE: &str = "UPLDSESSIONID";

#[derive(Clone)]
pub struct RouterState {
	pub config: Arc<UploaddConfig>,
	pub store: Arc<UploadStore>,
}

pub(super) fn router(state: RouterState) -> Router {
	let mut router = Router::new().route(
		&state.config.uploadd_servlet_path,
		get(servlet_get).post(servlet_post),
	);

	if let Some(target) = &state.config.uploadd_upload_target {
		router = router.route(target, post(servlet_post));
	}

	router
		.layer(TraceLayer::new_for_http())
		.layer(DefaultBodyLimit::max(state.config.uploadd_request_body_limit))
		.with_state(state)
}

/// Query parameters, by name
pub(super) type Params = BTreeMap<String, String>;

pub(super) fn param(params: &Params, p: Param) -> Option<&str> {
	params.get(p.as_str()).map(|x| x.as_str())
}

/// Find this request's session, starting a new one if it has none
pub(super) fn session(jar: CookieJar) -> (CookieJar, SessionId) {
	if let Some(id) = jar.get(SESSION_COOKIE).and_then(|c| SessionId::parse(c.value())) {
		return (jar, id);
	}

	let id = SessionId::new();
	let cookie = Cookie::build((SESSION_COOKIE, id.to_string()))
		.path("/")
		.http_only(true);

	return (jar.add(cookie), id);
}

//
// MARK: Rendering
//

/// The content type of a protocol response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ResponseType {
	Xml,
	Html,
	Text,
}

impl ResponseType {
	/// Use the `ctype` parameter if it is given and valid
	pub(super) fn from_params(params: &Params, default: Self) -> Self {
		match param(params, Param::ContentType) {
			Some("xml") => Self::Xml,
			Some("html") => Self::Html,
			Some("text") => Self::Text,
			_ => default,
		}
	}

	fn mime(&self) -> &'static str {
		match self {
			Self::Xml => "text/xml; charset=utf-8",
			Self::Html => "text/html; charset=utf-8",
			Self::Text => "text/plain; charset=utf-8",
		}
	}
}

/// Send an already-rendered protocol document
pub(super) fn render_raw(kind: ResponseType, body: String) -> Response {
	return (
		StatusCode::OK,
		[(header::CONTENT_TYPE, kind.mime())],
		body,
	)
		.into_response();
}

pub(super) fn render(kind: ResponseType, body: &ResponseBuilder, escaped: bool) -> Response {
	render_raw(kind, body.finish(escaped))
}
