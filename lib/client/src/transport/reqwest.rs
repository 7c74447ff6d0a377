use async_trait::async_trait;
use reqwest::{
	multipart::{Form, Part},
	Body, Client, Response,
};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::trace;
use url::Url;

use super::{SubmitForm, TransportError, UploadTransport};
use crate::FileSource;

/// An [`UploadTransport`] backed by `reqwest`.
///
/// Keeps cookies, so the server sees every request
/// of this transport in the same session.
pub struct ReqwestTransport {
	client: Client,
}

impl ReqwestTransport {
	pub fn new() -> Result<Self, reqwest::Error> {
		Ok(Self {
			client: Client::builder().cookie_store(true).build()?,
		})
	}
}

fn convert_error(e: reqwest::Error) -> TransportError {
	if e.is_timeout() {
		TransportError::Timeout
	} else if let Some(status) = e.status() {
		TransportError::GenericHttp {
			code: status,
			message: Some(e.to_string()),
		}
	} else {
		TransportError::Other { error: Box::new(e) }
	}
}

async fn read_body(res: Response) -> Result<String, TransportError> {
	let status = res.status();
	let text = res.text().await.map_err(convert_error)?;

	if !status.is_success() {
		return Err(TransportError::GenericHttp {
			code: status,
			message: Some(text),
		});
	}

	return Ok(text);
}

#[async_trait]
impl UploadTransport for ReqwestTransport {
	async fn get(&self, url: Url, timeout: Duration) -> Result<String, TransportError> {
		trace!(message = "GET", url = url.as_str());

		let res = self
			.client
			.get(url)
			.timeout(timeout)
			.send()
			.await
			.map_err(convert_error)?;

		return read_body(res).await;
	}

	async fn submit(&self, url: Url, form: SubmitForm) -> Result<String, TransportError> {
		trace!(
			message = "POST",
			url = url.as_str(),
			field = form.field_name.as_str(),
			file = form.file_name.as_str()
		);

		let part = match form.source {
			FileSource::Path(path) => {
				let file = tokio::fs::File::open(&path).await?;
				let len = file.metadata().await?.len();
				Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
			}

			FileSource::Bytes(data) => {
				let len = u64::try_from(data.len()).unwrap_or(u64::MAX);
				Part::stream_with_length(Body::from(data), len)
			}
		}
		.file_name(form.file_name);

		let mut multipart = Form::new();
		for (k, v) in form.fields {
			multipart = multipart.text(k, v);
		}
		multipart = multipart.part(form.field_name, part);

		let res = self
			.client
			.post(url)
			.multipart(multipart)
			.send()
			.await
			.map_err(convert_error)?;

		return read_body(res).await;
	}
}
