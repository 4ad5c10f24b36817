use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_TYPE;

use crate::envelope::LocalRequest;

#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
	#[error("failed to post to {url}: {source}")]
	Request { url: String, source: reqwest::Error },

	#[error("{url} responded with {status}")]
	Status { url: String, status: StatusCode },
}

/// HTTP client for the application this sidecar fronts.
#[derive(Clone, Debug)]
pub struct LocalApp {
	base_url: String,
	client: reqwest::Client,
}

impl LocalApp {
	pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
		let mut builder = reqwest::Client::builder();
		if let Some(timeout) = timeout {
			builder = builder.timeout(timeout);
		}
		Ok(Self {
			base_url: base_url.into().trim_end_matches('/').to_string(),
			client: builder.build()?,
		})
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	/// POSTs the request to the application and returns the response body.
	pub async fn forward(&self, request: &LocalRequest) -> Result<String, ForwardError> {
		let url = format!("{}{}", self.base_url, request.path);

		let mut builder = self.client.post(&url).body(request.payload.clone());
		if let Some(content_type) = &request.content_type {
			builder = builder.header(CONTENT_TYPE, content_type);
		}
		if let Some(accept) = &request.accept {
			builder = builder.header(ACCEPT, accept);
		}

		let response = builder.send().await.map_err(|source| ForwardError::Request {
			url: url.clone(),
			source,
		})?;

		let status = response.status();
		if !status.is_success() {
			return Err(ForwardError::Status { url, status });
		}

		response
			.text()
			.await
			.map_err(|source| ForwardError::Request { url, source })
	}
}
