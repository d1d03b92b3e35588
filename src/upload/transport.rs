//! Network side of the upload client.
//!
//! [`UploadClient`](super::UploadClient) only needs "send this request, tell me
//! the status or why it failed"; [`Transport`] is that seam, with
//! [`HttpTransport`] as the reqwest implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

/// The request never produced a response: refused, timed out, DNS, TLS...
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest's Display hides the root cause (e.g. "connection refused")
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }
        Self(message)
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    /// Liveness probe, no body
    Probe { url: Arc<Url> },
    /// Frame delivery
    Deliver {
        url: Arc<Url>,
        body: Bytes,
        content_type: &'static str,
    },
}

impl Request {
    pub fn url(&self) -> &Arc<Url> {
        match self {
            Request::Probe { url } | Request::Deliver { url, .. } => url,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Request::Probe { .. } => "GET",
            Request::Deliver { .. } => "POST",
        }
    }
}

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<StatusCode, TransportError>> + Send + 'a>>;

/// Performs a single request and reports the response status
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: Request) -> SendFuture<'_>;
}

/// HTTP client implementation of [`Transport`] using `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder =
            Client::builder().user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> SendFuture<'_> {
        let client = self.client.clone();

        Box::pin(async move {
            let builder = match request {
                Request::Probe { url } => client.get(url.as_str()),
                Request::Deliver {
                    url,
                    body,
                    content_type,
                } => client
                    .post(url.as_str())
                    .header(CONTENT_TYPE, content_type)
                    .body(body),
            };

            // Only the status matters; dropping the response closes it
            let response = builder.send().await?;
            Ok(response.status())
        })
    }
}
