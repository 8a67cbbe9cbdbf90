use std::fmt;
use std::future::Future;

use bytes::Bytes;
use log::trace;
use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

use crate::error::TransportError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeMethod {
    Get,
    Head,
}

impl ProbeMethod {
    fn as_reqwest(self) -> Method {
        match self {
            ProbeMethod::Get => Method::GET,
            ProbeMethod::Head => Method::HEAD,
        }
    }
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMethod::Get => f.write_str("GET"),
            ProbeMethod::Head => f.write_str("HEAD"),
        }
    }
}

/// One outbound probe, built by a detection strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRequest {
    pub method: ProbeMethod,
    pub url: Url,
    /// Header-only probes skip downloading the page.
    pub read_body: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProbeResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub(crate) fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        use reqwest::header::{HeaderName, HeaderValue};

        self.headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        let body = value.to_string();
        self.with_body(body)
    }
}

/// Sends a probe and hands back whatever the server answered.
///
/// Any HTTP status counts as a response; only failures to get one at all are errors.
pub trait Transport {
    fn send(
        &self,
        request: &ProbeRequest,
    ) -> impl Future<Output = Result<ProbeResponse, TransportError>>;
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("catnip-wakeup/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, TransportError> {
        trace!("{} {}", request.method, request.url);

        let response = self
            .client
            .request(request.method.as_reqwest(), request.url.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = if request.read_body {
            response.bytes().await?
        } else {
            Bytes::new()
        };

        Ok(ProbeResponse {
            status,
            headers,
            body,
        })
    }
}
