//! Detection strategies: how to probe for a waking deployment and how to read the answer.
//!
//! Strategies are chosen once from configuration and never switched while a loop runs.

use std::str::FromStr;
use std::time::Duration;

use log::debug;
use reqwest::header::HeaderName;
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::polling::{PollState, ProbeResult};
use crate::redirect::{RedirectTiming, READY_GRACE_DELAY};
use crate::target::DeploymentTarget;
use crate::transport::{ProbeMethod, ProbeRequest, ProbeResponse};

/// Query parameter the status API expects the deployment URL under.
pub const STATUS_QUERY_PARAM: &str = "deploymentUrl";
pub const STATUS_API_PATH: &str = "/api/status";

pub trait DetectionStrategy {
    fn request(&self, target: &DeploymentTarget) -> ProbeRequest;

    /// Interprets a response that already passed the transient-status check.
    fn classify(&self, response: &ProbeResponse) -> ProbeResult;

    fn redirect_timing(&self) -> RedirectTiming {
        RedirectTiming::Immediate
    }

    fn name(&self) -> &'static str;
}

fn status_request(endpoint: &Url, target: &DeploymentTarget) -> ProbeRequest {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair(STATUS_QUERY_PARAM, target.as_str());

    ProbeRequest {
        method: ProbeMethod::Get,
        url,
        read_body: true,
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BinaryStatus {
    deployment_ready: bool,
    redirect_url: String,
    is_error: bool,
    error_message: String,
}

/// Status API answering `{ deploymentReady, redirectUrl, isError, errorMessage }`.
#[derive(Clone, Debug)]
pub struct StatusJsonBinary {
    endpoint: Url,
}

impl StatusJsonBinary {
    pub fn new(endpoint: Url) -> Self {
        Self { endpoint }
    }
}

impl DetectionStrategy for StatusJsonBinary {
    fn request(&self, target: &DeploymentTarget) -> ProbeRequest {
        status_request(&self.endpoint, target)
    }

    fn classify(&self, response: &ProbeResponse) -> ProbeResult {
        let status: BinaryStatus = match serde_json::from_slice(&response.body) {
            Ok(status) => status,
            Err(err) => return ProbeResult::malformed(response.status, err),
        };

        if status.is_error {
            ProbeResult::Error {
                message: status.error_message,
            }
        } else if status.deployment_ready {
            ProbeResult::Ready {
                redirect_url: non_empty(status.redirect_url),
            }
        } else {
            ProbeResult::Pending
        }
    }

    fn name(&self) -> &'static str {
        "status"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TristateStatus {
    deployment_status: PollState,
    #[serde(default)]
    redirect_url: String,
    #[serde(default)]
    error_message: String,
}

/// Status API answering `{ deploymentStatus: "Pending" | "Ready" | "Error", ... }`.
///
/// Holds the redirect back for a grace period so the ready notice can be seen.
#[derive(Clone, Debug)]
pub struct StatusJsonTristate {
    endpoint: Url,
    grace: Duration,
}

impl StatusJsonTristate {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            grace: READY_GRACE_DELAY,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl DetectionStrategy for StatusJsonTristate {
    fn request(&self, target: &DeploymentTarget) -> ProbeRequest {
        status_request(&self.endpoint, target)
    }

    fn classify(&self, response: &ProbeResponse) -> ProbeResult {
        let status: TristateStatus = match serde_json::from_slice(&response.body) {
            Ok(status) => status,
            Err(err) => return ProbeResult::malformed(response.status, err),
        };

        match status.deployment_status {
            PollState::Pending => ProbeResult::Pending,
            PollState::Ready => ProbeResult::Ready {
                redirect_url: non_empty(status.redirect_url),
            },
            PollState::Error => ProbeResult::Error {
                message: status.error_message,
            },
        }
    }

    fn redirect_timing(&self) -> RedirectTiming {
        RedirectTiming::Delayed(self.grace)
    }

    fn name(&self) -> &'static str {
        "status-tristate"
    }
}

/// Header the URL-trigger placeholder stamps on every response.
pub const URL_TRIGGER_HEADER: &str = "oneko-url-trigger";
/// Header the catnip placeholder stamps on every response.
pub const CATNIP_HEADER: &str = "oneko-catnip";

/// Probes the deployment URL itself. While the placeholder is still being
/// served the sentinel header is present; once it disappears the real
/// deployment answered.
#[derive(Clone, Debug)]
pub struct SelfProbeHeader {
    sentinel: HeaderName,
    method: ProbeMethod,
}

impl SelfProbeHeader {
    /// Fails on names that are not valid HTTP header names, since those could
    /// never be seen on a response and every probe would read as ready.
    pub fn new(sentinel: &str, method: ProbeMethod) -> Result<Self, ConfigError> {
        let sentinel = HeaderName::from_bytes(sentinel.as_bytes()).map_err(|source| {
            ConfigError::InvalidHeaderName {
                name: sentinel.to_owned(),
                source,
            }
        })?;

        Ok(Self { sentinel, method })
    }

    pub fn url_trigger() -> Self {
        Self {
            sentinel: HeaderName::from_static(URL_TRIGGER_HEADER),
            method: ProbeMethod::Head,
        }
    }

    /// The catnip deployment monitor checks for its header with HEAD as well.
    pub fn catnip() -> Self {
        Self {
            sentinel: HeaderName::from_static(CATNIP_HEADER),
            method: ProbeMethod::Head,
        }
    }

    pub fn sentinel(&self) -> &str {
        self.sentinel.as_str()
    }

    pub fn method(&self) -> ProbeMethod {
        self.method
    }
}

impl DetectionStrategy for SelfProbeHeader {
    fn request(&self, target: &DeploymentTarget) -> ProbeRequest {
        ProbeRequest {
            method: self.method,
            url: target.url().clone(),
            read_body: false,
        }
    }

    fn classify(&self, response: &ProbeResponse) -> ProbeResult {
        if response.headers.contains_key(&self.sentinel) {
            debug!("still serving placeholder ({} present)", self.sentinel);
            ProbeResult::Pending
        } else {
            ProbeResult::Ready { redirect_url: None }
        }
    }

    fn name(&self) -> &'static str {
        "self-probe"
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    Status,
    StatusTristate,
    SelfProbe,
}

impl StrategyKind {
    pub const NAMES: [&'static str; 3] = ["status", "status-tristate", "self-probe"];

    pub fn uses_status_api(self) -> bool {
        !matches!(self, StrategyKind::SelfProbe)
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(StrategyKind::Status),
            "status-tristate" => Ok(StrategyKind::StatusTristate),
            "self-probe" => Ok(StrategyKind::SelfProbe),
            other => Err(ConfigError::UnknownStrategy(other.to_owned())),
        }
    }
}

/// The configured strategy, one of the three probe shapes.
#[derive(Clone, Debug)]
pub enum Strategy {
    Status(StatusJsonBinary),
    StatusTristate(StatusJsonTristate),
    SelfProbe(SelfProbeHeader),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Status(_) => StrategyKind::Status,
            Strategy::StatusTristate(_) => StrategyKind::StatusTristate,
            Strategy::SelfProbe(_) => StrategyKind::SelfProbe,
        }
    }

    fn inner(&self) -> &dyn DetectionStrategy {
        match self {
            Strategy::Status(s) => s,
            Strategy::StatusTristate(s) => s,
            Strategy::SelfProbe(s) => s,
        }
    }
}

impl DetectionStrategy for Strategy {
    fn request(&self, target: &DeploymentTarget) -> ProbeRequest {
        self.inner().request(target)
    }

    fn classify(&self, response: &ProbeResponse) -> ProbeResult {
        self.inner().classify(response)
    }

    fn redirect_timing(&self) -> RedirectTiming {
        self.inner().redirect_timing()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}
