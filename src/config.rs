use std::time::Duration;

use clap::{Arg, ArgMatches, Command};
use url::Url;

use crate::error::ConfigError;
use crate::polling::{RetryPolicy, RETRY_INTERVAL};
use crate::redirect::{CommandNavigator, StdoutNavigator, SystemNavigator, READY_GRACE_DELAY};
use crate::strategy::{
    SelfProbeHeader, StatusJsonBinary, StatusJsonTristate, Strategy, StrategyKind,
    STATUS_API_PATH, URL_TRIGGER_HEADER,
};
use crate::target::DeploymentTarget;
use crate::transport::ProbeMethod;

pub fn command() -> Command {
    Command::new("catnip-wakeup")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Wait for a sleeping deployment to wake up, then redirect to it")
        .arg(
            Arg::new("page-url")
                .long("page-url")
                .env("CATNIP_PAGE_URL")
                .help("URL of the waiting page; its redirectTo parameter names the deployment"),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .env("CATNIP_TARGET")
                .help("deployment URL to wait for (overrides redirectTo)"),
        )
        .arg(
            Arg::new("strategy")
                .short('s')
                .long("strategy")
                .env("CATNIP_STRATEGY")
                .value_parser(StrategyKind::NAMES)
                .default_value("status")
                .help("how readiness is detected"),
        )
        .arg(
            Arg::new("status-api")
                .long("status-api")
                .env("CATNIP_STATUS_API")
                .help("status endpoint; defaults to /api/status on the page's origin"),
        )
        .arg(
            Arg::new("sentinel-header")
                .long("sentinel-header")
                .env("CATNIP_SENTINEL_HEADER")
                .default_value(URL_TRIGGER_HEADER)
                .help("header present only while the placeholder is served (self-probe)"),
        )
        .arg(
            Arg::new("method")
                .long("method")
                .env("CATNIP_METHOD")
                .value_parser(["head", "get"])
                .default_value("head")
                .help("HTTP method for self-probes"),
        )
        .arg(
            Arg::new("interval-ms")
                .long("interval-ms")
                .env("CATNIP_INTERVAL_MS")
                .value_parser(clap::value_parser!(u64))
                .help("pause between probes [default: 1000]"),
        )
        .arg(
            Arg::new("grace-ms")
                .long("grace-ms")
                .env("CATNIP_GRACE_MS")
                .value_parser(clap::value_parser!(u64))
                .help("delay before redirecting once ready (status-tristate) [default: 6000]"),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .env("CATNIP_MAX_ATTEMPTS")
                .value_parser(clap::value_parser!(u32).range(1..))
                .help("give up after this many probes (default: never)"),
        )
        .arg(
            Arg::new("open-with")
                .long("open-with")
                .env("CATNIP_OPEN_WITH")
                .help("program to open the deployment with, e.g. xdg-open (default: print it)"),
        )
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        value: value.to_owned(),
        source,
    })
}

fn parse_method(value: &str) -> Result<ProbeMethod, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "head" => Ok(ProbeMethod::Head),
        "get" => Ok(ProbeMethod::Get),
        _ => Err(ConfigError::UnknownMethod(value.to_owned())),
    }
}

/// What to wait for and how. Absent when there is no deployment target.
#[derive(Debug)]
pub struct Watch {
    pub target: DeploymentTarget,
    pub strategy: Strategy,
}

#[derive(Debug)]
pub struct WakeConfig {
    pub watch: Option<Watch>,
    pub retry: RetryPolicy,
    pub open_with: Option<String>,
}

impl WakeConfig {
    pub fn from_matches(m: &ArgMatches) -> Result<Self, ConfigError> {
        let get = |name: &str| m.get_one::<String>(name).map(String::as_str);

        let page_url = get("page-url").map(parse_url).transpose()?;
        let kind: StrategyKind = get("strategy").unwrap_or("status").parse()?;

        let target = match DeploymentTarget::from_optional(get("target"))? {
            Some(target) => Some(target),
            None => match &page_url {
                Some(page) => match DeploymentTarget::from_page_url(page)? {
                    Some(target) => Some(target),
                    // A self-probing page waits on itself.
                    None if kind == StrategyKind::SelfProbe => {
                        Some(DeploymentTarget::new(page.clone()))
                    }
                    None => None,
                },
                None => None,
            },
        };

        let retry = RetryPolicy {
            interval: m
                .get_one::<u64>("interval-ms")
                .map(|ms| Duration::from_millis(*ms))
                .unwrap_or(RETRY_INTERVAL),
            max_attempts: m.get_one::<u32>("max-attempts").copied(),
        };
        let open_with = get("open-with").map(str::to_owned);

        // Nothing to probe, so the status endpoint is never needed.
        let Some(target) = target else {
            return Ok(Self {
                watch: None,
                retry,
                open_with,
            });
        };

        let status_api = || -> Result<Url, ConfigError> {
            match (get("status-api"), &page_url) {
                (Some(api), _) => parse_url(api),
                (None, Some(page)) => page.join(STATUS_API_PATH).map_err(|source| {
                    ConfigError::InvalidUrl {
                        value: page.to_string(),
                        source,
                    }
                }),
                (None, None) => Err(ConfigError::MissingStatusApi),
            }
        };

        let grace = m
            .get_one::<u64>("grace-ms")
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or(READY_GRACE_DELAY);

        let strategy = match kind {
            StrategyKind::Status => Strategy::Status(StatusJsonBinary::new(status_api()?)),
            StrategyKind::StatusTristate => Strategy::StatusTristate(
                StatusJsonTristate::new(status_api()?).with_grace(grace),
            ),
            StrategyKind::SelfProbe => {
                let sentinel = get("sentinel-header").unwrap_or(URL_TRIGGER_HEADER);
                let method = parse_method(get("method").unwrap_or("head"))?;
                let probe = SelfProbeHeader::new(sentinel.trim(), method).map_err(|err| {
                    ConfigError::InvalidValue {
                        flag: "--sentinel-header",
                        reason: err.to_string(),
                    }
                })?;
                Strategy::SelfProbe(probe)
            }
        };

        Ok(Self {
            watch: Some(Watch { target, strategy }),
            retry,
            open_with,
        })
    }

    pub fn navigator(&self) -> Result<SystemNavigator, ConfigError> {
        match &self.open_with {
            None => Ok(SystemNavigator::Stdout(StdoutNavigator)),
            Some(command) => CommandNavigator::parse(command)
                .map(SystemNavigator::Command)
                .ok_or(ConfigError::InvalidValue {
                    flag: "--open-with",
                    reason: "command is empty".into(),
                }),
        }
    }
}
