use std::fmt::Display;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::WakeError;
use crate::redirect::{Navigator, RedirectAction};
use crate::strategy::DetectionStrategy;
use crate::target::DeploymentTarget;
use crate::transport::Transport;

/// Pause between rounds, whatever the previous round saw.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// Statuses above this are infrastructure trouble and never reach a strategy.
pub const TRANSIENT_STATUS_FLOOR: u16 = 500;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Ready,
    Error,
}

/// Classified outcome of a single probe.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    Pending,
    Ready { redirect_url: Option<String> },
    Error { message: String },
    /// No usable answer. Retried without touching the recorded state.
    Transient { reason: String },
}

impl ProbeResult {
    pub fn malformed(status: u16, err: impl Display) -> Self {
        ProbeResult::Transient {
            reason: format!("unreadable status body (HTTP {}): {}", status, err),
        }
    }

    pub fn state(&self) -> Option<PollState> {
        match self {
            ProbeResult::Pending => Some(PollState::Pending),
            ProbeResult::Ready { .. } => Some(PollState::Ready),
            ProbeResult::Error { .. } => Some(PollState::Error),
            ProbeResult::Transient { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` retries forever, which is the default.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: RETRY_INTERVAL,
            max_attempts: None,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// No deployment target; nothing was probed.
    Idle,
    Redirected(String),
    Stopped,
    Exhausted { attempts: u32 },
}

/// Drives probe rounds until the deployment is ready.
///
/// Exactly one probe is outstanding at a time: the next round is only
/// scheduled after the previous result has been handled.
pub struct PollLoop<S, T, N> {
    target: Option<DeploymentTarget>,
    strategy: S,
    transport: T,
    redirect: RedirectAction<N>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    state: PollState,
    last_error: Option<String>,
    attempts: u32,
    redirected_to: Option<String>,
}

impl<S, T, N> PollLoop<S, T, N>
where
    S: DetectionStrategy,
    T: Transport,
    N: Navigator,
{
    pub fn new(target: Option<DeploymentTarget>, strategy: S, transport: T, navigator: N) -> Self {
        let redirect = RedirectAction::new(navigator, strategy.redirect_timing());
        Self {
            target,
            strategy,
            transport,
            redirect,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            state: PollState::Pending,
            last_error: None,
            attempts: 0,
            redirected_to: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn navigator(&self) -> &N {
        self.redirect.navigator()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Once `Ready` has been seen the loop is finished for good: later calls
    /// neither probe nor navigate again.
    pub async fn run(&mut self) -> Result<PollOutcome, WakeError> {
        if self.state == PollState::Ready {
            return Ok(match &self.redirected_to {
                Some(destination) => PollOutcome::Redirected(destination.clone()),
                None => PollOutcome::Stopped,
            });
        }

        let Some(target) = self.target.clone() else {
            debug!("no deployment target, staying idle");
            return Ok(PollOutcome::Idle);
        };

        info!(
            "waiting for {} using {} probes",
            target,
            self.strategy.name()
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(PollOutcome::Stopped);
            }
            if self.ceiling_reached() {
                return Ok(PollOutcome::Exhausted {
                    attempts: self.attempts,
                });
            }

            let request = self.strategy.request(&target);
            self.attempts += 1;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(PollOutcome::Stopped),
                response = self.transport.send(&request) => match response {
                    Err(err) => ProbeResult::Transient { reason: err.to_string() },
                    Ok(response) if response.status > TRANSIENT_STATUS_FLOOR => ProbeResult::Transient {
                        reason: format!("HTTP {}", response.status),
                    },
                    Ok(response) => self.strategy.classify(&response),
                },
            };

            match result {
                ProbeResult::Ready { redirect_url } => {
                    self.state = PollState::Ready;
                    let destination = redirect_url.unwrap_or_else(|| target.to_string());

                    return if self.redirect.perform(&destination, &self.cancel).await? {
                        self.redirected_to = Some(destination.clone());
                        Ok(PollOutcome::Redirected(destination))
                    } else {
                        Ok(PollOutcome::Stopped)
                    };
                }
                ProbeResult::Pending => {
                    debug!("deployment still pending (attempt {})", self.attempts);
                    self.state = PollState::Pending;
                }
                ProbeResult::Error { message } => {
                    warn!("failed to check deployment status: {}", message);
                    self.state = PollState::Error;
                    self.last_error = Some(message);
                }
                ProbeResult::Transient { reason } => {
                    warn!("failed to get deployment status: {}", reason);
                }
            }

            if self.ceiling_reached() {
                warn!("giving up after {} attempts", self.attempts);
                return Ok(PollOutcome::Exhausted {
                    attempts: self.attempts,
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(PollOutcome::Stopped),
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }

    fn ceiling_reached(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::redirect::tests::RecordingNavigator;
    use crate::strategy::{
        SelfProbeHeader, StatusJsonBinary, StatusJsonTristate, Strategy, URL_TRIGGER_HEADER,
    };
    use crate::transport::{ProbeRequest, ProbeResponse};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;
    use url::Url;

    type Reply = Result<ProbeResponse, TransportError>;

    /// Plays back canned replies, then repeats `fallback` forever.
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        fallback: fn() -> Reply,
        sent: Mutex<Vec<(Instant, ProbeRequest)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Reply>, fallback: fn() -> Reply) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback,
                sent: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn sent_at(&self) -> Vec<Instant> {
            self.sent.lock().unwrap().iter().map(|(at, _)| *at).collect()
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Transport for ScriptedTransport {
        async fn send(&self, request: &ProbeRequest) -> Reply {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.sent
                .lock()
                .unwrap()
                .push((Instant::now(), request.clone()));

            // Simulated network latency.
            tokio::time::sleep(Duration::from_millis(50)).await;

            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(self.fallback);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            reply
        }
    }

    fn status(body: serde_json::Value) -> Reply {
        Ok(ProbeResponse::new(200).with_json(&body))
    }

    fn pending() -> Reply {
        status(json!({ "deploymentReady": false, "redirectUrl": "", "isError": false, "errorMessage": "" }))
    }

    fn unavailable() -> Reply {
        Ok(ProbeResponse::new(503))
    }

    fn refused() -> Reply {
        Err(TransportError::Unreachable("connection refused".into()))
    }

    fn endpoint() -> Url {
        Url::parse("https://catnip.example/api/status").unwrap()
    }

    fn target() -> Option<DeploymentTarget> {
        Some(DeploymentTarget::parse("https://demo.example/").unwrap())
    }

    fn binary_loop(
        replies: Vec<Reply>,
        fallback: fn() -> Reply,
    ) -> PollLoop<StatusJsonBinary, ScriptedTransport, RecordingNavigator> {
        PollLoop::new(
            target(),
            StatusJsonBinary::new(endpoint()),
            ScriptedTransport::new(replies, fallback),
            RecordingNavigator::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn idle_without_target() {
        let mut poll = PollLoop::new(
            None,
            StatusJsonBinary::new(endpoint()),
            ScriptedTransport::new(vec![], pending),
            RecordingNavigator::default(),
        );

        assert_eq!(poll.run().await.unwrap(), PollOutcome::Idle);
        assert_eq!(poll.transport().count(), 0);
        assert_eq!(poll.state(), PollState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_navigates_to_carried_url_and_stops() {
        let mut poll = binary_loop(
            vec![
                pending(),
                status(json!({
                    "deploymentReady": true,
                    "redirectUrl": "https://demo.example/landing",
                    "isError": false,
                    "errorMessage": "",
                })),
            ],
            pending,
        );

        let outcome = poll.run().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Redirected("https://demo.example/landing".into())
        );
        assert_eq!(poll.state(), PollState::Ready);
        assert_eq!(poll.transport().count(), 2);
        let visited: Vec<_> = poll.navigator().visited.iter().map(|(_, u)| u.as_str()).collect();
        assert_eq!(visited, ["https://demo.example/landing"]);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_without_redirect_url_falls_back_to_target() {
        let mut poll = binary_loop(vec![status(json!({ "deploymentReady": true }))], pending);

        let outcome = poll.run().await.unwrap();

        assert_eq!(outcome, PollOutcome::Redirected("https://demo.example/".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn reported_error_is_logged_and_retried_after_interval() {
        let mut poll = binary_loop(
            vec![
                status(json!({ "deploymentReady": false, "isError": true, "errorMessage": "rollout stuck" })),
                status(json!({ "deploymentReady": true })),
            ],
            pending,
        );

        poll.run().await.unwrap();

        let sent = poll.transport().sent_at();
        assert_eq!(sent.len(), 2);
        // 50ms latency of the first probe, then the fixed pause.
        let gap = sent[1] - sent[0];
        assert!(gap >= Duration::from_millis(1050) && gap < Duration::from_millis(1100));
        assert_eq!(poll.last_error(), Some("rollout stuck"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_without_touching_state() {
        let mut poll = binary_loop(
            vec![
                status(json!({ "isError": true, "errorMessage": "first" })),
                refused(),
                unavailable(),
            ],
            pending,
        )
        .with_policy(RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        });

        let outcome = poll.run().await.unwrap();

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 3 });
        // Neither the refused connection nor the 503 replaced the recorded error.
        assert_eq!(poll.state(), PollState::Error);
        assert_eq!(poll.last_error(), Some("first"));
        assert!(poll.navigator().visited.is_empty());

        let sent = poll.transport().sent_at();
        assert_eq!(sent.len(), 3);
        for pair in sent.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ceiling_sends_nothing() {
        let mut poll = binary_loop(vec![], pending).with_policy(RetryPolicy {
            max_attempts: Some(0),
            ..RetryPolicy::default()
        });

        assert_eq!(
            poll.run().await.unwrap(),
            PollOutcome::Exhausted { attempts: 0 }
        );
        assert_eq!(poll.transport().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_after_redirect_neither_probes_nor_navigates() {
        let mut poll = binary_loop(
            vec![status(json!({ "deploymentReady": true, "redirectUrl": "https://demo.example/x" }))],
            || status(json!({ "deploymentReady": true, "redirectUrl": "https://demo.example/y" })),
        );

        let first = poll.run().await.unwrap();
        let second = poll.run().await.unwrap();

        assert_eq!(first, PollOutcome::Redirected("https://demo.example/x".into()));
        assert_eq!(second, first);
        assert_eq!(poll.transport().count(), 1);
        assert_eq!(poll.navigator().visited.len(), 1);
        assert_eq!(poll.state(), PollState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn status_above_500_is_never_parsed() {
        // A 501 with a body that would otherwise read as ready.
        let mut poll = binary_loop(
            vec![Ok(ProbeResponse::new(501).with_json(&json!({ "deploymentReady": true })))],
            pending,
        )
        .with_policy(RetryPolicy {
            max_attempts: Some(1),
            ..RetryPolicy::default()
        });

        assert_eq!(
            poll.run().await.unwrap(),
            PollOutcome::Exhausted { attempts: 1 }
        );
        assert!(poll.navigator().visited.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn status_500_is_still_parsed() {
        let mut poll = binary_loop(
            vec![Ok(ProbeResponse::new(500).with_json(&json!({ "deploymentReady": true })))],
            pending,
        );

        assert_eq!(
            poll.run().await.unwrap(),
            PollOutcome::Redirected("https://demo.example/".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn endless_pending_never_terminates_and_keeps_one_probe_in_flight() {
        let mut poll = binary_loop(vec![], pending);
        let cancel = poll.cancel_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(120)).await;
            cancel.cancel();
        });

        let outcome = poll.run().await.unwrap();

        assert_eq!(outcome, PollOutcome::Stopped);
        assert_eq!(poll.state(), PollState::Pending);
        assert!(poll.transport().count() > 100);
        assert_eq!(poll.transport().max_in_flight.load(Ordering::SeqCst), 1);
        assert!(poll.navigator().visited.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tristate_waits_grace_period_without_probing() {
        let ready = || {
            status(json!({
                "deploymentStatus": "Ready",
                "redirectUrl": "",
                "errorMessage": "",
            }))
        };
        let mut poll = PollLoop::new(
            target(),
            StatusJsonTristate::new(endpoint()),
            ScriptedTransport::new(vec![ready()], ready),
            RecordingNavigator::default(),
        );

        let outcome = poll.run().await.unwrap();

        assert_eq!(outcome, PollOutcome::Redirected("https://demo.example/".into()));
        assert_eq!(poll.transport().count(), 1);

        let probed = poll.transport().sent_at()[0];
        let navigated = poll.navigator().visited[0].0;
        assert!(navigated - probed >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn self_probe_redirects_once_sentinel_disappears() {
        let still_placeholder = || Ok(ProbeResponse::new(200).with_header(URL_TRIGGER_HEADER, "1.0"));
        let mut poll = PollLoop::new(
            target(),
            Strategy::SelfProbe(SelfProbeHeader::url_trigger()),
            ScriptedTransport::new(
                vec![still_placeholder(), refused(), Ok(ProbeResponse::new(200))],
                still_placeholder,
            ),
            RecordingNavigator::default(),
        );

        let outcome = poll.run().await.unwrap();

        assert_eq!(outcome, PollOutcome::Redirected("https://demo.example/".into()));
        assert_eq!(poll.transport().count(), 3);
        let requests = poll.transport().sent.lock().unwrap();
        assert!(requests.iter().all(|(_, r)| r.url.as_str() == "https://demo.example/"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_never_probes() {
        let mut poll = binary_loop(vec![], pending);
        let cancel = poll.cancel_token();
        cancel.cancel();

        assert_eq!(poll.run().await.unwrap(), PollOutcome::Stopped);
        assert_eq!(poll.transport().count(), 0);
    }
}
