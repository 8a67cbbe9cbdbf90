use anyhow::{bail, Context};
use log::*;
use tokio_util::sync::CancellationToken;

use catnip_wakeup::config::{self, WakeConfig};
use catnip_wakeup::transport::HttpTransport;
use catnip_wakeup::{PollLoop, PollOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let m = config::command().get_matches();

    env_logger::init();

    let config = WakeConfig::from_matches(&m).context("invalid configuration")?;
    let navigator = config.navigator()?;
    let Some(watch) = config.watch else {
        info!("no deployment to wait for");
        return Ok(());
    };
    let transport = HttpTransport::new().context("failed to build http client")?;

    // Ctrl-C plays the part of the visitor closing the page.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupted");
            on_signal.cancel();
        }
    });

    let mut poll = PollLoop::new(Some(watch.target), watch.strategy, transport, navigator)
        .with_policy(config.retry)
        .with_cancel(cancel);

    match poll.run().await? {
        PollOutcome::Idle => info!("no deployment to wait for"),
        PollOutcome::Redirected(url) => debug!("handed off to {}", url),
        PollOutcome::Stopped => info!("stopped after {} probes", poll.attempts()),
        PollOutcome::Exhausted { attempts } => match poll.last_error() {
            Some(err) => bail!("deployment not ready after {} probes, last error: {}", attempts, err),
            None => bail!("deployment not ready after {} probes", attempts),
        },
    }

    Ok(())
}
