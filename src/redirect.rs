use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::NavigateError;

/// How long a ready notice stays up before the delayed redirect fires.
pub const READY_GRACE_DELAY: Duration = Duration::from_millis(6000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectTiming {
    Immediate,
    Delayed(Duration),
}

/// Replaces the current location. Nothing is kept in history.
pub trait Navigator {
    fn replace(&mut self, url: &str) -> Result<(), NavigateError>;
}

/// Writes the destination to stdout so a wrapping script can follow it.
#[derive(Debug, Default)]
pub struct StdoutNavigator;

impl Navigator for StdoutNavigator {
    fn replace(&mut self, url: &str) -> Result<(), NavigateError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", url)?;
        stdout.flush()?;
        Ok(())
    }
}

/// Hands the destination to an external opener such as `xdg-open`.
#[derive(Debug)]
pub struct CommandNavigator {
    program: String,
    args: Vec<String>,
}

impl CommandNavigator {
    /// `command` is split on whitespace; the URL is appended as the final argument.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Navigator for CommandNavigator {
    fn replace(&mut self, url: &str) -> Result<(), NavigateError> {
        debug!("launching {} for {}", self.program, url);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| NavigateError::Launch {
                program: self.program.clone(),
                source,
            })?;

        // Reap the opener in the background so it never lingers as a zombie.
        let program = self.program.clone();
        thread::spawn(move || match child.wait() {
            Ok(status) if !status.success() => warn!("{} exited with {}", program, status),
            Ok(_) => {}
            Err(err) => warn!("failed to wait for {}: {}", program, err),
        });

        Ok(())
    }
}

/// Either navigator, picked at startup.
#[derive(Debug)]
pub enum SystemNavigator {
    Stdout(StdoutNavigator),
    Command(CommandNavigator),
}

impl Navigator for SystemNavigator {
    fn replace(&mut self, url: &str) -> Result<(), NavigateError> {
        match self {
            SystemNavigator::Stdout(n) => n.replace(url),
            SystemNavigator::Command(n) => n.replace(url),
        }
    }
}

/// The terminal step of a poll loop.
pub struct RedirectAction<N> {
    navigator: N,
    timing: RedirectTiming,
}

impl<N: Navigator> RedirectAction<N> {
    pub fn new(navigator: N, timing: RedirectTiming) -> Self {
        Self { navigator, timing }
    }

    /// Returns `Ok(false)` when cancelled during the grace window; no navigation happens then.
    pub async fn perform(
        &mut self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, NavigateError> {
        if let RedirectTiming::Delayed(delay) = self.timing {
            info!("deployment ready, redirecting in {}ms", delay.as_millis());
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("redirecting to {}", url);
        self.navigator.replace(url)?;
        Ok(true)
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn timing(&self) -> RedirectTiming {
        self.timing
    }
}
