use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancelled on the first SIGINT or SIGTERM.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Spawns the signal listener; must run inside the tokio runtime.
    pub fn listen() -> Self {
        let shutdown = Self::default();
        let token = shutdown.token.clone();
        tokio::spawn(async move {
            let name = next_signal().await;
            info!(signal = name, "Stopping the running command");
            token.cancel();
        });
        shutdown
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(unix)]
async fn next_signal() -> &'static str {
    use signal::unix::{SignalKind, signal as unix_signal};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            _ = interrupt() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        },
        Err(e) => {
            error!(error = %e, "Cannot listen for SIGTERM");
            interrupt().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn next_signal() -> &'static str {
    interrupt().await;
    "SIGINT"
}

async fn interrupt() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
}

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    Failure,
    /// Shell convention for a SIGINT-terminated command.
    Interrupted,
}

impl Exit {
    pub fn code(self) -> u8 {
        match self {
            Exit::Success => 0,
            Exit::Failure => 1,
            Exit::Interrupted => 130,
        }
    }
}

impl From<Exit> for std::process::ExitCode {
    fn from(exit: Exit) -> Self {
        std::process::ExitCode::from(exit.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_follows_the_token() {
        let shutdown = Shutdown::default();
        assert!(!shutdown.requested());

        shutdown.token().cancel();
        assert!(shutdown.requested());
        assert_eq!(Exit::Interrupted.code(), 130);
    }
}
