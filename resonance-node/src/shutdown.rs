//! Process-level shutdown: wait for a termination signal, then stop once.

use crate::error::Result;
use crate::pipeline::Pipeline;
use resonance_client::TransportFactory;
use std::future::Future;

/// Wait for Ctrl-C or, on Unix, SIGTERM. Returns the signal's name.
///
/// # Errors
///
/// Fails if a signal handler cannot be installed.
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = term.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl-C")
    }
}

/// Run `pipeline` until it ends on its own or `signal` resolves.
///
/// On the signal, [`Pipeline::stop`] runs exactly once while the start
/// future is driven to completion, so every task has released its
/// connections when this returns. Later signals are not observed.
///
/// # Errors
///
/// Returns the pipeline's startup error, if any.
pub async fn run_until<F, S>(pipeline: &Pipeline<F>, signal: S) -> Result<()>
where
    F: TransportFactory + 'static,
    S: Future<Output = ()>,
{
    let start = pipeline.start();
    tokio::pin!(start);
    tokio::pin!(signal);

    tokio::select! {
        result = &mut start => {
            pipeline.stop().await;
            result
        }
        () = &mut signal => {
            tracing::info!("Shutdown signal received");
            let (result, ()) = tokio::join!(&mut start, pipeline.stop());
            result
        }
    }
}
