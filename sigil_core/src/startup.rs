//! Boot time health probes.

use async_trait::async_trait;

/// A component that can verify it is usable before the service starts.
///
/// Implementations must not mutate any state.
#[async_trait]
pub trait StartupCheck: Send + Sync {
    /// The error describing why the component is not usable.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs the probe.
    async fn startup_check(&self) -> Result<(), Self::Error>;
}

/// Runs every check in order and stops at the first failure.
pub async fn run_startup_checks<E>(
    checks: &[&dyn StartupCheck<Error = E>],
) -> Result<(), E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    for check in checks {
        check.startup_check().await?;
    }
    log::debug!("{} startup checks passed", checks.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("probe failed")]
    struct ProbeFailed;

    struct Probe<'a> {
        healthy: bool,
        calls: &'a AtomicUsize,
    }

    #[async_trait]
    impl StartupCheck for Probe<'_> {
        type Error = ProbeFailed;

        async fn startup_check(&self) -> Result<(), Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy { Ok(()) } else { Err(ProbeFailed) }
        }
    }

    #[tokio::test]
    async fn stops_at_first_failing_check() {
        let calls = AtomicUsize::new(0);
        let ok = Probe {
            healthy: true,
            calls: &calls,
        };
        let bad = Probe {
            healthy: false,
            calls: &calls,
        };

        let passing: [&dyn StartupCheck<Error = ProbeFailed>; 2] = [&ok, &ok];
        assert!(run_startup_checks(&passing).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let failing: [&dyn StartupCheck<Error = ProbeFailed>; 2] = [&bad, &ok];
        assert!(run_startup_checks(&failing).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
