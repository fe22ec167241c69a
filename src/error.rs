use std::time::Duration;

use crate::oracle::OracleFailure;

/// Why a deep request ended without a usable sequence.
///
/// A heuristic "no signal" result is not an error and never appears here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    /// Every decoder recovery strategy failed
    #[error("Could not decode simulation: {0}")]
    Decode(String),

    /// The oracle call failed or returned a transport-level error
    #[error("Simulation failed: {0}")]
    Transport(String),

    /// Transport failure that starts a cooldown before the next attempt
    #[error("Rate limited: {message}")]
    RateLimited { message: String, cooldown: Duration },
}

impl TraceError {
    /// Classify an oracle failure. Rate-limited failures wait at least
    /// `min_cooldown`, longer if the server asked for more.
    pub fn from_failure(failure: OracleFailure, min_cooldown: Duration) -> Self {
        if !failure.rate_limited {
            return TraceError::Transport(failure.message);
        }
        let cooldown = failure
            .retry_after
            .map_or(min_cooldown, |after| after.max(min_cooldown));
        TraceError::RateLimited {
            message: failure.message,
            cooldown,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TraceError::RateLimited { .. })
    }

    /// Short kind tag for logs and snapshots
    pub fn kind(&self) -> &'static str {
        match self {
            TraceError::Decode(_) => "decode_failure",
            TraceError::Transport(_) => "transport_failure",
            TraceError::RateLimited { .. } => "rate_limited",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_failure_is_transport() {
        let error = TraceError::from_failure(OracleFailure::new("exit status 2"), Duration::from_secs(60));
        assert_eq!(error, TraceError::Transport("exit status 2".into()));
        assert_eq!(error.kind(), "transport_failure");
    }

    #[test]
    fn test_rate_limit_cooldown_never_shorter_than_minimum() {
        let min = Duration::from_secs(60);
        let short = OracleFailure::rate_limited("slow down", Some(Duration::from_secs(5)));
        let long = OracleFailure::rate_limited("slow down", Some(Duration::from_secs(90)));

        match TraceError::from_failure(short, min) {
            TraceError::RateLimited { cooldown, .. } => assert_eq!(cooldown, min),
            other => panic!("Expected RateLimited, got {:?}", other),
        }
        match TraceError::from_failure(long, min) {
            TraceError::RateLimited { cooldown, .. } => assert_eq!(cooldown, Duration::from_secs(90)),
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }
}
