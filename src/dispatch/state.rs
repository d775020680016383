//! Request-level state machine.
//!
//! ```text
//! START ─▶ ATTEMPT(endpoint, n) ─┬─▶ SUCCESS
//!                                ├─▶ FAILOVER ─▶ ATTEMPT(secondary, n)
//!                                ├─▶ RETRY ────▶ ATTEMPT(endpoint, n+1)
//!                                └─▶ TERMINAL_FAILURE
//! ```
//!
//! `transition` is pure: the dispatcher performs the side effects
//! (HTTP, logging, alerting, sleeping) and feeds the results back in.

use std::time::Duration;

use super::attempt::{backoff_delay, AttemptOutcome, EndpointRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    MalformedResponse,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Start,
    Attempt { endpoint: EndpointRole, n: u32 },
    /// Attempt `n` failed; wait `delay`, then make attempt `n + 1`.
    Retry { endpoint: EndpointRole, n: u32, delay: Duration },
    /// Switching to the secondary; `n` is carried over uncounted.
    Failover { n: u32 },
    Success,
    TerminalFailure(TerminalReason),
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Success | DispatchState::TerminalFailure(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// Leave `Start`.
    Begin,
    /// An attempt finished. `failover_now` is the selector's verdict.
    Attempted { outcome: &'a AttemptOutcome, failover_now: bool },
    /// Leave `Retry` (after sleeping) or `Failover`.
    Proceed,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

/// Compute the next state. Events that do not apply to `state` leave
/// it unchanged.
pub fn transition(state: DispatchState, event: Event<'_>, limits: &Limits) -> DispatchState {
    use DispatchState::*;

    match (state, event) {
        (Start, Event::Begin) => Attempt { endpoint: EndpointRole::Primary, n: 1 },

        (Attempt { endpoint, n }, Event::Attempted { outcome, failover_now }) => match outcome {
            AttemptOutcome::Success => Success,
            AttemptOutcome::MalformedResponse => TerminalFailure(TerminalReason::MalformedResponse),
            o if o.is_rate_limited() && failover_now => Failover { n },
            _ if n < limits.max_attempts => Retry {
                endpoint,
                n,
                delay: backoff_delay(limits.backoff_base, n),
            },
            _ => TerminalFailure(TerminalReason::Exhausted),
        },

        (Retry { endpoint, n, .. }, Event::Proceed) => Attempt { endpoint, n: n + 1 },
        (Failover { n }, Event::Proceed) => Attempt { endpoint: EndpointRole::Secondary, n },

        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DispatchState::*;

    const LIMITS: Limits = Limits { max_attempts: 3, backoff_base: Duration::from_millis(1000) };

    fn attempted(state: DispatchState, outcome: AttemptOutcome, failover_now: bool) -> DispatchState {
        transition(state, Event::Attempted { outcome: &outcome, failover_now }, &LIMITS)
    }

    #[test]
    fn test_begin_goes_to_primary_attempt_one() {
        assert_eq!(
            transition(Start, Event::Begin, &LIMITS),
            Attempt { endpoint: EndpointRole::Primary, n: 1 }
        );
    }

    #[test]
    fn test_success_is_terminal() {
        let s = attempted(Attempt { endpoint: EndpointRole::Primary, n: 1 }, AttemptOutcome::Success, false);
        assert_eq!(s, Success);
        assert!(s.is_terminal());
    }

    #[test]
    fn test_malformed_is_terminal_without_retry() {
        let s = attempted(
            Attempt { endpoint: EndpointRole::Primary, n: 1 },
            AttemptOutcome::MalformedResponse,
            false,
        );
        assert_eq!(s, TerminalFailure(TerminalReason::MalformedResponse));
    }

    #[test]
    fn test_rate_limited_with_failover_keeps_n() {
        let s = attempted(
            Attempt { endpoint: EndpointRole::Primary, n: 2 },
            AttemptOutcome::HttpError { code: 429 },
            true,
        );
        assert_eq!(s, Failover { n: 2 });
        assert_eq!(
            transition(s, Event::Proceed, &LIMITS),
            Attempt { endpoint: EndpointRole::Secondary, n: 2 }
        );
    }

    #[test]
    fn test_rate_limited_without_failover_backs_off() {
        let s = attempted(
            Attempt { endpoint: EndpointRole::Secondary, n: 1 },
            AttemptOutcome::HttpError { code: 429 },
            false,
        );
        assert_eq!(
            s,
            Retry { endpoint: EndpointRole::Secondary, n: 1, delay: Duration::from_millis(1000) }
        );
        assert_eq!(
            transition(s, Event::Proceed, &LIMITS),
            Attempt { endpoint: EndpointRole::Secondary, n: 2 }
        );
    }

    #[test]
    fn test_other_error_retries_with_scaled_delay() {
        let s = attempted(
            Attempt { endpoint: EndpointRole::Primary, n: 2 },
            AttemptOutcome::HttpError { code: 500 },
            false,
        );
        assert_eq!(
            s,
            Retry { endpoint: EndpointRole::Primary, n: 2, delay: Duration::from_millis(2000) }
        );

        let s = attempted(Attempt { endpoint: EndpointRole::Primary, n: 1 }, AttemptOutcome::NetworkError, false);
        assert!(matches!(s, Retry { n: 1, .. }));
    }

    #[test]
    fn test_error_at_max_is_exhausted() {
        for outcome in [
            AttemptOutcome::HttpError { code: 500 },
            AttemptOutcome::HttpError { code: 429 },
            AttemptOutcome::NetworkError,
        ] {
            let s = attempted(Attempt { endpoint: EndpointRole::Primary, n: 3 }, outcome, false);
            assert_eq!(s, TerminalFailure(TerminalReason::Exhausted));
        }
    }

    #[test]
    fn test_failover_at_max_still_allowed() {
        // Failover is uncounted, so it is taken even on the last counted attempt.
        let s = attempted(
            Attempt { endpoint: EndpointRole::Primary, n: 3 },
            AttemptOutcome::HttpError { code: 429 },
            true,
        );
        assert_eq!(s, Failover { n: 3 });
    }

    #[test]
    fn test_single_attempt_limit() {
        let limits = Limits { max_attempts: 1, backoff_base: Duration::ZERO };
        let outcome = AttemptOutcome::HttpError { code: 503 };
        let s = transition(
            Attempt { endpoint: EndpointRole::Primary, n: 1 },
            Event::Attempted { outcome: &outcome, failover_now: false },
            &limits,
        );
        assert_eq!(s, TerminalFailure(TerminalReason::Exhausted));
    }

    #[test]
    fn test_inapplicable_events_leave_state() {
        assert_eq!(transition(Success, Event::Begin, &LIMITS), Success);
        assert_eq!(transition(Start, Event::Proceed, &LIMITS), Start);
        let attempt = Attempt { endpoint: EndpointRole::Primary, n: 1 };
        assert_eq!(transition(attempt, Event::Proceed, &LIMITS), attempt);
    }
}
