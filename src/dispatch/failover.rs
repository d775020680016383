//! Failover selector — primary first, secondary once on 429.
//!
//! A request starts on the primary endpoint. The first rate-limit
//! response switches it to the secondary, if one is configured; after
//! that the request stays on the secondary for the rest of its life.

use super::attempt::{AttemptOutcome, EndpointRole};

/// Result of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub endpoint: EndpointRole,
    /// True only on the call that performed the switch.
    pub failed_over_now: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FailoverSelector {
    secondary_configured: bool,
}

impl FailoverSelector {
    pub fn new(secondary_configured: bool) -> Self {
        Self { secondary_configured }
    }

    /// Pick the endpoint for the next attempt.
    ///
    /// `previous_status` is the HTTP status of the attempt just made
    /// (`None` before the first attempt or after a transport failure).
    pub fn select(&self, previous_status: Option<u16>, already_failed_over: bool) -> Selection {
        if already_failed_over {
            return Selection { endpoint: EndpointRole::Secondary, failed_over_now: false };
        }
        let rate_limited = previous_status == Some(AttemptOutcome::RATE_LIMITED);
        if rate_limited && self.secondary_configured {
            Selection { endpoint: EndpointRole::Secondary, failed_over_now: true }
        } else {
            Selection { endpoint: EndpointRole::Primary, failed_over_now: false }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_on_primary() {
        let sel = FailoverSelector::new(true).select(None, false);
        assert_eq!(sel.endpoint, EndpointRole::Primary);
        assert!(!sel.failed_over_now);
    }

    #[test]
    fn test_switches_on_429_with_secondary() {
        let sel = FailoverSelector::new(true).select(Some(429), false);
        assert_eq!(sel, Selection { endpoint: EndpointRole::Secondary, failed_over_now: true });
    }

    #[test]
    fn test_no_switch_without_secondary() {
        let sel = FailoverSelector::new(false).select(Some(429), false);
        assert_eq!(sel.endpoint, EndpointRole::Primary);
        assert!(!sel.failed_over_now);
    }

    #[test]
    fn test_no_switch_on_other_errors() {
        let selector = FailoverSelector::new(true);
        for status in [Some(500), Some(503), Some(401), None] {
            let sel = selector.select(status, false);
            assert_eq!(sel.endpoint, EndpointRole::Primary, "status {:?}", status);
            assert!(!sel.failed_over_now);
        }
    }

    #[test]
    fn test_never_switches_twice_or_back() {
        let selector = FailoverSelector::new(true);
        for status in [Some(429), Some(500), None] {
            let sel = selector.select(status, true);
            assert_eq!(sel.endpoint, EndpointRole::Secondary);
            assert!(!sel.failed_over_now);
        }
    }

    #[test]
    fn test_deterministic() {
        let selector = FailoverSelector::new(true);
        assert_eq!(selector.select(Some(429), false), selector.select(Some(429), false));
    }
}
