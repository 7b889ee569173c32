//! Humanization delay policy
//!
//! Input events issued back-to-back at machine speed are a fingerprint of
//! their own. Every driver action samples a delay from a per-action-kind
//! distribution before dispatching input. The policy is injected so tests
//! substitute [`zero_delays`] for determinism.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Kind of driver action a delay is sampled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Click,
    Type,
    /// The inter-poll gap in waiting loops and the pause after an input
    /// burst.
    Gap,
    Generic,
}

/// Maps an action kind to a sampled delay.
pub type DelayPolicy = Arc<dyn Fn(ActionKind) -> Duration + Send + Sync>;

/// The production policy: randomized ranges tuned to look like a person.
pub fn humanized_delays() -> DelayPolicy {
    Arc::new(|kind| {
        let mut rng = rand::rng();
        let millis = match kind {
            ActionKind::Click => rng.random_range(500..1500),
            ActionKind::Type => rng.random_range(50..550),
            ActionKind::Gap => rng.random_range(500..1000),
            ActionKind::Generic => rng.random_range(100..600),
        };
        Duration::from_millis(millis)
    })
}

/// No delays at all. Test use only; driving a real site with this defeats
/// the purpose of the crate.
pub fn zero_delays() -> DelayPolicy {
    Arc::new(|_| Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanized_delays_stay_in_range() {
        let policy = humanized_delays();
        for _ in 0..50 {
            let click = policy(ActionKind::Click);
            assert!(click >= Duration::from_millis(500) && click < Duration::from_millis(1500));
            let typed = policy(ActionKind::Type);
            assert!(typed >= Duration::from_millis(50) && typed < Duration::from_millis(550));
            let gap = policy(ActionKind::Gap);
            assert!(gap >= Duration::from_millis(500) && gap < Duration::from_millis(1000));
            let generic = policy(ActionKind::Generic);
            assert!(generic >= Duration::from_millis(100) && generic < Duration::from_millis(600));
        }
    }

    #[test]
    fn zero_delays_are_zero() {
        let policy = zero_delays();
        assert_eq!(policy(ActionKind::Click), Duration::ZERO);
        assert_eq!(policy(ActionKind::Gap), Duration::ZERO);
    }
}
