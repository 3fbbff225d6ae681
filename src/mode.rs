use std::fmt;

/// Multi-granularity lock modes.
///
/// Strength is a partial order: `IS < IX < SIX < X` and `IS < S < SIX`.
/// `IX` and `S` are incomparable; their join is `SIX`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// IS: intends to take shared locks further down the hierarchy.
    IntentShared,
    /// IX: intends to take exclusive locks further down the hierarchy.
    IntentExclusive,
    /// S: reads the whole resource.
    Shared,
    /// SIX: reads the whole resource and intends exclusive locks below it.
    SharedIntentExclusive,
    /// X: owns the resource.
    Exclusive,
}

use LockMode::*;

impl LockMode {
    pub const ALL: [LockMode; 5] = [
        IntentShared,
        IntentExclusive,
        Shared,
        SharedIntentExclusive,
        Exclusive,
    ];

    /// Whether a request for `self` can be granted next to a holder of `held`.
    pub fn compatible_with(self, held: LockMode) -> bool {
        match (self, held) {
            (Exclusive, _) | (_, Exclusive) => false,
            (IntentShared, _) | (_, IntentShared) => true,
            (IntentExclusive, IntentExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Whether holding `self` already grants everything `other` would.
    pub fn covers(self, other: LockMode) -> bool {
        match self {
            Exclusive => true,
            SharedIntentExclusive => other != Exclusive,
            Shared => matches!(other, IntentShared | Shared),
            IntentExclusive => matches!(other, IntentShared | IntentExclusive),
            IntentShared => other == IntentShared,
        }
    }

    /// Weakest mode covering both `self` and `other`.
    pub fn join(self, other: LockMode) -> LockMode {
        if self.covers(other) {
            self
        } else if other.covers(self) {
            other
        } else {
            SharedIntentExclusive
        }
    }

    /// Intent mode an ancestor must hold before `self` is taken on a descendant.
    pub fn parent_intent(self) -> LockMode {
        match self {
            IntentShared | Shared => IntentShared,
            IntentExclusive | SharedIntentExclusive | Exclusive => IntentExclusive,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntentShared => "IS",
            IntentExclusive => "IX",
            Shared => "S",
            SharedIntentExclusive => "SIX",
            Exclusive => "X",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join of a set of granted modes; `None` stands for NL (nothing granted).
pub fn group_mode<I>(modes: I) -> Option<LockMode>
where
    I: IntoIterator<Item = LockMode>,
{
    modes.into_iter().fold(None, |acc, m| match acc {
        None => Some(m),
        Some(g) => Some(g.join(m)),
    })
}
