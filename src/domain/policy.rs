//! Named outcomes for checks that cannot be completed

/// What a check resolves to when its inputs are unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPolicy {
    /// Resolve to the permissive outcome; never block the user on a failed check.
    Open,
    /// Resolve to the restrictive outcome.
    Closed,
}

impl FailPolicy {
    /// Whether a failed check lets the user proceed.
    pub fn permits(self) -> bool {
        matches!(self, FailPolicy::Open)
    }
}

/// A failed association lookup reports the asset as associated.
pub const ASSOCIATION_FAILURE_POLICY: FailPolicy = FailPolicy::Open;

/// A failed network check reports the wallet as matched.
pub const NETWORK_CHECK_FAILURE_POLICY: FailPolicy = FailPolicy::Open;
