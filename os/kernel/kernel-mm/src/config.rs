//! # Runtime Configuration

/// Page replacement policy used when a frame must be reclaimed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum SwapPolicy {
    /// Second chance on the accessed bit.
    Clock,
    /// Second chance on the accessed bit, preferring clean pages over dirty
    /// ones.
    #[default]
    EnhancedClock,
}

/// Settings for [`MemorySubsystem::new`](crate::MemorySubsystem::new).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct MemoryConfig {
    pub swap_policy: SwapPolicy,
}

impl MemoryConfig {
    #[must_use]
    pub const fn with_swap_policy(mut self, policy: SwapPolicy) -> Self {
        self.swap_policy = policy;
        self
    }
}
