//! Stripe count policy
//!
//! Decides how many OSTs a migrated file is spread across. Small files stay
//! on a single OST; big ones get striped wide so their I/O is parallel.

/// Size tier: files up to and including `max_size` bytes get `stripe_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeTier {
    pub max_size: u64,
    pub stripe_count: usize,
}

/// Maps file size to destination stripe count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripePolicy {
    /// Ascending by `max_size`
    tiers: Vec<StripeTier>,
    /// Stripe count for files larger than every tier
    widest: usize,
}

impl StripePolicy {
    /// Up to 10 GB
    pub const SINGLE_STRIPE_LIMIT: u64 = 10 * 1_000_000_000;
    /// Up to 100 GB
    pub const FIVE_STRIPE_LIMIT: u64 = 100 * 1_000_000_000;
    /// Up to 1 TB
    pub const TEN_STRIPE_LIMIT: u64 = 1_000 * 1_000_000_000;

    /// Build a policy from arbitrary tiers; they are sorted by size
    pub fn new(mut tiers: Vec<StripeTier>, widest: usize) -> Self {
        tiers.sort_by_key(|t| t.max_size);
        Self { tiers, widest }
    }

    /// Number of OSTs to stripe a file of `size` bytes across.
    ///
    /// Tier limits are inclusive: a file of exactly 10 GB still gets one
    /// stripe.
    pub fn stripe_count(&self, size: u64) -> usize {
        self.tiers
            .iter()
            .find(|tier| size <= tier.max_size)
            .map(|tier| tier.stripe_count)
            .unwrap_or(self.widest)
    }

    pub fn tiers(&self) -> &[StripeTier] {
        &self.tiers
    }
}

impl Default for StripePolicy {
    fn default() -> Self {
        Self::new(
            vec![
                StripeTier {
                    max_size: Self::SINGLE_STRIPE_LIMIT,
                    stripe_count: 1,
                },
                StripeTier {
                    max_size: Self::FIVE_STRIPE_LIMIT,
                    stripe_count: 5,
                },
                StripeTier {
                    max_size: Self::TEN_STRIPE_LIMIT,
                    stripe_count: 10,
                },
            ],
            50,
        )
    }
}
