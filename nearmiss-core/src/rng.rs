//! Deterministic per-session random streams.
//!
//! Each session owns independent streams derived from a single session seed, so
//! drawing an extra reel never shifts the bar trial sequence and a seeded run
//! replays exactly.
use hmac::{Hmac, Mac};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use sha2::Sha256;

use crate::constants::{STREAM_REELS, STREAM_TEMPLATE, STREAM_TRIALS};

/// Independent RNG streams owned by one session.
#[derive(Debug, Clone)]
pub struct SessionRng {
    seed: u64,
    trials: CountingRng<SmallRng>,
    reels: CountingRng<SmallRng>,
    template: CountingRng<SmallRng>,
}

impl SessionRng {
    /// Construct every stream from a session seed.
    #[must_use]
    pub fn from_session_seed(seed: u64) -> Self {
        Self {
            seed,
            trials: CountingRng::new(derive_stream_seed(seed, STREAM_TRIALS)),
            reels: CountingRng::new(derive_stream_seed(seed, STREAM_REELS)),
            template: CountingRng::new(derive_stream_seed(seed, STREAM_TEMPLATE)),
        }
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Stream for bar parameters and fallback reel labels.
    pub fn trials(&mut self) -> &mut CountingRng<SmallRng> {
        &mut self.trials
    }

    /// Label and symbol streams borrowed together for one reel deal.
    pub fn trials_and_reels(
        &mut self,
    ) -> (&mut CountingRng<SmallRng>, &mut CountingRng<SmallRng>) {
        (&mut self.trials, &mut self.reels)
    }

    /// Stream for the outcome template shuffle.
    pub fn template(&mut self) -> &mut CountingRng<SmallRng> {
        &mut self.template
    }

    /// Total draws across all streams.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.trials
            .draws()
            .saturating_add(self.reels.draws())
            .saturating_add(self.template.draws())
    }
}

/// Counting wrapper for RNG streams providing instrumentation.
#[derive(Debug, Clone)]
pub struct CountingRng<R> {
    rng: R,
    draws: u64,
}

impl CountingRng<SmallRng> {
    fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            draws: 0,
        }
    }
}

impl<R: rand::RngCore> CountingRng<R> {
    /// Number of draw calls performed against this stream.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.draws
    }
}

impl<R: rand::RngCore> rand::RngCore for CountingRng<R> {
    fn next_u32(&mut self) -> u32 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.draws = self.draws.saturating_add(1);
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.draws = self.draws.saturating_add(1);
        self.rng.try_fill_bytes(dest)
    }
}

/// Derive a stream seed from a session seed and a domain tag.
#[must_use]
pub fn derive_stream_seed(session_seed: u64, domain_tag: &[u8]) -> u64 {
    let mut mac = Hmac::<Sha256>::new_from_slice(&session_seed.to_le_bytes())
        .expect("64-bit seed is valid key");
    mac.update(domain_tag);
    let digest = mac.finalize().into_bytes();
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed_bytes)
}
