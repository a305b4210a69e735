//! Centralized design constants for the framing experiment.
//!
//! These are the documented defaults behind [`crate::config::ExperimentConfig`].
//! Changing any of them changes the experimental design, so they live in one
//! place and are reviewed like code.

// Session shape -------------------------------------------------------------
pub(crate) const MAX_TRIALS: u32 = 15;
pub(crate) const SELF_REPORT_INTERVAL: u32 = 5;
pub(crate) const TEST_PARTICIPANT_PREFIX: &str = "TEST_";
pub(crate) const PARTICIPANT_ID_MIN: u32 = 10_000;
pub(crate) const PARTICIPANT_ID_MAX: u32 = 99_999;

// Bar task -----------------------------------------------------------------
pub(crate) const BAR_DURATION_MS: u32 = 2_000;
pub(crate) const BAR_MIN_SPEED: f64 = 0.3;
pub(crate) const BAR_MAX_SPEED: f64 = 0.7;
pub(crate) const BAR_ZONE_START_MIN: f64 = 30.0;
pub(crate) const BAR_ZONE_START_MAX: f64 = 50.0;
pub(crate) const BAR_ZONE_WIDTH: f64 = 15.0;
pub(crate) const NEAR_MISS_BAND: f64 = 15.0;
pub(crate) const FAR_MISS_THRESHOLD: f64 = 35.0;

// Slot reels ---------------------------------------------------------------
pub(crate) const SLOT_TEMPLATE_HITS: u32 = 5;
pub(crate) const SLOT_TEMPLATE_NEAR_MISSES: u32 = 5;
pub(crate) const SLOT_TEMPLATE_LOSSES: u32 = 5;
pub(crate) const SLOT_LAST_REEL_MISS_CHANCE: f64 = 0.7;
pub(crate) const SLOT_LOSS_SAMPLE_ATTEMPTS: usize = 100;
pub(crate) const SLOT_SPIN_DURATIONS_MS: [u32; 3] = [1_500, 2_000, 2_500];
pub(crate) const REEL_DISTANCE_PER_STEP: f64 = 5.0;
pub(crate) const REEL_NO_MATCH_DISTANCE: f64 = 15.0;

// Survey scales ------------------------------------------------------------
pub(crate) const LIKERT_MIN: i64 = 1;
pub(crate) const LIKERT_MAX: i64 = 7;
pub(crate) const ROUNDS_MIN: i64 = 1;
pub(crate) const ROUNDS_MAX: i64 = 5;

// RNG stream tags ----------------------------------------------------------
pub(crate) const STREAM_TRIALS: &[u8] = b"trials";
pub(crate) const STREAM_REELS: &[u8] = b"reels";
pub(crate) const STREAM_TEMPLATE: &[u8] = b"template";
