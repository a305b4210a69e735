//! Slot reel symbols and outcome-constrained reel synthesis.
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

use crate::config::OutcomeCounts;
use crate::constants::SLOT_LOSS_SAMPLE_ATTEMPTS;
use crate::trial::Outcome;

/// Reel alphabet. Adjacency is cyclic in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbol {
    Cherry,
    Lemon,
    Orange,
    Grape,
    Bell,
    Seven,
}

impl Symbol {
    pub const ALL: [Self; 6] = [
        Self::Cherry,
        Self::Lemon,
        Self::Orange,
        Self::Grape,
        Self::Bell,
        Self::Seven,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cherry => "cherry",
            Self::Lemon => "lemon",
            Self::Orange => "orange",
            Self::Grape => "grape",
            Self::Bell => "bell",
            Self::Seven => "seven",
        }
    }

    #[must_use]
    pub const fn emoji(self) -> &'static str {
        match self {
            Self::Cherry => "\u{1F352}",
            Self::Lemon => "\u{1F34B}",
            Self::Orange => "\u{1F34A}",
            Self::Grape => "\u{1F347}",
            Self::Bell => "\u{1F514}",
            Self::Seven => "7\u{FE0F}\u{20E3}",
        }
    }

    /// Neighbour at `step` positions around the cycle (negative steps go back).
    #[must_use]
    pub const fn offset(self, step: isize) -> Self {
        let len = Self::ALL.len().cast_signed();
        let idx = (self.index().cast_signed() + step).rem_euclid(len);
        Self::from_index(idx.cast_unsigned())
    }
}

impl FromStr for Symbol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|symbol| symbol.as_str() == wanted)
            .ok_or(())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shortest distance between two symbols around the cycle.
#[must_use]
pub const fn cyclic_distance(a: Symbol, b: Symbol) -> usize {
    let diff = a.index().abs_diff(b.index());
    let wrap = Symbol::ALL.len() - diff;
    if diff < wrap { diff } else { wrap }
}

/// The three visible reel symbols of one spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reels(pub [Symbol; 3]);

/// Shape of a spin, before any condition-dependent labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReelMatch {
    /// All three symbols identical.
    Triple(Symbol),
    /// Two identical symbols plus one odd symbol.
    Pair { matched: Symbol, odd: Symbol },
    /// Three distinct symbols.
    Distinct,
}

impl Reels {
    /// Deterministic loss used when rejection sampling gives up.
    pub const FALLBACK_LOSS: Self = Self([Symbol::Cherry, Symbol::Orange, Symbol::Bell]);

    #[must_use]
    pub const fn symbols(&self) -> [Symbol; 3] {
        self.0
    }

    #[must_use]
    pub fn emojis(&self) -> [&'static str; 3] {
        self.0.map(Symbol::emoji)
    }

    #[must_use]
    pub fn classify(&self) -> ReelMatch {
        let [a, b, c] = self.0;
        if a == b && b == c {
            ReelMatch::Triple(a)
        } else if a == b {
            ReelMatch::Pair { matched: a, odd: c }
        } else if a == c {
            ReelMatch::Pair { matched: a, odd: b }
        } else if b == c {
            ReelMatch::Pair { matched: b, odd: a }
        } else {
            ReelMatch::Distinct
        }
    }

    /// Parse reels from client-supplied symbol names; `None` unless exactly
    /// three names are all recognised.
    #[must_use]
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let parsed: SmallVec<[Symbol; 3]> = names
            .into_iter()
            .map(str::parse::<Symbol>)
            .collect::<Result<_, _>>()
            .ok()?;
        let symbols: [Symbol; 3] = parsed.into_inner().ok()?;
        Some(Self(symbols))
    }
}

impl fmt::Display for Reels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.emojis();
        write!(f, "{a} {b} {c}")
    }
}

/// Synthesize three reel symbols that produce `outcome`.
///
/// `last_reel_miss_chance` is the probability that a near miss shows its odd
/// symbol on the final reel; otherwise it lands on one of the first two.
pub fn generate_reels<R: Rng + ?Sized>(
    outcome: Outcome,
    last_reel_miss_chance: f64,
    rng: &mut R,
) -> Reels {
    match outcome {
        Outcome::Hit => {
            let symbol = random_symbol(rng);
            Reels([symbol; 3])
        }
        Outcome::NearMiss => {
            let matched = random_symbol(rng);
            let step = if rng.gen_bool(0.5) { 1 } else { -1 };
            let odd = matched.offset(step);
            let mut symbols = [matched; 3];
            let miss_pos = if rng.gen_bool(last_reel_miss_chance.clamp(0.0, 1.0)) {
                2
            } else {
                rng.gen_range(0..2)
            };
            symbols[miss_pos] = odd;
            Reels(symbols)
        }
        Outcome::Loss => sample_loss(rng),
    }
}

fn random_symbol<R: Rng + ?Sized>(rng: &mut R) -> Symbol {
    Symbol::from_index(rng.gen_range(0..Symbol::ALL.len()))
}

fn sample_loss<R: Rng + ?Sized>(rng: &mut R) -> Reels {
    for _ in 0..SLOT_LOSS_SAMPLE_ATTEMPTS {
        let picks = rand::seq::index::sample(rng, Symbol::ALL.len(), 3);
        let symbols = [
            Symbol::from_index(picks.index(0)),
            Symbol::from_index(picks.index(1)),
            Symbol::from_index(picks.index(2)),
        ];
        if pairwise_far(&symbols) {
            return Reels(symbols);
        }
    }
    log::debug!("loss reel sampling exhausted; using fallback triple");
    Reels::FALLBACK_LOSS
}

fn pairwise_far(symbols: &[Symbol; 3]) -> bool {
    let [a, b, c] = *symbols;
    cyclic_distance(a, b) > 1 && cyclic_distance(a, c) > 1 && cyclic_distance(b, c) > 1
}

/// Inline capacity covers the default fifteen-trial design without allocating.
pub type TemplateSlots = SmallVec<[Outcome; 16]>;

/// Shuffled multiset of outcome labels dealt positionally to a reel session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTemplate {
    slots: TemplateSlots,
}

impl OutcomeTemplate {
    /// Expand `counts` into a multiset and shuffle it.
    pub fn shuffled<R: Rng + ?Sized>(counts: &OutcomeCounts, rng: &mut R) -> Self {
        let mut slots = TemplateSlots::new();
        for outcome in Outcome::ALL {
            for _ in 0..counts.count(outcome) {
                slots.push(outcome);
            }
        }
        slots.shuffle(rng);
        Self { slots }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Label for 1-based trial `n`, if the template covers it.
    #[must_use]
    pub fn get(&self, trial_number: u32) -> Option<Outcome> {
        let index = usize::try_from(trial_number.checked_sub(1)?).ok()?;
        self.slots.get(index).copied()
    }

    /// Label for trial `n`, falling back to a uniform draw past the template.
    pub fn label_for<R: Rng + ?Sized>(&self, trial_number: u32, rng: &mut R) -> Outcome {
        self.get(trial_number).unwrap_or_else(|| {
            Outcome::ALL
                .choose(rng)
                .copied()
                .unwrap_or(Outcome::Loss)
        })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Outcome] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn cyclic_distance_wraps() {
        assert_eq!(cyclic_distance(Symbol::Cherry, Symbol::Seven), 1);
        assert_eq!(cyclic_distance(Symbol::Cherry, Symbol::Grape), 3);
        assert_eq!(cyclic_distance(Symbol::Lemon, Symbol::Bell), 3);
        assert_eq!(cyclic_distance(Symbol::Bell, Symbol::Bell), 0);
        assert_eq!(Symbol::Cherry.offset(-1), Symbol::Seven);
        assert_eq!(Symbol::Seven.offset(1), Symbol::Cherry);
    }

    #[test]
    fn classify_finds_pair_in_any_position() {
        use Symbol::{Bell, Grape};
        assert_eq!(
            Reels([Bell, Bell, Grape]).classify(),
            ReelMatch::Pair {
                matched: Bell,
                odd: Grape
            }
        );
        assert_eq!(
            Reels([Grape, Bell, Bell]).classify(),
            ReelMatch::Pair {
                matched: Bell,
                odd: Grape
            }
        );
        assert_eq!(
            Reels([Bell, Grape, Bell]).classify(),
            ReelMatch::Pair {
                matched: Bell,
                odd: Grape
            }
        );
        assert_eq!(Reels([Bell; 3]).classify(), ReelMatch::Triple(Bell));
        assert_eq!(Reels::FALLBACK_LOSS.classify(), ReelMatch::Distinct);
    }

    #[test]
    fn fallback_loss_is_pairwise_far() {
        assert!(pairwise_far(&Reels::FALLBACK_LOSS.symbols()));
    }

    #[test]
    fn from_names_requires_three_known_symbols() {
        assert_eq!(
            Reels::from_names(["cherry", "Lemon", " seven "]),
            Some(Reels([Symbol::Cherry, Symbol::Lemon, Symbol::Seven]))
        );
        assert_eq!(Reels::from_names(["cherry", "lemon"]), None);
        assert_eq!(Reels::from_names(["cherry", "lemon", "kiwi"]), None);
        assert_eq!(Reels::from_names(["bell", "bell", "bell", "bell"]), None);
    }

    #[test]
    fn near_miss_prefers_last_reel() {
        let mut rng = SmallRng::seed_from_u64(0xBEEF);
        let mut last = 0_u32;
        for _ in 0..2000 {
            let reels = generate_reels(Outcome::NearMiss, 0.7, &mut rng);
            let [a, b, c] = reels.symbols();
            if a == b && c != a {
                last += 1;
            }
        }
        let ratio = f64::from(last) / 2000.0;
        assert!((ratio - 0.7).abs() < 0.05, "last-reel ratio {ratio}");
    }

    #[test]
    fn always_last_reel_when_chance_is_one() {
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..200 {
            let [a, b, c] = generate_reels(Outcome::NearMiss, 1.0, &mut rng).symbols();
            assert_eq!(a, b);
            assert_ne!(c, a);
        }
    }

    #[test]
    fn template_expands_counts_and_falls_back() {
        let counts = OutcomeCounts {
            hit: 2,
            near_miss: 1,
            loss: 0,
        };
        let mut rng = SmallRng::seed_from_u64(11);
        let template = OutcomeTemplate::shuffled(&counts, &mut rng);
        assert_eq!(template.len(), 3);
        assert_eq!(template.get(0), None);
        assert_eq!(template.get(4), None);
        let hits = template
            .as_slice()
            .iter()
            .filter(|o| **o == Outcome::Hit)
            .count();
        assert_eq!(hits, 2);
        // Beyond the template a label is still produced.
        let label = template.label_for(9, &mut rng);
        assert!(Outcome::ALL.contains(&label));
    }
}
