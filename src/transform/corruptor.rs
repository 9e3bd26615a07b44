//! Text corruption transform simulating recognition errors.
//!
//! Applies homophone substitution on whole words and phonetic confusions on
//! substrings, each gated by a configured probability. With a seed set the
//! corruption is deterministic per unit (independent of processing order).

use crate::config::CorruptorConfig;
use crate::corpus::WorkUnit;
use crate::transform::{Transform, TransformError};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Homophone substitutions applied to whole lowercase words.
const HOMOPHONES: &[(&str, &[&str])] = &[
    ("there", &["their", "they're"]),
    ("to", &["too", "two"]),
    ("four", &["for", "fore"]),
    ("write", &["right", "rite"]),
    ("hear", &["here", "hair"]),
    ("your", &["you're", "yore"]),
    ("its", &["it's"]),
    ("weather", &["whether"]),
    ("which", &["witch"]),
    ("who's", &["whose"]),
    ("accept", &["except"]),
    ("affect", &["effect"]),
];

/// Phonetic confusions applied inside words. Digraphs come first so they
/// are not shadowed by their single-letter components.
const PHONETIC_CONFUSIONS: &[(&str, &[&str])] = &[
    ("ch", &["sh", "tch"]),
    ("ai", &["ay", "ei"]),
    ("s", &["z", "c"]),
    ("f", &["th", "ph"]),
    ("k", &["c", "q"]),
    ("m", &["n"]),
    ("d", &["t"]),
    ("b", &["p"]),
    ("v", &["f"]),
    ("g", &["j"]),
];

/// Built-in corruption transform.
#[derive(Debug, Clone)]
pub struct Corruptor {
    config: CorruptorConfig,
}

impl Corruptor {
    /// Create a corruptor with the given parameters.
    pub fn new(config: CorruptorConfig) -> Self {
        Self { config }
    }

    /// Corrupt one text with the provided RNG.
    fn corrupt(&self, text: &str, rng: &mut StdRng) -> String {
        let mut corrupted = Vec::new();

        for word in text.split_whitespace() {
            let mut word = word.to_string();

            if rng.gen_bool(self.config.word_prob) {
                let lower = word.to_lowercase();
                if let Some((_, alternatives)) =
                    HOMOPHONES.iter().find(|(original, _)| *original == lower)
                {
                    word = alternatives
                        .choose(rng)
                        .map(|s| s.to_string())
                        .unwrap_or(word);
                } else {
                    for (sound, alternatives) in PHONETIC_CONFUSIONS {
                        if lower.contains(sound) && rng.gen_bool(self.config.phoneme_prob) {
                            if let Some(alt) = alternatives.choose(rng) {
                                word = word.replace(sound, alt);
                            }
                        }
                    }
                }
            }

            corrupted.push(word);
        }

        corrupted.join(" ")
    }

    /// RNG for one unit. Seeded runs derive a per-unit seed from the unit's
    /// coordinates so results do not depend on processing order.
    fn rng_for(&self, unit: &WorkUnit) -> StdRng {
        match self.config.seed {
            Some(seed) => {
                let mut hasher = DefaultHasher::new();
                unit.shard_id.hash(&mut hasher);
                unit.sequence_index.hash(&mut hasher);
                StdRng::seed_from_u64(seed ^ hasher.finish())
            }
            None => StdRng::from_entropy(),
        }
    }
}

#[async_trait]
impl Transform for Corruptor {
    fn name(&self) -> &str {
        "corruptor"
    }

    fn fingerprint(&self) -> String {
        format!(
            "corruptor/w{:.3}/p{:.3}/s{}",
            self.config.word_prob,
            self.config.phoneme_prob,
            self.config
                .seed
                .map_or_else(|| "none".to_string(), |s| s.to_string())
        )
    }

    async fn apply(&self, unit: &WorkUnit) -> Result<String, TransformError> {
        let mut rng = self.rng_for(unit);
        Ok(self.corrupt(&unit.payload, &mut rng))
    }
}
