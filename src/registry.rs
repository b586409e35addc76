//! Read-only snapshots of the instrument, sample, and voice libraries
//!
//! Stages validate every resource reference their generated content
//! mentions against these snapshots; anything unknown is pruned with a
//! warning rather than failing the run. A snapshot is taken once per
//! generation request and never refreshed mid-run.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRegistries {
    /// Category (e.g. "chords", "bass") to available instrument names.
    #[serde(default)]
    pub instruments: BTreeMap<String, BTreeSet<String>>,
    /// Category to available sample identifiers.
    #[serde(default)]
    pub samples: BTreeMap<String, BTreeSet<String>>,
    /// Available voice-model identifiers.
    #[serde(default)]
    pub voices: BTreeSet<String>,
}

impl ResourceRegistries {
    /// True if any category carries an instrument with this name.
    pub fn has_instrument(&self, name: &str) -> bool {
        self.instruments.values().any(|set| set.contains(name))
    }

    pub fn has_voice(&self, id: &str) -> bool {
        self.voices.contains(id)
    }

    pub fn has_sample(&self, id: &str) -> bool {
        self.samples.values().any(|set| set.contains(id))
    }

    /// Instruments available in a category, in registry order.
    pub fn instruments_in(&self, category: &str) -> impl Iterator<Item = &str> {
        self.instruments
            .get(category)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// First instrument of a category, used when a fallback bed needs a
    /// guaranteed-valid name.
    pub fn first_instrument_in(&self, category: &str) -> Option<&str> {
        self.instruments_in(category).next()
    }

    pub fn first_voice(&self) -> Option<&str> {
        self.voices.iter().next().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty() && self.samples.is_empty() && self.voices.is_empty()
    }

    /// Small default library so the CLI can run without a registry file.
    pub fn builtin() -> Self {
        fn set(names: &[&str]) -> BTreeSet<String> {
            names.iter().map(|s| s.to_string()).collect()
        }

        let mut instruments = BTreeMap::new();
        instruments.insert(
            "chords".to_string(),
            set(&["piano", "electric-piano", "acoustic-guitar", "synth-pad"]),
        );
        instruments.insert(
            "bass".to_string(),
            set(&["electric-bass", "synth-bass", "upright-bass"]),
        );
        instruments.insert(
            "drums".to_string(),
            set(&["acoustic-kit", "lofi-kit", "electronic-kit"]),
        );
        instruments.insert(
            "lead".to_string(),
            set(&["synth-lead", "electric-guitar", "flute", "violin"]),
        );
        instruments.insert("pad".to_string(), set(&["warm-pad", "string-ensemble"]));

        let mut samples = BTreeMap::new();
        samples.insert("percussion".to_string(), set(&["vinyl-crackle", "shaker-loop"]));
        samples.insert("ambience".to_string(), set(&["rain", "cafe-noise"]));

        Self {
            instruments,
            samples,
            voices: set(&["aria", "juno", "atlas"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_covers_all_categories() {
        let reg = ResourceRegistries::builtin();
        assert!(reg.has_instrument("piano"));
        assert!(reg.has_instrument("lofi-kit"));
        assert!(!reg.has_instrument("theremin"));
        assert!(reg.has_voice("aria"));
        assert!(!reg.has_voice("unknown-voice"));
        assert!(reg.has_sample("vinyl-crackle"));
        assert_eq!(reg.first_instrument_in("bass"), Some("electric-bass"));
        assert!(reg.first_voice().is_some());
    }

    #[test]
    fn empty_registry_prunes_everything() {
        let reg = ResourceRegistries::default();
        assert!(reg.is_empty());
        assert!(reg.first_instrument_in("chords").is_none());
        assert!(reg.first_voice().is_none());
    }
}
