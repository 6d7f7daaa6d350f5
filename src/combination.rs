// Montage enumeration
//
// Every (e1+, e1-) from E1+ x E1- is combined with every (e2+, e2-) from
// E2+ x E2-. The outer loop runs over the first channel so ordinals are
// stable between runs and usable for progress reporting.

use crate::electrode::{ElectrodePair, ElectrodeSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// What to do with combinations that repeat an earlier montage with the two
/// channels swapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Exhaustive search, every combination is emitted
    #[default]
    Keep,
    /// Drop ((a, b), (c, d)) when ((c, d), (a, b)) was already emitted
    SkipMirrored,
}

/// One stimulation configuration: two channels and its position in the
/// enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination {
    pub index: usize,
    pub first: ElectrodePair,
    pub second: ElectrodePair,
}

impl Combination {
    /// The same electrode pair drives both channels
    pub fn channels_coincide(&self) -> bool {
        self.first == self.second
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) x ({}, {})", self.first.plus, self.first.minus, self.second.plus, self.second.minus)
    }
}

fn pairs(plus: &ElectrodeSet, minus: &ElectrodeSet) -> Vec<ElectrodePair> {
    plus.electrodes()
        .iter()
        .flat_map(|p| minus.electrodes().iter().map(move |m| ElectrodePair::new(p.as_str(), m.as_str())))
        .collect()
}

/// Enumerate all montages. With [`DuplicatePolicy::Keep`] the output length
/// is `|E1+| * |E1-| * |E2+| * |E2-|`.
pub fn generate_combinations(
    e1_plus: &ElectrodeSet,
    e1_minus: &ElectrodeSet,
    e2_plus: &ElectrodeSet,
    e2_minus: &ElectrodeSet,
    policy: DuplicatePolicy,
) -> Vec<Combination> {
    let first_channel = pairs(e1_plus, e1_minus);
    let second_channel = pairs(e2_plus, e2_minus);

    let mut seen: HashSet<(ElectrodePair, ElectrodePair)> = HashSet::new();
    let mut combinations = Vec::with_capacity(first_channel.len() * second_channel.len());

    for first in &first_channel {
        for second in &second_channel {
            if policy == DuplicatePolicy::SkipMirrored {
                if seen.contains(&(second.clone(), first.clone())) {
                    log::debug!("Skipping mirrored montage {} / {}", first, second);
                    continue;
                }
                seen.insert((first.clone(), second.clone()));
            }

            combinations.push(Combination {
                index: combinations.len(),
                first: first.clone(),
                second: second.clone(),
            });
        }
    }

    combinations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrode::LabelFormat;

    fn set(name: &str, labels: &[&str]) -> ElectrodeSet {
        ElectrodeSet::new(name, labels.iter().copied(), &LabelFormat::default()).unwrap()
    }

    #[test]
    fn test_small_enumeration_order() {
        let combos = generate_combinations(
            &set("E1+", &["E001"]),
            &set("E1-", &["E002"]),
            &set("E2+", &["E003", "E004"]),
            &set("E2-", &["E005"]),
            DuplicatePolicy::Keep,
        );

        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].first, ElectrodePair::new("E001", "E002"));
        assert_eq!(combos[0].second, ElectrodePair::new("E003", "E005"));
        assert_eq!(combos[1].first, ElectrodePair::new("E001", "E002"));
        assert_eq!(combos[1].second, ElectrodePair::new("E004", "E005"));
        assert_eq!(combos[1].index, 1);
    }

    #[test]
    fn test_count_is_product() {
        let combos = generate_combinations(
            &set("E1+", &["E001", "E002"]),
            &set("E1-", &["E003", "E004", "E005"]),
            &set("E2+", &["E006", "E007"]),
            &set("E2-", &["E008", "E009"]),
            DuplicatePolicy::Keep,
        );
        assert_eq!(combos.len(), 2 * 3 * 2 * 2);

        // outer loop over the first channel, nested lexicographic order
        assert_eq!(combos[0].first, ElectrodePair::new("E001", "E003"));
        assert_eq!(combos[3].second, ElectrodePair::new("E007", "E009"));
        assert_eq!(combos[4].first, ElectrodePair::new("E001", "E004"));
        assert_eq!(combos.last().unwrap().first, ElectrodePair::new("E002", "E005"));
        assert!(combos.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn test_degenerate_pairs_kept() {
        let same = set("x", &["E001"]);
        let combos = generate_combinations(&same, &same, &same, &same, DuplicatePolicy::Keep);
        assert_eq!(combos.len(), 1);
        assert!(combos[0].first.is_degenerate());
        assert!(combos[0].channels_coincide());
    }

    #[test]
    fn test_skip_mirrored() {
        let plus = set("p", &["E001", "E003"]);
        let minus = set("m", &["E002"]);

        let all = generate_combinations(&plus, &minus, &plus, &minus, DuplicatePolicy::Keep);
        assert_eq!(all.len(), 4);

        let unique = generate_combinations(&plus, &minus, &plus, &minus, DuplicatePolicy::SkipMirrored);
        // ((E003,E002),(E001,E002)) mirrors the second combination
        assert_eq!(unique.len(), 3);
        assert!(unique.iter().enumerate().all(|(i, c)| c.index == i));
    }
}
