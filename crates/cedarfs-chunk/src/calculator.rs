use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::goal::Goal;
use crate::part::ChunkPartType;

/// Derived availability classification of a chunk.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChunkAvailability {
    /// The data is not reconstructible from the surviving parts.
    Lost,
    /// Reconstructible, but one further loss away from `Lost`.
    Endangered,
    /// At least two independent losses away from `Lost`.
    Safe,
}

/// Answers redundancy questions about a set of chunk parts.
///
/// Fed the chunk's goal and the part type of every counted copy, it derives
/// the availability state, the parts still missing for the goal, and the
/// parts that have no place under the goal.
///
/// Recovery schemes considered: any single standard copy reconstructs the
/// data, as do any `level` distinct parts of an XOR scheme of that level
/// (the parity substitutes for one missing data part). The availability
/// state is the best over all schemes: a standard copy set is safe with two
/// or more copies and endangered with one; an XOR level is safe with all
/// `level + 1` part kinds present and endangered with exactly `level`.
#[derive(Debug, Clone)]
pub struct PartSetCalculator {
    goal: Goal,
    counts: BTreeMap<ChunkPartType, u32>,
    standard_copies: u32,
}

impl PartSetCalculator {
    pub fn new(goal: Goal) -> Self {
        Self {
            goal,
            counts: BTreeMap::new(),
            standard_copies: 0,
        }
    }

    pub fn add_part(&mut self, part: ChunkPartType) {
        *self.counts.entry(part).or_insert(0) += 1;
        if part.is_standard() {
            self.standard_copies += 1;
        }
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    pub fn standard_copies(&self) -> u32 {
        self.standard_copies
    }

    /// Distinct part kinds present of the given XOR level.
    fn xor_parts_present(&self, level: u8) -> u32 {
        self.counts
            .keys()
            .filter(|p| p.xor_level() == Some(level))
            .count() as u32
    }

    /// Every XOR level with at least one part present.
    fn xor_levels(&self) -> Vec<u8> {
        let mut levels: Vec<u8> = self.counts.keys().filter_map(|p| p.xor_level()).collect();
        levels.sort_unstable();
        levels.dedup();
        levels
    }

    /// Whether the chunk data can be reconstructed from the present parts.
    pub fn is_recovery_possible(&self) -> bool {
        if self.standard_copies > 0 {
            return true;
        }
        self.xor_levels()
            .iter()
            .any(|&level| self.xor_parts_present(level) >= level as u32)
    }

    /// The derived availability state.
    pub fn state(&self) -> ChunkAvailability {
        let mut best = match self.standard_copies {
            0 => ChunkAvailability::Lost,
            1 => ChunkAvailability::Endangered,
            _ => ChunkAvailability::Safe,
        };
        for level in self.xor_levels() {
            let present = self.xor_parts_present(level);
            let state = if present == level as u32 + 1 {
                ChunkAvailability::Safe
            } else if present == level as u32 {
                ChunkAvailability::Endangered
            } else {
                ChunkAvailability::Lost
            };
            best = best.max(state);
        }
        best
    }

    /// Required parts of the goal that are missing, in deterministic order
    /// (standard deficit for ordinary goals; missing data parts ascending,
    /// then parity, for XOR goals).
    pub fn parts_to_recover(&self) -> Vec<ChunkPartType> {
        match self.goal.xor_level() {
            None => {
                if !self.goal.is_ordinary() {
                    return Vec::new();
                }
                let deficit = (self.goal.as_u8() as u32).saturating_sub(self.standard_copies);
                vec![ChunkPartType::Standard; deficit as usize]
            }
            Some(_) => ChunkPartType::required_for(self.goal)
                .into_iter()
                .filter(|p| !self.counts.contains_key(p))
                .collect(),
        }
    }

    /// Parts with no place under the goal: foreign-scheme parts, duplicates
    /// of XOR parts, and standard copies beyond an ordinary goal.
    pub fn parts_to_remove(&self) -> Vec<ChunkPartType> {
        let mut result = Vec::new();
        match self.goal.xor_level() {
            None => {
                let keep = if self.goal.is_ordinary() {
                    self.goal.as_u8() as u32
                } else {
                    0
                };
                let surplus = self.standard_copies.saturating_sub(keep);
                result.extend(std::iter::repeat(ChunkPartType::Standard).take(surplus as usize));
                for (&part, &count) in &self.counts {
                    if part.is_xor() {
                        result.extend(std::iter::repeat(part).take(count as usize));
                    }
                }
            }
            Some(level) => {
                for (&part, &count) in &self.counts {
                    if part.xor_level() == Some(level) {
                        // Keep one copy of each required part kind.
                        result.extend(std::iter::repeat(part).take(count as usize - 1));
                    } else {
                        result.extend(std::iter::repeat(part).take(count as usize));
                    }
                }
            }
        }
        result
    }

    pub fn count_parts_to_recover(&self) -> u32 {
        self.parts_to_recover().len() as u32
    }

    pub fn count_parts_to_remove(&self) -> u32 {
        self.parts_to_remove().len() as u32
    }

    /// Distinct part kinds present, for multi-source replication requests.
    pub fn available_parts(&self) -> Vec<ChunkPartType> {
        self.counts.keys().copied().collect()
    }
}
