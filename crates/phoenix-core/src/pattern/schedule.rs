use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::pattern::{AGGRESSOR_PAIRS, PatternAlgorithm, PatternError};

/// A run of consecutive tREFIs hammering one aggressor pair, or idling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Length of the phase in tREFIs
    pub trefis: usize,
    /// Aggressor pair hammered during the phase, `None` for an idle window
    pub pair: Option<usize>,
}

/// How the aggressor pairs of a pattern are interleaved over its period.
///
/// The phases are laid out back to back starting at tREFI 0 and cover the whole period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSchedule {
    /// Pattern the schedule belongs to
    pub algorithm: PatternAlgorithm,
    /// Phases in tREFI order
    pub phases: Vec<Phase>,
}

impl PatternSchedule {
    /// The built-in schedule of `algorithm`: every pair in turn, in equal contiguous phases.
    pub fn default_for(algorithm: PatternAlgorithm) -> Self {
        let trefis = algorithm.period() / AGGRESSOR_PAIRS;
        PatternSchedule {
            algorithm,
            phases: (0..AGGRESSOR_PAIRS)
                .map(|pair| Phase {
                    trefis,
                    pair: Some(pair),
                })
                .collect(),
        }
    }

    /// Loads a schedule from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed or the schedule is invalid.
    pub fn from_jsonfile(path: impl AsRef<Path>) -> Result<Self, PatternError> {
        let file = File::open(path.as_ref())?;
        let schedule: PatternSchedule = serde_json::from_reader(BufReader::new(file))?;
        schedule.validate()?;
        Ok(schedule)
    }

    /// Checks that the phases are non-empty, name existing pairs and add up to the period.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), PatternError> {
        for (phase, p) in self.phases.iter().enumerate() {
            if p.trefis == 0 {
                return Err(PatternError::EmptyPhase(phase));
            }
            if let Some(pair) = p.pair.filter(|&pair| pair >= AGGRESSOR_PAIRS) {
                return Err(PatternError::InvalidPair { phase, pair });
            }
        }
        let period = self.period();
        if period != self.algorithm.period() {
            return Err(PatternError::PeriodMismatch {
                algorithm: self.algorithm,
                expected: self.algorithm.period(),
                found: period,
            });
        }
        Ok(())
    }

    /// Sum of the phase lengths.
    pub fn period(&self) -> usize {
        self.phases.iter().map(|p| p.trefis).sum()
    }

    /// Pair hammered in each tREFI of the period.
    pub fn slots(&self) -> Vec<Option<usize>> {
        self.phases
            .iter()
            .flat_map(|p| std::iter::repeat_n(p.pair, p.trefis))
            .collect()
    }
}
