//! Sweep ranges given on the command line as `N` or `start:end:step`.

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// A malformed sweep range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    /// Not `N` or `start:end:step`
    #[error("expected N or start:end:step, got '{0}'")]
    Syntax(String),
    /// A component is not a number
    #[error("invalid number '{0}'")]
    Number(String),
    /// Zero step
    #[error("step must be greater than 0")]
    ZeroStep,
    /// End before start
    #[error("end {end} is smaller than start {start}")]
    Descending {
        /// First value
        start: u64,
        /// Last value
        end: u64,
    },
}

/// Values `start, start + step, ...` up to and including `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepRange {
    start: u64,
    end: u64,
    step: u64,
}

impl SweepRange {
    /// A range holding only `value`.
    pub fn single(value: u64) -> Self {
        SweepRange {
            start: value,
            end: value,
            step: 1,
        }
    }

    /// All values of the range in ascending order.
    pub fn values(&self) -> Vec<u64> {
        (self.start..=self.end).step_by(self.step as usize).collect()
    }

    /// Like [`SweepRange::values`], as `usize`.
    pub fn values_usize(&self) -> Vec<usize> {
        self.values().into_iter().map(|v| v as usize).collect()
    }
}

impl FromStr for SweepRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = |p: &str| {
            p.trim()
                .parse::<u64>()
                .map_err(|_| RangeError::Number(p.to_owned()))
        };
        let parts: Vec<&str> = s.split(':').collect();
        let (start, end, step) = match parts.as_slice() {
            [n] => return Ok(SweepRange::single(number(n)?)),
            [start, end, step] => (number(start)?, number(end)?, number(step)?),
            _ => return Err(RangeError::Syntax(s.to_owned())),
        };
        if step == 0 {
            return Err(RangeError::ZeroStep);
        }
        if end < start {
            return Err(RangeError::Descending { start, end });
        }
        Ok(SweepRange { start, end, step })
    }
}

impl std::fmt::Display for SweepRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.end, self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_include_the_end() {
        let r: SweepRange = "86:92:2".parse().unwrap();
        assert_eq!(r.values(), vec![86, 88, 90, 92]);
        let r: SweepRange = "23000:26000:1000".parse().unwrap();
        assert_eq!(r.values(), vec![23000, 24000, 25000, 26000]);
        let r: SweepRange = "1:6:2".parse().unwrap();
        assert_eq!(r.values_usize(), vec![1, 3, 5]);
    }

    #[test]
    fn single_values() {
        let r: SweepRange = "88".parse().unwrap();
        assert_eq!(r.values(), vec![88]);
        assert_eq!(r.to_string(), "88:88:1");
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert_eq!("1:2".parse::<SweepRange>(), Err(RangeError::Syntax("1:2".into())));
        assert_eq!(
            "a:2:1".parse::<SweepRange>(),
            Err(RangeError::Number("a".into()))
        );
        assert_eq!("1:2:0".parse::<SweepRange>(), Err(RangeError::ZeroStep));
        assert_eq!(
            "5:1:1".parse::<SweepRange>(),
            Err(RangeError::Descending { start: 5, end: 1 })
        );
        assert!("-3".parse::<SweepRange>().is_err());
    }
}
