//! Step distances between applied versions and the on-disk sequence.
//!
//! Versions are timestamps, not counters, so "how far apart" two databases
//! are can only be answered by walking the logical steps between them.

use serde::Serialize;

use crate::error::{SeqError, SeqResult};

/// Signed distance in logical steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDistance {
    /// One side has never been migrated (version 0).
    NotMigrated,
    /// Negative: the comparison side still owes that many steps.
    Steps(i64),
}

impl StepDistance {
    pub fn is_in_sync(&self) -> bool {
        matches!(self, StepDistance::Steps(0))
    }

    pub fn steps(&self) -> Option<i64> {
        match self {
            StepDistance::Steps(n) => Some(*n),
            StepDistance::NotMigrated => None,
        }
    }
}

fn position(steps: &[u64], version: u64) -> SeqResult<usize> {
    steps
        .iter()
        .position(|v| *v == version)
        .ok_or(SeqError::VersionNotFound { version })
}

/// Steps between `reference` and `comparison` along `steps` (ascending
/// logical-step versions). Negative when `comparison` trails `reference`.
///
/// Both versions must appear in `steps`; an applied version with no file
/// behind it is an error rather than a guessed count.
pub fn reconcile(reference: u64, comparison: u64, steps: &[u64]) -> SeqResult<StepDistance> {
    if reference == 0 || comparison == 0 {
        return Ok(StepDistance::NotMigrated);
    }

    if reference == comparison {
        return Ok(StepDistance::Steps(0));
    }

    let anchor = reference.min(comparison);
    let breakpoint = reference.max(comparison);

    let i = position(steps, anchor)?;
    let j = position(steps, breakpoint)?;
    let count = (j - i) as i64;

    if comparison < reference {
        Ok(StepDistance::Steps(-count))
    } else {
        Ok(StepDistance::Steps(count))
    }
}

/// Distance from `applied` to the newest step on disk.
pub fn pending(applied: u64, steps: &[u64]) -> SeqResult<StepDistance> {
    if applied == 0 {
        return Ok(StepDistance::NotMigrated);
    }

    let latest = *steps
        .last()
        .ok_or(SeqError::VersionNotFound { version: applied })?;

    reconcile(latest, applied, steps)
}

/// The next `n` step versions after `applied` (0 means from the start).
pub fn next_versions(applied: u64, steps: &[u64], n: usize) -> SeqResult<Vec<u64>> {
    let start = if applied == 0 {
        0
    } else {
        position(steps, applied)? + 1
    };

    Ok(steps.iter().skip(start).take(n).copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STEPS: &[u64] = &[100, 102, 104, 105, 110, 111];

    #[test]
    fn test_distance_is_position_difference() {
        // i = 1, j = 4
        assert_eq!(reconcile(110, 102, STEPS).unwrap(), StepDistance::Steps(-3));
        assert_eq!(reconcile(102, 110, STEPS).unwrap(), StepDistance::Steps(3));
    }

    #[test]
    fn test_every_pair_of_positions() {
        for i in 0..STEPS.len() {
            for j in i + 1..STEPS.len() {
                let expected = (j - i) as i64;
                assert_eq!(
                    reconcile(STEPS[j], STEPS[i], STEPS).unwrap(),
                    StepDistance::Steps(-expected)
                );
                assert_eq!(
                    reconcile(STEPS[i], STEPS[j], STEPS).unwrap(),
                    StepDistance::Steps(expected)
                );
            }
        }
    }

    #[test]
    fn test_same_version_and_never_migrated() {
        assert!(reconcile(104, 104, STEPS).unwrap().is_in_sync());
        assert_eq!(reconcile(0, 104, STEPS).unwrap(), StepDistance::NotMigrated);
        assert_eq!(reconcile(104, 0, STEPS).unwrap(), StepDistance::NotMigrated);
        assert_eq!(StepDistance::NotMigrated.steps(), None);
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let err = reconcile(110, 103, STEPS).unwrap_err();
        assert!(matches!(err, SeqError::VersionNotFound { version: 103 }));
    }

    #[test]
    fn test_pending() {
        assert_eq!(pending(104, STEPS).unwrap(), StepDistance::Steps(-3));
        assert_eq!(pending(111, STEPS).unwrap(), StepDistance::Steps(0));
        assert_eq!(pending(0, STEPS).unwrap(), StepDistance::NotMigrated);
        assert!(pending(104, &[]).is_err());
    }

    #[test]
    fn test_next_versions() {
        assert_eq!(next_versions(104, STEPS, 2).unwrap(), vec![105, 110]);
        assert_eq!(next_versions(0, STEPS, 1).unwrap(), vec![100]);
        assert_eq!(next_versions(111, STEPS, 3).unwrap(), Vec::<u64>::new());
        assert!(next_versions(1, STEPS, 1).is_err());
    }
}
