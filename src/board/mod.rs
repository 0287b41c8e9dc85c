use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;


/// Opaque bed identifier (e.g., "7", "12A")
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BedId(String);

impl BedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BedId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for BedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bed status value. Compared, never interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BedStatus(String);

impl BedStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BedStatus {
    fn from(status: &str) -> Self {
        Self(status.to_string())
    }
}

impl fmt::Display for BedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time mapping of beds to statuses.
///
/// Either total over the known bed set (a full board) or partial (a delta).
/// Each bed appears at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<BedId, BedStatus>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bed: &BedId) -> Option<&BedStatus> {
        self.0.get(bed)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BedId, &BedStatus)> {
        self.0.iter()
    }

    /// Returns a copy of this snapshot with every bed in `delta` overwritten.
    pub fn overlay(&self, delta: &Snapshot) -> Snapshot {
        let mut merged = self.0.clone();
        for (bed, status) in delta.iter() {
            merged.insert(bed.clone(), status.clone());
        }
        Snapshot(merged)
    }
}

impl FromIterator<(BedId, BedStatus)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (BedId, BedStatus)>>(iter: I) -> Self {
        Snapshot(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(bed, status)| (BedId::from(bed), BedStatus::from(status)))
            .collect()
    }
}

/// Rejections for a proposed board change
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoardError {
    #[error("update contains no beds")]
    EmptyUpdate,
    #[error("unknown bed '{0}'")]
    UnknownBed(BedId),
    #[error("status '{status}' is not allowed (bed '{bed}')")]
    UnknownStatus { bed: BedId, status: BedStatus },
}

/// The fixed bed set and status vocabulary the board accepts
#[derive(Clone, Debug)]
pub struct BoardRules {
    beds: BTreeSet<BedId>,
    initial_status: BedStatus,
    /// Closed vocabulary; empty means any status is accepted
    statuses: BTreeSet<BedStatus>,
}

impl BoardRules {
    pub fn new(
        beds: impl IntoIterator<Item = BedId>,
        initial_status: BedStatus,
        statuses: impl IntoIterator<Item = BedStatus>,
    ) -> Self {
        Self {
            beds: beds.into_iter().collect(),
            initial_status,
            statuses: statuses.into_iter().collect(),
        }
    }

    pub fn is_known(&self, bed: &BedId) -> bool {
        self.beds.contains(bed)
    }

    /// Board state used while the history log is empty: every bed at its
    /// initial status.
    pub fn initial_snapshot(&self) -> Snapshot {
        self.beds
            .iter()
            .map(|bed| (bed.clone(), self.initial_status.clone()))
            .collect()
    }

    /// Checks that a proposed change only names known beds and allowed statuses.
    pub fn validate(&self, patch: &Snapshot) -> Result<(), BoardError> {
        if patch.is_empty() {
            return Err(BoardError::EmptyUpdate);
        }

        for (bed, status) in patch.iter() {
            if !self.is_known(bed) {
                return Err(BoardError::UnknownBed(bed.clone()));
            }
            if !self.statuses.is_empty() && !self.statuses.contains(status) {
                return Err(BoardError::UnknownStatus {
                    bed: bed.clone(),
                    status: status.clone(),
                });
            }
        }

        Ok(())
    }
}

impl Default for BoardRules {
    fn default() -> Self {
        Self::new(
            (1..=20).map(|n| BedId::new(n.to_string())),
            BedStatus::from("available"),
            ["available", "occupied", "cleaning"].map(BedStatus::from),
        )
    }
}
