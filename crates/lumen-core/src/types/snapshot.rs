//! Evolving metric bundle owned by one instance

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::errors::{LumenError, Result};

/// Ordered phase bands, lowest to highest
///
/// The derived `Ord` follows declaration order, so comparing phases compares bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Lowest band
    Nascent,
    /// Second band
    Emerging,
    /// Third band
    Developing,
    /// Fourth band
    Coherent,
    /// Fifth band
    Integrated,
    /// Sixth band
    Flourishing,
    /// Highest band
    Peak,
}

impl Phase {
    /// All phases in ascending order
    pub const ALL: [Phase; 7] = [
        Phase::Nascent,
        Phase::Emerging,
        Phase::Developing,
        Phase::Coherent,
        Phase::Integrated,
        Phase::Flourishing,
        Phase::Peak,
    ];

    /// Wire name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Nascent => "nascent",
            Phase::Emerging => "emerging",
            Phase::Developing => "developing",
            Phase::Coherent => "coherent",
            Phase::Integrated => "integrated",
            Phase::Flourishing => "flourishing",
            Phase::Peak => "peak",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed ascending threshold table mapping `score` to a [`Phase`]
///
/// `lower_bounds[i]` is the inclusive lower bound of `Phase::ALL[i]`. The first bound
/// must be `0.0` and bounds must be strictly ascending within `[0,1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTable {
    lower_bounds: [f64; 7],
}

impl PhaseTable {
    /// Build a table, rejecting bounds that would break monotonicity
    pub fn new(lower_bounds: [f64; 7]) -> Result<Self> {
        let table = Self { lower_bounds };
        table.validate()?;
        Ok(table)
    }

    /// Check the table invariants
    pub fn validate(&self) -> Result<()> {
        if self.lower_bounds[0] != 0.0 {
            return Err(LumenError::config("first phase bound must be 0.0"));
        }
        for pair in self.lower_bounds.windows(2) {
            if pair[0].partial_cmp(&pair[1]) != Some(Ordering::Less) {
                return Err(LumenError::config(format!(
                    "phase bounds must be strictly ascending ({} >= {})",
                    pair[0], pair[1]
                )));
            }
        }
        if self.lower_bounds[6] > 1.0 {
            return Err(LumenError::config("phase bounds must lie within [0,1]"));
        }
        Ok(())
    }

    /// Inclusive lower bounds, ascending
    pub fn lower_bounds(&self) -> &[f64; 7] {
        &self.lower_bounds
    }

    /// Phase for a score; non-finite scores map to the lowest band
    pub fn phase_for(&self, score: f64) -> Phase {
        let score = clamp_unit(score);
        self.lower_bounds
            .iter()
            .rposition(|bound| score >= *bound)
            .map(|idx| Phase::ALL[idx])
            .unwrap_or(Phase::Nascent)
    }
}

impl Default for PhaseTable {
    fn default() -> Self {
        Self {
            lower_bounds: [0.0, 0.15, 0.3, 0.45, 0.6, 0.75, 0.9],
        }
    }
}

/// Clamp to `[0,1]`, mapping NaN to `0.0`
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// The evolving metric bundle of one instance
///
/// `score` and `aux_score` are always within `[0,1]` and `phase` always agrees with
/// `score` under the table used to build the snapshot. Fields are read-only outside
/// this crate so those invariants cannot be broken after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    score: f64,
    aux_score: f64,
    integration_flag: bool,
    phase: Phase,
    instance_id: String,
    updated_at: u64,
}

impl StateSnapshot {
    /// Build a snapshot, clamping scores and deriving the phase
    pub fn new(
        instance_id: impl Into<String>,
        score: f64,
        aux_score: f64,
        integration_flag: bool,
        table: &PhaseTable,
        updated_at: u64,
    ) -> Self {
        let score = clamp_unit(score);
        Self {
            score,
            aux_score: clamp_unit(aux_score),
            integration_flag,
            phase: table.phase_for(score),
            instance_id: instance_id.into(),
            updated_at,
        }
    }

    /// Primary score in `[0,1]`
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Auxiliary score in `[0,1]`
    pub fn aux_score(&self) -> f64 {
        self.aux_score
    }

    /// Whether both scores crossed the integration threshold
    pub fn integration_flag(&self) -> bool {
        self.integration_flag
    }

    /// Phase derived from `score`
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Owning instance
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Milliseconds since epoch of the last change
    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Re-derive clamped scores and phase after deserializing foreign input
    pub fn normalized(self, table: &PhaseTable) -> Self {
        Self::new(
            self.instance_id,
            self.score,
            self.aux_score,
            self.integration_flag,
            table,
            self.updated_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_bands() {
        let table = PhaseTable::default();
        assert_eq!(table.phase_for(0.0), Phase::Nascent);
        assert_eq!(table.phase_for(0.149), Phase::Nascent);
        assert_eq!(table.phase_for(0.15), Phase::Emerging);
        assert_eq!(table.phase_for(0.5), Phase::Coherent);
        assert_eq!(table.phase_for(0.95), Phase::Peak);
        assert_eq!(table.phase_for(1.0), Phase::Peak);
        assert_eq!(table.phase_for(f64::NAN), Phase::Nascent);
    }

    #[test]
    fn test_table_rejects_unordered_bounds() {
        assert!(PhaseTable::new([0.0, 0.2, 0.2, 0.4, 0.5, 0.6, 0.7]).is_err());
        assert!(PhaseTable::new([0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]).is_err());
        assert!(PhaseTable::new([0.0, 0.2, 0.3, 0.4, 0.5, 0.6, 1.5]).is_err());
        assert!(PhaseTable::new([0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).is_ok());
    }

    #[test]
    fn test_snapshot_clamps_and_derives_phase() {
        let table = PhaseTable::default();
        let snapshot = StateSnapshot::new("web-1", 1.7, -0.3, false, &table, 10);
        assert_eq!(snapshot.score(), 1.0);
        assert_eq!(snapshot.aux_score(), 0.0);
        assert_eq!(snapshot.phase(), Phase::Peak);
    }

    #[test]
    fn test_normalized_repairs_foreign_snapshot() {
        let json = r#"{"score":3.0,"aux_score":0.5,"integration_flag":true,
            "phase":"nascent","instance_id":"x","updated_at":1}"#;
        let foreign: StateSnapshot = serde_json::from_str(json).unwrap();
        let fixed = foreign.normalized(&PhaseTable::default());
        assert_eq!(fixed.score(), 1.0);
        assert_eq!(fixed.phase(), Phase::Peak);
    }
}
