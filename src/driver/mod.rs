// src/driver/mod.rs

//! A seeded random walk over the edit operations.
//!
//! Each step picks a move, proposes it, and commits it when the new
//! determinant `|ratio · det_old|` is above the acceptance floor. It is the
//! same accept/reject shape a CT-QMC sampler has, minus the physics, and is
//! used as a long-running stress test of the update formulas.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::DetManip;
use crate::kernel::{modulus, Kernel};
use crate::DetManipError;

/// The seven edits the walk draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Insert,
    Remove,
    Insert2,
    Remove2,
    ChangeRow,
    ChangeCol,
    ChangeRowCol,
}

impl MoveKind {
    pub const ALL: [MoveKind; 7] = [
        MoveKind::Insert,
        MoveKind::Remove,
        MoveKind::Insert2,
        MoveKind::Remove2,
        MoveKind::ChangeRow,
        MoveKind::ChangeCol,
        MoveKind::ChangeRowCol,
    ];
}

/// Settings of one random walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub n_steps: usize,
    pub seed: u64,
    /// Arguments are drawn uniformly from `[0, coordinate_range)`.
    pub coordinate_range: f64,
    /// Up to this size only insertions are proposed.
    pub warmup_size: usize,
    /// Smallest `|det|` after a move for it to be committed.
    pub acceptance_floor: f64,
    /// Commits between two consistency checks; 0 disables them.
    pub verify_every: usize,
    /// Largest acceptable consistency error before a warning.
    pub tolerance: f64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        DriverSettings {
            n_steps: 5000,
            seed: 23432,
            coordinate_range: 10.0,
            warmup_size: 10,
            acceptance_floor: 1e-3,
            verify_every: 0,
            tolerance: 1e-6,
        }
    }
}

impl DriverSettings {
    pub fn validate(&self) -> Result<(), DetManipError> {
        if !(self.coordinate_range > 0.0 && self.coordinate_range.is_finite()) {
            return Err(DetManipError::InvalidConfig(format!(
                "coordinate_range must be positive and finite, got {}",
                self.coordinate_range
            )));
        }
        if !(self.acceptance_floor >= 0.0) || !(self.tolerance > 0.0) {
            return Err(DetManipError::InvalidConfig(
                "acceptance_floor must be non-negative and tolerance positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates settings from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, DetManipError> {
        let settings: DriverSettings = serde_json::from_str(json_str)
            .map_err(|e| DetManipError::InvalidConfig(format!("Failed to parse driver settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Counters for one move kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MoveStats {
    /// Proposals that reached the engine.
    pub proposed: usize,
    pub accepted: usize,
    /// Below the acceptance floor.
    pub rejected: usize,
    /// Refused by the engine as singular.
    pub degenerate: usize,
    /// Not applicable (matrix too small or coinciding indices).
    pub skipped: usize,
}

/// Outcome of a walk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverStats {
    pub moves: BTreeMap<MoveKind, MoveStats>,
    pub verifications: usize,
    pub max_inverse_residual: f64,
    pub max_determinant_error: f64,
}

impl DriverStats {
    pub fn get(&self, kind: MoveKind) -> MoveStats {
        self.moves.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_accepted(&self) -> usize {
        self.moves.values().map(|m| m.accepted).sum()
    }

    /// Accepted over proposed, across all kinds.
    pub fn acceptance_rate(&self) -> f64 {
        let proposed: usize = self.moves.values().map(|m| m.proposed).sum();
        if proposed == 0 {
            0.0
        } else {
            self.total_accepted() as f64 / proposed as f64
        }
    }
}

/// What happened in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Accepted,
    Rejected,
    Degenerate,
    Skipped,
}

/// A random walk driving one engine.
pub struct RandomWalk<K: Kernel<f64, f64>> {
    engine: DetManip<f64, f64, K>,
    settings: DriverSettings,
    rng: StdRng,
    stats: DriverStats,
    commits: usize,
}

impl<K: Kernel<f64, f64>> RandomWalk<K> {
    pub fn new(engine: DetManip<f64, f64, K>, settings: DriverSettings) -> Result<Self, DetManipError> {
        settings.validate()?;
        Ok(RandomWalk {
            engine,
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            stats: DriverStats::default(),
            commits: 0,
        })
    }

    pub fn engine(&self) -> &DetManip<f64, f64, K> {
        &self.engine
    }

    pub fn into_engine(self) -> DetManip<f64, f64, K> {
        self.engine
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// Runs `n_steps` steps.
    pub fn run(&mut self) -> Result<&DriverStats, DetManipError> {
        for _ in 0..self.settings.n_steps {
            self.step()?;
        }
        info!(
            steps = self.settings.n_steps,
            size = self.engine.size(),
            accepted = self.stats.total_accepted(),
            acceptance_rate = self.stats.acceptance_rate(),
            max_inverse_residual = self.stats.max_inverse_residual,
            "random walk finished"
        );
        Ok(&self.stats)
    }

    /// One propose/decide cycle. Only errors other than degeneracy abort.
    pub fn step(&mut self) -> Result<StepOutcome, DetManipError> {
        let size = self.engine.size();
        let kind = if size <= self.settings.warmup_size {
            MoveKind::Insert
        } else {
            MoveKind::ALL[self.rng.random_range(0..MoveKind::ALL.len())]
        };
        let det_old = self.engine.determinant();

        let ratio = match self.propose(kind, size) {
            None => {
                self.stats.moves.entry(kind).or_default().skipped += 1;
                return Ok(StepOutcome::Skipped);
            }
            Some(Err(DetManipError::DegenerateMatrix { .. })) => {
                let entry = self.stats.moves.entry(kind).or_default();
                entry.proposed += 1;
                entry.degenerate += 1;
                return Ok(StepOutcome::Degenerate);
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(ratio)) => ratio,
        };
        self.stats.moves.entry(kind).or_default().proposed += 1;

        if modulus(ratio * det_old) > self.settings.acceptance_floor {
            self.engine.complete_operation()?;
            self.stats.moves.entry(kind).or_default().accepted += 1;
            self.commits += 1;
            if self.settings.verify_every > 0 && self.commits % self.settings.verify_every == 0 {
                self.verify();
            }
            Ok(StepOutcome::Accepted)
        } else {
            self.engine.reject_last_try();
            self.stats.moves.entry(kind).or_default().rejected += 1;
            Ok(StepOutcome::Rejected)
        }
    }

    fn propose(&mut self, kind: MoveKind, s: usize) -> Option<Result<K::Scalar, DetManipError>> {
        let range = self.settings.coordinate_range;
        let rng = &mut self.rng;
        let engine = &mut self.engine;
        match kind {
            MoveKind::Insert => {
                let (i, j) = (rng.random_range(0..=s), rng.random_range(0..=s));
                let (x, y) = (rng.random_range(0.0..range), rng.random_range(0.0..range));
                Some(engine.try_insert(i, j, x, y))
            }
            MoveKind::Remove if s >= 1 => {
                let (i, j) = (rng.random_range(0..s), rng.random_range(0..s));
                Some(engine.try_remove(i, j))
            }
            MoveKind::Insert2 => {
                let (i0, i1) = (rng.random_range(0..s + 2), rng.random_range(0..s + 2));
                let (j0, j1) = (rng.random_range(0..s + 2), rng.random_range(0..s + 2));
                if i0 == i1 || j0 == j1 {
                    return None;
                }
                let (x0, x1) = (rng.random_range(0.0..range), rng.random_range(0.0..range));
                let (y0, y1) = (rng.random_range(0.0..range), rng.random_range(0.0..range));
                Some(engine.try_insert2(i0, i1, j0, j1, x0, x1, y0, y1))
            }
            MoveKind::Remove2 if s >= 2 => {
                let (i0, i1) = (rng.random_range(0..s), rng.random_range(0..s));
                let (j0, j1) = (rng.random_range(0..s), rng.random_range(0..s));
                if i0 == i1 || j0 == j1 {
                    return None;
                }
                Some(engine.try_remove2(i0, i1, j0, j1))
            }
            MoveKind::ChangeRow if s >= 1 => {
                let i = rng.random_range(0..s);
                Some(engine.try_change_row(i, rng.random_range(0.0..range)))
            }
            MoveKind::ChangeCol if s >= 1 => {
                let j = rng.random_range(0..s);
                Some(engine.try_change_col(j, rng.random_range(0.0..range)))
            }
            MoveKind::ChangeRowCol if s >= 1 => {
                let (i, j) = (rng.random_range(0..s), rng.random_range(0..s));
                let (x, y) = (rng.random_range(0.0..range), rng.random_range(0.0..range));
                Some(engine.try_change_row_col(i, j, x, y))
            }
            _ => None,
        }
    }

    fn verify(&mut self) {
        let report = self.engine.check_consistency();
        self.stats.verifications += 1;
        self.stats.max_inverse_residual = self.stats.max_inverse_residual.max(report.inverse_residual);
        self.stats.max_determinant_error = self.stats.max_determinant_error.max(report.determinant_error);
        if !report.is_within(self.settings.tolerance) {
            warn!(
                commit = self.commits,
                size = self.engine.size(),
                inverse_residual = report.inverse_residual,
                determinant_error = report.determinant_error,
                "consistency check above tolerance"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{PhaseKernel, PropagatorKernel};

    fn short_walk(seed: u64) -> RandomWalk<PropagatorKernel> {
        let settings = DriverSettings {
            n_steps: 600,
            seed,
            verify_every: 1,
            ..DriverSettings::default()
        };
        RandomWalk::new(DetManip::new(PropagatorKernel::default(), 8), settings).unwrap()
    }

    #[test]
    fn test_walk_stays_consistent() {
        let mut walk = short_walk(23432);
        let stats = walk.run().unwrap().clone();

        assert!(stats.get(MoveKind::Insert).accepted > 10);
        assert!(stats.verifications > 0);
        assert!(stats.max_inverse_residual < 1e-6, "residual {}", stats.max_inverse_residual);
        assert!(stats.max_determinant_error < 1e-6, "det error {}", stats.max_determinant_error);
        for kind in MoveKind::ALL {
            let m = stats.get(kind);
            assert_eq!(m.proposed, m.accepted + m.rejected + m.degenerate, "{:?}", kind);
        }
        assert!(!walk.engine().is_pending());
        assert!(walk.engine().check_consistency().is_within(1e-6));
    }

    #[test]
    fn test_every_move_kind_is_exercised() {
        let mut walk = short_walk(7);
        let stats = walk.run().unwrap();
        for kind in MoveKind::ALL {
            let m = stats.get(kind);
            assert!(m.proposed + m.skipped > 0, "{:?} never drawn", kind);
        }
    }

    #[test]
    fn test_same_seed_same_walk() {
        let mut a = short_walk(99);
        let mut b = short_walk(99);
        a.run().unwrap();
        b.run().unwrap();
        assert_eq!(a.stats(), b.stats());
        assert_eq!(a.engine().determinant(), b.engine().determinant());
        assert_eq!(a.into_engine().matrix(), b.into_engine().matrix());
    }

    #[test]
    fn test_warmup_only_inserts() {
        let settings = DriverSettings {
            n_steps: 5,
            warmup_size: 100,
            ..DriverSettings::default()
        };
        let mut walk = RandomWalk::new(DetManip::new(PropagatorKernel::default(), 8), settings).unwrap();
        for _ in 0..5 {
            walk.step().unwrap();
        }
        assert_eq!(walk.stats().moves.len(), 1);
        assert_eq!(walk.stats().get(MoveKind::Insert).proposed, 5);
    }

    #[test]
    fn test_complex_walk() {
        let settings = DriverSettings {
            n_steps: 300,
            verify_every: 10,
            ..DriverSettings::default()
        };
        let mut walk = RandomWalk::new(DetManip::new(PhaseKernel { omega: 0.7 }, 4), settings).unwrap();
        let stats = walk.run().unwrap();
        assert!(stats.total_accepted() > 0);
        assert!(walk.engine().check_consistency().is_within(1e-6));
    }

    #[test]
    fn test_settings_from_json() {
        let settings = DriverSettings::from_json(r#"{ "n_steps": 10, "seed": 1 }"#).unwrap();
        assert_eq!(settings.n_steps, 10);
        assert_eq!(settings.coordinate_range, 10.0);
        assert!(DriverSettings::from_json(r#"{ "coordinate_range": 0.0 }"#).is_err());
    }
}
