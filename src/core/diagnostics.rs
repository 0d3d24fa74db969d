//! Post-solve residual tables.
//!
//! Built once from the final variable vector after the optimizer returns, so
//! nothing here is computed inside the iteration loop.

use super::problem::Problem;
use super::structure::StructureReport;
use crate::factors::{ResidualOwner, ResidualTag};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Number of largest residuals kept by default
pub const DEFAULT_TOP_K: usize = 10;

/// One evaluated residual
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualEntry {
    pub tag: ResidualTag,
    pub kind: &'static str,
    pub value: f64,
}

/// Summary statistics over residual magnitudes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResidualStatistics {
    pub count: usize,
    pub rms: f64,
    /// Largest absolute residual
    pub max: f64,
    /// Mean absolute residual
    pub mean: f64,
    /// Standard deviation of the absolute residuals
    pub std: f64,
}

impl ResidualStatistics {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut max = 0.0_f64;
        for value in values {
            let magnitude = value.abs();
            count += 1;
            sum += magnitude;
            sum_sq += magnitude * magnitude;
            max = max.max(magnitude);
        }
        if count == 0 {
            return Self::default();
        }
        let n = count as f64;
        let mean = sum / n;
        Self {
            count,
            rms: (sum_sq / n).sqrt(),
            max,
            mean,
            std: (sum_sq / n - mean * mean).max(0.0).sqrt(),
        }
    }
}

/// Residual table of a solved problem
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub statistics: ResidualStatistics,
    /// Statistics per entity the residuals are attributed to
    pub per_owner: HashMap<ResidualOwner, ResidualStatistics>,
    /// Statistics per residual kind
    pub per_kind: BTreeMap<&'static str, ResidualStatistics>,
    /// Largest residuals by magnitude, descending
    pub largest: Vec<ResidualEntry>,
    /// Observability analysis, when requested
    pub structure: Option<StructureReport>,
}

impl Diagnostics {
    pub fn from_problem(problem: &Problem, vars: &[f64], top_k: usize) -> Self {
        let entries = problem
            .tagged_residuals(vars)
            .into_iter()
            .map(|(tag, kind, value)| ResidualEntry { tag, kind, value });
        Self::from_entries(entries, top_k)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ResidualEntry>, top_k: usize) -> Self {
        let entries: Vec<ResidualEntry> = entries.into_iter().collect();

        let mut by_owner: HashMap<ResidualOwner, Vec<f64>> = HashMap::new();
        let mut by_kind: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();
        for entry in &entries {
            by_owner.entry(entry.tag.owner).or_default().push(entry.value);
            by_kind.entry(entry.kind).or_default().push(entry.value);
        }

        let mut largest = entries.clone();
        largest.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
        largest.truncate(top_k);

        Self {
            statistics: ResidualStatistics::from_values(entries.iter().map(|e| e.value)),
            per_owner: by_owner
                .into_iter()
                .map(|(owner, values)| (owner, ResidualStatistics::from_values(values)))
                .collect(),
            per_kind: by_kind
                .into_iter()
                .map(|(kind, values)| (kind, ResidualStatistics::from_values(values)))
                .collect(),
            largest,
            structure: None,
        }
    }

    pub fn with_structure(mut self, structure: StructureReport) -> Self {
        self.structure = Some(structure);
        self
    }

    /// RMS of the residuals attributed to `owner`
    pub fn owner_rms(&self, owner: ResidualOwner) -> Option<f64> {
        self.per_owner.get(&owner).map(|s| s.rms)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.statistics;
        writeln!(f, "=== Residual Diagnostics ===")?;
        writeln!(
            f,
            "Residuals: {}  rms {:.4e}  max {:.4e}  mean {:.4e}  std {:.4e}",
            s.count, s.rms, s.max, s.mean, s.std
        )?;
        for (kind, stats) in &self.per_kind {
            writeln!(
                f,
                "  {:<18} {:>6}  rms {:.4e}  max {:.4e}",
                kind, stats.count, stats.rms, stats.max
            )?;
        }
        if !self.largest.is_empty() {
            writeln!(f, "Largest residuals:")?;
            for entry in &self.largest {
                writeln!(
                    f,
                    "  {:+.4e}  {} [{}] slot {}",
                    entry.value, entry.kind, entry.tag.owner, entry.tag.slot
                )?;
            }
        }
        if let Some(structure) = &self.structure {
            write!(f, "{structure}")?;
        }
        Ok(())
    }
}
