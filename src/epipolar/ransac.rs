//! Robust relative-pose estimation.
//!
//! Minimal seven-point samples are drawn either exhaustively, as 7-subsets in
//! lexicographic order when the pool is small, or from a seeded [`StdRng`].
//! Each candidate essential matrix is decomposed into its four poses and every
//! non-degenerate pose is scored on all correspondences by
//! `(cheirality count, Sampson inliers, −total Sampson error)`, compared
//! lexicographically. When sampling produces nothing usable the estimate falls
//! back to the deterministic seven- or eight-point solve on all points.

use super::{
    Correspondence, EssentialMatrix, MIN_CORRESPONDENCES, RelativePose, eight_point, seven_point,
};
use crate::error::{RoteraResult, SolverError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Configuration of the two-view initializer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoViewConfig {
    /// Maximum number of minimal samples
    pub ransac_rounds: usize,
    /// Pools up to this size are sampled exhaustively in lexicographic order
    pub exhaustive_pool_limit: usize,
    /// Candidates scored before a perfect score may stop the search
    pub min_ransac_candidates: usize,
    /// Sampson error below which a correspondence is an inlier (normalized units squared)
    pub sampson_inlier_threshold: f64,
    /// Unit translations with two components below this are discarded
    pub degenerate_translation_threshold: f64,
    pub seed: u64,
    /// Distance between the two camera centers in world units
    pub baseline: f64,
}

impl Default for TwoViewConfig {
    fn default() -> Self {
        Self {
            ransac_rounds: 100,
            exhaustive_pool_limit: 18,
            min_ransac_candidates: 10,
            sampson_inlier_threshold: 1e-5,
            degenerate_translation_threshold: 1e-3,
            seed: 42,
            baseline: 1.0,
        }
    }
}

impl TwoViewConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ransac_rounds(mut self, rounds: usize) -> Self {
        self.ransac_rounds = rounds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_sampson_inlier_threshold(mut self, threshold: f64) -> Self {
        self.sampson_inlier_threshold = threshold;
        self
    }

    pub fn with_degenerate_translation_threshold(mut self, threshold: f64) -> Self {
        self.degenerate_translation_threshold = threshold;
        self
    }
}

/// Quality of a candidate pose over all correspondences
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseScore {
    /// Correspondences triangulating in front of both cameras
    pub cheirality: usize,
    /// Correspondences under the Sampson threshold
    pub inliers: usize,
    /// Sum of Sampson errors over all correspondences
    pub total_error: f64,
}

impl PoseScore {
    /// Lexicographic order: more cheirality, then more inliers, then lower error
    pub fn compare(&self, other: &Self) -> Ordering {
        self.cheirality
            .cmp(&other.cheirality)
            .then(self.inliers.cmp(&other.inliers))
            .then(
                other
                    .total_error
                    .partial_cmp(&self.total_error)
                    .unwrap_or(Ordering::Equal),
            )
    }

    pub fn is_perfect(&self, count: usize) -> bool {
        self.cheirality == count && self.inliers == count
    }
}

/// Winning relative pose and how it was found
#[derive(Debug, Clone, Copy)]
pub struct PoseEstimate {
    pub essential: EssentialMatrix,
    pub pose: RelativePose,
    pub score: PoseScore,
    /// Essential-matrix candidates scored
    pub candidates: usize,
    /// Whether the result came from the deterministic fallback
    pub fallback: bool,
}

/// All `k`-subsets of `0..n` in lexicographic order
#[derive(Debug, Clone)]
struct Combinations {
    n: usize,
    current: Option<Vec<usize>>,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            current: (k <= n).then(|| (0..k).collect()),
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.current.take()?;
        let k = current.len();
        let mut following = current.clone();
        // Rightmost position that can still advance
        let pivot = (0..k).rev().find(|&i| following[i] < self.n - k + i);
        if let Some(i) = pivot {
            following[i] += 1;
            for j in i + 1..k {
                following[j] = following[j - 1] + 1;
            }
            self.current = Some(following);
        }
        Some(current)
    }
}

/// Running best candidate
struct Search<'a> {
    correspondences: &'a [Correspondence],
    config: &'a TwoViewConfig,
    best: Option<(EssentialMatrix, RelativePose, PoseScore)>,
    candidates: usize,
    degenerate: usize,
}

impl<'a> Search<'a> {
    fn new(correspondences: &'a [Correspondence], config: &'a TwoViewConfig) -> Self {
        Self {
            correspondences,
            config,
            best: None,
            candidates: 0,
            degenerate: 0,
        }
    }

    fn score(&self, essential: &EssentialMatrix, pose: &RelativePose) -> PoseScore {
        let mut inliers = 0;
        let mut total_error = 0.0;
        for c in self.correspondences {
            let error = essential.sampson_error(c);
            if error < self.config.sampson_inlier_threshold {
                inliers += 1;
            }
            total_error += error;
        }
        PoseScore {
            cheirality: pose.cheirality_count(self.correspondences),
            inliers,
            total_error,
        }
    }

    fn consider(&mut self, essential: EssentialMatrix) {
        self.candidates += 1;
        for pose in essential.decompose() {
            if pose.is_degenerate(self.config.degenerate_translation_threshold) {
                self.degenerate += 1;
                continue;
            }
            let score = self.score(&essential, &pose);
            let better = self
                .best
                .as_ref()
                .is_none_or(|(_, _, best)| score.compare(best) == Ordering::Greater);
            if better {
                self.best = Some((essential, pose, score));
            }
        }
    }

    fn is_perfect(&self) -> bool {
        self.best
            .as_ref()
            .is_some_and(|(_, _, score)| score.is_perfect(self.correspondences.len()))
    }
}

fn ransac<'a>(correspondences: &'a [Correspondence], config: &'a TwoViewConfig) -> Search<'a> {
    let n = correspondences.len();
    let mut search = Search::new(correspondences, config);

    let samples: Box<dyn Iterator<Item = Vec<usize>>> = if n <= config.exhaustive_pool_limit {
        Box::new(Combinations::new(n, MIN_CORRESPONDENCES))
    } else {
        let mut rng = StdRng::seed_from_u64(config.seed);
        Box::new(std::iter::repeat_with(move || {
            let mut indices = sample(&mut rng, n, MIN_CORRESPONDENCES).into_vec();
            indices.sort_unstable();
            indices
        }))
    };

    for subset in samples.take(config.ransac_rounds) {
        let minimal: Vec<Correspondence> = subset.iter().map(|&i| correspondences[i]).collect();
        for essential in seven_point(&minimal) {
            search.consider(essential);
        }
        if search.candidates >= config.min_ransac_candidates && search.is_perfect() {
            debug!(
                "RANSAC stopped early on a perfect score after {} candidates",
                search.candidates
            );
            break;
        }
    }
    search
}

/// Estimate the relative pose of two views from normalized correspondences.
///
/// # Errors
/// - [`SolverError::InsufficientCorrespondences`] below seven correspondences
/// - [`SolverError::DegenerateTranslation`] when every candidate translation is
///   axis-aligned
pub fn estimate_relative_pose(
    correspondences: &[Correspondence],
    config: &TwoViewConfig,
) -> RoteraResult<PoseEstimate> {
    let n = correspondences.len();
    if n < MIN_CORRESPONDENCES {
        return Err(SolverError::InsufficientCorrespondences {
            found: n,
            required: MIN_CORRESPONDENCES,
        });
    }

    let mut degenerate = 0;
    if n > MIN_CORRESPONDENCES {
        let search = ransac(correspondences, config);
        degenerate += search.degenerate;
        if let Some((essential, pose, score)) = search.best {
            debug!(
                "RANSAC pose: cheirality {}/{}, inliers {}/{}, {} candidates",
                score.cheirality, n, score.inliers, n, search.candidates
            );
            return Ok(PoseEstimate {
                essential,
                pose,
                score,
                candidates: search.candidates,
                fallback: false,
            });
        }
        warn!("RANSAC found no usable pose, falling back to a direct estimate");
    }

    let mut search = Search::new(correspondences, config);
    if n == MIN_CORRESPONDENCES {
        for essential in seven_point(correspondences) {
            search.consider(essential);
        }
    } else if let Some(essential) = eight_point(correspondences) {
        search.consider(essential);
    }
    degenerate += search.degenerate;

    match search.best {
        Some((essential, pose, score)) => Ok(PoseEstimate {
            essential,
            pose,
            score,
            candidates: search.candidates,
            fallback: true,
        }),
        None if degenerate > 0 => Err(SolverError::DegenerateTranslation),
        None => Err(SolverError::Numerical(
            "essential matrix estimation produced no candidates".to_string(),
        )),
    }
}
