// ========================================================================================
//
//                               Concurrent per-sample scoring
//
// ========================================================================================
//
// ### Purpose ###
//
// Turns a bound genotype matrix into ancestry coordinates. Every sample is scored
// independently: its genotypes give a distance to each reference population and,
// through the panel's expected distances, a triangle of its own. That triangle is
// projected, the sample's barycentric weights are read off, and the weights are
// carried onto the panel's canonical triangle so coordinates from different samples
// share one frame.
//
// The sample range is split into contiguous partitions, one per worker. A worker
// writes only to its own slice of the result vector, so no locking is involved.

use indicatif::ProgressBar;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::genotype::GenotypeMatrix;
use crate::panel::{PanelError, ReferencePanel, ReferenceSnp};
use crate::projector::{AncestryPercentages, ProjectedTriangle, project, project_triangle};
use crate::types::{ErrorCategory, GenoDistance, NUM_REF_POPS, NUM_VTX_POPS, RefPopulation, Vertex};

/// The genotyped-SNP count below which a sample is left unscored.
pub const DEFAULT_MIN_ANCESTRY_SNPS: usize = 100;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("{names} sample names were bound to a genotype matrix with {columns} samples")]
    SampleCountMismatch { names: usize, columns: usize },
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error("scoring was cancelled")]
    Cancelled,
    #[error("failed to build the scoring thread pool: {0}")]
    ThreadPool(String),
}

impl ScoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SampleCountMismatch { .. } | Self::ThreadPool(_) => ErrorCategory::Configuration,
            Self::Panel(err) => err.category(),
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// A cooperative stop flag, checked by every worker between samples.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AncestryScores {
    pub gd1: f64,
    pub gd2: f64,
    pub gd3: f64,
    pub gd4: f64,
    pub percentages: AncestryPercentages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooFewSnps,
    DegenerateTriangle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    Scored(AncestryScores),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    pub name: String,
    pub genotyped_snps: usize,
    pub outcome: SampleOutcome,
}

impl SampleResult {
    pub fn scores(&self) -> Option<&AncestryScores> {
        match &self.outcome {
            SampleOutcome::Scored(scores) => Some(scores),
            SampleOutcome::Skipped(_) => None,
        }
    }
}

/// Per-genotype log-likelihood terms of one SNP for each reference population.
#[derive(Debug, Clone, Copy)]
struct GenotypeTerms {
    by_pop: [[f64; 3]; NUM_REF_POPS],
    informative: [bool; NUM_REF_POPS],
}

impl GenotypeTerms {
    fn new(snp: &ReferenceSnp) -> Self {
        let mut by_pop = [[0.0; 3]; NUM_REF_POPS];
        let mut informative = [false; NUM_REF_POPS];
        for pop in RefPopulation::ALL.map(RefPopulation::index) {
            if !snp.ref_freq_is_informative(pop) {
                continue;
            }
            let p = snp.ref_pop_freqs[pop];
            let (ln_p, ln_q) = (p.ln(), (1.0 - p).ln());
            by_pop[pop] = [2.0 * ln_p, ln_p + ln_q + std::f64::consts::LN_2, 2.0 * ln_q];
            informative[pop] = true;
        }
        Self {
            by_pop,
            informative,
        }
    }
}

pub struct AncestryScorer<'p> {
    panel: &'p ReferencePanel,
    min_snps: usize,
    canonical: ProjectedTriangle,
    terms: Vec<GenotypeTerms>,
}

impl<'p> AncestryScorer<'p> {
    pub fn new(panel: &'p ReferencePanel, min_snps: usize) -> Self {
        let canonical = project_triangle(&panel.canonical_triangle());
        debug!("Canonical projected triangle: {canonical:?}");
        let terms = panel
            .snps()
            .iter()
            .map(GenotypeTerms::new)
            .collect();
        Self {
            panel,
            min_snps,
            canonical,
            terms,
        }
    }

    /// The canonical vertices in the projected frame.
    pub fn canonical_triangle(&self) -> &ProjectedTriangle {
        &self.canonical
    }

    /// Attaches one decoded dataset. Panel ids are checked here once so the scoring
    /// loop can index without further checks.
    pub fn bind<'a>(
        &'a self,
        sample_names: &'a [String],
        matrix: &'a GenotypeMatrix,
    ) -> Result<BoundDataset<'a>, ScoreError> {
        if sample_names.len() != matrix.n_samples() {
            return Err(ScoreError::SampleCountMismatch {
                names: sample_names.len(),
                columns: matrix.n_samples(),
            });
        }
        for &id in matrix.snp_ids() {
            self.panel.snp(id)?;
        }
        debug!(
            "Bound {} samples over {} ancestry SNPs",
            matrix.n_samples(),
            matrix.n_snps()
        );
        Ok(BoundDataset {
            scorer: self,
            sample_names,
            matrix,
        })
    }
}

/// A scorer with one dataset attached.
pub struct BoundDataset<'a> {
    scorer: &'a AncestryScorer<'a>,
    sample_names: &'a [String],
    matrix: &'a GenotypeMatrix,
}

impl BoundDataset<'_> {
    pub fn n_samples(&self) -> usize {
        self.sample_names.len()
    }

    pub fn score(&self, sample: usize) -> SampleResult {
        let scorer = self.scorer;
        let mut pop_sums = [0.0f64; NUM_REF_POPS];
        let mut pop_snps = [0usize; NUM_REF_POPS];
        let mut vertex_sums = [[0.0f64; NUM_VTX_POPS]; NUM_VTX_POPS];
        let mut genotyped = 0usize;

        for (id, genotype) in self.matrix.sample_calls(sample) {
            if genotype > 2 {
                continue;
            }
            let terms = &scorer.terms[id];
            for pop in 0..NUM_REF_POPS {
                if terms.informative[pop] {
                    pop_sums[pop] += terms.by_pop[pop][usize::from(genotype)];
                    pop_snps[pop] += 1;
                }
            }
            // Vertex axes average over the same SNPs as the sample's own distances.
            let expected = scorer.panel.expected_distances(id);
            for axis in Vertex::ALL.map(Vertex::index) {
                if !terms.informative[axis] {
                    continue;
                }
                for vertex in Vertex::ALL.map(Vertex::index) {
                    vertex_sums[vertex][axis] += expected[vertex][axis];
                }
            }
            genotyped += 1;
        }

        let name = self.sample_names[sample].clone();
        if genotyped < scorer.min_snps || genotyped == 0 {
            return SampleResult {
                name,
                genotyped_snps: genotyped,
                outcome: SampleOutcome::Skipped(SkipReason::TooFewSnps),
            };
        }

        let mut mean = [0.0f64; NUM_REF_POPS];
        for pop in 0..NUM_REF_POPS {
            if pop_snps[pop] > 0 {
                mean[pop] = -pop_sums[pop] / pop_snps[pop] as f64;
            }
        }
        let axis_snps = Vertex::ALL.map(|axis| pop_snps[axis.index()]);
        let vertices = vertex_sums.map(|sums| {
            let mut axes = [0.0f64; NUM_VTX_POPS];
            for ((slot, sum), &n) in axes.iter_mut().zip(sums).zip(&axis_snps) {
                if n > 0 {
                    *slot = sum / n as f64;
                }
            }
            GenoDistance::from_axes(axes)
        });
        let subject = GenoDistance::new(
            mean[RefPopulation::European.index()],
            mean[RefPopulation::AfricanAmerican.index()],
            mean[RefPopulation::Asian.index()],
        );

        let projection = project(&vertices, subject);
        let Some(weights) = projection.triangle.barycentric(projection.subject) else {
            warn!("Sample {name} has a degenerate ancestry triangle and is not scored");
            return SampleResult {
                name,
                genotyped_snps: genotyped,
                outcome: SampleOutcome::Skipped(SkipReason::DegenerateTriangle),
            };
        };
        let (gd1, gd2) = scorer.canonical.interpolate(&weights);

        SampleResult {
            name,
            genotyped_snps: genotyped,
            outcome: SampleOutcome::Scored(AncestryScores {
                gd1,
                gd2,
                gd3: projection.subject.z,
                gd4: mean[RefPopulation::Latino.index()] - mean[RefPopulation::SouthAsian.index()],
                percentages: weights.percentages(),
            }),
        }
    }

    /// Scores every sample on `workers` threads. Results come back in sample order
    /// regardless of the worker count.
    pub fn score_all(
        &self,
        workers: usize,
        cancel: &CancellationToken,
        progress: Option<&ProgressBar>,
    ) -> Result<Vec<SampleResult>, ScoreError> {
        let n = self.n_samples();
        let workers = workers.clamp(1, n.max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| ScoreError::ThreadPool(e.to_string()))?;
        debug!("Scoring {n} samples on {workers} workers");

        let mut slots: Vec<Option<SampleResult>> = vec![None; n];
        pool.scope(|scope| {
            let mut rest: &mut [Option<SampleResult>] = &mut slots;
            let mut start = 0usize;
            for len in partition_sizes(n, workers) {
                let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(len);
                rest = tail;
                let first = start;
                start += len;
                scope.spawn(move |_| {
                    for (offset, slot) in chunk.iter_mut().enumerate() {
                        if cancel.is_cancelled() {
                            return;
                        }
                        *slot = Some(self.score(first + offset));
                        if let Some(bar) = progress {
                            bar.inc(1);
                        }
                    }
                });
            }
        });

        if cancel.is_cancelled() {
            return Err(ScoreError::Cancelled);
        }
        slots
            .into_iter()
            .map(|slot| slot.ok_or(ScoreError::Cancelled))
            .collect()
    }
}

/// Contiguous partition sizes for `n` items over `workers` workers; the first
/// `n % workers` partitions take one extra item.
pub fn partition_sizes(n: usize, workers: usize) -> impl Iterator<Item = usize> {
    let workers = workers.max(1);
    let base = n / workers;
    let extra = n % workers;
    (0..workers).map(move |i| base + usize::from(i < extra))
}
