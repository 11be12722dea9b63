// ========================================================================================
//
//                               End-to-end ancestry run
//
// ========================================================================================
//
// Locates and loads the panel, decodes the genotype dataset against it, scores every
// sample and writes the result file. Nothing is written unless every earlier stage
// succeeded. A cancelled token is honoured between stages and between samples.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use std::io::IsTerminal;
use std::path::Path;
use thiserror::Error;

use crate::config::{ConfigError, RunConfig, locate_panel_file};
use crate::genotype::{GenotypeIoError, KeyType, MatchReport, decode_dataset};
use crate::output::{OutputError, save_results};
use crate::panel::{PanelError, ReferencePanel};
use crate::projector::ProjectedTriangle;
use crate::scorer::{AncestryScorer, CancellationToken, ScoreError};
use crate::shared::files::{DatasetDetectError, DatasetKind};
use crate::types::ErrorCategory;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Detect(#[from] DatasetDetectError),
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error(transparent)]
    Genotype(#[from] GenotypeIoError),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(
        "only {matched} ancestry SNPs were found in the dataset; at least {required} are needed"
    )]
    InsufficientOverlap { matched: usize, required: usize },
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(err) => err.category(),
            Self::Detect(_) | Self::InsufficientOverlap { .. } => ErrorCategory::Configuration,
            Self::Panel(err) => err.category(),
            Self::Genotype(err) => err.category(),
            Self::Score(err) => err.category(),
            Self::Output(err) => err.category(),
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total_samples: usize,
    pub scored_samples: usize,
    pub matched_snps: usize,
    pub key_type: Option<KeyType>,
    pub canonical: ProjectedTriangle,
    pub report: MatchReport,
}

fn create_progress_bar(len: u64, message: &str, visible: bool) -> ProgressBar {
    let draw_target = if visible && std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Runs the whole inference for one genotype dataset and writes the result file at
/// `output_path`.
pub fn run(
    genotype_path: &Path,
    output_path: &Path,
    config: &RunConfig,
    cancel: &CancellationToken,
    show_progress: bool,
) -> Result<RunSummary, PipelineError> {
    config.validate()?;

    let panel_path = locate_panel_file(config.panel.as_deref())?;
    let panel = ReferencePanel::load_with_expected(&panel_path, config.expected_panel_snps)?;

    let kind = DatasetKind::detect(genotype_path)?;
    if cancel.is_cancelled() {
        return Err(ScoreError::Cancelled.into());
    }
    let decoded = decode_dataset(&kind, &panel, &config.decode_options())?;
    if cancel.is_cancelled() {
        return Err(ScoreError::Cancelled.into());
    }
    let matched = decoded.report.matched_snps;
    if matched < config.min_ancestry_snps {
        return Err(PipelineError::InsufficientOverlap {
            matched,
            required: config.min_ancestry_snps,
        });
    }

    let scorer = AncestryScorer::new(&panel, config.min_ancestry_snps);
    let bound = scorer.bind(&decoded.sample_names, &decoded.matrix)?;
    let pb = create_progress_bar(bound.n_samples() as u64, "Scoring samples...", show_progress);
    let results = bound.score_all(config.threads, cancel, Some(&pb));
    pb.finish_and_clear();
    let results = results?;

    let scored = save_results(output_path, scorer.canonical_triangle(), &results)?;
    info!(
        "Scored {scored} of {} samples on {matched} ancestry SNPs; {} samples were left out",
        results.len(),
        results.len() - scored
    );

    Ok(RunSummary {
        total_samples: results.len(),
        scored_samples: scored,
        matched_snps: matched,
        key_type: decoded.report.key_type,
        canonical: *scorer.canonical_triangle(),
        report: decoded.report,
    })
}
