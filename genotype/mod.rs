// ========================================================================================
//
//                               Genotype dataset decoding
//
// ========================================================================================

pub mod matching;
pub mod matrix;
pub mod plink;
pub mod tokenizer;
pub mod vcf;

use std::io;
use std::str;
use thiserror::Error;

use crate::panel::{PanelError, ReferencePanel};
use crate::shared::files::DatasetKind;
use crate::types::ErrorCategory;

pub use matching::{KeyType, MatchReport, QualityPolicy};
pub use matrix::{GenotypeMatrix, GenotypeMatrixBuilder, MISSING_GENOTYPE};

/// Default bound on a single VCF field.
pub const DEFAULT_MAX_TOKEN_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum GenotypeIoError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error("invalid PLINK .bed header: {0}")]
    InvalidHeader(String),
    #[error("{path} has {actual} bytes but the .bim and .fam files imply {expected}")]
    BedLength {
        path: String,
        expected: u64,
        actual: u64,
    },
    #[error("malformed record in {path} at line {line}: {message}")]
    MalformedRecord {
        path: String,
        line: usize,
        message: String,
    },
    #[error("{path} is not valid UTF-8: {source}")]
    Utf8 {
        path: String,
        #[source]
        source: str::Utf8Error,
    },
    #[error("{path} has a variant row before the #CHROM header row")]
    MissingHeader { path: String },
    #[error("{path} lists no samples")]
    NoSamples { path: String },
    #[error("line {line} of {path} has {found} columns, expected {expected}")]
    ColumnCount {
        path: String,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line} of {path} has a field longer than {limit} bytes")]
    TokenTooLong {
        path: String,
        line: usize,
        limit: usize,
    },
    #[error("{count} ancestry SNPs have alleles that do not match the panel")]
    AlleleMismatch { count: usize },
    #[error("{count} rows map to an ancestry SNP that was already read")]
    DuplicateSnps { count: usize },
    #[error("line {line} of {path}: sample {sample} carries an allele outside the panel's pair")]
    UnexpectedAllele {
        path: String,
        line: usize,
        sample: String,
    },
}

impl GenotypeIoError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io { .. } => ErrorCategory::Io,
            Self::Panel(err) => err.category(),
            Self::AlleleMismatch { .. }
            | Self::DuplicateSnps { .. }
            | Self::UnexpectedAllele { .. } => ErrorCategory::DataQuality,
            Self::InvalidHeader(_)
            | Self::BedLength { .. }
            | Self::MalformedRecord { .. }
            | Self::Utf8 { .. }
            | Self::MissingHeader { .. }
            | Self::NoSamples { .. }
            | Self::ColumnCount { .. }
            | Self::TokenTooLong { .. } => ErrorCategory::Format,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub policy: QualityPolicy,
    pub max_token_len: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            policy: QualityPolicy::default(),
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
        }
    }
}

/// A dataset reduced to the panel: sample names in file order, the matched genotype
/// matrix and the account of how rows were matched.
#[derive(Debug)]
pub struct DecodedDataset {
    pub sample_names: Vec<String>,
    pub matrix: GenotypeMatrix,
    pub report: MatchReport,
}

/// Decodes whichever dataset kind was detected.
pub fn decode_dataset(
    kind: &DatasetKind,
    panel: &ReferencePanel,
    options: &DecodeOptions,
) -> Result<DecodedDataset, GenotypeIoError> {
    let (decoded, source) = match kind {
        DatasetKind::Plink { prefix } => (
            plink::decode_plink(prefix, panel, options)?,
            prefix.display().to_string(),
        ),
        DatasetKind::Vcf { path } => (
            vcf::decode_vcf(path, panel, options)?,
            path.display().to_string(),
        ),
    };
    decoded.report.log_summary(&source);
    Ok(decoded)
}
