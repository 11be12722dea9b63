// ========================================================================================
//
//                  Key-type selection, duplicate claims and match tallies
//
// ========================================================================================
//
// Both decoders follow the same protocol. Every dataset row is looked up in the panel
// three ways while the file is scanned, the per-key hit counts decide a single key
// type for the whole file, and only then are rows reconciled and claimed.

use log::{debug, info, warn};
use serde::Deserialize;
use std::fmt;

use super::GenotypeIoError;
use crate::panel::ReferencePanel;
use crate::types::{GenomeBuild, parse_autosome, parse_rs_number};

/// The identifier used to tie dataset rows to panel SNPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    RsId,
    Build37,
    Build38,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::RsId => f.write_str("rs ID"),
            KeyType::Build37 => write!(f, "{} position", GenomeBuild::Build37),
            KeyType::Build38 => write!(f, "{} position", GenomeBuild::Build38),
        }
    }
}

/// Panel ids a single dataset row resolves to under each key type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateKeys {
    pub rs: Option<usize>,
    pub pos37: Option<usize>,
    pub pos38: Option<usize>,
}

impl CandidateKeys {
    pub fn lookup(panel: &ReferencePanel, id: &str, chromosome: &str, position: &str) -> Self {
        let rs = parse_rs_number(id).and_then(|rs| panel.find_by_rs(rs));
        let site = parse_autosome(chromosome).zip(position.trim().parse::<u32>().ok());
        let (pos37, pos38) = match site {
            Some((chr, pos)) => (
                panel.find_by_position(chr, pos, GenomeBuild::Build37),
                panel.find_by_position(chr, pos, GenomeBuild::Build38),
            ),
            None => (None, None),
        };
        Self { rs, pos37, pos38 }
    }

    pub fn is_candidate(&self) -> bool {
        self.rs.is_some() || self.pos37.is_some() || self.pos38.is_some()
    }

    pub fn get(&self, key_type: KeyType) -> Option<usize> {
        match key_type {
            KeyType::RsId => self.rs,
            KeyType::Build37 => self.pos37,
            KeyType::Build38 => self.pos38,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyTally {
    pub rs: usize,
    pub pos37: usize,
    pub pos38: usize,
}

impl KeyTally {
    pub fn add(&mut self, keys: &CandidateKeys) {
        self.rs += usize::from(keys.rs.is_some());
        self.pos37 += usize::from(keys.pos37.is_some());
        self.pos38 += usize::from(keys.pos38.is_some());
    }

    /// rsID unless a build strictly beats it; build 38 must strictly beat whichever
    /// of the first two won.
    pub fn select(&self) -> KeyType {
        let mut best = (KeyType::RsId, self.rs);
        if self.pos37 > best.1 {
            best = (KeyType::Build37, self.pos37);
        }
        if self.pos38 > best.1 {
            best = (KeyType::Build38, self.pos38);
        }
        best.0
    }
}

/// Marks panel ids already holding a matrix row.
#[derive(Debug)]
pub struct SnpClaims {
    claimed: Vec<bool>,
}

impl SnpClaims {
    pub fn new(panel_len: usize) -> Self {
        Self {
            claimed: vec![false; panel_len],
        }
    }

    /// Returns `true` if this call claimed `id`, `false` if it was already taken.
    pub fn claim(&mut self, id: usize) -> bool {
        match self.claimed.get_mut(id) {
            Some(slot) if !*slot => {
                *slot = true;
                true
            }
            _ => false,
        }
    }
}

/// How a QualityPolicy treats the data-quality conditions met during decoding. The
/// lenient default drops and counts; a strict flag turns the condition into an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityPolicy {
    pub strict_allele_mismatch: bool,
    pub strict_duplicates: bool,
    pub strict_multiallelic: bool,
}

/// Machine-readable account of how one dataset lined up with the panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    /// Variant rows in the dataset.
    pub dataset_snps: usize,
    /// Rows that hit the panel under at least one key type.
    pub candidate_rows: usize,
    pub tally: KeyTally,
    pub key_type: Option<KeyType>,
    /// Rows kept in the genotype matrix.
    pub matched_snps: usize,
    pub allele_mismatches: usize,
    pub duplicates: usize,
    pub swapped: usize,
    pub flipped: usize,
    /// VCF rows without a leading GT format key.
    pub non_gt_rows: usize,
    /// Matched VCF rows with more than one ALT allele.
    pub multiallelic: usize,
    /// VCF calls whose allele indices fell outside the resolved ref/alt pair.
    pub unexpected_alleles: usize,
}

impl MatchReport {
    pub fn check_policy(&self, policy: &QualityPolicy) -> Result<(), GenotypeIoError> {
        if policy.strict_allele_mismatch && self.allele_mismatches > 0 {
            return Err(GenotypeIoError::AlleleMismatch {
                count: self.allele_mismatches,
            });
        }
        if policy.strict_duplicates && self.duplicates > 0 {
            return Err(GenotypeIoError::DuplicateSnps {
                count: self.duplicates,
            });
        }
        Ok(())
    }

    pub fn log_summary(&self, source: &str) {
        debug!(
            "{source}: {} rs ID, {} GRCh37 and {} GRCh38 hits among {} candidate rows",
            self.tally.rs, self.tally.pos37, self.tally.pos38, self.candidate_rows
        );
        let key = self
            .key_type
            .map(|k| k.to_string())
            .unwrap_or_else(|| "no key".to_string());
        info!(
            "{source}: {} SNPs read, {} ancestry SNPs matched by {key} ({} swapped, {} flipped)",
            self.dataset_snps, self.matched_snps, self.swapped, self.flipped
        );
        if self.allele_mismatches > 0 {
            warn!(
                "{source}: dropped {} ancestry SNPs whose alleles do not match the panel",
                self.allele_mismatches
            );
        }
        if self.duplicates > 0 {
            warn!(
                "{source}: discarded {} rows mapping to an ancestry SNP already read",
                self.duplicates
            );
        }
        if self.non_gt_rows > 0 {
            debug!("{source}: {} rows carry no GT field", self.non_gt_rows);
        }
        if self.unexpected_alleles > 0 {
            warn!(
                "{source}: {} genotype calls used alleles other than the panel's and were set to missing",
                self.unexpected_alleles
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::ReferenceSnp;

    fn panel() -> ReferencePanel {
        let snp = |rs: u64, chromosome: u8, pos37: u32, pos38: u32| ReferenceSnp {
            id: 0,
            rs,
            chromosome,
            pos37,
            pos38,
            ref_allele: b'A',
            alt_allele: b'G',
            ref_pop_freqs: [0.5; 5],
            vtx_pop_freqs: [0.5; 3],
        };
        ReferencePanel::from_snps(vec![snp(10, 1, 100, 200), snp(20, 2, 300, 400)])
    }

    #[test]
    fn lookups_cover_all_three_keys() {
        let panel = panel();
        let keys = CandidateKeys::lookup(&panel, "rs20", "chr2", "400");
        assert_eq!(keys.rs, Some(1));
        assert_eq!(keys.pos37, None);
        assert_eq!(keys.pos38, Some(1));
        assert!(keys.is_candidate());

        let none = CandidateKeys::lookup(&panel, "2:400", "X", "400");
        assert!(!none.is_candidate());
        assert_eq!(none.get(KeyType::Build38), None);
    }

    #[test]
    fn key_selection_prefers_rs_on_ties() {
        let tally = |rs, pos37, pos38| KeyTally { rs, pos37, pos38 };
        assert_eq!(tally(5, 5, 5).select(), KeyType::RsId);
        assert_eq!(tally(5, 6, 6).select(), KeyType::Build37);
        assert_eq!(tally(5, 6, 7).select(), KeyType::Build38);
        assert_eq!(tally(0, 0, 3).select(), KeyType::Build38);
        assert_eq!(tally(0, 0, 0).select(), KeyType::RsId);
    }

    #[test]
    fn claims_reject_second_use() {
        let mut claims = SnpClaims::new(2);
        assert!(claims.claim(1));
        assert!(!claims.claim(1));
        assert!(claims.claim(0));
        assert!(!claims.claim(5));
    }

    #[test]
    fn strict_policy_turns_counts_into_errors() {
        let report = MatchReport {
            allele_mismatches: 2,
            duplicates: 1,
            ..MatchReport::default()
        };
        assert!(report.check_policy(&QualityPolicy::default()).is_ok());

        let strict = QualityPolicy {
            strict_duplicates: true,
            ..QualityPolicy::default()
        };
        assert!(matches!(
            report.check_policy(&strict),
            Err(GenotypeIoError::DuplicateSnps { count: 1 })
        ));
    }
}
