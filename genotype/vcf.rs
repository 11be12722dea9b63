// ========================================================================================
//
//                               Streaming VCF decoder
//
// ========================================================================================
//
// One forward pass over a plain or gzip-compressed VCF. Rows that hit the panel keep
// only their compact allele-index pairs until the key type for the file is known;
// each row's pairs are recoded into the matrix and released right after.

use log::debug;
use std::io::BufRead;
use std::path::Path;
use std::str;

use super::matching::{CandidateKeys, KeyTally, MatchReport, SnpClaims};
use super::matrix::{GenotypeMatrixBuilder, MISSING_GENOTYPE};
use super::tokenizer::{TokenReader, TokenizerError};
use super::{DecodeOptions, DecodedDataset, GenotypeIoError};
use crate::panel::{ReferencePanel, resolve_vcf_alleles};
use crate::shared::files::open_byte_stream;

/// Allele index stored for `.` or an unparseable allele.
const MISSING_ALLELE: u8 = u8::MAX;

/// Fixed columns before the first sample: CHROM POS ID REF ALT QUAL FILTER INFO FORMAT.
const FIXED_COLUMNS: usize = 9;

#[derive(Debug)]
struct VcfCandidate {
    line: usize,
    keys: CandidateKeys,
    ref_allele: String,
    alt_alleles: String,
    calls: Vec<[u8; 2]>,
}

struct VcfScan<'p, R> {
    tokens: TokenReader<R>,
    panel: &'p ReferencePanel,
    path: String,
    sample_names: Option<Vec<String>>,
    candidates: Vec<VcfCandidate>,
    report: MatchReport,
    tally: KeyTally,
}

/// Reads a VCF and keeps the GT rows that reconcile with the panel.
pub fn decode_vcf(
    path: &Path,
    panel: &ReferencePanel,
    options: &DecodeOptions,
) -> Result<DecodedDataset, GenotypeIoError> {
    let path_display = path.display().to_string();
    let stream = open_byte_stream(path).map_err(|source| GenotypeIoError::Io {
        path: path_display.clone(),
        source,
    })?;

    let mut scan = VcfScan {
        tokens: TokenReader::new(stream, options.max_token_len),
        panel,
        path: path_display.clone(),
        sample_names: None,
        candidates: Vec::new(),
        report: MatchReport::default(),
        tally: KeyTally::default(),
    };
    while scan.next_line()? {}

    let VcfScan {
        sample_names,
        candidates,
        mut report,
        tally,
        ..
    } = scan;
    let sample_names = sample_names.ok_or_else(|| GenotypeIoError::MissingHeader {
        path: path_display.clone(),
    })?;
    debug!("Read {} samples from {path_display}", sample_names.len());

    report.candidate_rows = candidates.len();
    report.tally = tally;
    let key_type = tally.select();
    report.key_type = Some(key_type);

    let mut claims = SnpClaims::new(panel.len());
    let mut builder = GenotypeMatrixBuilder::new(sample_names.len());
    for candidate in candidates {
        let Some(snp_id) = candidate.keys.get(key_type) else {
            continue;
        };
        let snp = panel.snp(snp_id)?;
        let Some(alleles) = resolve_vcf_alleles(
            &candidate.ref_allele,
            &candidate.alt_alleles,
            snp.ref_allele,
            snp.alt_allele,
        ) else {
            report.allele_mismatches += 1;
            continue;
        };
        if !claims.claim(snp_id) {
            report.duplicates += 1;
            continue;
        }

        report.matched_snps += 1;
        report.flipped += usize::from(alleles.flipped);
        report.swapped += usize::from(alleles.ref_index != 0);
        report.multiallelic += usize::from(alleles.multiallelic);

        let row = builder.push_row(snp_id);
        for (slot, (sample, &[first, second])) in
            row.iter_mut().zip(candidate.calls.iter().enumerate())
        {
            if first == MISSING_ALLELE || second == MISSING_ALLELE {
                *slot = MISSING_GENOTYPE;
                continue;
            }
            *slot = alleles.genotype(first, second);
            if *slot == MISSING_GENOTYPE {
                report.unexpected_alleles += 1;
                if options.policy.strict_multiallelic {
                    return Err(GenotypeIoError::UnexpectedAllele {
                        path: path_display,
                        line: candidate.line,
                        sample: sample_names[sample].clone(),
                    });
                }
            }
        }
    }
    report.check_policy(&options.policy)?;

    Ok(DecodedDataset {
        sample_names,
        matrix: builder.finish(),
        report,
    })
}

impl<R: BufRead> VcfScan<'_, R> {
    /// Consumes one line. Returns `false` at end of input.
    fn next_line(&mut self) -> Result<bool, GenotypeIoError> {
        let hashes = self
            .tokens
            .take_line_prefix(b'#', 2)
            .map_err(|e| token_error(&self.path, e))?;
        if hashes == 2 {
            self.tokens
                .skip_rest_of_line()
                .map_err(|e| token_error(&self.path, e))?;
            return Ok(true);
        }

        let Some(first) = self
            .tokens
            .next_token()
            .map_err(|e| token_error(&self.path, e))?
        else {
            return Ok(false);
        };
        let first_ends_line = first.ends_line;

        if hashes == 1 {
            let is_header = first.bytes == b"CHROM";
            if is_header {
                self.read_header(first_ends_line)?;
            } else if !first_ends_line {
                self.tokens
                    .skip_rest_of_line()
                    .map_err(|e| token_error(&self.path, e))?;
            }
            return Ok(true);
        }
        if first.bytes.is_empty() && first_ends_line {
            return Ok(true);
        }

        let chrom = utf8_field(&self.path, first.bytes)?;
        let line = self.tokens.line();
        let Some(n_samples) = self.sample_names.as_ref().map(Vec::len) else {
            return Err(GenotypeIoError::MissingHeader {
                path: self.path.clone(),
            });
        };

        let mut ends_line = first_ends_line;
        let mut fixed: [String; 4] = Default::default();
        for (column, slot) in fixed.iter_mut().enumerate() {
            if ends_line {
                return Err(column_count(&self.path, line, n_samples, column + 1));
            }
            let (field, ends) = self.next_field()?;
            ends_line = ends;
            *slot = field;
        }
        let [pos, id, ref_allele, alt_alleles] = fixed;

        // QUAL, FILTER and INFO are never used; INFO may be arbitrarily long.
        for column in 5..8 {
            if ends_line {
                return Err(column_count(&self.path, line, n_samples, column));
            }
            ends_line = match self
                .tokens
                .skip_field()
                .map_err(|e| token_error(&self.path, e))?
            {
                Some(ends) => ends,
                None => return Err(column_count(&self.path, line, n_samples, column)),
            };
        }
        if ends_line {
            return Err(column_count(&self.path, line, n_samples, 8));
        }
        let (has_gt, ends_line) = match self
            .tokens
            .next_token()
            .map_err(|e| token_error(&self.path, e))?
        {
            Some(format) => (format.bytes.starts_with(b"GT"), format.ends_line),
            None => return Err(column_count(&self.path, line, n_samples, 8)),
        };

        self.report.dataset_snps += 1;
        if !has_gt {
            self.report.non_gt_rows += 1;
        }
        if ends_line {
            return Err(column_count(&self.path, line, n_samples, FIXED_COLUMNS));
        }

        let keys = CandidateKeys::lookup(self.panel, &id, &chrom, &pos);
        if !(has_gt && keys.is_candidate()) {
            let found = self
                .tokens
                .skip_rest_of_line()
                .map_err(|e| token_error(&self.path, e))?;
            if found != n_samples {
                return Err(column_count(&self.path, line, n_samples, FIXED_COLUMNS + found));
            }
            return Ok(true);
        }

        let mut calls = Vec::with_capacity(n_samples);
        loop {
            let Some(token) = self
                .tokens
                .next_token()
                .map_err(|e| token_error(&self.path, e))?
            else {
                break;
            };
            let ends = token.ends_line;
            calls.push(parse_gt(token.bytes));
            if ends {
                break;
            }
            if calls.len() == n_samples {
                let extra = self
                    .tokens
                    .skip_rest_of_line()
                    .map_err(|e| token_error(&self.path, e))?;
                return Err(column_count(&self.path, line, n_samples, FIXED_COLUMNS + n_samples + extra));
            }
        }
        if calls.len() != n_samples {
            return Err(column_count(&self.path, line, n_samples, FIXED_COLUMNS + calls.len()));
        }

        self.tally.add(&keys);
        self.candidates.push(VcfCandidate {
            line,
            keys,
            ref_allele,
            alt_alleles,
            calls,
        });
        Ok(true)
    }

    fn read_header(&mut self, mut ends_line: bool) -> Result<(), GenotypeIoError> {
        if self.sample_names.is_some() {
            return Err(GenotypeIoError::MalformedRecord {
                path: self.path.clone(),
                line: self.tokens.line(),
                message: "a second #CHROM header row".to_string(),
            });
        }
        let mut columns = 1usize;
        let mut names = Vec::new();
        while !ends_line {
            let (field, ends) = self.next_field()?;
            ends_line = ends;
            if columns >= FIXED_COLUMNS {
                names.push(field);
            }
            columns += 1;
        }
        if names.is_empty() {
            return Err(GenotypeIoError::NoSamples {
                path: self.path.clone(),
            });
        }
        self.sample_names = Some(names);
        Ok(())
    }

    fn next_field(&mut self) -> Result<(String, bool), GenotypeIoError> {
        let line = self.tokens.line();
        match self.tokens.next_token() {
            Ok(Some(token)) => Ok((utf8_field(&self.path, token.bytes)?, token.ends_line)),
            Ok(None) => Err(GenotypeIoError::MalformedRecord {
                path: self.path.clone(),
                line,
                message: "unexpected end of file".to_string(),
            }),
            Err(e) => Err(token_error(&self.path, e)),
        }
    }
}

fn utf8_field(path: &str, bytes: &[u8]) -> Result<String, GenotypeIoError> {
    str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|source| GenotypeIoError::Utf8 {
            path: path.to_string(),
            source,
        })
}

fn column_count(path: &str, line: usize, n_samples: usize, found: usize) -> GenotypeIoError {
    GenotypeIoError::ColumnCount {
        path: path.to_string(),
        line,
        expected: FIXED_COLUMNS + n_samples,
        found,
    }
}

fn token_error(path: &str, err: TokenizerError) -> GenotypeIoError {
    match err {
        TokenizerError::Io(source) => GenotypeIoError::Io {
            path: path.to_string(),
            source,
        },
        TokenizerError::TooLong { line, limit } => GenotypeIoError::TokenTooLong {
            path: path.to_string(),
            line,
            limit,
        },
    }
}

/// Parses the GT subfield of a sample column into two allele indices. Anything that
/// is not a diploid call of `.` or decimal indices yields missing alleles.
fn parse_gt(field: &[u8]) -> [u8; 2] {
    let gt = match memchr::memchr(b':', field) {
        Some(end) => &field[..end],
        None => field,
    };
    let Some(split) = memchr::memchr2(b'|', b'/', gt) else {
        return [MISSING_ALLELE; 2];
    };
    let (first, second) = (&gt[..split], &gt[split + 1..]);
    if memchr::memchr2(b'|', b'/', second).is_some() {
        return [MISSING_ALLELE; 2];
    }
    [parse_allele_index(first), parse_allele_index(second)]
}

fn parse_allele_index(raw: &[u8]) -> u8 {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return MISSING_ALLELE;
    }
    raw.iter()
        .try_fold(0u8, |acc, &d| acc.checked_mul(10)?.checked_add(d - b'0'))
        .filter(|&index| index != MISSING_ALLELE)
        .unwrap_or(MISSING_ALLELE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gt_fields_decode_to_allele_pairs() {
        assert_eq!(parse_gt(b"0|1"), [0, 1]);
        assert_eq!(parse_gt(b"1/1:35:99"), [1, 1]);
        assert_eq!(parse_gt(b"12/3"), [12, 3]);
        assert_eq!(parse_gt(b"./."), [MISSING_ALLELE, MISSING_ALLELE]);
        assert_eq!(parse_gt(b"0/."), [0, MISSING_ALLELE]);
        assert_eq!(parse_gt(b"1"), [MISSING_ALLELE; 2]);
        assert_eq!(parse_gt(b"0/1/1"), [MISSING_ALLELE; 2]);
        assert_eq!(parse_gt(b"999|0"), [MISSING_ALLELE, 0]);
    }
}
