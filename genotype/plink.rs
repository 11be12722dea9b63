// ========================================================================================
//
//                          Binary PLINK (.bed/.bim/.fam) decoder
//
// ========================================================================================
//
// The .bim file is scanned once to find rows that hit the panel, the .bed file is
// memory-mapped and only the selected variant blocks are decoded. Swapped alleles
// are corrected while unpacking so that no second pass over the matrix is needed.

use log::debug;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::str;
use std::sync::OnceLock;

use super::matching::{CandidateKeys, KeyTally, MatchReport, SnpClaims};
use super::matrix::{GenotypeMatrixBuilder, MISSING_GENOTYPE};
use super::{DecodeOptions, DecodedDataset, GenotypeIoError};
use crate::panel::{AlleleReconciliation, ReferencePanel};
use crate::shared::files::{open_text_source, sibling_with_extension};

const PLINK_HEADER_LEN: u64 = 3;

/// A .bim row that hit the panel under at least one key type.
#[derive(Debug)]
struct BimCandidate {
    row: usize,
    keys: CandidateKeys,
    ref_allele: String,
    alt_allele: String,
}

#[derive(Debug)]
struct SelectedSnp {
    bim_row: usize,
    snp_id: usize,
    reconciliation: AlleleReconciliation,
}

/// Reads the PLINK set at `prefix` and keeps the rows that reconcile with the panel.
pub fn decode_plink(
    prefix: &Path,
    panel: &ReferencePanel,
    options: &DecodeOptions,
) -> Result<DecodedDataset, GenotypeIoError> {
    let bed_path = sibling_with_extension(prefix, "bed");
    let bim_path = sibling_with_extension(prefix, "bim");
    let fam_path = sibling_with_extension(prefix, "fam");

    let sample_names = read_fam_sample_names(&fam_path)?;
    if sample_names.is_empty() {
        return Err(GenotypeIoError::NoSamples {
            path: fam_path.display().to_string(),
        });
    }
    debug!("Read {} samples from {}", sample_names.len(), fam_path.display());

    let (candidates, mut report) = scan_bim(&bim_path, panel)?;
    let key_type = report.tally.select();
    report.key_type = Some(key_type);

    let mut claims = SnpClaims::new(panel.len());
    let mut selected = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        let Some(snp_id) = candidate.keys.get(key_type) else {
            continue;
        };
        let snp = panel.snp(snp_id)?;
        let reconciliation = AlleleReconciliation::classify_str(
            &candidate.ref_allele,
            &candidate.alt_allele,
            snp.ref_allele,
            snp.alt_allele,
        );
        if !reconciliation.is_match() {
            report.allele_mismatches += 1;
            continue;
        }
        if !claims.claim(snp_id) {
            report.duplicates += 1;
            continue;
        }
        report.swapped += usize::from(reconciliation.is_swapped());
        report.flipped += usize::from(reconciliation.is_flipped());
        selected.push(SelectedSnp {
            bim_row: candidate.row,
            snp_id,
            reconciliation,
        });
    }
    drop(candidates);
    report.matched_snps = selected.len();
    report.check_policy(&options.policy)?;

    let matrix = {
        let bed_display = bed_path.display().to_string();
        let file = File::open(&bed_path).map_err(|source| GenotypeIoError::Io {
            path: bed_display.clone(),
            source,
        })?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| GenotypeIoError::Io {
            path: bed_display.clone(),
            source,
        })?;

        let header_len = PLINK_HEADER_LEN as usize;
        if mmap.len() < header_len {
            return Err(GenotypeIoError::InvalidHeader(format!(
                "{bed_display} is shorter than the 3-byte PLINK header"
            )));
        }
        validate_bed_header(&mmap[..header_len])?;

        let bytes_per_snp = sample_names.len().div_ceil(4);
        let expected = PLINK_HEADER_LEN + (bytes_per_snp as u64) * (report.dataset_snps as u64);
        if mmap.len() as u64 != expected {
            return Err(GenotypeIoError::BedLength {
                path: bed_display,
                expected,
                actual: mmap.len() as u64,
            });
        }

        let mut builder = GenotypeMatrixBuilder::with_capacity(sample_names.len(), selected.len());
        for snp in &selected {
            let offset = header_len + snp.bim_row * bytes_per_snp;
            let row = builder.push_row(snp.snp_id);
            decode_bed_row(
                &mmap[offset..offset + bytes_per_snp],
                row,
                snp.reconciliation.is_swapped(),
            );
        }
        builder.finish()
    };

    Ok(DecodedDataset {
        sample_names,
        matrix,
        report,
    })
}

/// Unpacks one variant-major .bed block into alt-allele counts, optionally mirroring
/// homozygotes for swapped alleles. `dest.len()` is the sample count.
pub fn decode_bed_row(bytes: &[u8], dest: &mut [u8], swap: bool) {
    let table = &decode_tables()[usize::from(swap)];
    for (chunk, &byte) in dest.chunks_mut(4).zip(bytes) {
        let decoded = &table[byte as usize];
        chunk.copy_from_slice(&decoded[..chunk.len()]);
    }
}

/// Two 256-entry tables, plain and swapped, mapping a packed byte to four calls.
fn decode_tables() -> &'static [[[u8; 4]; 256]; 2] {
    static TABLES: OnceLock<[[[u8; 4]; 256]; 2]> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut tables = [[[0u8; 4]; 256]; 2];
        for byte in 0u16..256 {
            for offset in 0..4 {
                let code = ((byte >> (offset * 2)) & 0b11) as u8;
                let count = match code {
                    0b00 => 0,
                    0b01 => MISSING_GENOTYPE,
                    0b10 => 1,
                    _ => 2,
                };
                tables[0][byte as usize][offset] = count;
                tables[1][byte as usize][offset] = AlleleReconciliation::Swapped.recode(count);
            }
        }
        tables
    })
}

fn validate_bed_header(header: &[u8]) -> Result<(), GenotypeIoError> {
    match header {
        [0x6c, 0x1b, 0x01] => Ok(()),
        [0x6c, 0x1b, mode] => Err(GenotypeIoError::InvalidHeader(format!(
            "unsupported mode byte {mode:#04x} (only variant-major mode is supported)"
        ))),
        _ => Err(GenotypeIoError::InvalidHeader(
            "missing PLINK magic bytes 0x6c 0x1b".to_string(),
        )),
    }
}

fn read_fam_sample_names(path: &Path) -> Result<Vec<String>, GenotypeIoError> {
    let path_display = path.display().to_string();
    let mut reader = open_text_source(path).map_err(|source| GenotypeIoError::Io {
        path: path_display.clone(),
        source,
    })?;
    let mut names = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = reader.next_line().map_err(|source| GenotypeIoError::Io {
        path: path_display.clone(),
        source,
    })? {
        line_no += 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let text = str::from_utf8(line).map_err(|err| GenotypeIoError::Utf8 {
            path: path_display.clone(),
            source: err,
        })?;
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(GenotypeIoError::MalformedRecord {
                path: path_display,
                line: line_no,
                message: "expected 6 whitespace-delimited fields".to_string(),
            });
        }
        names.push(fields[1].to_string());
    }

    Ok(names)
}

fn scan_bim(
    path: &Path,
    panel: &ReferencePanel,
) -> Result<(Vec<BimCandidate>, MatchReport), GenotypeIoError> {
    let path_display = path.display().to_string();
    let mut reader = open_text_source(path).map_err(|source| GenotypeIoError::Io {
        path: path_display.clone(),
        source,
    })?;
    let mut candidates = Vec::new();
    let mut report = MatchReport::default();
    let mut tally = KeyTally::default();
    let mut line_no = 0usize;

    while let Some(line) = reader.next_line().map_err(|source| GenotypeIoError::Io {
        path: path_display.clone(),
        source,
    })? {
        line_no += 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let text = str::from_utf8(line).map_err(|err| GenotypeIoError::Utf8 {
            path: path_display.clone(),
            source: err,
        })?;
        let mut fields = text.split_whitespace();
        let (Some(chr), Some(id), Some(_cm), Some(pos), Some(a1), Some(a2)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(GenotypeIoError::MalformedRecord {
                path: path_display,
                line: line_no,
                message: "expected 6 whitespace-delimited fields".to_string(),
            });
        };

        let row = report.dataset_snps;
        report.dataset_snps += 1;
        let keys = CandidateKeys::lookup(panel, id, chr, pos);
        if keys.is_candidate() {
            tally.add(&keys);
            candidates.push(BimCandidate {
                row,
                keys,
                ref_allele: a1.to_string(),
                alt_allele: a2.to_string(),
            });
        }
    }

    report.candidate_rows = candidates.len();
    report.tally = tally;
    Ok((candidates, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn encode(calls: &[u8]) -> Vec<u8> {
        calls
            .chunks(4)
            .map(|chunk| {
                chunk.iter().enumerate().fold(0u8, |byte, (i, &call)| {
                    let code = match call {
                        0 => 0b00,
                        1 => 0b10,
                        2 => 0b11,
                        _ => 0b01,
                    };
                    byte | (code << (2 * i))
                })
            })
            .collect()
    }

    #[test]
    fn bed_rows_round_trip_with_and_without_swap() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in [1usize, 3, 4, 5, 17, 64] {
            let calls: Vec<u8> = (0..n).map(|_| rng.gen_range(0..4u8)).collect();
            let bytes = encode(&calls);

            let mut plain = vec![9u8; n];
            decode_bed_row(&bytes, &mut plain, false);
            assert_eq!(plain, calls);

            let mut swapped = vec![9u8; n];
            decode_bed_row(&bytes, &mut swapped, true);
            for (raw, got) in calls.iter().zip(&swapped) {
                let expected = match raw {
                    0 => 2,
                    2 => 0,
                    other => *other,
                };
                assert_eq!(*got, expected);
            }
        }
    }

    #[test]
    fn header_validation_reports_mode() {
        assert!(validate_bed_header(&[0x6c, 0x1b, 0x01]).is_ok());
        assert!(matches!(
            validate_bed_header(&[0x6c, 0x1b, 0x00]),
            Err(GenotypeIoError::InvalidHeader(msg)) if msg.contains("mode")
        ));
        assert!(validate_bed_header(&[0x00, 0x1b, 0x01]).is_err());
    }

    #[test]
    fn padding_bits_are_ignored() {
        // Five samples: the second byte carries one call and six padding bits.
        let bytes = [0b11_10_01_00u8, 0b01_01_01_11];
        let mut dest = [0u8; 5];
        decode_bed_row(&bytes, &mut dest, false);
        assert_eq!(dest, [0, MISSING_GENOTYPE, 1, 2, 2]);
    }
}
