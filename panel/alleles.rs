// ========================================================================================
//                          Allele reconciliation against the panel
// ========================================================================================

use crate::genotype::MISSING_GENOTYPE;

/// Watson-Crick complement of a nucleotide. Anything other than A, C, G or T has no
/// complement and so can never match through a strand flip.
#[inline]
pub fn complement(allele: u8) -> Option<u8> {
    match allele.to_ascii_uppercase() {
        b'A' => Some(b'T'),
        b'T' => Some(b'A'),
        b'C' => Some(b'G'),
        b'G' => Some(b'C'),
        _ => None,
    }
}

/// How a dataset's (ref, alt) pair lines up with the panel's expected pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlleleReconciliation {
    NoMatch,
    Direct,
    Swapped,
    Flipped,
    SwappedFlipped,
}

impl AlleleReconciliation {
    /// Tests the four orientations in fixed priority order and returns the first that
    /// matches. Alleles compare case-insensitively; a zero byte stands for an allele
    /// that was not a single character and never matches.
    pub fn classify(ds_ref: u8, ds_alt: u8, exp_ref: u8, exp_alt: u8) -> Self {
        let (r, a) = (ds_ref.to_ascii_uppercase(), ds_alt.to_ascii_uppercase());
        let (er, ea) = (exp_ref.to_ascii_uppercase(), exp_alt.to_ascii_uppercase());
        if r == 0 || a == 0 {
            return Self::NoMatch;
        }

        if r == er && a == ea {
            return Self::Direct;
        }
        if r == ea && a == er {
            return Self::Swapped;
        }
        let (Some(fr), Some(fa)) = (complement(r), complement(a)) else {
            return Self::NoMatch;
        };
        if fr == er && fa == ea {
            Self::Flipped
        } else if fr == ea && fa == er {
            Self::SwappedFlipped
        } else {
            Self::NoMatch
        }
    }

    /// Same as [`classify`](Self::classify) for textual alleles. Multi-character
    /// alleles never match.
    pub fn classify_str(ds_ref: &str, ds_alt: &str, exp_ref: u8, exp_alt: u8) -> Self {
        Self::classify(single_base(ds_ref), single_base(ds_alt), exp_ref, exp_alt)
    }

    #[inline]
    pub fn is_match(self) -> bool {
        self != Self::NoMatch
    }

    #[inline]
    pub fn is_swapped(self) -> bool {
        matches!(self, Self::Swapped | Self::SwappedFlipped)
    }

    #[inline]
    pub fn is_flipped(self) -> bool {
        matches!(self, Self::Flipped | Self::SwappedFlipped)
    }

    /// Re-expresses an alt-allele count in the panel's orientation. Heterozygotes and
    /// missing calls are orientation-free.
    #[inline]
    pub fn recode(self, count: u8) -> u8 {
        if !self.is_swapped() {
            return count;
        }
        match count {
            0 => 2,
            2 => 0,
            other => other,
        }
    }
}

fn single_base(allele: &str) -> u8 {
    match allele.as_bytes() {
        [base] => *base,
        _ => 0,
    }
}

/// Which VCF allele indices carry the panel's reference and alternate alleles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcfAlleleIndices {
    pub ref_index: u8,
    pub alt_index: u8,
    pub flipped: bool,
    pub multiallelic: bool,
}

impl VcfAlleleIndices {
    /// Turns the two allele indices of a diploid call into the panel's alt count.
    /// Calls with an allele that is neither expected index are missing.
    #[inline]
    pub fn genotype(&self, first: u8, second: u8) -> u8 {
        let mut valid = 0u8;
        let mut alts = 0u8;
        for allele in [first, second] {
            if allele == self.ref_index {
                valid += 1;
            } else if allele == self.alt_index {
                valid += 1;
                alts += 1;
            }
        }
        if valid == 2 { alts } else { MISSING_GENOTYPE }
    }
}

/// Locates the panel's expected alleles among a VCF record's REF and comma-separated
/// ALT alleles (index 0 is REF, 1.. the ALTs).
///
/// The record is read on the forward strand first. Only when its REF matches
/// neither expected allele directly, but does after complementing, is every allele
/// of the record complemented. Returns `None` when either expected allele cannot be
/// placed.
pub fn resolve_vcf_alleles(
    ref_allele: &str,
    alt_alleles: &str,
    exp_ref: u8,
    exp_alt: u8,
) -> Option<VcfAlleleIndices> {
    let er = exp_ref.to_ascii_uppercase();
    let ea = exp_alt.to_ascii_uppercase();
    let base = single_base(ref_allele).to_ascii_uppercase();
    if base == 0 {
        return None;
    }

    let flipped = if base == er || base == ea {
        false
    } else {
        match complement(base) {
            Some(c) if c == er || c == ea => true,
            _ => return None,
        }
    };
    let orient = |allele: u8| {
        let allele = allele.to_ascii_uppercase();
        if flipped {
            complement(allele).unwrap_or(0)
        } else {
            allele
        }
    };

    let mut ref_index: Option<u8> = None;
    let mut alt_index: Option<u8> = None;
    let oriented_ref = orient(base);
    if oriented_ref == er {
        ref_index = Some(0);
    } else if oriented_ref == ea {
        alt_index = Some(0);
    }

    let mut alt_count = 0usize;
    for (offset, alt) in alt_alleles.split(',').enumerate() {
        alt_count += 1;
        // u8::MAX is reserved for a missing allele in decoded calls.
        let Ok(index) = u8::try_from(offset + 1) else {
            break;
        };
        if index == u8::MAX {
            break;
        }
        let allele = orient(single_base(alt));
        if allele == 0 {
            continue;
        }
        if allele == er && ref_index.is_none() {
            ref_index = Some(index);
        } else if allele == ea && alt_index.is_none() {
            alt_index = Some(index);
        }
    }

    Some(VcfAlleleIndices {
        ref_index: ref_index?,
        alt_index: alt_index?,
        flipped,
        multiallelic: alt_count > 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_priority_order() {
        use AlleleReconciliation::*;
        assert_eq!(AlleleReconciliation::classify(b'A', b'G', b'A', b'G'), Direct);
        assert_eq!(AlleleReconciliation::classify(b'G', b'A', b'A', b'G'), Swapped);
        assert_eq!(AlleleReconciliation::classify(b'T', b'C', b'A', b'G'), Flipped);
        assert_eq!(AlleleReconciliation::classify(b'C', b'T', b'A', b'G'), SwappedFlipped);
        assert_eq!(AlleleReconciliation::classify(b'A', b'C', b'A', b'G'), NoMatch);
        assert_eq!(AlleleReconciliation::classify(b'a', b'g', b'A', b'G'), Direct);
        // A palindromic pair reads as a direct match before a flip is considered.
        assert_eq!(AlleleReconciliation::classify(b'A', b'T', b'A', b'T'), Direct);
    }

    #[test]
    fn exactly_one_classification_per_pair() {
        let bases = [b'A', b'C', b'G', b'T', b'N'];
        for &r in &bases {
            for &a in &bases {
                let c = AlleleReconciliation::classify(r, a, b'C', b'T');
                let orientations = [
                    c == AlleleReconciliation::Direct,
                    c == AlleleReconciliation::Swapped,
                    c == AlleleReconciliation::Flipped,
                    c == AlleleReconciliation::SwappedFlipped,
                    c == AlleleReconciliation::NoMatch,
                ];
                assert_eq!(orientations.iter().filter(|&&hit| hit).count(), 1);
            }
        }
    }

    #[test]
    fn non_nucleotides_and_long_alleles_never_match() {
        assert_eq!(complement(b'N'), None);
        assert_eq!(
            AlleleReconciliation::classify(b'N', b'A', b'N', b'A'),
            AlleleReconciliation::Direct
        );
        assert_eq!(
            AlleleReconciliation::classify_str("AT", "G", b'A', b'G'),
            AlleleReconciliation::NoMatch
        );
        assert_eq!(
            AlleleReconciliation::classify_str("-", "A", b'T', b'A'),
            AlleleReconciliation::NoMatch
        );
    }

    #[test]
    fn swapped_orientation_mirrors_homozygotes() {
        let swapped = AlleleReconciliation::Swapped;
        assert_eq!(swapped.recode(0), 2);
        assert_eq!(swapped.recode(1), 1);
        assert_eq!(swapped.recode(2), 0);
        assert_eq!(swapped.recode(MISSING_GENOTYPE), MISSING_GENOTYPE);
        assert_eq!(AlleleReconciliation::Flipped.recode(0), 0);
        assert!(AlleleReconciliation::SwappedFlipped.is_flipped());
    }

    #[test]
    fn vcf_alleles_resolve_to_indices() {
        let direct = resolve_vcf_alleles("A", "G", b'A', b'G').unwrap();
        assert_eq!((direct.ref_index, direct.alt_index), (0, 1));
        assert!(!direct.flipped && !direct.multiallelic);

        let swapped = resolve_vcf_alleles("G", "A", b'A', b'G').unwrap();
        assert_eq!((swapped.ref_index, swapped.alt_index), (1, 0));
        assert_eq!(swapped.genotype(0, 0), 2);

        let flipped = resolve_vcf_alleles("T", "C", b'A', b'G').unwrap();
        assert!(flipped.flipped);
        assert_eq!((flipped.ref_index, flipped.alt_index), (0, 1));

        let multi = resolve_vcf_alleles("A", "C,G", b'A', b'G').unwrap();
        assert!(multi.multiallelic);
        assert_eq!(multi.alt_index, 2);
        assert_eq!(multi.genotype(0, 1), MISSING_GENOTYPE);
        assert_eq!(multi.genotype(2, 2), 2);

        // Palindromic SNPs stay on the forward strand.
        let palindromic = resolve_vcf_alleles("A", "T", b'A', b'T').unwrap();
        assert!(!palindromic.flipped);

        assert!(resolve_vcf_alleles("A", "C", b'A', b'G').is_none());
        assert!(resolve_vcf_alleles("AT", "G", b'A', b'G').is_none());
        assert!(resolve_vcf_alleles("C", "A", b'A', b'G').is_none());

        let swapped_flipped = resolve_vcf_alleles("C", "T", b'A', b'G').unwrap();
        assert!(swapped_flipped.flipped);
        assert_eq!((swapped_flipped.ref_index, swapped_flipped.alt_index), (1, 0));
    }
}
