// ========================================================================================
//                             The dense genotype matrix
// ========================================================================================

/// The value stored for a call that could not be decoded or reconciled.
pub const MISSING_GENOTYPE: u8 = 3;

/// Alt-allele counts for every matched ancestry SNP (rows) and every sample
/// (columns), in one flat row-major buffer. Each row is tagged with the panel id of
/// the SNP it holds; a panel id appears at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeMatrix {
    snp_ids: Vec<usize>,
    n_samples: usize,
    data: Vec<u8>,
}

impl GenotypeMatrix {
    pub fn n_snps(&self) -> usize {
        self.snp_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Panel ids of the rows, in row order.
    pub fn snp_ids(&self) -> &[usize] {
        &self.snp_ids
    }

    /// Iterates `(panel id, genotype)` for one sample across every row.
    pub fn sample_calls(&self, sample: usize) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.snp_ids
            .iter()
            .enumerate()
            .map(move |(row, &id)| (id, self.data[row * self.n_samples + sample]))
    }
}

/// Grows a [`GenotypeMatrix`] one row at a time without per-row allocations.
#[derive(Debug)]
pub struct GenotypeMatrixBuilder {
    snp_ids: Vec<usize>,
    n_samples: usize,
    data: Vec<u8>,
}

impl GenotypeMatrixBuilder {
    pub fn new(n_samples: usize) -> Self {
        Self::with_capacity(n_samples, 0)
    }

    pub fn with_capacity(n_samples: usize, rows: usize) -> Self {
        Self {
            snp_ids: Vec::with_capacity(rows),
            n_samples,
            data: Vec::with_capacity(rows * n_samples),
        }
    }

    /// Appends a row for `snp_id`, filled with [`MISSING_GENOTYPE`], and hands it back
    /// for the decoder to fill in.
    pub fn push_row(&mut self, snp_id: usize) -> &mut [u8] {
        self.snp_ids.push(snp_id);
        let start = self.data.len();
        self.data.resize(start + self.n_samples, MISSING_GENOTYPE);
        &mut self.data[start..]
    }

    pub fn finish(self) -> GenotypeMatrix {
        GenotypeMatrix {
            snp_ids: self.snp_ids,
            n_samples: self.n_samples,
            data: self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_laid_out_contiguously() {
        let mut builder = GenotypeMatrixBuilder::with_capacity(3, 2);
        builder.push_row(7).copy_from_slice(&[0, 1, 2]);
        let second = builder.push_row(2);
        assert_eq!(second, &[MISSING_GENOTYPE; 3]);
        second[1] = 2;

        let matrix = builder.finish();
        assert_eq!(matrix.n_snps(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.snp_ids(), &[7, 2]);
        assert_eq!(
            matrix.sample_calls(0).collect::<Vec<_>>(),
            vec![(7, 0), (2, MISSING_GENOTYPE)]
        );
        assert_eq!(
            matrix.sample_calls(1).collect::<Vec<_>>(),
            vec![(7, 1), (2, 2)]
        );
        assert_eq!(
            matrix.sample_calls(2).collect::<Vec<_>>(),
            vec![(7, 2), (2, MISSING_GENOTYPE)]
        );
    }

    #[test]
    fn empty_matrix_has_no_rows() {
        let matrix = GenotypeMatrixBuilder::new(4).finish();
        assert_eq!(matrix.n_snps(), 0);
        assert_eq!(matrix.sample_calls(3).count(), 0);
    }
}
