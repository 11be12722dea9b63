// ========================================================================================
//
//                          The ancestry-SNP reference panel
//
// ========================================================================================
//
// The panel is loaded once, indexed three ways (rsID, GRCh37 and GRCh38 position) and
// then frozen. Everything downstream, including the concurrent scorer workers, only
// ever borrows it immutably.

use ahash::AHashMap;
use log::{debug, info, warn};
use std::io;
use std::path::Path;
use std::str;
use thiserror::Error;

use crate::shared::files::open_text_source;
use crate::types::{
    ErrorCategory, GenoDistance, GenomeBuild, NUM_REF_POPS, NUM_VTX_POPS, RefPopulation, Vertex,
    parse_chromosome_label, parse_rs_number, position_key,
};

/// The versioned size of the shipped panel. Any other row count means the file is
/// not the panel the frequencies were calibrated against.
pub const EXPECTED_PANEL_SNPS: usize = 100_437;

/// The file name searched for when no explicit panel path is given.
pub const PANEL_FILE_NAME: &str = "AncInferSNPs.txt";

const PANEL_COLUMNS: usize = 6 + NUM_REF_POPS + NUM_VTX_POPS;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("I/O error reading ancestry SNP panel {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not an ancestry SNP panel: the header row must begin with 'chr'")]
    BadHeader { path: String },
    #[error("malformed record in {path} at line {line}: {message}")]
    MalformedRecord {
        path: String,
        line: usize,
        message: String,
    },
    #[error("{path} contains {found} ancestry SNPs but the panel must have exactly {expected}")]
    RowCount {
        path: String,
        found: usize,
        expected: usize,
    },
    #[error("ancestry SNP id {id} is out of range (panel has {len} SNPs)")]
    UnknownSnp { id: usize, len: usize },
}

impl PanelError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io { .. } => ErrorCategory::Io,
            Self::BadHeader { .. } | Self::MalformedRecord { .. } | Self::RowCount { .. } => {
                ErrorCategory::Format
            }
            Self::UnknownSnp { .. } => ErrorCategory::Configuration,
        }
    }
}

/// One ancestry SNP with its population allele frequencies.
///
/// `ref_pop_freqs` follows the panel column order EUR, AFA, ASN, LAT, SAS and
/// `vtx_pop_freqs` the vertex order E, F, A. A frequency is the probability of the
/// allele whose homozygote is coded as genotype 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSnp {
    pub id: usize,
    pub rs: u64,
    pub chromosome: u8,
    pub pos37: u32,
    pub pos38: u32,
    pub ref_allele: u8,
    pub alt_allele: u8,
    pub ref_pop_freqs: [f64; NUM_REF_POPS],
    pub vtx_pop_freqs: [f64; NUM_VTX_POPS],
}

impl ReferenceSnp {
    /// Whether a reference-population frequency can enter a log-likelihood.
    #[inline]
    pub fn ref_freq_is_informative(&self, pop: usize) -> bool {
        let p = self.ref_pop_freqs[pop];
        p > 0.0 && p < 1.0
    }
}

/// Expected Hardy-Weinberg log-likelihood distance between a population with
/// frequency `p_vertex` and an axis population with frequency `p_axis`.
///
/// Returns `None` when the axis frequency is 0 or 1 and a weighted log term would
/// be infinite.
pub fn expected_genetic_distance(p_vertex: f64, p_axis: f64) -> Option<f64> {
    if !(p_axis > 0.0 && p_axis < 1.0) {
        return None;
    }
    let q_vertex = 1.0 - p_vertex;
    let q_axis = 1.0 - p_axis;
    let hom_p = 2.0 * p_axis.ln();
    let hom_q = 2.0 * q_axis.ln();
    let het = p_axis.ln() + q_axis.ln() + std::f64::consts::LN_2;

    Some(
        -(p_vertex * p_vertex * hom_p
            + q_vertex * q_vertex * hom_q
            + 2.0 * p_vertex * q_vertex * het),
    )
}

#[derive(Debug)]
pub struct ReferencePanel {
    snps: Vec<ReferenceSnp>,
    rs_index: AHashMap<u64, usize>,
    pos37_index: AHashMap<u64, usize>,
    pos38_index: AHashMap<u64, usize>,
    /// Per SNP, `[vertex][axis]` expected genetic distance.
    expected_distances: Vec<[[f64; NUM_VTX_POPS]; NUM_VTX_POPS]>,
    /// Mean expected distance of each vertex, per axis over the SNPs whose axis
    /// frequency is informative.
    canonical: [GenoDistance; NUM_VTX_POPS],
    non_informative: usize,
}

impl ReferencePanel {
    /// Loads the shipped panel, which must contain exactly [`EXPECTED_PANEL_SNPS`] rows.
    pub fn load(path: &Path) -> Result<Self, PanelError> {
        Self::load_with_expected(path, EXPECTED_PANEL_SNPS)
    }

    /// Loads a panel whose row count must equal `expected_snps`.
    pub fn load_with_expected(path: &Path, expected_snps: usize) -> Result<Self, PanelError> {
        let path_display = path.display().to_string();
        let io_err = |source: io::Error| PanelError::Io {
            path: path_display.clone(),
            source,
        };

        let mut reader = open_text_source(path).map_err(io_err)?;
        let mut snps = Vec::with_capacity(expected_snps);
        let mut line_no = 0usize;

        while let Some(line) = reader.next_line().map_err(io_err)? {
            line_no += 1;
            if line_no == 1 {
                if !line.starts_with(b"chr") {
                    return Err(PanelError::BadHeader {
                        path: path_display.clone(),
                    });
                }
                continue;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let text = str::from_utf8(line).map_err(|err| PanelError::MalformedRecord {
                path: path_display.clone(),
                line: line_no,
                message: format!("line is not valid UTF-8: {err}"),
            })?;
            let snp = parse_panel_row(text, snps.len()).map_err(|message| {
                PanelError::MalformedRecord {
                    path: path_display.clone(),
                    line: line_no,
                    message,
                }
            })?;
            snps.push(snp);
        }

        if line_no == 0 {
            return Err(PanelError::BadHeader { path: path_display });
        }
        if snps.len() != expected_snps {
            return Err(PanelError::RowCount {
                path: path_display,
                found: snps.len(),
                expected: expected_snps,
            });
        }

        let panel = Self::from_snps(snps);
        info!(
            "Read {} ancestry SNPs from file {}",
            panel.len(),
            path.display()
        );
        Ok(panel)
    }

    /// Builds the indices and the expected-distance tensor from parsed SNPs. Ids are
    /// reassigned to match the vector order.
    pub fn from_snps(mut snps: Vec<ReferenceSnp>) -> Self {
        let mut rs_index = AHashMap::with_capacity(snps.len());
        let mut pos37_index = AHashMap::with_capacity(snps.len());
        let mut pos38_index = AHashMap::with_capacity(snps.len());
        let mut expected_distances = Vec::with_capacity(snps.len());
        let mut sums = [[0.0f64; NUM_VTX_POPS]; NUM_VTX_POPS];
        let mut counts = [0usize; NUM_VTX_POPS];
        let mut skipped_by_pop = [0usize; NUM_REF_POPS];

        for (id, snp) in snps.iter_mut().enumerate() {
            snp.id = id;
            rs_index.insert(snp.rs, id);
            pos37_index.insert(position_key(snp.chromosome, snp.pos37), id);
            pos38_index.insert(position_key(snp.chromosome, snp.pos38), id);

            for pop in RefPopulation::ALL {
                if !snp.ref_freq_is_informative(pop.index()) {
                    skipped_by_pop[pop.index()] += 1;
                }
            }

            // An axis only averages over the SNPs whose axis frequency is informative.
            let mut tensor = [[0.0f64; NUM_VTX_POPS]; NUM_VTX_POPS];
            for axis in Vertex::ALL.map(Vertex::index) {
                if !snp.ref_freq_is_informative(axis) {
                    continue;
                }
                counts[axis] += 1;
                for vertex in Vertex::ALL.map(Vertex::index) {
                    if let Some(dist) =
                        expected_genetic_distance(snp.vtx_pop_freqs[vertex], snp.ref_pop_freqs[axis])
                    {
                        tensor[vertex][axis] = dist;
                        sums[vertex][axis] += dist;
                    }
                }
            }
            expected_distances.push(tensor);
        }

        let non_informative = (0..NUM_VTX_POPS)
            .map(|axis| (snps.len() - counts[axis]) * NUM_VTX_POPS)
            .sum::<usize>();
        if non_informative > 0 {
            warn!(
                "{non_informative} panel (SNP, vertex, axis) cells have a non-informative axis frequency and are left out of the vertex means"
            );
        }
        for pop in RefPopulation::ALL {
            if skipped_by_pop[pop.index()] > 0 {
                debug!(
                    "{} ancestry SNPs have a {pop} frequency of 0 or 1",
                    skipped_by_pop[pop.index()]
                );
            }
        }

        let canonical = Vertex::ALL.map(|vertex| {
            let v = vertex.index();
            GenoDistance::from_axes([0, 1, 2].map(|axis| match counts[axis] {
                0 => 0.0,
                n => sums[v][axis] / n as f64,
            }))
        });
        debug!("Canonical vertex distances: {canonical:?}");

        Self {
            snps,
            rs_index,
            pos37_index,
            pos38_index,
            expected_distances,
            canonical,
            non_informative,
        }
    }

    pub fn len(&self) -> usize {
        self.snps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snps.is_empty()
    }

    pub fn snps(&self) -> &[ReferenceSnp] {
        &self.snps
    }

    pub fn find_by_rs(&self, rs: u64) -> Option<usize> {
        self.rs_index.get(&rs).copied()
    }

    pub fn find_by_position(&self, chromosome: u8, position: u32, build: GenomeBuild) -> Option<usize> {
        let key = position_key(chromosome, position);
        match build {
            GenomeBuild::Build37 => self.pos37_index.get(&key).copied(),
            GenomeBuild::Build38 => self.pos38_index.get(&key).copied(),
        }
    }

    /// Bounds-checked access by id.
    pub fn snp(&self, id: usize) -> Result<&ReferenceSnp, PanelError> {
        self.snps.get(id).ok_or(PanelError::UnknownSnp {
            id,
            len: self.snps.len(),
        })
    }

    /// `[vertex][axis]` expected distances of one SNP. Panics on an id that no lookup
    /// returned; callers validate ids once up front.
    #[inline]
    pub fn expected_distances(&self, id: usize) -> &[[f64; NUM_VTX_POPS]; NUM_VTX_POPS] {
        &self.expected_distances[id]
    }

    /// The vertex triangle (E, F, A) when every panel SNP is genotyped.
    pub fn canonical_triangle(&self) -> [GenoDistance; NUM_VTX_POPS] {
        self.canonical
    }

    pub fn non_informative_cells(&self) -> usize {
        self.non_informative
    }
}

fn parse_panel_row(text: &str, id: usize) -> Result<ReferenceSnp, String> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() < PANEL_COLUMNS {
        return Err(format!(
            "expected {PANEL_COLUMNS} whitespace-delimited fields, found {}",
            fields.len()
        ));
    }

    let chromosome = parse_chromosome_label(fields[0])?;
    let pos37 = parse_field::<u32>(fields[1], "GRCh37 position")?;
    let pos38 = parse_field::<u32>(fields[2], "GRCh38 position")?;
    let rs = parse_rs_number(fields[3])
        .or_else(|| fields[3].parse::<u64>().ok())
        .ok_or_else(|| format!("invalid rsID '{}'", fields[3]))?;
    let ref_allele = parse_allele(fields[4])?;
    let alt_allele = parse_allele(fields[5])?;

    let mut ref_pop_freqs = [0.0f64; NUM_REF_POPS];
    for (slot, raw) in ref_pop_freqs.iter_mut().zip(&fields[6..6 + NUM_REF_POPS]) {
        *slot = parse_frequency(raw)?;
    }
    let mut vtx_pop_freqs = [0.0f64; NUM_VTX_POPS];
    for (slot, raw) in vtx_pop_freqs.iter_mut().zip(&fields[6 + NUM_REF_POPS..PANEL_COLUMNS]) {
        *slot = parse_frequency(raw)?;
    }

    Ok(ReferenceSnp {
        id,
        rs,
        chromosome,
        pos37,
        pos38,
        ref_allele,
        alt_allele,
        ref_pop_freqs,
        vtx_pop_freqs,
    })
}

fn parse_field<T: str::FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("invalid {what} '{raw}'"))
}

fn parse_allele(raw: &str) -> Result<u8, String> {
    match raw.as_bytes() {
        [allele] => Ok(allele.to_ascii_uppercase()),
        _ => Err(format!("allele '{raw}' must be a single character")),
    }
}

fn parse_frequency(raw: &str) -> Result<f64, String> {
    let value: f64 = parse_field(raw, "allele frequency")?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("allele frequency {value} is outside [0, 1]"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "chr\tpos37\tpos38\trs\tref\talt\tEUR\tAFA\tASN\tLAT\tSAS\tE\tF\tA\n";

    fn panel_text(rows: &[&str]) -> String {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    const ROWS: [&str; 3] = [
        "1\t1000\t2000\t11\tA\tG\t0.1\t0.5\t0.9\t0.3\t0.7\t0.1\t0.5\t0.9",
        "2\t3000\t4000\trs22\tC\tT\t0.2\t0.4\t0.6\t0.3\t0.5\t0.25\t0.45\t0.65",
        "3\t5000\t6000\t33\tG\tA\t0.8\t0.3\t0.1\t0.4\t0.6\t0.85\t0.35\t0.15",
    ];

    #[test]
    fn loads_and_indexes_a_well_formed_panel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panel.txt");
        fs::write(&path, panel_text(&ROWS)).unwrap();

        let panel = ReferencePanel::load_with_expected(&path, 3).unwrap();
        assert_eq!(panel.len(), 3);
        assert_eq!(panel.find_by_rs(22), Some(1));
        assert_eq!(panel.find_by_rs(44), None);
        assert_eq!(panel.find_by_position(3, 5000, GenomeBuild::Build37), Some(2));
        assert_eq!(panel.find_by_position(3, 6000, GenomeBuild::Build38), Some(2));
        assert_eq!(panel.find_by_position(3, 6000, GenomeBuild::Build37), None);

        for snp in panel.snps() {
            for p in snp.ref_pop_freqs.iter().chain(snp.vtx_pop_freqs.iter()) {
                assert!(*p > 0.0 && *p < 1.0);
            }
        }
        assert_eq!(panel.snp(0).unwrap().ref_allele, b'A');
        assert!(matches!(
            panel.snp(3),
            Err(PanelError::UnknownSnp { id: 3, len: 3 })
        ));
        assert_eq!(panel.non_informative_cells(), 0);
    }

    #[test]
    fn row_count_mismatch_is_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panel.txt");
        fs::write(&path, panel_text(&ROWS[..2])).unwrap();

        let err = ReferencePanel::load_with_expected(&path, 3).unwrap_err();
        assert!(matches!(
            err,
            PanelError::RowCount {
                found: 2,
                expected: 3,
                ..
            }
        ));
        assert_eq!(err.category(), ErrorCategory::Format);

        let err = ReferencePanel::load(&path).unwrap_err();
        assert!(matches!(err, PanelError::RowCount { expected: EXPECTED_PANEL_SNPS, .. }));
    }

    #[test]
    fn header_must_begin_with_chr() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panel.txt");
        fs::write(&path, format!("snp\tpos\n{}\n", ROWS[0])).unwrap();

        let err = ReferencePanel::load_with_expected(&path, 1).unwrap_err();
        assert!(matches!(err, PanelError::BadHeader { .. }));
        assert_eq!(err.category(), ErrorCategory::Format);
    }

    #[test]
    fn rejects_out_of_range_frequencies_and_long_alleles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panel.txt");
        fs::write(
            &path,
            panel_text(&["1\t1\t1\t5\tA\tG\t1.2\t0.5\t0.5\t0.5\t0.5\t0.5\t0.5\t0.5"]),
        )
        .unwrap();
        assert!(matches!(
            ReferencePanel::load_with_expected(&path, 1),
            Err(PanelError::MalformedRecord { line: 2, .. })
        ));

        fs::write(
            &path,
            panel_text(&["1\t1\t1\t5\tAT\tG\t0.5\t0.5\t0.5\t0.5\t0.5\t0.5\t0.5\t0.5"]),
        )
        .unwrap();
        assert!(matches!(
            ReferencePanel::load_with_expected(&path, 1),
            Err(PanelError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn expected_distance_matches_closed_form() {
        let pv: f64 = 0.1;
        let pr: f64 = 0.5;
        let expected = -(pv * pv * 2.0 * pr.ln()
            + (1.0 - pv) * (1.0 - pv) * 2.0 * (1.0 - pr).ln()
            + 2.0 * pv * (1.0 - pv) * (pr.ln() + (1.0 - pr).ln() + 2f64.ln()));
        assert_abs_diff_eq!(
            expected_genetic_distance(pv, pr).unwrap(),
            expected,
            epsilon = 1e-12
        );
        assert!(expected_genetic_distance(0.3, 0.0).is_none());
        assert!(expected_genetic_distance(0.3, 1.0).is_none());
    }

    #[test]
    fn canonical_triangle_is_the_mean_over_snps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panel.txt");
        fs::write(&path, panel_text(&ROWS)).unwrap();
        let panel = ReferencePanel::load_with_expected(&path, 3).unwrap();

        let canonical = panel.canonical_triangle();
        for vertex in 0..NUM_VTX_POPS {
            let mean_e: f64 = (0..3)
                .map(|id| panel.expected_distances(id)[vertex][0])
                .sum::<f64>()
                / 3.0;
            assert_abs_diff_eq!(canonical[vertex].e, mean_e, epsilon = 1e-12);
        }
        // A vertex is closest to its own axis population.
        assert!(canonical[0].e < canonical[0].f);
        assert!(canonical[2].a < canonical[2].e);
    }

    fn snp_with(ref_pop_freqs: [f64; NUM_REF_POPS]) -> ReferenceSnp {
        ReferenceSnp {
            id: 0,
            rs: 1,
            chromosome: 1,
            pos37: 100,
            pos38: 200,
            ref_allele: b'A',
            alt_allele: b'G',
            ref_pop_freqs,
            vtx_pop_freqs: [0.2, 0.5, 0.8],
        }
    }

    #[test]
    fn fixed_axis_frequencies_are_left_out_of_vertex_means() {
        let informative = ReferencePanel::from_snps(vec![snp_with([0.2, 0.5, 0.8, 0.3, 0.6])]);
        let with_fixed_eur = ReferencePanel::from_snps(vec![
            snp_with([0.2, 0.5, 0.8, 0.3, 0.6]),
            snp_with([0.0, 0.5, 0.8, 0.3, 0.6]),
        ]);
        assert_eq!(informative.non_informative_cells(), 0);
        assert_eq!(with_fixed_eur.non_informative_cells(), NUM_VTX_POPS);
        assert_eq!(with_fixed_eur.expected_distances(1)[0][0], 0.0);

        let expected = informative.canonical_triangle();
        let actual = with_fixed_eur.canonical_triangle();
        for vertex in 0..NUM_VTX_POPS {
            assert!(expected[vertex].e > 0.5);
            assert_abs_diff_eq!(actual[vertex].e, expected[vertex].e, epsilon = 1e-12);
            assert_abs_diff_eq!(actual[vertex].f, expected[vertex].f, epsilon = 1e-12);
            assert_abs_diff_eq!(actual[vertex].a, expected[vertex].a, epsilon = 1e-12);
        }

        // An axis with no informative SNP at all has a zero mean.
        let all_fixed = ReferencePanel::from_snps(vec![snp_with([0.5, 1.0, 0.5, 0.3, 0.6])]);
        assert_eq!(all_fixed.canonical_triangle()[0].f, 0.0);
        assert!(all_fixed.canonical_triangle()[0].e > 0.0);
    }
}
