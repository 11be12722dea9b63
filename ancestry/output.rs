// ========================================================================================
//                                 Ancestry result file
// ========================================================================================

use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::projector::ProjectedTriangle;
use crate::scorer::SampleResult;
use crate::shared::files::prepare_output_path;
use crate::types::{ErrorCategory, SpatialPoint};

pub const RESULT_COLUMNS: &str = "Sample\t#SNPs\tGD1 (x)\tGD2 (y)\tGD3 (z)\tGD4\tE(%)\tF(%)\tA(%)";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write ancestry results to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl OutputError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Io
    }
}

/// Writes the vertex block followed by one row per scored sample and returns the
/// number of rows. With no scored samples only the vertex block is written.
pub fn write_results<W: Write>(
    out: &mut W,
    canonical: &ProjectedTriangle,
    results: &[SampleResult],
) -> io::Result<usize> {
    writeln!(out, "# Positions of the three vertices")?;
    writeln!(out, "#")?;
    writeln!(out, "#          x       y      z")?;
    write_vertex(out, 'F', &canonical.f)?;
    write_vertex(out, 'A', &canonical.a)?;
    write_vertex(out, 'E', &canonical.e)?;
    writeln!(out, "#")?;

    let scored: Vec<_> = results
        .iter()
        .filter_map(|r| r.scores().map(|scores| (r, scores)))
        .collect();
    if scored.is_empty() {
        return Ok(0);
    }

    writeln!(out, "{RESULT_COLUMNS}")?;
    for (result, scores) in &scored {
        let pct = &scores.percentages;
        writeln!(
            out,
            "{}\t{}\t{:7.6}\t{:7.6}\t{:7.6}\t{:7.6}\t{:6.2}\t{:6.2}\t{:6.2}",
            result.name,
            result.genotyped_snps,
            scores.gd1,
            scores.gd2,
            scores.gd3,
            scores.gd4,
            pct.e,
            pct.f,
            pct.a
        )?;
    }
    Ok(scored.len())
}

fn write_vertex<W: Write>(out: &mut W, label: char, p: &SpatialPoint) -> io::Result<()> {
    writeln!(out, "# {label}: \t{:5.4}  {:5.4} {:5.4}", p.x, p.y, p.z)
}

/// Creates `path` (and its parent directories) and writes the results into it.
pub fn save_results(
    path: &Path,
    canonical: &ProjectedTriangle,
    results: &[SampleResult],
) -> Result<usize, OutputError> {
    let io_err = |source: io::Error| OutputError::Io {
        path: path.display().to_string(),
        source,
    };
    prepare_output_path(path).map_err(io_err)?;
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    let rows = write_results(&mut writer, canonical, results).map_err(io_err)?;
    writer.flush().map_err(io_err)?;
    info!("Saved ancestry results of {rows} samples to {}", path.display());
    Ok(rows)
}
