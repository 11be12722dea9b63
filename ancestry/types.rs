// ========================================================================================
//                       Populations, distances and site identifiers
// ========================================================================================

// Vocabulary shared by the panel, the genotype decoders and the scorer. Types private to
// one stage live with that stage.

use std::fmt;

/// Number of reference populations carried by every panel SNP (EUR, AFA, ASN, LAT, SAS).
pub const NUM_REF_POPS: usize = 5;

/// Number of vertex populations anchoring the ancestry triangle (E, F, A).
pub const NUM_VTX_POPS: usize = 3;

/// Position keys are packed as `chr * 10^9 + pos` so that one integer identifies a site.
pub const POSITION_KEY_STRIDE: u64 = 1_000_000_000;

/// The reference populations, in panel column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefPopulation {
    European,
    AfricanAmerican,
    Asian,
    Latino,
    SouthAsian,
}

impl RefPopulation {
    pub const ALL: [RefPopulation; NUM_REF_POPS] = [
        RefPopulation::European,
        RefPopulation::AfricanAmerican,
        RefPopulation::Asian,
        RefPopulation::Latino,
        RefPopulation::SouthAsian,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RefPopulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefPopulation::European => "EUR",
            RefPopulation::AfricanAmerican => "AFA",
            RefPopulation::Asian => "ASN",
            RefPopulation::Latino => "LAT",
            RefPopulation::SouthAsian => "SAS",
        };
        f.write_str(label)
    }
}

/// The three vertex populations. Their index doubles as the distance axis index:
/// axis 0 measures distance to EUR, axis 1 to AFR, axis 2 to EAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vertex {
    E,
    F,
    A,
}

impl Vertex {
    pub const ALL: [Vertex; NUM_VTX_POPS] = [Vertex::E, Vertex::F, Vertex::A];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Genetic distances to the three vertex populations (European, African, East Asian).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GenoDistance {
    pub e: f64,
    pub f: f64,
    pub a: f64,
}

impl GenoDistance {
    pub fn new(e: f64, f: f64, a: f64) -> Self {
        Self { e, f, a }
    }

    /// Builds a triple from an axis-indexed array (`[EUR, AFR, EAS]`).
    pub fn from_axes(axes: [f64; NUM_VTX_POPS]) -> Self {
        Self {
            e: axes[0],
            f: axes[1],
            a: axes[2],
        }
    }

    /// The fixed axis convention: x is the A distance, y the E distance, z the F distance.
    #[inline]
    pub fn to_point(self) -> SpatialPoint {
        SpatialPoint {
            x: self.a,
            y: self.e,
            z: self.f,
        }
    }
}

/// A point in the 3-D genetic distance space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpatialPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SpatialPoint {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &SpatialPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// How a failure propagates: configuration and format errors abort the run before
/// any output, data-quality conditions are normally skipped locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Format,
    DataQuality,
    Io,
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Configuration => "configuration error",
            ErrorCategory::Format => "format error",
            ErrorCategory::DataQuality => "data quality error",
            ErrorCategory::Io => "I/O error",
            ErrorCategory::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Which genome build a position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenomeBuild {
    Build37,
    Build38,
}

impl fmt::Display for GenomeBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenomeBuild::Build37 => f.write_str("GRCh37"),
            GenomeBuild::Build38 => f.write_str("GRCh38"),
        }
    }
}

/// Packs an autosome and a position into the key used by the panel position maps.
#[inline]
pub fn position_key(chromosome: u8, position: u32) -> u64 {
    u64::from(chromosome) * POSITION_KEY_STRIDE + u64::from(position)
}

/// Numeric code of a chromosome label. Accepts an optional case-insensitive `chr`
/// prefix; X, Y and MT map to 23, 24 and 25.
pub fn parse_chromosome_label(label: &str) -> Result<u8, String> {
    let label = label.trim();
    let bare = match label.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &label[3..],
        _ => label,
    };

    match bare.to_ascii_uppercase().as_str() {
        "X" => Ok(23),
        "Y" => Ok(24),
        "MT" | "M" => Ok(25),
        digits => digits
            .parse::<u8>()
            .map_err(|_| format!("unrecognized chromosome '{label}'")),
    }
}

/// Only autosomes take part in position matching; anything else yields `None`.
pub fn parse_autosome(chr_str: &str) -> Option<u8> {
    match parse_chromosome_label(chr_str) {
        Ok(chr) if (1..=22).contains(&chr) => Some(chr),
        _ => None,
    }
}

/// Parses `rs123` (case-insensitive prefix, digits only) into its numeric part.
pub fn parse_rs_number(id: &str) -> Option<u64> {
    let bytes = id.as_bytes();
    if bytes.len() <= 2 || !bytes[..2].eq_ignore_ascii_case(b"rs") {
        return None;
    }
    let digits = &id[2..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok().filter(|&rs| rs > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chromosome_label_supports_common_variants() {
        assert_eq!(parse_chromosome_label("1").unwrap(), 1);
        assert_eq!(parse_chromosome_label("chr2").unwrap(), 2);
        assert_eq!(parse_chromosome_label("chrX").unwrap(), 23);
        assert_eq!(parse_chromosome_label("MT").unwrap(), 25);
        assert_eq!(parse_chromosome_label(" chrM ").unwrap(), 25);
        assert!(parse_chromosome_label("scaffold_7").is_err());
    }

    #[test]
    fn autosome_parsing_rejects_sex_chromosomes() {
        assert_eq!(parse_autosome("CHR22"), Some(22));
        assert_eq!(parse_autosome("X"), None);
        assert_eq!(parse_autosome("0"), None);
        assert_eq!(parse_autosome("23"), None);
    }

    #[test]
    fn rs_numbers_require_prefix_and_digits() {
        assert_eq!(parse_rs_number("rs123"), Some(123));
        assert_eq!(parse_rs_number("RS9"), Some(9));
        assert_eq!(parse_rs_number("rs"), None);
        assert_eq!(parse_rs_number("rs12a"), None);
        assert_eq!(parse_rs_number("123"), None);
        assert_eq!(parse_rs_number("1:12345:A:G"), None);
    }

    #[test]
    fn position_keys_separate_chromosomes() {
        assert_eq!(position_key(1, 5), 1_000_000_005);
        assert_ne!(position_key(1, 5), position_key(2, 5));
    }

    #[test]
    fn distance_triples_follow_axis_convention() {
        let point = GenoDistance::new(1.0, 2.0, 3.0).to_point();
        assert_eq!(point, SpatialPoint::new(3.0, 1.0, 2.0));
    }
}
