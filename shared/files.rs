use flate2::read::MultiGzDecoder;
use log::debug;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const STREAM_BUFFER_CAPACITY: usize = 1 << 20;

/// A trait that abstracts sequential, line-oriented access to text data such as
/// `.bim`, `.fam` and panel files, regardless of compression.
pub trait TextSource: Send {
    fn len(&self) -> Option<u64> {
        None
    }

    fn next_line<'a>(&'a mut self) -> io::Result<Option<&'a [u8]>>;
}

struct LocalTextSource {
    reader: Box<dyn BufRead + Send>,
    line: Vec<u8>,
    line_active: bool,
    len: Option<u64>,
    path_display: String,
}

impl TextSource for LocalTextSource {
    fn len(&self) -> Option<u64> {
        self.len
    }

    fn next_line<'a>(&'a mut self) -> io::Result<Option<&'a [u8]>> {
        if self.line_active {
            self.line.clear();
            self.line_active = false;
        }

        let bytes_read = self.reader.read_until(b'\n', &mut self.line).map_err(|e| {
            io::Error::new(e.kind(), format!("Error reading {}: {e}", self.path_display))
        })?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        self.line_active = true;
        Ok(Some(&self.line))
    }
}

/// Opens a text file for line-by-line reading. Gzip input is detected from its
/// magic bytes and decompressed on the fly.
pub fn open_text_source(path: &Path) -> io::Result<Box<dyn TextSource>> {
    let len = fs::metadata(path)
        .map_err(|e| io::Error::new(e.kind(), format!("Opening {}: {e}", path.display())))?
        .len();
    let compressed = is_gzip(path)?;
    let reader = open_byte_stream(path)?;
    Ok(Box::new(LocalTextSource {
        reader,
        line: Vec::with_capacity(1024),
        line_active: false,
        len: (!compressed).then_some(len),
        path_display: path.display().to_string(),
    }))
}

/// Opens a buffered byte stream over a possibly gzip-compressed file.
pub fn open_byte_stream(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("Opening {}: {e}", path.display())))?;
    if is_gzip(path)? {
        debug!("Decompressing {} as gzip", path.display());
        let decoder: Box<dyn Read + Send> = Box::new(MultiGzDecoder::new(file));
        Ok(Box::new(BufReader::with_capacity(
            STREAM_BUFFER_CAPACITY,
            decoder,
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(
            STREAM_BUFFER_CAPACITY,
            file,
        )))
    }
}

/// Checks the first two bytes of a file for the gzip signature.
pub fn is_gzip(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("Opening {}: {e}", path.display())))?;
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file.read(&mut magic[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(magic == GZIP_MAGIC)
}

pub fn prepare_output_path(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Appends `.ext` to a prefix without touching dots already present in the stem,
/// so `cohort.v2` becomes `cohort.v2.bed` rather than `cohort.bed`.
pub fn sibling_with_extension(prefix: &Path, extension: &str) -> PathBuf {
    let mut raw: OsString = prefix.as_os_str().to_owned();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

// ========================================================================================
//                                Dataset kind detection
// ========================================================================================

#[derive(Debug, Error)]
pub enum DatasetDetectError {
    #[error("genotype file {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("PLINK set {} is gzip-compressed; please decompress it first", .0.display())]
    CompressedPlink(PathBuf),
    #[error("PLINK set {} is incomplete; missing: {}", .prefix.display(), format_missing(.missing))]
    MissingCompanions {
        prefix: PathBuf,
        missing: Vec<PathBuf>,
    },
    #[error("genotype file {} should be a binary PLINK set or a .vcf / .vcf.gz file", .0.display())]
    Unsupported(PathBuf),
}

fn format_missing(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The two dataset shapes the decoders understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetKind {
    Plink { prefix: PathBuf },
    Vcf { path: PathBuf },
}

impl DatasetKind {
    /// Classifies a user-supplied genotype path. A bare prefix wins when all three
    /// PLINK companions exist next to it.
    pub fn detect(path: &Path) -> Result<Self, DatasetDetectError> {
        if plink_companions(path).iter().all(|p| p.is_file()) {
            return Ok(Self::Plink {
                prefix: path.to_path_buf(),
            });
        }

        let exists = path.exists();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (base_name, compressed) = match name.strip_suffix(".gz") {
            Some(stripped) => (stripped.to_string(), true),
            None => (name.clone(), false),
        };
        let extension = base_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("vcf") if exists => Ok(Self::Vcf {
                path: path.to_path_buf(),
            }),
            Some("bed" | "bim" | "fam") if exists && compressed => {
                Err(DatasetDetectError::CompressedPlink(path.to_path_buf()))
            }
            Some("bed" | "bim" | "fam") if exists => {
                let prefix = path.with_extension("");
                let missing: Vec<PathBuf> = plink_companions(&prefix)
                    .into_iter()
                    .filter(|p| !p.is_file())
                    .collect();
                if missing.is_empty() {
                    Ok(Self::Plink { prefix })
                } else {
                    Err(DatasetDetectError::MissingCompanions { prefix, missing })
                }
            }
            _ if !exists => Err(DatasetDetectError::NotFound(path.to_path_buf())),
            _ => Err(DatasetDetectError::Unsupported(path.to_path_buf())),
        }
    }
}

fn plink_companions(prefix: &Path) -> [PathBuf; 3] {
    [
        sibling_with_extension(prefix, "bed"),
        sibling_with_extension(prefix, "bim"),
        sibling_with_extension(prefix, "fam"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn text_source_strips_line_endings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        fs::write(&path, "alpha\r\nbeta\ngamma").unwrap();

        let mut source = open_text_source(&path).unwrap();
        assert_eq!(source.len(), Some(17));
        assert_eq!(source.next_line().unwrap(), Some(&b"alpha"[..]));
        assert_eq!(source.next_line().unwrap(), Some(&b"beta"[..]));
        assert_eq!(source.next_line().unwrap(), Some(&b"gamma"[..]));
        assert_eq!(source.next_line().unwrap(), None);
    }

    #[test]
    fn gzip_input_is_detected_by_magic_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packed.txt");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"one\ntwo\n").unwrap();
        encoder.finish().unwrap();

        assert!(is_gzip(&path).unwrap());
        let mut source = open_text_source(&path).unwrap();
        assert_eq!(source.len(), None);
        assert_eq!(source.next_line().unwrap(), Some(&b"one"[..]));
        assert_eq!(source.next_line().unwrap(), Some(&b"two"[..]));
        assert_eq!(source.next_line().unwrap(), None);
    }

    #[test]
    fn sibling_extension_keeps_dotted_stems() {
        let path = sibling_with_extension(Path::new("/data/cohort.v2"), "bed");
        assert_eq!(path, PathBuf::from("/data/cohort.v2.bed"));
    }

    #[test]
    fn detects_plink_prefix_and_vcf() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("cohort");
        for ext in ["bed", "bim", "fam"] {
            fs::write(sibling_with_extension(&prefix, ext), b"").unwrap();
        }
        assert_eq!(
            DatasetKind::detect(&prefix).unwrap(),
            DatasetKind::Plink {
                prefix: prefix.clone()
            }
        );
        assert_eq!(
            DatasetKind::detect(&dir.path().join("cohort.bim")).unwrap(),
            DatasetKind::Plink { prefix }
        );

        let vcf = dir.path().join("calls.vcf.gz");
        fs::write(&vcf, b"").unwrap();
        assert_eq!(
            DatasetKind::detect(&vcf).unwrap(),
            DatasetKind::Vcf { path: vcf.clone() }
        );
    }

    #[test]
    fn reports_missing_and_unsupported_inputs() {
        let dir = tempdir().unwrap();
        let bed = dir.path().join("partial.bed");
        fs::write(&bed, b"").unwrap();
        match DatasetKind::detect(&bed) {
            Err(DatasetDetectError::MissingCompanions { missing, .. }) => {
                assert_eq!(missing.len(), 2);
            }
            other => panic!("expected missing companions, got {other:?}"),
        }

        let gz_bed = dir.path().join("packed.bed.gz");
        fs::write(&gz_bed, b"").unwrap();
        assert!(matches!(
            DatasetKind::detect(&gz_bed),
            Err(DatasetDetectError::CompressedPlink(_))
        ));

        let other = dir.path().join("notes.txt");
        fs::write(&other, b"").unwrap();
        assert!(matches!(
            DatasetKind::detect(&other),
            Err(DatasetDetectError::Unsupported(_))
        ));

        assert!(matches!(
            DatasetKind::detect(&dir.path().join("absent.vcf")),
            Err(DatasetDetectError::NotFound(_))
        ));
    }
}
