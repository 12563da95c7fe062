//! Matrix Market feature-barcode matrices in the 10x directory layout.

use anyhow::{bail, format_err, Context, Error};
use droplet_types::matrix::{CountMatrixType, DEFAULT_FEATURE_TYPE};
use droplet_types::FeatureBarcodeMatrix;
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use sprs::TriMat;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const MATRIX_FILE: &str = "matrix.mtx";
const BARCODES_FILE: &str = "barcodes.tsv";
const FEATURES_FILE: &str = "features.tsv";
// CellRanger 2 and earlier
const GENES_FILE: &str = "genes.tsv";

fn open(path: &Path) -> Result<Box<dyn BufRead>, Error> {
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

fn parse_index(field: Option<&str>, what: &str, bound: usize) -> Result<usize, Error> {
    let value = field.ok_or_else(|| format_err!("missing {what}"))?.parse::<usize>()?;
    match value.checked_sub(1) {
        Some(idx) if idx < bound => Ok(idx),
        _ => bail!("{what} {value} out of range 1..={bound}"),
    }
}

fn parse_size<'a>(data: &mut impl Iterator<Item = &'a str>) -> Result<(usize, usize, usize), Error> {
    let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
    let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
    let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
    Ok((nrow, ncol, nnz))
}

fn parse_entry<'a>(data: &mut impl Iterator<Item = &'a str>, shape: (usize, usize)) -> Result<(usize, usize, u32), Error> {
    let row = parse_index(data.next(), "ROW", shape.0)?;
    let col = parse_index(data.next(), "COL", shape.1)?;
    let val = data.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<u32>()?;
    Ok((row, col, val))
}

/// Load a count matrix from coordinate Matrix Market format, gzipped if the file name ends
/// in `.gz`. Duplicate entries are summed. The result is CSC.
pub fn load_mtx(path: impl AsRef<Path>) -> Result<CountMatrixType, Error> {
    let path = path.as_ref();
    let reader = open(path)?;
    let mut mat: Option<TriMat<u32>> = None;
    let mut declared = 0;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| path.display().to_string())?;
        if line.starts_with("%%MatrixMarket") {
            let header = line.to_ascii_lowercase();
            if !header.contains("coordinate") || header.contains("real") || header.contains("complex") {
                bail!("{}: unsupported Matrix Market format: {line}", path.display());
            }
            continue;
        }
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }

        let at = || format!("{}, line {}", path.display(), lineno + 1);
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let (nrow, ncol, nnz) = parse_size(&mut data).with_context(at)?;
                declared = nnz;
                mat = Some(TriMat::with_capacity((nrow, ncol), nnz));
            }
            Some(tri) => {
                let (row, col, val) = parse_entry(&mut data, tri.shape()).with_context(at)?;
                tri.add_triplet(row, col, val);
            }
        }
    }

    let Some(tri) = mat else {
        bail!("{}: no matrix found", path.display())
    };
    if tri.nnz() != declared {
        bail!("{}: expected {} entries, found {}", path.display(), declared, tri.nnz());
    }
    debug!("loaded {}: {} x {}, {} entries", path.display(), tri.rows(), tri.cols(), declared);
    Ok(tri.to_csc())
}

/// `dir/name.gz`, or `dir/name` if only the plain file exists.
fn find_file(dir: &Path, names: &[&str]) -> Result<PathBuf, Error> {
    for name in names {
        for candidate in [dir.join(format!("{name}.gz")), dir.join(name)] {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    bail!("{}: none of {:?} found", dir.display(), names)
}

fn read_lines(path: &Path) -> Result<Vec<String>, Error> {
    let mut lines = Vec::new();
    for line in open(path)?.lines() {
        let line = line.with_context(|| path.display().to_string())?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Load a matrix directory holding `matrix.mtx`, `barcodes.tsv` and `features.tsv`, each
/// optionally gzipped. A legacy `genes.tsv` with two columns is accepted in place of
/// `features.tsv`; its features get the default feature type.
pub fn load_feature_barcode_matrix(dir: impl AsRef<Path>) -> Result<FeatureBarcodeMatrix, Error> {
    let dir = dir.as_ref();
    let matrix = load_mtx(find_file(dir, &[MATRIX_FILE])?)?;
    let barcodes = read_lines(&find_file(dir, &[BARCODES_FILE])?)?
        .into_iter()
        .map(|line| line.trim().to_string())
        .collect();

    let features_path = find_file(dir, &[FEATURES_FILE, GENES_FILE])?;
    let mut feature_ids = Vec::new();
    let mut feature_names = Vec::new();
    let mut feature_types = Vec::new();
    for line in read_lines(&features_path)? {
        let mut fields = line.split('\t');
        let id = fields.next().unwrap_or_default().to_string();
        let name = fields.next().map_or_else(|| id.clone(), str::to_string);
        let feature_type = fields.next().unwrap_or(DEFAULT_FEATURE_TYPE).to_string();
        feature_ids.push(id);
        feature_names.push(name);
        feature_types.push(feature_type);
    }

    let name = dir
        .file_name()
        .map_or_else(|| dir.display().to_string(), |n| n.to_string_lossy().into_owned());
    FeatureBarcodeMatrix::new(name, barcodes, feature_ids, feature_names, feature_types, matrix)
        .with_context(|| dir.display().to_string())
}

type GzWriter = BufWriter<GzEncoder<File>>;

fn create_gz(path: &Path) -> Result<GzWriter, Error> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    Ok(BufWriter::new(GzEncoder::new(file, Compression::fast())))
}

fn finish_gz(writer: GzWriter) -> Result<(), Error> {
    writer.into_inner().map_err(|e| e.into_error())?.finish()?;
    Ok(())
}

/// Write `matrix` into `dir` as `matrix.mtx.gz`, `barcodes.tsv.gz` and `features.tsv.gz`,
/// creating the directory if needed.
pub fn write_feature_barcode_matrix(matrix: &FeatureBarcodeMatrix, dir: impl AsRef<Path>) -> Result<(), Error> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;

    let mut writer = create_gz(&dir.join(format!("{MATRIX_FILE}.gz")))?;
    writeln!(
        writer,
        "%%MatrixMarket matrix coordinate integer general\n{} {} {}",
        matrix.num_features(),
        matrix.num_barcodes(),
        matrix.nnz()
    )?;
    for (col, vec) in matrix.matrix.outer_iterator().enumerate() {
        for (row, &count) in vec.iter() {
            // indices are 1-based
            writeln!(writer, "{} {} {}", row + 1, col + 1, count)?;
        }
    }
    finish_gz(writer)?;

    let mut writer = create_gz(&dir.join(format!("{BARCODES_FILE}.gz")))?;
    for bc in &matrix.barcodes {
        writeln!(writer, "{bc}")?;
    }
    finish_gz(writer)?;

    let mut writer = create_gz(&dir.join(format!("{FEATURES_FILE}.gz")))?;
    for ((id, name), feature_type) in matrix
        .feature_ids
        .iter()
        .zip(&matrix.feature_names)
        .zip(&matrix.feature_types)
    {
        writeln!(writer, "{id}\t{name}\t{feature_type}")?;
    }
    finish_gz(writer)?;

    debug!("wrote {} to {}", matrix.name, dir.display());
    Ok(())
}
