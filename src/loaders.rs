//! File loaders for the label/feature/ranking/marker text formats (§6.3).
//! Out of the algorithmic core, but their interfaces are fixed by the spec:
//! every loader exists in a plain-reader, gzip-file, and in-memory-gzip-buffer
//! variant. Parse errors surface as [`SinglePpError::Malformed`]; out-of-range
//! indices as [`SinglePpError::OutOfRange`].

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use fnv::FnvHashSet;

use crate::error::{Result, SinglePpError};
use crate::markers::{Label, Markers};
use crate::rank::GeneIx;

fn open_plain(path: impl AsRef<Path>) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

fn open_gz(path: impl AsRef<Path>) -> Result<BufReader<GzDecoder<File>>> {
    Ok(BufReader::new(GzDecoder::new(File::open(path)?)))
}

fn gz_buffer_reader(buf: &[u8]) -> BufReader<GzDecoder<&[u8]>> {
    BufReader::new(GzDecoder::new(buf))
}

/// One integer per line, optional trailing newline.
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<i64>> {
    parse_labels(open_plain(path)?)
}

pub fn load_labels_gz(path: impl AsRef<Path>) -> Result<Vec<i64>> {
    parse_labels(open_gz(path)?)
}

pub fn load_labels_gz_buffer(buf: &[u8]) -> Result<Vec<i64>> {
    parse_labels(gz_buffer_reader(buf))
}

fn parse_labels(reader: impl BufRead) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let value: i64 = line
            .trim()
            .parse()
            .map_err(|_| SinglePpError::malformed(format!("labels line {}: {line:?} is not an integer", lineno + 1)))?;
        out.push(value);
    }
    Ok(out)
}

/// One string per line; empty lines are kept as empty strings.
pub fn load_label_names(path: impl AsRef<Path>) -> Result<Vec<String>> {
    parse_label_names(open_plain(path)?)
}

pub fn load_label_names_gz(path: impl AsRef<Path>) -> Result<Vec<String>> {
    parse_label_names(open_gz(path)?)
}

pub fn load_label_names_gz_buffer(buf: &[u8]) -> Result<Vec<String>> {
    parse_label_names(gz_buffer_reader(buf))
}

fn parse_label_names(reader: impl BufRead) -> Result<Vec<String>> {
    reader.lines().map(|l| l.map_err(SinglePpError::from)).collect()
}

/// CSV with exactly two fields per line: `ensembl_id,symbol`.
pub fn load_features(path: impl AsRef<Path>) -> Result<Vec<(String, String)>> {
    parse_features(open_plain(path)?)
}

pub fn load_features_gz(path: impl AsRef<Path>) -> Result<Vec<(String, String)>> {
    parse_features(open_gz(path)?)
}

pub fn load_features_gz_buffer(buf: &[u8]) -> Result<Vec<(String, String)>> {
    parse_features(gz_buffer_reader(buf))
}

fn parse_features(reader: impl Read) -> Result<Vec<(String, String)>> {
    let mut csv_reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(reader);
    let mut out = Vec::new();
    for (lineno, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| SinglePpError::malformed(format!("features line {}: {e}", lineno + 1)))?;
        if record.len() != 2 {
            return Err(SinglePpError::malformed(format!(
                "features line {}: expected 2 fields, got {}",
                lineno + 1,
                record.len()
            )));
        }
        out.push((record[0].to_string(), record[1].to_string()));
    }
    Ok(out)
}

/// CSV with `num_features` integer fields per line, one line per sample.
/// Returns a row-major `Vec<Vec<i64>>`, one inner vec per sample.
pub fn load_rankings(path: impl AsRef<Path>, num_features: usize) -> Result<Vec<Vec<i64>>> {
    parse_rankings(open_plain(path)?, num_features)
}

pub fn load_rankings_gz(path: impl AsRef<Path>, num_features: usize) -> Result<Vec<Vec<i64>>> {
    parse_rankings(open_gz(path)?, num_features)
}

pub fn load_rankings_gz_buffer(buf: &[u8], num_features: usize) -> Result<Vec<Vec<i64>>> {
    parse_rankings(gz_buffer_reader(buf), num_features)
}

fn parse_rankings(reader: impl Read, num_features: usize) -> Result<Vec<Vec<i64>>> {
    let mut csv_reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(reader);
    let mut out = Vec::new();
    for (lineno, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| SinglePpError::malformed(format!("rankings line {}: {e}", lineno + 1)))?;
        if record.len() != num_features {
            return Err(SinglePpError::malformed(format!(
                "rankings line {}: expected {num_features} fields, got {}",
                lineno + 1,
                record.len()
            )));
        }
        let mut row = Vec::with_capacity(num_features);
        for (field_ix, field) in record.iter().enumerate() {
            if field.is_empty() {
                return Err(SinglePpError::malformed(format!(
                    "rankings line {}, field {}: empty field",
                    lineno + 1,
                    field_ix + 1
                )));
            }
            let value: i64 = field.parse().map_err(|_| {
                SinglePpError::malformed(format!(
                    "rankings line {}, field {}: {field:?} is not an integer",
                    lineno + 1,
                    field_ix + 1
                ))
            })?;
            row.push(value);
        }
        out.push(row);
    }
    Ok(out)
}

/// TSV with at least three fields per line: `label_a\tlabel_b\tgene_ix[\tgene_ix...]`.
/// Each `(label_a, label_b)` pair may appear at most once; every gene index
/// must fall within `num_genes` and every label within `num_labels`.
pub fn load_markers(path: impl AsRef<Path>, num_labels: usize, num_genes: usize) -> Result<Markers> {
    parse_markers(open_plain(path)?, num_labels, num_genes)
}

pub fn load_markers_gz(path: impl AsRef<Path>, num_labels: usize, num_genes: usize) -> Result<Markers> {
    parse_markers(open_gz(path)?, num_labels, num_genes)
}

pub fn load_markers_gz_buffer(buf: &[u8], num_labels: usize, num_genes: usize) -> Result<Markers> {
    parse_markers(gz_buffer_reader(buf), num_labels, num_genes)
}

fn parse_markers(reader: impl Read, num_labels: usize, num_genes: usize) -> Result<Markers> {
    let mut csv_reader = csv::ReaderBuilder::new().delimiter(b'\t').has_headers(false).flexible(true).from_reader(reader);
    let mut markers = Markers::new(num_labels);
    let mut seen_pairs: FnvHashSet<(Label, Label)> = FnvHashSet::default();
    for (lineno, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| SinglePpError::malformed(format!("markers line {}: {e}", lineno + 1)))?;
        if record.len() < 3 {
            return Err(SinglePpError::malformed(format!(
                "markers line {}: expected at least 3 fields, got {}",
                lineno + 1,
                record.len()
            )));
        }
        let parse_label = |field: &str, which: &str| -> Result<Label> {
            field.parse::<Label>().map_err(|_| {
                SinglePpError::malformed(format!("markers line {}: {which} {field:?} is not an integer", lineno + 1))
            })
        };
        let a = parse_label(&record[0], "label_a")?;
        let b = parse_label(&record[1], "label_b")?;
        if a as usize >= num_labels || b as usize >= num_labels {
            return Err(SinglePpError::out_of_range(format!(
                "markers line {}: label {} or {} exceeds {num_labels} labels known",
                lineno + 1,
                a,
                b
            )));
        }
        if !seen_pairs.insert((a, b)) {
            return Err(SinglePpError::malformed(format!(
                "markers line {}: pair ({a}, {b}) already appeared",
                lineno + 1
            )));
        }
        let mut genes = Vec::with_capacity(record.len() - 2);
        for (field_ix, field) in record.iter().enumerate().skip(2) {
            let gene: GeneIx = field.parse().map_err(|_| {
                SinglePpError::malformed(format!(
                    "markers line {}, field {}: {field:?} is not an integer",
                    lineno + 1,
                    field_ix + 1
                ))
            })?;
            if gene as usize >= num_genes {
                return Err(SinglePpError::out_of_range(format!(
                    "markers line {}: gene index {gene} exceeds {num_genes} genes known",
                    lineno + 1
                )));
            }
            genes.push(gene);
        }
        markers.set(a, b, genes);
    }
    Ok(markers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::NamedTempFile;

    #[test]
    fn labels_parses_one_int_per_line() {
        let labels = parse_labels("0\n1\n2\n1\n".as_bytes()).unwrap();
        assert_eq!(labels, vec![0, 1, 2, 1]);
    }

    #[test]
    fn labels_rejects_non_integer_line() {
        let err = parse_labels("0\nabc\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SinglePpError::Malformed { .. }));
    }

    #[test]
    fn label_names_keeps_empty_lines() {
        let names = parse_label_names("tcell\n\nbcell\n".as_bytes()).unwrap();
        assert_eq!(names, vec!["tcell".to_string(), "".to_string(), "bcell".to_string()]);
    }

    #[test]
    fn features_rejects_wrong_field_count() {
        let err = parse_features("ENSG1,SYM1\nENSG2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SinglePpError::Malformed { .. }));
    }

    #[test]
    fn rankings_parses_fixed_width_rows() {
        let rows = parse_rankings("1,2,3\n4,5,6\n".as_bytes(), 3).unwrap();
        assert_eq!(rows, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[test]
    fn rankings_rejects_wrong_column_count() {
        let err = parse_rankings("1,2,3\n4,5\n".as_bytes(), 3).unwrap_err();
        assert!(matches!(err, SinglePpError::Malformed { .. }));
    }

    #[test]
    fn markers_parses_pairs_and_gene_lists() {
        let markers = parse_markers("0\t1\t2\t5\n1\t0\t3\n".as_bytes(), 2, 10).unwrap();
        assert_eq!(markers.get(0, 1), &[2, 5]);
        assert_eq!(markers.get(1, 0), &[3]);
    }

    #[test]
    fn markers_rejects_repeated_pair() {
        let err = parse_markers("0\t1\t2\n0\t1\t3\n".as_bytes(), 2, 10).unwrap_err();
        assert!(matches!(err, SinglePpError::Malformed { .. }));
    }

    #[test]
    fn markers_rejects_out_of_range_gene() {
        let err = parse_markers("0\t1\t20\n".as_bytes(), 2, 10).unwrap_err();
        assert!(matches!(err, SinglePpError::OutOfRange { .. }));
    }

    #[test]
    fn gz_file_roundtrips_labels() {
        let mut tmp = NamedTempFile::new().unwrap();
        {
            let mut encoder = GzEncoder::new(&mut tmp, Compression::default());
            encoder.write_all(b"0\n1\n2\n").unwrap();
            encoder.finish().unwrap();
        }
        let labels = load_labels_gz(tmp.path()).unwrap();
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn gz_buffer_roundtrips_labels() {
        let mut buf = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut buf, Compression::default());
            encoder.write_all(b"7\n8\n").unwrap();
            encoder.finish().unwrap();
        }
        let labels = load_labels_gz_buffer(&buf).unwrap();
        assert_eq!(labels, vec![7, 8]);
    }
}
