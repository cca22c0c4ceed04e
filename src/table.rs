// ==============================================================================
// table.rs - Table Engine for Shard Aggregation
// ==============================================================================
// Description: Read / order / range-partition / write capability over
//              line-delimited JSON shards, with a local rayon implementation
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Value ordering (ascending):
//   missing/null < bool < number < string < array/object (by JSON text)
//
// Shard tolerance:
//   Empty shards and shards that fail to decompress or parse are skipped
//   as a whole and counted; they never abort a read.
// ==============================================================================

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FinemapError, Result};

/// One line-delimited JSON record
pub type Record = Map<String, Value>;

/// In-memory table plus provenance of the read that produced it
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub rows: Vec<Record>,
    pub shards_matched: usize,
    pub shards_read: usize,
    pub shards_skipped: usize,
}

impl Table {
    pub fn from_rows(rows: Vec<Record>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Output compression codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    None,
}

impl Compression {
    /// File extension for JSON-lines output with this codec
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "json.gz",
            Compression::None => "json",
        }
    }
}

/// Write behaviour shared by single-file and partitioned output
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub compression: Compression,
    /// Replace an existing output; otherwise an existing output is an error
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Gzip,
            overwrite: true,
        }
    }
}

/// Range partitioning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionSettings {
    /// Aim for roughly this many rows per output partition
    pub target_rows_per_partition: usize,
    /// Never create more partitions than this
    pub max_partitions: usize,
    /// Number of keys sampled to choose range bounds
    pub sample_size: usize,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            target_rows_per_partition: 100_000,
            max_partitions: 200,
            sample_size: 10_000,
        }
    }
}

/// Dataframe-style capability the result aggregator is written against
pub trait TableEngine: Send + Sync {
    /// Union every shard matching a glob pattern, in sorted path order
    fn read(&self, pattern: &str) -> Result<Table>;

    /// Stable total order by `keys`
    fn order_by(&self, table: Table, keys: &[&str]) -> Table;

    /// Range-partition by `keys`, sorting only within each partition
    fn partitioned_sort(&self, table: Table, keys: &[&str]) -> Vec<Table>;

    /// Write one JSON-lines file, swapping it into place atomically
    fn write(&self, table: &Table, path: &Path, options: WriteOptions) -> Result<usize>;

    /// Write non-empty partitions as `part-NNNNN` files of a directory that
    /// replaces `dir` once complete. Returns the number of part files.
    fn write_partitions(&self, partitions: &[Table], dir: &Path, options: WriteOptions) -> Result<usize>;
}

/// Single-machine engine: rayon-parallel shard reads and sorts
#[derive(Debug, Clone, Default)]
pub struct LocalEngine {
    partitions: PartitionSettings,
}

enum ShardContents {
    Rows(Vec<Record>),
    Empty,
}

impl LocalEngine {
    pub fn new(partitions: PartitionSettings) -> Self {
        Self { partitions }
    }

    fn partition_count(&self, rows: usize) -> usize {
        let target = self.partitions.target_rows_per_partition.max(1);
        rows.div_ceil(target).clamp(1, self.partitions.max_partitions.max(1))
    }

    /// Range bounds from an evenly strided sample of keys
    fn range_bounds(&self, keys: &[Vec<Value>], n_partitions: usize) -> Vec<Vec<Value>> {
        if n_partitions <= 1 || keys.is_empty() {
            return Vec::new();
        }

        let stride = (keys.len() / self.partitions.sample_size.max(1)).max(1);
        let mut sample: Vec<&Vec<Value>> = keys.iter().step_by(stride).collect();
        sample.sort_by(|a, b| compare_keys(a, b));

        let mut bounds: Vec<Vec<Value>> = Vec::with_capacity(n_partitions - 1);
        for i in 1..n_partitions {
            let candidate = sample[i * sample.len() / n_partitions];
            let is_new = bounds
                .last()
                .map_or(true, |last| compare_keys(last, candidate) == Ordering::Less);
            if is_new {
                bounds.push(candidate.clone());
            }
        }
        bounds
    }
}

impl TableEngine for LocalEngine {
    fn read(&self, pattern: &str) -> Result<Table> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in glob::glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable path while matching {}: {}", pattern, e),
            }
        }
        paths.sort();

        if paths.is_empty() {
            return Err(FinemapError::not_found(pattern));
        }

        let results: Vec<(PathBuf, Result<ShardContents>)> = paths
            .into_par_iter()
            .map(|path| {
                let contents = read_shard(&path);
                (path, contents)
            })
            .collect();

        let mut table = Table {
            shards_matched: results.len(),
            ..Default::default()
        };

        for (path, contents) in results {
            match contents {
                Ok(ShardContents::Rows(rows)) => {
                    debug!("Read {} rows from {:?}", rows.len(), path);
                    table.shards_read += 1;
                    table.rows.extend(rows);
                }
                Ok(ShardContents::Empty) => {
                    debug!("Skipping empty shard {:?}", path);
                    table.shards_skipped += 1;
                }
                Err(e) => {
                    warn!("Skipping corrupt shard {:?}: {}", path, e);
                    table.shards_skipped += 1;
                }
            }
        }

        Ok(table)
    }

    fn order_by(&self, mut table: Table, keys: &[&str]) -> Table {
        table.rows.par_sort_by(|a, b| compare_records(a, b, keys));
        table
    }

    fn partitioned_sort(&self, table: Table, keys: &[&str]) -> Vec<Table> {
        let n_partitions = self.partition_count(table.rows.len());
        let row_keys: Vec<Vec<Value>> = table.rows.iter().map(|r| key_of(r, keys)).collect();
        let bounds = self.range_bounds(&row_keys, n_partitions);

        let mut partitions: Vec<Vec<Record>> = vec![Vec::new(); bounds.len() + 1];
        for (row, key) in table.rows.into_iter().zip(row_keys.iter()) {
            let idx = bounds.partition_point(|b| compare_keys(b, key) != Ordering::Greater);
            partitions[idx].push(row);
        }

        partitions.par_iter_mut().for_each(|rows| {
            rows.sort_by(|a, b| compare_records(a, b, keys));
        });

        debug!(
            "Range-partitioned {} rows into {} partitions",
            row_keys.len(),
            partitions.len()
        );

        partitions.into_iter().map(Table::from_rows).collect()
    }

    fn write(&self, table: &Table, path: &Path, options: WriteOptions) -> Result<usize> {
        if path.exists() && !options.overwrite {
            return Err(FinemapError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "output exists"),
            ));
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| FinemapError::io(parent, e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        if let Err(e) = write_json_lines(&tmp_path, &table.rows, options.compression) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        std::fs::rename(&tmp_path, path).map_err(|e| FinemapError::io(path, e))?;
        Ok(table.rows.len())
    }

    fn write_partitions(&self, partitions: &[Table], dir: &Path, options: WriteOptions) -> Result<usize> {
        if dir.exists() && !options.overwrite {
            return Err(FinemapError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "output exists"),
            ));
        }

        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| FinemapError::io(parent, e))?;

        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let staging = parent.join(format!(".{}.staging-{}", dir_name, Uuid::new_v4()));
        std::fs::create_dir_all(&staging).map_err(|e| FinemapError::io(&staging, e))?;

        let non_empty: Vec<&Table> = partitions.iter().filter(|p| !p.is_empty()).collect();
        let written = non_empty
            .par_iter()
            .enumerate()
            .map(|(idx, part)| {
                let part_path = staging.join(format!("part-{:05}.{}", idx, options.compression.extension()));
                write_json_lines(&part_path, &part.rows, options.compression)
            })
            .collect::<Result<Vec<()>>>()
            .and_then(|_| {
                let marker = staging.join("_SUCCESS");
                File::create(&marker).map_err(|e| FinemapError::io(&marker, e))?;
                Ok(())
            });

        if let Err(e) = written {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|e| FinemapError::io(dir, e))?;
        }
        std::fs::rename(&staging, dir).map_err(|e| FinemapError::io(dir, e))?;

        Ok(non_empty.len())
    }
}

/// Read one shard; `Empty` for zero-byte or record-free shards
fn read_shard(path: &Path) -> Result<ShardContents> {
    let file = File::open(path).map_err(|e| FinemapError::io(path, e))?;
    let size = file.metadata().map_err(|e| FinemapError::io(path, e))?.len();
    if size == 0 {
        return Ok(ShardContents::Empty);
    }

    let reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut rows = Vec::new();

    for line in BufReader::new(reader).lines() {
        let line = line.map_err(|e| FinemapError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<Value>(&line)? {
            Value::Object(map) => map,
            other => {
                return Err(FinemapError::invalid_input(format!(
                    "expected JSON object, found {}",
                    other
                )))
            }
        };
        rows.push(record);
    }

    if rows.is_empty() {
        Ok(ShardContents::Empty)
    } else {
        Ok(ShardContents::Rows(rows))
    }
}

fn write_json_lines(path: &Path, rows: &[Record], compression: Compression) -> Result<()> {
    let file = File::create(path).map_err(|e| FinemapError::io(path, e))?;

    match compression {
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
            write_rows(&mut encoder, rows, path)?;
            let writer = encoder.finish().map_err(|e| FinemapError::io(path, e))?;
            finish_file(writer, path)
        }
        Compression::None => {
            let mut writer = BufWriter::new(file);
            write_rows(&mut writer, rows, path)?;
            finish_file(writer, path)
        }
    }
}

fn write_rows<W: Write>(writer: &mut W, rows: &[Record], path: &Path) -> Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *writer, row)?;
        writer.write_all(b"\n").map_err(|e| FinemapError::io(path, e))?;
    }
    Ok(())
}

fn finish_file(writer: BufWriter<File>, path: &Path) -> Result<()> {
    let file = writer
        .into_inner()
        .map_err(|e| FinemapError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| FinemapError::io(path, e))
}

fn key_of(record: &Record, keys: &[&str]) -> Vec<Value> {
    keys.iter()
        .map(|k| record.get(*k).cloned().unwrap_or(Value::Null))
        .collect()
}

fn compare_records(a: &Record, b: &Record, keys: &[&str]) -> Ordering {
    for key in keys {
        let ord = compare_values(a.get(*key), b.get(*key));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_values(Some(x), Some(y));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
    }
}

/// Total order over optional JSON values
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(x, y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x @ (Value::Array(_) | Value::Object(_))), Some(y)) => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}

fn compare_numbers(x: &serde_json::Number, y: &serde_json::Number) -> Ordering {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a.cmp(&b);
    }
    let a = x.as_f64().unwrap_or(f64::NAN);
    let b = y.as_f64().unwrap_or(f64::NAN);
    a.total_cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn write_gz(path: &Path, lines: &[Value]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut enc = GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
        for line in lines {
            writeln!(enc, "{}", line).unwrap();
        }
        enc.finish().unwrap();
    }

    fn read_gz(path: &Path) -> Vec<Value> {
        let mut text = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        text.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[test]
    fn test_compare_values_ordering() {
        let null = Value::Null;
        let t = json!(true);
        let two = json!(2);
        let ten = json!(10);
        let half = json!(0.5);
        let s2 = json!("2");
        let s10 = json!("10");

        assert_eq!(compare_values(None, Some(&null)), Ordering::Equal);
        assert_eq!(compare_values(Some(&null), Some(&t)), Ordering::Less);
        assert_eq!(compare_values(Some(&t), Some(&two)), Ordering::Less);
        assert_eq!(compare_values(Some(&two), Some(&ten)), Ordering::Less);
        assert_eq!(compare_values(Some(&half), Some(&two)), Ordering::Less);
        assert_eq!(compare_values(Some(&ten), Some(&s2)), Ordering::Less);
        // Strings compare lexicographically
        assert_eq!(compare_values(Some(&s10), Some(&s2)), Ordering::Less);
    }

    #[test]
    fn test_read_keeps_records_verbatim() {
        let dir = tempdir().unwrap();
        let shard = dir.path().join("study_id=S1/phenotype_id=None/chrom=1/credible_set.json.gz");
        let line = r#"{"lead_chrom":1,"lead_pos":10,"tag_pos":10,"postprob":0.25,"study_id":null}"#;
        std::fs::create_dir_all(shard.parent().unwrap()).unwrap();
        let mut enc = GzEncoder::new(File::create(&shard).unwrap(), flate2::Compression::default());
        writeln!(enc, "{}", line).unwrap();
        enc.finish().unwrap();

        let engine = LocalEngine::default();
        let pattern = format!("{}/study_id=*/phenotype_id=*/chrom=*/credible_set.json.gz", dir.path().display());
        let table = engine.read(&pattern).unwrap();

        // Directory segments never become columns
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].len(), 5);
        assert!(table.rows[0]["study_id"].is_null());
        assert!(!table.rows[0].contains_key("chrom"));

        let out = dir.path().join("out.json.gz");
        engine.write(&table, &out, WriteOptions::default()).unwrap();
        let mut text = String::new();
        GzDecoder::new(File::open(&out).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, format!("{}\n", line));
    }

    #[test]
    fn test_read_skips_empty_and_corrupt_shards() {
        let dir = tempdir().unwrap();
        write_gz(&dir.path().join("a/shard.json.gz"), &[json!({"x": 1}), json!({"x": 2})]);
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/shard.json.gz"), b"").unwrap();
        std::fs::create_dir_all(dir.path().join("c")).unwrap();
        std::fs::write(dir.path().join("c/shard.json.gz"), b"not gzip at all").unwrap();
        write_gz(&dir.path().join("d/shard.json.gz"), &[json!({"x": 3}), json!("bare string")]);

        let pattern = format!("{}/*/shard.json.gz", dir.path().display());
        let table = LocalEngine::default().read(&pattern).unwrap();

        assert_eq!(table.shards_matched, 4);
        assert_eq!(table.shards_read, 1);
        assert_eq!(table.shards_skipped, 3);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_read_no_match_is_not_found() {
        let dir = tempdir().unwrap();
        let pattern = format!("{}/*/missing.json.gz", dir.path().display());
        let err = LocalEngine::default().read(&pattern).unwrap_err();
        assert!(matches!(err, FinemapError::NotFound { .. }));
    }

    #[test]
    fn test_order_by_is_stable() {
        let rows = vec![
            record(json!({"k": 2, "tag": "a"})),
            record(json!({"k": 1, "tag": "b"})),
            record(json!({"k": 2, "tag": "c"})),
            record(json!({"k": 1, "tag": "d"})),
        ];

        let sorted = LocalEngine::default().order_by(Table::from_rows(rows), &["k"]);
        let tags: Vec<&str> = sorted.rows.iter().map(|r| r["tag"].as_str().unwrap()).collect();
        assert_eq!(tags, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_partitioned_sort_keeps_equal_keys_together() {
        let engine = LocalEngine::new(PartitionSettings {
            target_rows_per_partition: 10,
            max_partitions: 50,
            sample_size: 1000,
        });

        let rows: Vec<Record> = (0..200)
            .map(|i| record(json!({"c": (i % 4) as i64, "p": ((i * 37) % 25) as i64, "i": i})))
            .collect();

        let parts = engine.partitioned_sort(Table::from_rows(rows), &["c", "p"]);
        assert!(parts.len() > 1);

        let total: usize = parts.iter().map(|p| p.len()).sum();
        assert_eq!(total, 200);

        let mut seen_keys: Vec<(i64, i64, usize)> = Vec::new();
        for (idx, part) in parts.iter().enumerate() {
            for pair in part.rows.windows(2) {
                assert_ne!(compare_records(&pair[0], &pair[1], &["c", "p"]), Ordering::Greater);
            }
            for row in &part.rows {
                seen_keys.push((row["c"].as_i64().unwrap(), row["p"].as_i64().unwrap(), idx));
            }
        }

        for a in &seen_keys {
            for b in &seen_keys {
                if a.0 == b.0 && a.1 == b.1 {
                    assert_eq!(a.2, b.2, "key {:?} split across partitions", (a.0, a.1));
                }
            }
        }
    }

    #[test]
    fn test_partitioned_sort_single_partition_for_small_tables() {
        let rows = vec![record(json!({"c": 2})), record(json!({"c": 1}))];
        let parts = LocalEngine::default().partitioned_sort(Table::from_rows(rows), &["c"]);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].rows[0]["c"], json!(1));
    }

    #[test]
    fn test_write_overwrites_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results").join("top_loci.json.gz");
        let engine = LocalEngine::default();

        engine
            .write(&Table::from_rows(vec![record(json!({"a": 1})), record(json!({"a": 2}))]), &path, WriteOptions::default())
            .unwrap();
        engine
            .write(&Table::from_rows(vec![record(json!({"a": 3}))]), &path, WriteOptions::default())
            .unwrap();

        assert_eq!(read_gz(&path), vec![json!({"a": 3})]);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_write_refuses_existing_without_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");
        std::fs::write(&path, "keep").unwrap();

        let options = WriteOptions {
            compression: Compression::None,
            overwrite: false,
        };
        assert!(LocalEngine::default().write(&Table::default(), &path, options).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep");
    }

    #[test]
    fn test_write_partitions_replaces_directory() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("credset");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("part-00099.json.gz"), b"stale").unwrap();

        let parts = vec![
            Table::from_rows(vec![record(json!({"x": 1}))]),
            Table::default(),
            Table::from_rows(vec![record(json!({"x": 2}))]),
        ];
        let written = LocalEngine::default()
            .write_partitions(&parts, &out, WriteOptions::default())
            .unwrap();

        assert_eq!(written, 2);
        assert!(!out.join("part-00099.json.gz").exists());
        assert!(out.join("_SUCCESS").exists());
        assert_eq!(read_gz(&out.join("part-00000.json.gz")), vec![json!({"x": 1})]);
        assert_eq!(read_gz(&out.join("part-00001.json.gz")), vec![json!({"x": 2})]);
    }
}
