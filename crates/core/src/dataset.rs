use crate::chunking::{normalize_whitespace, text_records, ChunkingConfig};
use crate::error::IngestError;
use crate::models::DatasetRecord;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 5] = ["csv", "json", "jsonl", "txt", "md"];

/// A loaded dataset snapshot: records in stable dataset order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub records: Vec<DatasetRecord>,
    pub checksum: String,
}

impl Dataset {
    pub fn from_records(records: Vec<DatasetRecord>) -> Self {
        let checksum = digest_records(&records);
        Self { records, checksum }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct DatasetReport {
    pub dataset: Dataset,
    pub skipped_files: Vec<SkippedFile>,
}

pub fn discover_dataset_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        if is_supported(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn load_dataset(path: &Path, chunking: ChunkingConfig) -> Result<Dataset, IngestError> {
    let report = load_dataset_best_effort(path, chunking)?;
    Ok(report.dataset)
}

/// Loads every supported file under `path`, skipping files that fail to
/// parse instead of aborting the whole load.
pub fn load_dataset_best_effort(
    path: &Path,
    chunking: ChunkingConfig,
) -> Result<DatasetReport, IngestError> {
    if !path.exists() {
        return Err(IngestError::InvalidArgument(format!(
            "dataset path {} does not exist",
            path.display()
        )));
    }
    chunking.validate()?;

    let files = discover_dataset_files(path);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no dataset files found in {}",
            path.display()
        )));
    }

    let mut records = Vec::new();
    let mut skipped_files = Vec::new();

    for file in files {
        match load_file(&file, chunking) {
            Ok(file_records) => {
                tracing::debug!(
                    path = %file.display(),
                    records = file_records.len(),
                    "loaded dataset file"
                );
                records.extend(file_records);
            }
            Err(error) => {
                tracing::warn!(path = %file.display(), %error, "skipping dataset file");
                skipped_files.push(SkippedFile {
                    path: file,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(DatasetReport {
        dataset: Dataset::from_records(records),
        skipped_files,
    })
}

fn load_file(path: &Path, chunking: ChunkingConfig) -> Result<Vec<DatasetRecord>, IngestError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!("path missing filename: {}", path.display()))
        })?
        .to_string();

    match extension(path).as_deref() {
        Some("csv") => csv_records(&file_name, fs::File::open(path)?),
        Some("json") => json_records(&file_name, &fs::read_to_string(path)?),
        Some("jsonl") => jsonl_records(&file_name, &fs::read_to_string(path)?),
        Some("txt") | Some("md") => text_records(&file_name, &fs::read_to_string(path)?, chunking),
        _ => Err(IngestError::UnsupportedFormat(path.display().to_string())),
    }
}

/// One record per data row, rendered as `Header: value; Header: value`.
pub fn csv_records<R: Read>(file_name: &str, reader: R) -> Result<Vec<DatasetRecord>, IngestError> {
    let to_error = |source: csv::Error| IngestError::Csv {
        path: file_name.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers().map_err(to_error)?.clone();

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(to_error)?;
        let fields = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(header, value)| {
                if header.is_empty() {
                    value.to_string()
                } else {
                    format!("{header}: {value}")
                }
            })
            .collect::<Vec<_>>();

        if fields.is_empty() {
            continue;
        }

        records.push(DatasetRecord {
            locator: format!("{file_name}#row={}", index + 1),
            text: fields.join("; "),
        });
    }

    Ok(records)
}

pub fn json_records(file_name: &str, content: &str) -> Result<Vec<DatasetRecord>, IngestError> {
    let value: Value = serde_json::from_str(content).map_err(|source| IngestError::Json {
        path: file_name.to_string(),
        source,
    })?;

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    Ok(items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            render_value(item).map(|text| DatasetRecord {
                locator: format!("{file_name}#item={}", index + 1),
                text,
            })
        })
        .collect())
}

pub fn jsonl_records(file_name: &str, content: &str) -> Result<Vec<DatasetRecord>, IngestError> {
    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|source| IngestError::Json {
            path: format!("{file_name}:{}", index + 1),
            source,
        })?;
        if let Some(text) = render_value(&value) {
            records.push(DatasetRecord {
                locator: format!("{file_name}#line={}", index + 1),
                text,
            });
        }
    }
    Ok(records)
}

fn render_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Object(map) => render_object(map),
        Value::String(text) => normalize_whitespace(text),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn render_object(map: &Map<String, Value>) -> String {
    map.iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::Null => return None,
                Value::String(text) if text.trim().is_empty() => return None,
                Value::String(text) => normalize_whitespace(text),
                other => other.to_string(),
            };
            Some(format!("{key}: {rendered}"))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn digest_records(records: &[DatasetRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.locator.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
