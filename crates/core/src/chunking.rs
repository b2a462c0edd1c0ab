use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{Chunk, DatasetRecord};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 800,
            overlap_chars: 80,
            min_chars: 20,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub const SECTION_HEADING_REGEX: &str = r"^\s*(?:#{1,6}\s+.+|\d+(?:\.\d+)*\s+[A-Z].*)$";

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Groups blank-line separated paragraphs up to `max_chars`, then splits any
/// oversized group into overlapping windows.
pub fn chunk_by_paragraph(text: &str, config: ChunkingConfig) -> Vec<String> {
    let raw_paragraphs = text
        .split("\n\n")
        .map(normalize_whitespace)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for paragraph in raw_paragraphs {
        let paragraph_chars = paragraph.chars().count();
        if current.is_empty() {
            current.push_str(&paragraph);
            current_chars = paragraph_chars;
            continue;
        }

        if current_chars + paragraph_chars + 1 <= config.max_chars {
            current.push(' ');
            current.push_str(&paragraph);
            current_chars += paragraph_chars + 1;
        } else {
            if current_chars >= config.min_chars {
                chunks.push(std::mem::take(&mut current));
            }
            current.clear();
            current.push_str(&paragraph);
            current_chars = paragraph_chars;
        }
    }

    if current_chars >= config.min_chars {
        chunks.push(current);
    }

    if chunks.is_empty() && !text.trim().is_empty() {
        chunks.push(normalize_whitespace(text));
    }

    let mut with_overlap = Vec::new();
    for chunk in chunks {
        let chars: Vec<char> = chunk.chars().collect();
        if chars.len() <= config.max_chars {
            with_overlap.push(chunk);
            continue;
        }

        let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + config.max_chars).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            with_overlap.push(piece);
            if end == chars.len() {
                break;
            }
            start = start.saturating_add(step);
        }
    }

    with_overlap
}

/// Splits a free-text document into records, one per chunk, tagging each
/// with the nearest preceding section heading.
pub fn text_records(
    file_name: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<DatasetRecord>, IngestError> {
    config.validate()?;
    let heading_re = Regex::new(SECTION_HEADING_REGEX)?;

    let mut sections: Vec<(String, String)> = Vec::new();
    let mut current_heading = String::new();
    let mut current_body = String::new();

    for line in text.lines() {
        if heading_re.is_match(line) {
            if !current_body.trim().is_empty() {
                sections.push((current_heading.clone(), std::mem::take(&mut current_body)));
            }
            current_heading = line.trim().trim_start_matches('#').trim().to_string();
            current_body.push_str(&current_heading);
            current_body.push_str("\n\n");
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if !current_body.trim().is_empty() {
        sections.push((current_heading, current_body));
    }

    let mut records = Vec::new();
    for (heading, body) in sections {
        for (index, piece) in chunk_by_paragraph(&body, config).into_iter().enumerate() {
            let locator = if heading.is_empty() {
                format!("{file_name}#chunk={index}")
            } else {
                format!("{file_name}#section={heading}&chunk={index}")
            };
            records.push(DatasetRecord {
                locator,
                text: piece,
            });
        }
    }

    Ok(records)
}

/// Turns records into immutable chunks in dataset order.
pub fn build_chunks(records: &[DatasetRecord], embedder: &dyn Embedder) -> Vec<Chunk> {
    records
        .iter()
        .filter(|record| !record.text.trim().is_empty())
        .enumerate()
        .map(|(ordinal, record)| {
            let ordinal = ordinal as u64;
            let text = normalize_whitespace(&record.text);
            Chunk {
                id: make_chunk_id(&record.locator, ordinal, &text),
                embedding: embedder.embed(&text),
                text,
                source_locator: record.locator.clone(),
                ordinal,
            }
        })
        .collect()
}

fn make_chunk_id(locator: &str, ordinal: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(locator.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
