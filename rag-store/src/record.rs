//! Core data models used by the library.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::Metric;

/// One corpus row, immutable once read.
///
/// Rows that could not be parsed still become a `Record` (with a `defect`)
/// so ordinals stay aligned with the corpus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// 0-based position in the corpus; becomes the document id.
    pub ordinal: u64,
    pub embed_fields: Vec<String>,
    pub payload_fields: Vec<String>,
    #[serde(default)]
    pub defect: Option<String>,
}

impl Record {
    pub fn new(ordinal: u64, embed_fields: Vec<String>, payload_fields: Vec<String>) -> Self {
        Self {
            ordinal,
            embed_fields,
            payload_fields,
            defect: None,
        }
    }

    /// Placeholder for a row that could not be read.
    pub fn malformed(ordinal: u64, reason: impl Into<String>) -> Self {
        Self {
            ordinal,
            embed_fields: Vec::new(),
            payload_fields: Vec::new(),
            defect: Some(reason.into()),
        }
    }

    /// Text sent to the embedding service.
    pub fn embed_text(&self) -> String {
        join_non_empty(&self.embed_fields)
    }

    /// Text stored as the document payload.
    pub fn payload_text(&self) -> String {
        join_non_empty(&self.payload_fields)
    }

    /// Why this record cannot be indexed, if it cannot.
    pub fn problem(&self) -> Option<String> {
        if let Some(d) = &self.defect {
            return Some(d.clone());
        }
        if self.embed_text().is_empty() {
            return Some("nothing to embed".into());
        }
        None
    }
}

fn join_non_empty(parts: &[String]) -> String {
    parts
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ordered slice of records sharing an id offset; the unit of retry.
#[derive(Clone, Debug)]
pub struct Batch {
    /// 1-based.
    pub number: usize,
    /// Id of the first record.
    pub offset: u64,
    pub records: Vec<Record>,
}

impl Batch {
    /// Splits `records` into `ceil(n / size)` batches; the last may be smaller.
    pub fn split(records: Vec<Record>, size: usize) -> Vec<Batch> {
        let size = size.max(1);
        let mut out = Vec::with_capacity(records.len().div_ceil(size));
        let mut iter = records.into_iter().peekable();
        let mut offset = 0u64;
        while iter.peek().is_some() {
            let chunk: Vec<Record> = iter.by_ref().take(size).collect();
            let len = chunk.len() as u64;
            out.push(Batch {
                number: out.len() + 1,
                offset,
                records: chunk,
            });
            offset += len;
        }
        out
    }

    /// Id range covered by this batch.
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.records.len() as u64
    }
}

/// Vector plus payload keyed by a caller-assigned id.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedDocument {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: String,
}

/// One ranked hit. Scores are only comparable within the same metric.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: u64,
    pub score: f32,
    pub payload: String,
    pub metric: Metric,
}

/// Prompt-ready rendering of the retrieved documents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextBlock {
    Documents(String),
    /// Nothing matched; callers must not pretend otherwise.
    NoMatches,
}

impl ContextBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextBlock::Documents(s) => Some(s),
            ContextBlock::NoMatches => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedContext {
    pub block: ContextBlock,
    pub documents: Vec<SearchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recs(n: u64) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(i, vec![format!("q{i}")], vec![format!("a{i}")]))
            .collect()
    }

    #[test]
    fn split_produces_ceil_batches_with_contiguous_offsets() {
        let batches = Batch::split(recs(25), 10);
        let sizes: Vec<usize> = batches.iter().map(|b| b.records.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(batches[1].number, 2);
        assert_eq!(batches[1].range(), 10..20);
        assert_eq!(batches[2].range(), 20..25);
    }

    #[test]
    fn split_of_empty_corpus_is_empty() {
        assert!(Batch::split(Vec::new(), 10).is_empty());
    }

    #[test]
    fn problem_flags_defects_and_blank_text() {
        assert!(Record::malformed(3, "not an object").problem().is_some());
        assert!(Record::new(1, vec!["  ".into()], vec![]).problem().is_some());
        let ok = Record::new(2, vec!["How?".into()], vec!["How?".into(), "Like so.".into()]);
        assert!(ok.problem().is_none());
        assert_eq!(ok.payload_text(), "How?\nLike so.");
    }
}
