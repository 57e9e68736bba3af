//! CSV corpus reader.
//!
//! The first row is a header and is never ingested. When the header names
//! every embed field, cells are mapped by name through [`CorpusFields`].
//! Otherwise columns are positional: column 0 is the question (embedded)
//! and column 1 the answer, both stored as payload.
//!
//! As with JSONL, every data row yields one record so ordinals follow row
//! positions; short or undecodable rows are marked defective.

use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::CorpusFields;
use crate::errors::RagError;
use crate::io_jsonl::record_from_value;
use crate::record::Record;

/// Reads a CSV corpus into records.
///
/// # Errors
/// - [`RagError::Io`] if the file cannot be opened or read.
/// - [`RagError::Parse`] if the header row cannot be decoded.
pub fn read_csv_corpus(
    path: impl AsRef<Path>,
    fields: &CorpusFields,
) -> Result<Vec<Record>, RagError> {
    info!("Reading CSV corpus: {:?}", path.as_ref());

    let file = File::open(path.as_ref())?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let header = reader.headers().map_err(csv_error)?.clone();
    let by_name = fields
        .embed
        .iter()
        .all(|f| header.iter().any(|h| h.trim() == f.as_str()));
    debug!(columns = header.len(), by_name, "CSV header read");

    let mut out = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let ordinal = i as u64;
        let record = match row {
            Ok(row) if by_name => record_from_value(ordinal, &named_row(&header, &row), fields),
            Ok(row) => positional_row(ordinal, &row),
            Err(e) if e.is_io_error() => return Err(csv_error(e)),
            Err(e) => {
                warn!("Malformed CSV row {}: {}", i + 2, e);
                Record::malformed(ordinal, format!("row {}: {e}", i + 2))
            }
        };
        out.push(record);
    }

    let defective = out.iter().filter(|r| r.defect.is_some()).count();
    debug!("Loaded {} records ({} defective)", out.len(), defective);
    Ok(out)
}

fn positional_row(ordinal: u64, row: &StringRecord) -> Record {
    match (row.get(0), row.get(1)) {
        (Some(question), Some(answer)) => Record::new(
            ordinal,
            vec![question.to_string()],
            vec![question.to_string(), answer.to_string()],
        ),
        _ => Record::malformed(
            ordinal,
            format!("expected at least 2 columns, got {}", row.len()),
        ),
    }
}

/// Header-keyed object; cells past the header are dropped.
fn named_row(header: &StringRecord, row: &StringRecord) -> Value {
    let obj: Map<String, Value> = header
        .iter()
        .zip(row.iter())
        .map(|(h, cell)| (h.trim().to_string(), Value::String(cell.to_string())))
        .collect();
    Value::Object(obj)
}

fn csv_error(e: csv::Error) -> RagError {
    if e.is_io_error() {
        if let csv::ErrorKind::Io(io) = e.into_kind() {
            return RagError::Io(io);
        }
        return RagError::Parse("csv i/o error".into());
    }
    RagError::Parse(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn positional_columns_skip_header_and_flag_short_rows() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "q,a").unwrap();
        writeln!(f, "How do I pay?,Online.").unwrap();
        writeln!(f, "lonely").unwrap();
        writeln!(f, "\"Late fee, how much?\",\"5, due monthly\",extra").unwrap();

        let recs = read_csv_corpus(f.path(), &CorpusFields::default()).unwrap();
        assert_eq!(recs.len(), 3);
        assert_eq!(
            recs.iter().map(|r| r.ordinal).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(recs[0].embed_text(), "How do I pay?");
        assert_eq!(recs[0].payload_text(), "How do I pay?\nOnline.");
        assert!(recs[1].defect.as_deref().unwrap().contains("2 columns"));
        assert!(recs[2].problem().is_none());
        assert_eq!(recs[2].embed_text(), "Late fee, how much?");
    }

    #[test]
    fn named_header_maps_through_corpus_fields() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "answer,question").unwrap();
        writeln!(f, "Online.,How do I pay?").unwrap();
        writeln!(f, "orphan").unwrap();

        let fields = CorpusFields::default();
        let recs = read_csv_corpus(f.path(), &fields).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].embed_text(), "How do I pay?");
        assert_eq!(recs[0].payload_text(), "How do I pay?\nOnline.");
        assert!(recs[1].defect.as_deref().unwrap().contains("question"));
    }

    #[test]
    fn header_only_file_is_empty() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "question,answer").unwrap();
        let recs = read_csv_corpus(f.path(), &CorpusFields::default()).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_csv_corpus("/definitely/not/here.csv", &CorpusFields::default());
        assert!(matches!(err, Err(RagError::Io(_))));
    }
}
