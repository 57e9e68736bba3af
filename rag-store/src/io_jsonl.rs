//! JSONL corpus reader.
//!
//! Every non-empty line becomes exactly one [`Record`], in file order.
//! Lines that are not JSON objects, or that lack an embed field, still yield
//! a record (marked defective) so ordinals match line positions and the
//! ingestor can count them as skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::CorpusFields;
use crate::errors::RagError;
use crate::record::Record;

/// Reads a JSONL corpus into records.
///
/// # Errors
/// - [`RagError::Io`] if the file cannot be opened or read.
pub fn read_corpus(path: impl AsRef<Path>, fields: &CorpusFields) -> Result<Vec<Record>, RagError> {
    info!("Reading JSONL corpus: {:?}", path.as_ref());

    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let ordinal = out.len() as u64;
        let record = match serde_json::from_str::<Value>(&line) {
            Ok(v) => record_from_value(ordinal, &v, fields),
            Err(e) => {
                warn!("Malformed JSON on line {}: {}", i + 1, e);
                Record::malformed(ordinal, format!("line {}: {e}", i + 1))
            }
        };
        out.push(record);
    }

    let defective = out.iter().filter(|r| r.defect.is_some()).count();
    debug!("Loaded {} records ({} defective)", out.len(), defective);
    Ok(out)
}

/// Maps one JSON value onto a record using the configured field lists.
///
/// Scalars other than strings are rendered with their JSON text.
pub fn record_from_value(ordinal: u64, v: &Value, fields: &CorpusFields) -> Record {
    let Some(obj) = v.as_object() else {
        return Record::malformed(ordinal, "row is not a JSON object");
    };

    if let Some(missing) = fields.embed.iter().find(|f| !obj.contains_key(f.as_str())) {
        return Record::malformed(ordinal, format!("missing field `{missing}`"));
    }

    Record::new(
        ordinal,
        pick_all(obj, &fields.embed),
        pick_all(obj, &fields.payload),
    )
}

fn pick_all(obj: &Map<String, Value>, keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|k| match obj.get(k) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
        .collect()
}
