//! Tab-separated pair-per-row export
//!
//! Each row carries a text snippet whose two entities are already wrapped
//! in boundary markers, plus the relation label and entity metadata.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use clinrel_core::{ClinrelError, Result};

/// One row of a delimited export
#[derive(Debug, Clone, Deserialize)]
pub struct DelimitedRow {
    #[serde(default)]
    pub relation_token_span_ids: Option<String>,
    #[serde(default)]
    pub ent1_ent2_start: Option<String>,
    #[serde(default)]
    pub ent1: Option<String>,
    #[serde(default)]
    pub ent2: Option<String>,
    pub label: String,
    #[serde(default)]
    pub label_id: Option<String>,
    #[serde(default)]
    pub ent1_type: Option<String>,
    #[serde(default)]
    pub ent2_type: Option<String>,
    #[serde(default)]
    pub ent1_id: Option<String>,
    #[serde(default)]
    pub ent2_id: Option<String>,
    #[serde(default)]
    pub ent1_cui: Option<String>,
    #[serde(default)]
    pub ent2_cui: Option<String>,
    #[serde(default)]
    pub doc_id: Option<String>,
    /// Source text with entity markers
    #[serde(alias = "text")]
    pub sents: String,
}

impl DelimitedRow {
    pub fn entity1_types(&self) -> Option<Vec<String>> {
        self.ent1_type.as_deref().and_then(parse_list_cell)
    }

    pub fn entity2_types(&self) -> Option<Vec<String>> {
        self.ent2_type.as_deref().and_then(parse_list_cell)
    }
}

/// Read every row of a tab-separated file
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<DelimitedRow>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| ClinrelError::io(path, e))?;
    let rows = read_rows_from(file).map_err(|e| match e {
        ClinrelError::Serialization(msg) => {
            ClinrelError::Serialization(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })?;
    tracing::info!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Read rows from any tab-separated source
pub fn read_rows_from<R: std::io::Read>(reader: R) -> Result<Vec<DelimitedRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(reader);

    reader
        .deserialize()
        .enumerate()
        .map(|(idx, row)| {
            row.map_err(|e| ClinrelError::Serialization(format!("row {}: {}", idx + 1, e)))
        })
        .collect()
}

static QUOTED_ITEM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).ok());

/// Parse a list cell such as `['T047', 'T121']` or `T047,T121`
///
/// Empty cells and `None`/`nan` placeholders yield `None`.
pub fn parse_list_cell(cell: &str) -> Option<Vec<String>> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("none") || cell.eq_ignore_ascii_case("nan") {
        return None;
    }

    let quoted: Vec<String> = QUOTED_ITEM
        .as_ref()
        .map(|re| {
            re.captures_iter(cell)
                .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().to_string())
                .collect()
        })
        .unwrap_or_default();
    if !quoted.is_empty() {
        return Some(quoted);
    }

    let items: Vec<String> = cell
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "relation_token_span_ids\tent1_ent2_start\tent1\tent2\tlabel\tlabel_id\tent1_type\tent2_type\tent1_id\tent2_id\tent1_cui\tent2_cui\tdoc_id\tsents\n\
        []\t(2, 7)\trash\taspirin\tADE-Drug \t0\t['Sign or Symptom']\t['Pharmacologic Substance']\t1\t2\tC0015230\tC0004057\t5\tsevere [s1] rash [e1] after [s2] aspirin [e2]\n";

    #[test]
    fn test_read_rows() {
        let rows = read_rows_from(TSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.label, "ADE-Drug ");
        assert_eq!(row.doc_id.as_deref(), Some("5"));
        assert!(row.sents.starts_with("severe [s1]"));
        assert_eq!(row.entity1_types(), Some(vec!["Sign or Symptom".to_string()]));
    }

    #[test]
    fn test_text_column_alias() {
        let tsv = "label\ttext\nOther\t[s1] a [e1] [s2] b [e2]\n";
        let rows = read_rows_from(tsv.as_bytes()).unwrap();
        assert_eq!(rows[0].sents, "[s1] a [e1] [s2] b [e2]");
        assert!(rows[0].ent1.is_none());
    }

    #[test]
    fn test_missing_text_column_fails() {
        let tsv = "label\tent1\nOther\trash\n";
        assert!(read_rows_from(tsv.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_list_cell() {
        assert_eq!(
            parse_list_cell("['T047', \"T121\"]"),
            Some(vec!["T047".to_string(), "T121".to_string()])
        );
        assert_eq!(
            parse_list_cell("[T047, T121]"),
            Some(vec!["T047".to_string(), "T121".to_string()])
        );
        assert_eq!(parse_list_cell("None"), None);
        assert_eq!(parse_list_cell(""), None);
    }
}
