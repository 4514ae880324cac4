//! Artifact parsing
//!
//! Two artifact shapes land in the zone: delimited tabular text with a
//! header row (data files for APPEND/TRUNCATE) and JSON schema definitions
//! (DEFINE_SCHEMA). Both parsers are pure; governance checks live in the
//! validator.

use crate::error::IngestError;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Parsed data file: header row plus raw text cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl DataFile {
    /// Parse delimited text. The first line is the header; quoted fields may
    /// contain embedded delimiters and doubled quotes. Blank lines are
    /// skipped.
    pub fn parse(bytes: &[u8], delimiter: char) -> Result<Self, IngestError> {
        let text = std::str::from_utf8(bytes).map_err(|_| {
            IngestError::SchemaMismatch("artifact is not valid UTF-8 text".to_string())
        })?;

        let mut lines = text
            .lines()
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .filter(|l| !l.is_empty());

        let header_line = lines.next().ok_or_else(|| {
            IngestError::SchemaMismatch("artifact has no header row".to_string())
        })?;
        let header = split_fields(header_line, delimiter);

        let rows = lines.map(|line| split_fields(line, delimiter)).collect();

        Ok(Self { header, rows })
    }
}

/// Split one record line into fields, honoring double-quoted fields with
/// `""` as an escaped quote.
fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' && current.is_empty() {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

/// Raw column entry in a schema-definition artifact. Type names stay raw
/// strings here; the validator maps them to the closed `ColumnType` set so
/// an unknown name surfaces as `InvalidDefinition` with the offending token.
#[derive(Debug, Clone, Deserialize)]
pub struct RawColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Schema-definition artifact as uploaded
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaArtifact {
    pub columns: Vec<RawColumn>,
    pub allowed_operations: Vec<String>,
}

impl SchemaArtifact {
    pub fn parse(bytes: &[u8]) -> Result<Self, IngestError> {
        serde_json::from_slice(bytes).map_err(|e| {
            IngestError::InvalidDefinition(format!("schema artifact is not valid JSON: {}", e))
        })
    }
}

/// SHA-256 of the artifact bytes, recorded in the run log.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_header_and_rows() {
        let file = DataFile::parse(b"id,amount,date\n1,9.99,2024-01-01\n2,5.00,2024-01-02\n", ',')
            .unwrap();
        assert_eq!(file.header, vec!["id", "amount", "date"]);
        assert_eq!(file.rows.len(), 2);
        assert_eq!(file.rows[0], vec!["1", "9.99", "2024-01-01"]);
    }

    #[test]
    fn handles_crlf_and_blank_lines() {
        let file = DataFile::parse(b"id,name\r\n1,ada\r\n\r\n2,grace\r\n", ',').unwrap();
        assert_eq!(file.rows.len(), 2);
        assert_eq!(file.rows[1], vec!["2", "grace"]);
    }

    #[test]
    fn quoted_fields_keep_delimiters_and_quotes() {
        let file = DataFile::parse(b"id,note\n1,\"a,b\"\n2,\"say \"\"hi\"\"\"\n", ',').unwrap();
        assert_eq!(file.rows[0], vec!["1", "a,b"]);
        assert_eq!(file.rows[1], vec!["2", "say \"hi\""]);
    }

    #[test]
    fn alternate_delimiter() {
        let file = DataFile::parse(b"id|name\n1|ada\n", '|').unwrap();
        assert_eq!(file.header, vec!["id", "name"]);
        assert_eq!(file.rows[0], vec!["1", "ada"]);
    }

    #[test]
    fn empty_artifact_is_schema_mismatch() {
        let err = DataFile::parse(b"", ',').unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
    }

    #[test]
    fn non_utf8_is_schema_mismatch() {
        let err = DataFile::parse(&[0xff, 0xfe, 0x00], ',').unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
    }

    #[test]
    fn header_only_file_has_zero_rows() {
        let file = DataFile::parse(b"id,amount\n", ',').unwrap();
        assert!(file.rows.is_empty());
    }

    #[test]
    fn parses_schema_artifact() {
        let artifact = SchemaArtifact::parse(
            br#"{"columns":[{"name":"id","type":"bigint"}],"allowed_operations":["append"]}"#,
        )
        .unwrap();
        assert_eq!(artifact.columns[0].name, "id");
        assert_eq!(artifact.allowed_operations, vec!["append"]);
    }

    #[test]
    fn bad_json_is_invalid_definition() {
        let err = SchemaArtifact::parse(b"{not json").unwrap_err();
        assert_eq!(err.kind(), "InvalidDefinition");
    }

    #[test]
    fn checksum_is_stable_hex() {
        let sum = checksum(b"id,amount\n1,2\n");
        assert_eq!(sum.len(), 64);
        assert_eq!(sum, checksum(b"id,amount\n1,2\n"));
        assert_ne!(sum, checksum(b"id,amount\n1,3\n"));
    }
}
