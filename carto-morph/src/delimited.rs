use serde_json::Value;
use tracing::debug;

use crate::error::{MorphError, Result};
use crate::geometry::Row;

/// Turns delimited text into header-keyed rows.
pub trait RecordTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<Row>>;
}

/// Comma-delimited, double-quote escaped, CRLF or LF line endings, first
/// line is the header. Every cell becomes a JSON string.
#[derive(Debug, Clone, Copy)]
pub struct Rfc4180 {
    pub delimiter: char,
}

impl Default for Rfc4180 {
    fn default() -> Self {
        Self { delimiter: ',' }
    }
}

impl RecordTokenizer for Rfc4180 {
    fn tokenize(&self, text: &str) -> Result<Vec<Row>> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut records = split_records(text, self.delimiter)?.into_iter();

        let Some((_, header)) = records.next() else {
            return Ok(Vec::new());
        };

        let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();

        for (line, fields) in records {
            if fields.iter().all(|f| f.is_empty()) {
                continue;
            }

            if fields.len() > header.len() {
                debug!(line, extra = fields.len() - header.len(), "dropping cells past header");
            }

            let row: Row = header
                .iter()
                .zip(fields)
                .map(|(name, cell)| (name.clone(), Value::String(cell)))
                .collect();

            rows.push(row);
        }

        Ok(rows)
    }
}

/// Returns `(starting line, fields)` per record.
fn split_records(text: &str, delimiter: char) -> Result<Vec<(usize, Vec<String>)>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }

            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            c if c == delimiter => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                fields.push(std::mem::take(&mut field));
                records.push((record_line, std::mem::take(&mut fields)));
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(MorphError::DelimitedText {
            line: record_line,
            reason: "unterminated quoted field".into(),
        });
    }

    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push((record_line, fields));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keys_rows() {
        let rows = Rfc4180::default()
            .tokenize("code,row,col\nA,0,1\nB,2,3\n")
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["code"], "A");
        assert_eq!(rows[1]["col"], "3");
    }

    #[test]
    fn byte_order_mark_is_stripped() {
        let rows = Rfc4180::default()
            .tokenize("\u{feff}code,row,col\r\nA,0,0\r\n")
            .unwrap();

        assert_eq!(rows[0]["code"], "A");
        assert!(rows[0].keys().all(|k| !k.starts_with('\u{feff}')));
    }

    #[test]
    fn crlf_and_quotes() {
        let text = "name,note\r\n\"Doe, Jane\",\"said \"\"hi\"\"\"\r\nplain,\"multi\nline\"\r\n";
        let rows = Rfc4180::default().tokenize(text).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "Doe, Jane");
        assert_eq!(rows[0]["note"], "said \"hi\"");
        assert_eq!(rows[1]["note"], "multi\nline");
    }

    #[test]
    fn missing_trailing_newline() {
        let rows = Rfc4180::default().tokenize("a,b\n1,2").unwrap();
        assert_eq!(rows[0]["b"], "2");
    }

    #[test]
    fn blank_lines_skipped() {
        let rows = Rfc4180::default().tokenize("a\n\n1\n\n").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn short_rows_leave_columns_absent() {
        let rows = Rfc4180::default().tokenize("a,b,c\n1,2\n").unwrap();
        assert!(rows[0].get("c").is_none());
    }

    #[test]
    fn unterminated_quote_fails() {
        let err = Rfc4180::default().tokenize("a\n\"open\n").unwrap_err();
        assert!(matches!(err, MorphError::DelimitedText { line: 2, .. }));
    }

    #[test]
    fn custom_delimiter() {
        let rows = Rfc4180 { delimiter: ';' }.tokenize("a;b\n1;2\n").unwrap();
        assert_eq!(rows[0]["a"], "1");
    }

    #[test]
    fn empty_text_has_no_rows() {
        assert!(Rfc4180::default().tokenize("").unwrap().is_empty());
    }
}
