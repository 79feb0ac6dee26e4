use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::SlidecastError;

/// A single `speaker,text[,slide]` row of a transcript CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRow {
    pub speaker: String,
    pub text: String,
    pub slide_suggestion: Option<String>,
}

/// Parse transcript CSV content.
///
/// Accepts an optional header row (first column named `speaker`), quoted fields
/// with doubled quotes, embedded newlines inside quotes, and a leading BOM.
/// Blank lines are skipped.
pub fn parse_transcript_csv(content: &str) -> Result<Vec<TranscriptRow>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let records = split_records(content)?;

    let mut rows = Vec::new();
    let mut first_record = true;
    for fields in records {
        if fields.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let header_candidate = std::mem::take(&mut first_record);
        if header_candidate && is_header(&fields) {
            continue;
        }

        let mut fields = fields.into_iter();
        let speaker = fields.next().unwrap_or_default().trim().to_string();
        let text = fields.next().unwrap_or_default().trim().to_string();
        let slide_suggestion = fields
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        rows.push(TranscriptRow {
            speaker,
            text,
            slide_suggestion,
        });
    }

    Ok(rows)
}

fn is_header(fields: &[String]) -> bool {
    fields
        .first()
        .map(|f| matches!(f.trim().to_lowercase().as_str(), "speaker" | "話者"))
        .unwrap_or(false)
}

fn split_records(content: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut fields));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(SlidecastError::InvalidTranscript("unterminated quoted field".to_string()).into());
    }

    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push(fields);
    }

    Ok(records)
}
