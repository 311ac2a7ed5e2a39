//! Rich diagnostic rendering for lowering errors.
//!
//! Wraps `codespan-reporting` for terminal output and provides a JSON form
//! for editor/tooling integration.

use crate::error::LowerError;
use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label as CsLabel, Severity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term::{self, termcolor::ColorChoice, termcolor::StandardStream};
use serde::Serialize;
use std::ops::Range;

/// A renderable diagnostic.
pub struct Diagnostic {
    inner: CsDiagnostic<usize>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            inner: CsDiagnostic::error().with_message(message),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            inner: CsDiagnostic::warning().with_message(message),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.inner = self.inner.with_code(code);
        self
    }

    pub fn with_primary_label(
        mut self,
        file_id: usize,
        range: Range<usize>,
        message: impl Into<String>,
    ) -> Self {
        self.inner = self
            .inner
            .with_labels(vec![CsLabel::primary(file_id, range).with_message(message)]);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.inner = self.inner.with_notes(vec![note.into()]);
        self
    }

    /// Build the diagnostic for a static lowering error, pointing at the
    /// offending line of `source`.
    pub fn from_lower_error(err: &LowerError, file_id: usize, source: &str) -> Self {
        let range = line_range(source, err.line());
        let label = match err {
            LowerError::InvalidBreak { .. } => "no enclosing loop or block here",
            LowerError::InvalidNext { .. } => "no enclosing loop or block here",
            LowerError::InvalidRedo { .. } => "nothing here can be redone",
            LowerError::InvalidRetry { .. } => "retry is only valid inside a rescue clause",
            LowerError::EscapeFromEval { .. } => "this jump would leave the eval",
        };
        let mut diag = Diagnostic::error(err.to_string())
            .with_code(err.code())
            .with_primary_label(file_id, range, label);
        if let Some(note) = err.note() {
            diag = diag.with_note(note);
        }
        diag
    }

    /// Write the diagnostic to stderr with color.
    pub fn emit(&self, files: &SimpleFiles<String, String>) {
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        let _ = term::emit(&mut writer.lock(), &config, files, &self.inner);
    }

    /// Serialize for tooling.
    pub fn to_json(&self) -> serde_json::Value {
        let severity = match self.inner.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
            Severity::Help => "help",
            Severity::Bug => "bug",
        };
        let labels = self
            .inner
            .labels
            .iter()
            .map(|l| JsonLabel {
                style: if l.style == codespan_reporting::diagnostic::LabelStyle::Primary {
                    "primary"
                } else {
                    "secondary"
                },
                start: l.range.start,
                end: l.range.end,
                message: l.message.clone(),
            })
            .collect();
        let json = JsonDiagnostic {
            code: self.inner.code.clone(),
            severity,
            message: self.inner.message.clone(),
            labels,
            notes: self.inner.notes.clone(),
        };
        serde_json::to_value(json).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Serialize)]
struct JsonDiagnostic {
    code: Option<String>,
    severity: &'static str,
    message: String,
    labels: Vec<JsonLabel>,
    notes: Vec<String>,
}

#[derive(Serialize)]
struct JsonLabel {
    style: &'static str,
    start: usize,
    end: usize,
    message: String,
}

/// Register one source file, returning the files database and its id.
pub fn create_files(name: &str, source: &str) -> (SimpleFiles<String, String>, usize) {
    let mut files = SimpleFiles::new();
    let id = files.add(name.to_string(), source.to_string());
    (files, id)
}

/// Byte range of the given 1-based line, or an empty range at the end of
/// the source if the line is out of bounds.
fn line_range(source: &str, line: u32) -> Range<usize> {
    let mut current = 1u32;
    let mut start = 0usize;
    for (idx, ch) in source.char_indices() {
        if current == line && ch == '\n' {
            return start..idx;
        }
        if ch == '\n' {
            current += 1;
            start = idx + 1;
        }
    }
    if current == line {
        start..source.len()
    } else {
        source.len()..source.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_range() {
        let src = "a = 1\nbreak\nb = 2\n";
        assert_eq!(line_range(src, 1), 0..5);
        assert_eq!(line_range(src, 2), 6..11);
        assert_eq!(&src[line_range(src, 2)], "break");
        assert_eq!(line_range(src, 9), src.len()..src.len());
    }

    #[test]
    fn test_from_lower_error_carries_code() {
        let err = LowerError::InvalidBreak {
            file: "t.lp".into(),
            line: 2,
        };
        let (_files, id) = create_files("t.lp", "a = 1\nbreak\n");
        let diag = Diagnostic::from_lower_error(&err, id, "a = 1\nbreak\n");
        let json = diag.to_json();
        assert_eq!(json["code"], "E1001");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["message"], "Invalid break");
        assert_eq!(json["labels"][0]["start"], 6);
        assert_eq!(json["labels"][0]["end"], 11);
    }

    #[test]
    fn test_json_shape() {
        let diag = Diagnostic::warning("something odd")
            .with_code("E9999")
            .with_note("context");
        let json = diag.to_json();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["notes"][0], "context");
        assert!(json["labels"].as_array().map(|a| a.is_empty()).unwrap_or(false));
    }
}
