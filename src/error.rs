use thiserror::Error;

/// File-scoped ingest failures. Anything here aborts the current file and
/// nothing else; row- and cell-level problems never raise these (they are
/// coerced or skipped and counted in the ingest audit instead).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no sheet name contains \"{0}\"")]
    MissingSheet(String),

    #[error("no row in sheet \"{sheet}\" matches header keywords [{keywords}]")]
    MissingHeader { sheet: String, keywords: String },

    #[error("no usable assessment config rows in \"{0}\"")]
    EmptyConfig(String),

    #[error("raw export requires caller-supplied assessment configs")]
    NoAssessmentConfig,

    #[error("workbook contains no sheets")]
    EmptyWorkbook,

    #[error("unsupported file extension \"{0}\"")]
    UnsupportedFormat(String),

    #[error("file is {actual} bytes, limit is {limit}")]
    FileTooLarge { actual: u64, limit: u64 },

    #[error("sheet \"{sheet}\" has {actual} rows, limit is {limit}")]
    SheetTooLarge {
        sheet: String,
        actual: usize,
        limit: usize,
    },

    #[error("could not read workbook: {0}")]
    ReadFailed(String),
}

impl IngestError {
    /// Stable machine code surfaced in the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::MissingSheet(_) => "missing_sheet",
            IngestError::MissingHeader { .. } => "missing_header",
            IngestError::EmptyConfig(_) => "empty_config",
            IngestError::NoAssessmentConfig => "no_assessment_config",
            IngestError::EmptyWorkbook => "empty_workbook",
            IngestError::UnsupportedFormat(_) => "unsupported_format",
            IngestError::FileTooLarge { .. } => "file_too_large",
            IngestError::SheetTooLarge { .. } => "sheet_too_large",
            IngestError::ReadFailed(_) => "read_failed",
        }
    }

    pub fn missing_header(sheet: &str, keywords: &[&str]) -> Self {
        IngestError::MissingHeader {
            sheet: sheet.to_string(),
            keywords: keywords.join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(IngestError::MissingSheet("Setup".into()).code(), "missing_sheet");
        assert_eq!(
            IngestError::missing_header("Sheet1", &["student no", "student name"]).code(),
            "missing_header"
        );
        assert_eq!(IngestError::NoAssessmentConfig.code(), "no_assessment_config");
    }

    #[test]
    fn messages_name_the_missing_piece() {
        let e = IngestError::MissingSheet("Table 1".into());
        assert!(e.to_string().contains("Table 1"));

        let e = IngestError::missing_header("Marks", &["student id", "student name"]);
        let msg = e.to_string();
        assert!(msg.contains("Marks"));
        assert!(msg.contains("student id"));
    }
}
