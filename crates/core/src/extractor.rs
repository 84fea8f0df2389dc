use crate::error::IngestError;
use lopdf::Document;
use regex::Regex;
use std::path::Path;
use tracing::{debug, error, warn};

const PDF_EXTENSIONS: [&str; 1] = ["pdf"];
const TEXT_EXTENSIONS: [&str; 3] = ["txt", "text", "md"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    PlainText,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension().and_then(|ext| ext.to_str())?;

        if PDF_EXTENSIONS
            .iter()
            .any(|known| extension.eq_ignore_ascii_case(known))
        {
            Some(Self::Pdf)
        } else if TEXT_EXTENSIONS
            .iter()
            .any(|known| extension.eq_ignore_ascii_case(known))
        {
            Some(Self::PlainText)
        } else {
            None
        }
    }
}

pub trait TextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let failure = |details: String| IngestError::ExtractionFailure {
            path: path.to_path_buf(),
            details,
        };

        let document = Document::load(path).map_err(|error| failure(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| failure(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        if pages.is_empty() {
            warn!(file = %path.display(), "pdf has no text layer, nothing to index");
        }

        Ok(pages.join("\n"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let bytes = std::fs::read(path).map_err(|error| IngestError::ExtractionFailure {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;

        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(invalid) => String::from_utf8_lossy(invalid.as_bytes()).into_owned(),
        })
    }
}

/// Reads a PDF or plain-text file and returns its normalized text.
pub fn extract_document_text(path: &Path) -> Result<String, IngestError> {
    let raw = match SourceFormat::from_path(path) {
        Some(SourceFormat::Pdf) => LopdfExtractor.extract_text(path),
        Some(SourceFormat::PlainText) => PlainTextExtractor.extract_text(path),
        None => Err(IngestError::UnsupportedFormat(path.to_path_buf())),
    }
    .map_err(|error| {
        error!(file = %path.display(), %error, "text extraction failed");
        error
    })?;

    debug!(file = %path.display(), raw_len = raw.len(), "extracted text");
    normalize_text(&raw)
}

/// Ordered clean-up of extractor artifacts. Each pattern runs over the output
/// of the previous one.
pub fn normalize_text(text: &str) -> Result<String, IngestError> {
    const REPLACEMENTS: [(&str, &str); 5] = [
        (r"\n+", "\n"),
        (r"[ |]+", " "),
        (r"\n+\s+", "\n"),
        (r"\s+\n+", "\n"),
        (r"None", ""),
    ];

    let mut normalized = text.to_string();
    for (pattern, replacement) in REPLACEMENTS {
        let regex = Regex::new(pattern)?;
        normalized = regex.replace_all(&normalized, replacement).into_owned();
    }

    Ok(normalized)
}
