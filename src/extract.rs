//! Plain-text extraction for the document formats the ingester accepts.
//!
//! The format is chosen from the file extension. Plain-text formats are read
//! as UTF-8 (invalid bytes replaced), PDFs go through `pdf-extract`, and
//! `.docx` files are unzipped and their paragraph runs concatenated.
//! Extraction never panics; failures come back as [`ExtractError`] and the
//! ingestion pipeline skips the document.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::error::RagError;

/// Extensions read verbatim as text.
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "csv"];
/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("read failed: {0}")]
    Read(String),
}

impl ExtractError {
    /// Attach the offending path and lift into the library error type.
    pub fn into_rag_error(self, path: &Path) -> RagError {
        match self {
            ExtractError::UnsupportedFormat(_) => RagError::UnsupportedFormat(path.to_path_buf()),
            ExtractError::Read(message) => RagError::Read {
                path: path.to_path_buf(),
                message,
            },
        }
    }
}

/// Lower-cased extension of `path`, or an empty string.
fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// True when [`extract_file`] knows how to read this file.
pub fn is_supported(path: &Path) -> bool {
    let ext = extension(path);
    TEXT_EXTENSIONS.contains(&ext.as_str()) || ext == "pdf" || ext == "docx"
}

/// Read a file from disk and return its text.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let ext = extension(path);
    if !is_supported(path) {
        return Err(ExtractError::UnsupportedFormat(if ext.is_empty() {
            "(no extension)".to_string()
        } else {
            format!(".{}", ext)
        }));
    }

    let bytes = std::fs::read(path).map_err(|e| ExtractError::Read(e.to_string()))?;
    extract_bytes(&bytes, &ext)
}

/// Extract text from in-memory bytes given a lower-case extension.
pub fn extract_bytes(bytes: &[u8], ext: &str) -> Result<String, ExtractError> {
    match ext {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        e if TEXT_EXTENSIONS.contains(&e) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(ExtractError::UnsupportedFormat(format!(".{}", other))),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractError::Read(format!("PDF extraction failed: {}", e)))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Read(format!("not a docx archive: {}", e)))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Read("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Read(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Read(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    docx_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, one output line per `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Read(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Read(format!("malformed docx xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_extension_returns_error() {
        let err = extract_bytes(b"foo", "exe").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
        assert!(!is_supported(Path::new("tool.exe")));
        assert!(is_supported(Path::new("NOTES.TXT")));
    }

    #[test]
    fn plain_text_is_lossy_utf8() {
        let text = extract_bytes(b"caf\xc3\xa9 \xff ok", "txt").unwrap();
        assert_eq!(text, "café \u{fffd} ok");
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_bytes(b"not a pdf", "pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Read(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_bytes(b"not a zip", "docx").unwrap_err();
        assert!(matches!(err, ExtractError::Read(_)));
    }

    #[test]
    fn docx_paragraphs_joined_by_newline() {
        let bytes = docx_with_paragraphs(&["Scope of work", "Penalties &amp; terms"]);
        let text = extract_bytes(&bytes, "docx").unwrap();
        assert_eq!(text, "Scope of work\nPenalties & terms");
    }

    #[test]
    fn missing_file_maps_to_read_error() {
        let path = Path::new("/definitely/not/here.txt");
        let err = extract_file(path).unwrap_err();
        assert!(matches!(err, ExtractError::Read(_)));
        assert!(matches!(err.into_rag_error(path), RagError::Read { .. }));
    }
}
