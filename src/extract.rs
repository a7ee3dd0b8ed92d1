//! Text extraction for SOP documents (PDF and Word).
//!
//! The scanner hands over raw bytes and a [`Format`] picked from the file
//! extension; this module returns plain UTF-8 text. Extraction never
//! panics out to the caller: a malformed file becomes an [`ExtractError`]
//! and the scanner skips it.

use std::io::Read;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Document formats recognised by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Pdf,
    Docx,
    Unsupported,
}

/// Extension → format table. Lookup is case-insensitive.
///
/// Legacy `.doc` files are routed to the Word extractor. They are not
/// ZIP containers, so extraction fails and the file is reported as skipped
/// rather than silently ignored.
const EXTENSIONS: &[(&str, Format)] = &[
    ("pdf", Format::Pdf),
    ("docx", Format::Docx),
    ("doc", Format::Docx),
];

impl Format {
    pub fn from_path(path: &Path) -> Format {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return Format::Unsupported,
        };
        EXTENSIONS
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, f)| *f)
            .unwrap_or(Format::Unsupported)
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Format::Pdf => "pdf",
            Format::Docx => "docx",
            Format::Unsupported => "unsupported",
        })
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("Word extraction failed: {0}")]
    Docx(String),
}

/// Extract plain text from `bytes` according to `format`.
pub fn extract_text(bytes: &[u8], format: Format) -> Result<String, ExtractError> {
    match format {
        Format::Pdf => extract_pdf(bytes),
        Format::Docx => extract_docx(bytes),
        Format::Unsupported => Err(ExtractError::Unsupported(format.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked on malformed input".to_string())),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
///
/// Table cells are paragraphs too, so table text comes out in reading order.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => paragraph.push('\t'),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = paragraph.trim();
                    if !line.is_empty() {
                        out.push_str(line);
                        out.push('\n');
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !paragraph.trim().is_empty() {
        out.push_str(paragraph.trim());
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            write!(
                zip,
                r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
                body
            )
            .unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a/b.pdf")), Format::Pdf);
        assert_eq!(Format::from_path(Path::new("a/b.PDF")), Format::Pdf);
        assert_eq!(Format::from_path(Path::new("a/b.docx")), Format::Docx);
        assert_eq!(Format::from_path(Path::new("a/b.doc")), Format::Docx);
        assert_eq!(Format::from_path(Path::new("a/b.txt")), Format::Unsupported);
        assert_eq!(Format::from_path(Path::new("a/README")), Format::Unsupported);
    }

    #[test]
    fn unsupported_format_returns_error() {
        let err = extract_text(b"foo", Format::Unsupported).unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", Format::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", Format::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>Step 1:</w:t></w:r><w:r><w:t xml:space=\"preserve\"> isolate the line</w:t></w:r></w:p>\
             <w:p><w:r><w:t>Step 2: notify QA &amp; log</w:t></w:r></w:p>",
        );
        let text = extract_text(&bytes, Format::Docx).unwrap();
        assert_eq!(text, "Step 1: isolate the line\nStep 2: notify QA & log");
    }

    #[test]
    fn docx_without_document_xml_fails() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("other.xml", options).unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_text(&buf.into_inner(), Format::Docx).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }
}
