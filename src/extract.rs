//! Plain-text extraction for uploaded documents (txt, PDF, docx).
//!
//! The builder supplies a path; this module resolves the document kind from
//! the file extension and returns UTF-8 text. Extraction never panics:
//! malformed files come back as [`Error::UnreadableDocument`] and the build
//! terminates with an `error` status.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Supported document types, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" => Some(DocumentKind::Text),
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            _ => None,
        }
    }
}

/// Read a document from disk and extract its plain text.
///
/// Fails with [`Error::DocumentNotFound`] if the path does not resolve and
/// [`Error::UnreadableDocument`] if the type is unsupported or extraction
/// produces nothing usable.
pub fn read_document(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(Error::DocumentNotFound(path.to_path_buf()));
    }

    let kind = DocumentKind::from_path(path).ok_or_else(|| {
        Error::UnreadableDocument(format!("unsupported document type: {}", path.display()))
    })?;

    let bytes =
        std::fs::read(path).map_err(|_| Error::DocumentNotFound(path.to_path_buf()))?;

    match kind {
        DocumentKind::Text => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        DocumentKind::Pdf => extract_pdf(&bytes),
        DocumentKind::Docx => extract_docx(&bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::UnreadableDocument(format!("PDF extraction failed: {}", e)))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::UnreadableDocument(format!("OOXML extraction failed: {}", e)))?;

    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| Error::UnreadableDocument(format!("OOXML extraction failed: {}", e)))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| {
                    Error::UnreadableDocument(format!("OOXML extraction failed: {}", e))
                })?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(Error::UnreadableDocument(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(Error::UnreadableDocument(
            "word/document.xml not found".to_string(),
        ));
    }

    extract_w_t_elements(&doc_xml)
}

/// Collect the text of every `<w:t>` run, paragraph runs separated by spaces.
fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(Error::UnreadableDocument(format!(
                    "OOXML extraction failed: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
