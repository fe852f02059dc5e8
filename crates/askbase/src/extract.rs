//! Text extraction for uploaded documents.
//!
//! One [`TextExtractor`] per format, picked by file extension. Every
//! extractor returns plain UTF-8 text with paragraphs separated by blank
//! lines, which is what the chunker expects. PDF page breaks come through
//! as form feeds and are counted by the chunker.

use std::io::Read;
use std::path::Path;

use askbase_core::ChunkingError;
use quick_xml::events::Event;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub trait TextExtractor: Send + Sync {
    fn format(&self) -> &'static str;

    fn extract(&self, bytes: &[u8]) -> Result<String, ChunkingError>;
}

pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn format(&self) -> &'static str {
        "text"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ChunkingError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ChunkingError::Unreadable(format!("not valid UTF-8: {}", e)))?;
        Ok(text.trim_start_matches('\u{feff}').replace("\r\n", "\n"))
    }
}

pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn format(&self) -> &'static str {
        "pdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ChunkingError> {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ChunkingError::Unreadable(format!("PDF extraction failed: {}", e)))
    }
}

pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn format(&self) -> &'static str {
        "docx"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ChunkingError> {
        let unreadable = |e: String| ChunkingError::Unreadable(format!("DOCX extraction failed: {}", e));

        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| unreadable(e.to_string()))?;
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| unreadable("word/document.xml not found".to_string()))?;

        let mut xml = Vec::new();
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(|e| unreadable(e.to_string()))?;
        if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(unreadable("word/document.xml exceeds size limit".to_string()));
        }
        paragraphs_from_document_xml(&xml).map_err(unreadable)
    }
}

/// Collect `w:t` runs, one paragraph per `w:p`, blank line between
/// paragraphs.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push(' '),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let p = current.trim();
                    if !p.is_empty() {
                        paragraphs.push(p.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

/// Pick the extractor for `path` by extension.
pub fn extractor_for(path: &Path) -> Result<Box<dyn TextExtractor>, ChunkingError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "markdown" => Ok(Box::new(PlainTextExtractor)),
        "pdf" => Ok(Box::new(PdfExtractor)),
        "docx" => Ok(Box::new(DocxExtractor)),
        "" => Err(ChunkingError::UnsupportedFormat(format!(
            "{} has no file extension",
            path.display()
        ))),
        other => Err(ChunkingError::UnsupportedFormat(format!(".{}", other))),
    }
}

/// Read and extract a file.
pub fn extract_file(path: &Path) -> Result<String, ChunkingError> {
    let extractor = extractor_for(path)?;
    let bytes = std::fs::read(path)
        .map_err(|e| ChunkingError::Unreadable(format!("{}: {}", path.display(), e)))?;
    extractor.extract(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>Prompt </w:t></w:r><w:r><w:t>engineering</w:t></w:r></w:p>
<w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
</w:body>
</w:document>"#;
        let text = DocxExtractor.extract(&docx_bytes(xml)).unwrap();
        assert_eq!(text, "Prompt engineering\n\nSecond & last");
    }

    #[test]
    fn test_docx_without_document_xml() {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(matches!(
            DocxExtractor.extract(&bytes),
            Err(ChunkingError::Unreadable(_))
        ));
    }

    #[test]
    fn test_invalid_pdf_is_unreadable() {
        assert!(matches!(
            PdfExtractor.extract(b"not a pdf"),
            Err(ChunkingError::Unreadable(_))
        ));
    }

    #[test]
    fn test_plain_text_strips_bom_and_crlf() {
        let text = PlainTextExtractor
            .extract("\u{feff}one\r\ntwo".as_bytes())
            .unwrap();
        assert_eq!(text, "one\ntwo");
        assert!(PlainTextExtractor.extract(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_extractor_selection() {
        assert_eq!(extractor_for(Path::new("a.MD")).unwrap().format(), "text");
        assert_eq!(extractor_for(Path::new("a.pdf")).unwrap().format(), "pdf");
        assert_eq!(extractor_for(Path::new("a.docx")).unwrap().format(), "docx");
        assert!(matches!(
            extractor_for(Path::new("a.pptx")),
            Err(ChunkingError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            extractor_for(Path::new("README")),
            Err(ChunkingError::UnsupportedFormat(_))
        ));
    }
}
