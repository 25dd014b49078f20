use crate::chunking::normalize_whitespace;
use crate::error::ConvertError;
use crate::traits::DocumentConverter;
use lopdf::Document;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MEDIA_PDF: &str = "application/pdf";
pub const MEDIA_TEXT: &str = "text/plain";
pub const MEDIA_MARKDOWN: &str = "text/markdown";

#[derive(Debug, Clone)]
pub struct RawDocument {
    pub identifier: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredText {
    pub sections: Vec<Section>,
}

impl StructuredText {
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|section| section.body.trim().is_empty())
    }

    pub fn full_text(&self) -> String {
        self.sections
            .iter()
            .map(|section| format!("{}\n{}", section.heading, section.body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn first_heading(&self) -> Option<&str> {
        self.sections
            .iter()
            .map(|section| section.heading.as_str())
            .find(|heading| *heading != PREAMBLE)
    }
}

pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "pdf" => Some(MEDIA_PDF),
        "md" | "markdown" => Some(MEDIA_MARKDOWN),
        "txt" => Some(MEDIA_TEXT),
        _ => None,
    }
}

const PREAMBLE: &str = "Preamble";

struct HeadingPatterns {
    canonical: Regex,
    numbered: Regex,
    markdown: Regex,
}

impl HeadingPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            canonical: Regex::new(
                r"(?i)^\s*(?:[0-9IVX]+(?:\.[0-9]+)*\.?\s+)?(abstract|introduction|related work|background|preliminaries|methods?|methodology|approach|experiments?|evaluation|results|discussion|limitations|conclusions?|references|bibliography|acknowledge?ments)\s*:?\s*$",
            )?,
            numbered: Regex::new(r"^\s*\d+(?:\.\d+)*\.?\s+[A-Z][A-Za-z0-9\-:,&' ]{1,80}$")?,
            markdown: Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$")?,
        })
    }

    fn heading_of(&self, line: &str) -> Option<String> {
        if let Some(captures) = self.markdown.captures(line) {
            return captures.get(1).map(|m| normalize_whitespace(m.as_str()));
        }
        let trimmed = line.trim();
        if self.canonical.is_match(trimmed) {
            return Some(normalize_whitespace(trimmed.trim_end_matches(':')));
        }
        if self.numbered.is_match(trimmed) && trimmed.split_whitespace().count() <= 9 {
            return Some(normalize_whitespace(trimmed));
        }
        None
    }
}

fn is_back_matter(heading: &str) -> bool {
    let lowered = heading.to_lowercase();
    ["references", "bibliography", "acknowledgement", "acknowledgment"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn push_section(sections: &mut Vec<Section>, heading: &str, body: &mut Vec<&str>) {
    let joined = body.join("\n");
    body.clear();
    if joined.trim().is_empty() || is_back_matter(heading) {
        return;
    }
    sections.push(Section {
        heading: heading.to_string(),
        body: joined.trim().to_string(),
    });
}

/// Groups text lines under detected headings. Reference lists and
/// acknowledgements are dropped; text before the first heading is kept under
/// a preamble section.
pub fn structure_text(text: &str) -> Result<StructuredText, ConvertError> {
    let patterns = HeadingPatterns::new()?;
    let mut sections = Vec::new();
    let mut heading = PREAMBLE.to_string();
    let mut body = Vec::new();

    for line in text.lines() {
        match patterns.heading_of(line) {
            Some(next) => {
                push_section(&mut sections, &heading, &mut body);
                heading = next;
            }
            None => body.push(line),
        }
    }
    push_section(&mut sections, &heading, &mut body);

    Ok(StructuredText { sections })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextConverter;

impl DocumentConverter for PdfTextConverter {
    fn convert(&self, raw: &RawDocument) -> Result<StructuredText, ConvertError> {
        let document =
            Document::load_mem(&raw.bytes).map_err(|error| ConvertError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| ConvertError::PdfParse(error.to_string()))?;
            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        let structured = structure_text(&pages.join("\n\n"))?;
        if structured.is_empty() {
            return Err(ConvertError::Empty(raw.identifier.clone()));
        }
        Ok(structured)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextConverter;

impl DocumentConverter for PlainTextConverter {
    fn convert(&self, raw: &RawDocument) -> Result<StructuredText, ConvertError> {
        let text = String::from_utf8_lossy(&raw.bytes);
        let structured = structure_text(&text)?;
        if structured.is_empty() {
            return Err(ConvertError::Empty(raw.identifier.clone()));
        }
        Ok(structured)
    }
}

/// Dispatches on the raw document's media type.
#[derive(Debug, Default, Clone, Copy)]
pub struct MediaConverter {
    pdf: PdfTextConverter,
    text: PlainTextConverter,
}

impl DocumentConverter for MediaConverter {
    fn convert(&self, raw: &RawDocument) -> Result<StructuredText, ConvertError> {
        match raw.media_type.as_str() {
            MEDIA_PDF => self.pdf.convert(raw),
            MEDIA_TEXT | MEDIA_MARKDOWN => self.text.convert(raw),
            other => Err(ConvertError::UnsupportedMedia(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(media_type: &str, text: &str) -> RawDocument {
        RawDocument {
            identifier: "doc".to_string(),
            media_type: media_type.to_string(),
            bytes: text.as_bytes().to_vec(),
        }
    }

    #[test]
    fn canonical_and_numbered_headings_open_sections() {
        let text = "Shelf Monitoring with YOLO\nAbstract\nWe detect products.\n1 Introduction\nStores lose sales.\n3.2 Training Setup\nWe fine-tune.\nReferences\n[1] Redmon et al.";
        let structured = structure_text(text).expect("patterns compile");

        let headings = structured
            .sections
            .iter()
            .map(|section| section.heading.as_str())
            .collect::<Vec<_>>();
        assert_eq!(headings, vec!["Preamble", "Abstract", "1 Introduction", "3.2 Training Setup"]);
        assert_eq!(structured.sections[1].body, "We detect products.");
        assert_eq!(structured.first_heading(), Some("Abstract"));
    }

    #[test]
    fn sentences_with_leading_numbers_are_not_headings() {
        let structured = structure_text("Intro text\n3 cameras were mounted above each aisle facing the shelves.")
            .expect("patterns compile");
        assert_eq!(structured.sections.len(), 1);
    }

    #[test]
    fn markdown_headings_are_recognized() {
        let converted = PlainTextConverter
            .convert(&raw(MEDIA_MARKDOWN, "# Federated Annotation\n\nBody one.\n\n## Incentives ##\nTokens reward annotators."))
            .expect("markdown converts");
        assert_eq!(converted.sections.len(), 2);
        assert_eq!(converted.sections[1].heading, "Incentives");
    }

    #[test]
    fn empty_text_is_an_error() {
        let result = PlainTextConverter.convert(&raw(MEDIA_TEXT, "  \n\n "));
        assert!(matches!(result, Err(ConvertError::Empty(_))));
    }

    #[test]
    fn unreadable_pdf_bytes_fail_to_parse() {
        let result = MediaConverter::default().convert(&raw(MEDIA_PDF, "%PDF-1.4\n%broken"));
        assert!(matches!(result, Err(ConvertError::PdfParse(_))));
    }

    #[test]
    fn unknown_media_is_rejected() {
        let result = MediaConverter::default().convert(&raw("image/png", "x"));
        assert!(matches!(result, Err(ConvertError::UnsupportedMedia(_))));
    }

    #[test]
    fn media_type_follows_extension() {
        assert_eq!(media_type_for_path(Path::new("a/B.PDF")), Some(MEDIA_PDF));
        assert_eq!(media_type_for_path(Path::new("notes.md")), Some(MEDIA_MARKDOWN));
        assert_eq!(media_type_for_path(Path::new("image.png")), None);
    }
}
