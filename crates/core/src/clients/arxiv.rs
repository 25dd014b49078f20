use crate::chunking::normalize_whitespace;
use crate::error::StageError;
use crate::extractor::{RawDocument, MEDIA_PDF};
use crate::models::{Candidate, Query};
use crate::traits::LiteratureSearch;
use async_trait::async_trait;
use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_ARXIV_ENDPOINT: &str = "http://export.arxiv.org/api/query";

/// arXiv asks clients to wait three seconds between API requests.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_secs(3);

pub struct ArxivClient {
    endpoint: String,
    client: Client,
    request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Default for ArxivClient {
    fn default() -> Self {
        Self::new(DEFAULT_ARXIV_ENDPOINT)
    }
}

impl ArxivClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: Client::new(),
            request_interval: DEFAULT_REQUEST_INTERVAL,
            last_request: Mutex::new(None),
        }
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.request_interval {
                tokio::time::sleep(self.request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub fn search_url(&self, query: &Query, max_results: usize) -> Result<Url, StageError> {
        let search_query = search_expression(query);
        let max_results = max_results.to_string();
        let url = Url::parse_with_params(
            &self.endpoint,
            &[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ],
        )?;
        Ok(url)
    }
}

pub fn search_expression(query: &Query) -> String {
    let mut clauses = query
        .terms
        .iter()
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .map(|term| {
            let cleaned = term.replace('"', "");
            if cleaned.contains(char::is_whitespace) {
                format!("all:\"{cleaned}\"")
            } else {
                format!("all:{cleaned}")
            }
        })
        .collect::<Vec<_>>();

    if let Some(category) = query.filters.category.as_deref().map(str::trim) {
        if !category.is_empty() {
            clauses.push(format!("cat:{category}"));
        }
    }
    clauses.join(" AND ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
}

#[derive(Debug, Default)]
struct Entry {
    id: String,
    title: String,
    summary: String,
    published: String,
    pdf_url: Option<String>,
}

impl Entry {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Id => &mut self.id,
            Field::Title => &mut self.title,
            Field::Summary => &mut self.summary,
            Field::Published => &mut self.published,
        }
    }

    fn into_candidate(self) -> Option<Candidate> {
        let raw_id = normalize_whitespace(&self.id);
        let identifier = raw_id
            .rsplit_once("/abs/")
            .map_or(raw_id.as_str(), |(_, id)| id);
        let identifier = strip_version(identifier).to_string();
        if identifier.is_empty() {
            return None;
        }

        let publication_date = self
            .published
            .trim()
            .get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok());
        let pdf_url = self
            .pdf_url
            .or_else(|| Some(format!("https://arxiv.org/pdf/{identifier}")));

        Some(Candidate {
            identifier,
            title: normalize_whitespace(&self.title),
            abstract_text: normalize_whitespace(&self.summary),
            publication_date,
            similarity_score: 0.0,
            pdf_url,
        })
    }
}

/// `2401.01234v2` and `2401.01234` name the same paper.
fn strip_version(identifier: &str) -> &str {
    match identifier.rfind('v') {
        Some(at)
            if at > 0
                && at + 1 < identifier.len()
                && identifier[at + 1..].bytes().all(|byte| byte.is_ascii_digit()) =>
        {
            &identifier[..at]
        }
        _ => identifier,
    }
}

fn feed_error(error: impl std::fmt::Display) -> StageError {
    StageError::Schema(format!("arxiv feed: {error}"))
}

/// PDF href of an Atom `<link>`, if the link points at one.
fn pdf_link(link: &BytesStart<'_>) -> Result<Option<String>, StageError> {
    let mut href = None;
    let mut is_pdf = false;
    for attribute in link.attributes() {
        let attribute = attribute.map_err(feed_error)?;
        let value = attribute.unescape_value().map_err(feed_error)?;
        match attribute.key.local_name().as_ref() {
            b"href" => href = Some(value.into_owned()),
            b"title" => is_pdf |= value.eq_ignore_ascii_case("pdf"),
            b"type" => is_pdf |= value.contains("pdf"),
            _ => {}
        }
    }
    Ok(href.filter(|_| is_pdf))
}

/// Keeps the first PDF link of an entry; links outside entries are ignored.
fn record_pdf_link(entry: Option<&mut Entry>, link: &BytesStart<'_>) -> Result<(), StageError> {
    if let Some(current) = entry {
        if current.pdf_url.is_none() {
            current.pdf_url = pdf_link(link)?;
        }
    }
    Ok(())
}

/// Parses an arXiv Atom feed into candidates. Entries without an id are
/// skipped; similarity is left at zero for the evidence store to fill in.
pub fn parse_feed(feed: &str) -> Result<Vec<Candidate>, StageError> {
    let mut reader = Reader::from_str(feed);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut candidates = Vec::new();
    let mut entry: Option<Entry> = None;
    let mut target: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(feed_error)? {
            Event::Start(element) => {
                let in_entry = entry.is_some();
                match element.local_name().as_ref() {
                    b"entry" => {
                        entry = Some(Entry::default());
                        target = None;
                    }
                    b"id" if in_entry => target = Some(Field::Id),
                    b"title" if in_entry => target = Some(Field::Title),
                    b"summary" if in_entry => target = Some(Field::Summary),
                    b"published" if in_entry => target = Some(Field::Published),
                    b"link" => record_pdf_link(entry.as_mut(), &element)?,
                    _ => {}
                }
            }
            Event::Empty(element) => {
                if element.local_name().as_ref() == b"link" {
                    record_pdf_link(entry.as_mut(), &element)?;
                }
            }
            Event::Text(text) => {
                if let (Some(field), Some(current)) = (target, entry.as_mut()) {
                    let text = text.unescape().map_err(feed_error)?;
                    let slot = current.field_mut(field);
                    slot.push(' ');
                    slot.push_str(&text);
                }
            }
            Event::CData(cdata) => {
                if let (Some(field), Some(current)) = (target, entry.as_mut()) {
                    let slot = current.field_mut(field);
                    slot.push(' ');
                    slot.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"entry" => {
                    target = None;
                    if let Some(candidate) = entry.take().and_then(Entry::into_candidate) {
                        candidates.push(candidate);
                    }
                }
                b"id" | b"title" | b"summary" | b"published" => target = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(candidates)
}

#[async_trait]
impl LiteratureSearch for ArxivClient {
    async fn search(&self, query: &Query, max_results: usize) -> Result<Vec<Candidate>, StageError> {
        if query.terms.iter().all(|term| term.trim().is_empty()) {
            return Ok(Vec::new());
        }

        let url = self.search_url(query, max_results)?;
        self.pace().await;
        debug!(url = %url, "arxiv search");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(StageError::unavailable("arxiv", response.status()));
        }
        let feed = response.text().await?;
        let mut candidates = parse_feed(&feed)?;

        if let Some(after) = query.filters.published_after_date() {
            candidates.retain(|candidate| candidate.publication_date.map_or(true, |date| date >= after));
        }

        info!(query = %query.text(), results = candidates.len(), "arxiv search finished");
        Ok(candidates)
    }

    async fn fetch_document(&self, candidate: &Candidate) -> Result<Option<RawDocument>, StageError> {
        let Some(pdf_url) = candidate.pdf_url.as_deref() else {
            return Ok(None);
        };

        self.pace().await;
        let response = self.client.get(pdf_url).send().await?;
        if !response.status().is_success() {
            return Err(StageError::unavailable("arxiv", response.status()));
        }
        let bytes = response.bytes().await?;

        Ok(Some(RawDocument {
            identifier: candidate.identifier.clone(),
            media_type: MEDIA_PDF.to_string(),
            bytes: bytes.to_vec(),
        }))
    }
}
