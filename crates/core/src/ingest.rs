use crate::error::IndexError;
use crate::extractor::{media_type_for_path, RawDocument, StructuredText};
use crate::models::EvidenceDocument;
use crate::traits::{DocumentConverter, EvidenceStore};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const ABSTRACT_CHARS: usize = 2_000;

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| media_type_for_path(entry.path()).is_some())
        .map(|entry| entry.path().to_path_buf())
        .collect::<Vec<_>>();

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable identifier derived from the path, so re-indexing a file replaces
/// its entry.
pub fn local_document_id(path: &Path) -> String {
    let digest = digest_bytes(path.to_string_lossy().as_bytes());
    format!("local:{}", &digest[..16])
}

#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub path: PathBuf,
    pub document_id: String,
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub indexed: Vec<IndexedFile>,
    pub skipped: Vec<SkippedFile>,
    pub finished_at: DateTime<Utc>,
}

fn evidence_document(path: &Path, document_id: String, structured: &StructuredText) -> Result<EvidenceDocument, IndexError> {
    let file_name = path
        .file_stem()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IndexError::MissingFileName(path.display().to_string()))?;

    let abstract_section = structured
        .sections
        .iter()
        .find(|section| section.heading.eq_ignore_ascii_case("abstract"))
        .or_else(|| structured.sections.first());

    Ok(EvidenceDocument {
        identifier: document_id,
        title: structured.first_heading().unwrap_or(file_name).to_string(),
        abstract_text: abstract_section
            .map(|section| crate::chunking::normalize_whitespace(&section.body).chars().take(ABSTRACT_CHARS).collect())
            .unwrap_or_default(),
        publication_date: None,
        pdf_url: None,
    })
}

/// Converts every supported file under `folder` and indexes it as evidence.
/// Files that cannot be read or converted are skipped and reported; a failing
/// store aborts the run.
pub async fn index_folder<C, S>(folder: &Path, converter: &C, store: &S) -> Result<IndexReport, IndexError>
where
    C: DocumentConverter + ?Sized,
    S: EvidenceStore + ?Sized,
{
    if !folder.is_dir() {
        return Err(IndexError::InvalidArgument(format!("{} is not a directory", folder.display())));
    }

    let files = discover_documents(folder);
    if files.is_empty() {
        return Err(IndexError::InvalidArgument(format!(
            "no pdf, markdown or text files found in {}",
            folder.display()
        )));
    }

    let mut indexed = Vec::new();
    let mut skipped = Vec::new();

    for path in files {
        let prepared = async {
            let bytes = tokio::fs::read(&path).await?;
            let checksum = digest_bytes(&bytes);
            let document_id = local_document_id(&path);
            let raw = RawDocument {
                identifier: document_id.clone(),
                media_type: media_type_for_path(&path).unwrap_or_default().to_string(),
                bytes,
            };
            let structured = converter
                .convert(&raw)
                .map_err(|error| IndexError::InvalidArgument(error.to_string()))?;
            let document = evidence_document(&path, document_id.clone(), &structured)?;
            Ok::<_, IndexError>((document, IndexedFile {
                path: path.clone(),
                document_id,
                checksum,
            }))
        }
        .await;

        match prepared {
            Ok((document, file)) => {
                store.embed_and_index(&document).await?;
                indexed.push(file);
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping file");
                skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(indexed = indexed.len(), skipped = skipped.len(), "folder indexed");
    Ok(IndexReport {
        indexed,
        skipped,
        finished_at: Utc::now(),
    })
}
