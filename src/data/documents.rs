//! Document retrieval seam and the fact ingestion loop
//!
//! Downloading, unpacking and parsing filings happens outside this crate.
//! A [`DocumentSource`] hands over already-tagged facts per document and
//! [`ingest_documents`] stores them, one transaction per document.

use super::store::insert_facts;
use crate::error::Result;
use crate::types::{DocId, EdinetCode, TaggedFact};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Listing entry for one filed document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub doc_id: DocId,
    pub edinet_code: Option<EdinetCode>,
    pub doc_type_code: Option<String>,
    pub submit_date_time: Option<String>,
}

/// Document-retrieval collaborator
pub trait DocumentSource {
    /// Documents filed between `start` and `end`, inclusive
    fn list_documents(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DocumentMeta>>;

    /// Tagged facts contained in one document
    fn fetch_document(&self, doc_id: &str) -> Result<Vec<TaggedFact>>;
}

/// Outcome of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub listed: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failed: Vec<DocId>,
    pub facts: usize,
}

/// Fetch every listed document and append its facts to `table`
///
/// `doc_type_code` restricts ingestion to one document type (e.g. `"120"`,
/// annual securities reports). A document that fails to fetch or store is
/// logged and skipped.
pub fn ingest_documents(
    source: &dyn DocumentSource,
    conn: &Connection,
    table: &str,
    start: NaiveDate,
    end: NaiveDate,
    doc_type_code: Option<&str>,
) -> Result<IngestReport> {
    let documents = source.list_documents(start, end)?;
    let mut report = IngestReport {
        listed: documents.len(),
        ..Default::default()
    };
    log::info!("Listed {} documents between {} and {}", documents.len(), start, end);

    for doc in &documents {
        if let Some(wanted) = doc_type_code {
            if doc.doc_type_code.as_deref() != Some(wanted) {
                report.skipped += 1;
                continue;
            }
        }

        let stored = source
            .fetch_document(&doc.doc_id)
            .and_then(|facts| insert_facts(conn, table, &facts));
        match stored {
            Ok(count) => {
                log::debug!("Stored {} facts from {}", count, doc.doc_id);
                report.ingested += 1;
                report.facts += count;
            }
            Err(e) => {
                log::warn!("Skipping document {}: {}", doc.doc_id, e);
                report.failed.push(doc.doc_id.clone());
            }
        }
    }

    log::info!(
        "Ingested {} documents ({} facts), {} failed",
        report.ingested,
        report.facts,
        report.failed.len()
    );
    Ok(report)
}
