//! SEC EDGAR filings client.
//!
//! Resolves tickers through the SEC master catalog, reads company metadata
//! and recent-filing indexes from the submissions API, and fetches filing
//! documents from the EDGAR archive. EDGAR requires every request to carry
//! a User-Agent with a contact address, so callers supply one per lookup.

pub mod text;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EdgarConfig;

/// SEC master ticker catalog.
pub const TICKER_CATALOG_URL: &str = "https://www.sec.gov/files/company_tickers.json";

const SUBMISSIONS_URL_BASE: &str = "https://data.sec.gov/submissions";
const ARCHIVES_URL_BASE: &str = "https://www.sec.gov/Archives/edgar/data";

/// Company-level metadata fields surfaced as the first context block.
const PRIMARY_METADATA_KEYS: [&str; 7] = [
    "name",
    "tickers",
    "exchanges",
    "sicDescription",
    "description",
    "website",
    "fiscalYearEnd",
];

/// Supplemental metadata fields surfaced as the second context block.
const SECONDARY_METADATA_KEYS: [&str; 6] = [
    "stateOfIncorporation",
    "stateOfIncorporationDescription",
    "insiderTransactionForOwnerExists",
    "insiderTransactionForIssuerExists",
    "category",
    "addresses",
];

/// Errors from the EDGAR pipeline.
#[derive(Error, Debug)]
pub enum EdgarError {
    #[error("SEC EDGAR requires a User-Agent with a contact email (e.g., 'YourApp/1.0 (you@example.com)')")]
    MissingContactEmail,

    #[error("Ticker not found")]
    TickerNotFound { ticker: String },

    #[error("No filing found for form '{form}' for ticker '{ticker}'.")]
    FormNotAvailable { form: FormType, ticker: String },

    #[error("cursor out of range. Valid range: 0..{max_cursor}")]
    CursorOutOfRange { cursor: i64, max_cursor: usize },

    #[error("unknown form type '{0}'")]
    UnknownForm(String),

    #[error("FetchError: {0}")]
    FetchError(String),

    #[error("NetworkError: {0}")]
    Network(#[from] reqwest::Error),

    #[error("DecodeError: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Form types served by the latest-filings lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormType {
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
    #[serde(rename = "8-K")]
    EightK,
    #[serde(rename = "S-1")]
    S1,
    #[serde(rename = "S-3")]
    S3,
    #[serde(rename = "DEF 14A")]
    Def14A,
    #[serde(rename = "20-F")]
    TwentyF,
    #[serde(rename = "6-K")]
    SixK,
    #[serde(rename = "4")]
    Form4,
    #[serde(rename = "13D")]
    ThirteenD,
    #[serde(rename = "13G")]
    ThirteenG,
}

impl FormType {
    /// All supported forms, in lookup priority order.
    pub const ALL: [FormType; 11] = [
        FormType::TenK,
        FormType::TenQ,
        FormType::EightK,
        FormType::S1,
        FormType::S3,
        FormType::Def14A,
        FormType::TwentyF,
        FormType::SixK,
        FormType::Form4,
        FormType::ThirteenD,
        FormType::ThirteenG,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::TenK => "10-K",
            FormType::TenQ => "10-Q",
            FormType::EightK => "8-K",
            FormType::S1 => "S-1",
            FormType::S3 => "S-3",
            FormType::Def14A => "DEF 14A",
            FormType::TwentyF => "20-F",
            FormType::SixK => "6-K",
            FormType::Form4 => "4",
            FormType::ThirteenD => "13D",
            FormType::ThirteenG => "13G",
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FormType {
    type Err = EdgarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        FormType::ALL
            .into_iter()
            .find(|form| form.as_str() == normalized)
            .ok_or_else(|| EdgarError::UnknownForm(s.to_string()))
    }
}

/// One row of the SEC master ticker catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickerRecord {
    #[serde(rename = "cik_str")]
    pub cik: u64,
    pub ticker: String,
    pub title: String,
}

impl TickerRecord {
    /// CIK zero-padded to the 10 digits the submissions endpoint expects.
    pub fn padded_cik(&self) -> String {
        format!("{:010}", self.cik)
    }
}

/// Parallel arrays of the most recent filings, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFilings {
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub report_date: Vec<String>,
    #[serde(default)]
    pub form: Vec<String>,
    #[serde(default)]
    pub primary_document: Vec<String>,
}

/// Company metadata and the recent-filings block from the submissions API.
#[derive(Debug, Clone)]
pub struct CompanySubmissions {
    pub primary_metadata: Map<String, Value>,
    pub secondary_metadata: Map<String, Value>,
    pub recent: RecentFilings,
}

impl CompanySubmissions {
    /// Split a submissions document into metadata subsets and the recent
    /// arrays. Metadata values that are null or empty read as "N/A".
    pub fn from_document(doc: &Value) -> Result<Self, EdgarError> {
        let recent = match doc.pointer("/filings/recent") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => RecentFilings::default(),
        };
        Ok(Self {
            primary_metadata: metadata_subset(doc, &PRIMARY_METADATA_KEYS),
            secondary_metadata: metadata_subset(doc, &SECONDARY_METADATA_KEYS),
            recent,
        })
    }

    /// Index of the most recent filing for each supported form type. The
    /// recent arrays are newest first, so the first match wins.
    pub fn latest_filing_index(&self) -> HashMap<FormType, usize> {
        let mut mapping = HashMap::new();
        for form in FormType::ALL {
            if let Some(index) = self.recent.form.iter().position(|f| f == form.as_str()) {
                mapping.insert(form, index);
            }
        }
        mapping
    }

    /// The most recent filing of one form type, if the company has any.
    pub fn latest_filing(&self, form: FormType, padded_cik: &str) -> Option<FilingRecord> {
        let index = self.recent.form.iter().position(|f| f == form.as_str())?;
        self.filing_at(form, index, padded_cik)
    }

    /// The most recent filing record for every supported form type, in
    /// catalog order.
    pub fn latest_filings(&self, padded_cik: &str) -> Vec<FilingRecord> {
        let mapping = self.latest_filing_index();
        FormType::ALL
            .into_iter()
            .filter_map(|form| {
                mapping
                    .get(&form)
                    .and_then(|&index| self.filing_at(form, index, padded_cik))
            })
            .collect()
    }

    fn filing_at(&self, form: FormType, index: usize, padded_cik: &str) -> Option<FilingRecord> {
        Some(FilingRecord {
            accession_number: self.recent.accession_number.get(index)?.replace('-', ""),
            report_date: self
                .recent
                .report_date
                .get(index)
                .cloned()
                .unwrap_or_default(),
            form,
            primary_document: self.recent.primary_document.get(index)?.clone(),
            cik: padded_cik.to_string(),
        })
    }
}

/// One filing, addressed the way the EDGAR archive lays documents out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilingRecord {
    /// Accession number with dashes stripped, as archive paths use it.
    pub accession_number: String,
    pub report_date: String,
    pub form: FormType,
    /// Primary document filename inside the filing directory.
    pub primary_document: String,
    /// Zero-padded company CIK.
    pub cik: String,
}

impl FilingRecord {
    /// Archive URL of the primary document. The directory component uses
    /// the CIK without leading zeros.
    pub fn document_url(&self) -> String {
        let cik = self.cik.trim_start_matches('0');
        let cik = if cik.is_empty() { "0" } else { cik };
        format!(
            "{}/{}/{}/{}",
            ARCHIVES_URL_BASE, cik, self.accession_number, self.primary_document
        )
    }
}

/// A fully processed filing: identity, company metadata, and text chunks.
#[derive(Debug, Clone)]
pub struct FilingChunks {
    pub cik: String,
    pub record: FilingRecord,
    pub primary_metadata: Map<String, Value>,
    pub secondary_metadata: Map<String, Value>,
    pub chunks: Vec<String>,
}

impl FilingChunks {
    /// Highest valid cursor value.
    pub fn max_cursor(&self) -> usize {
        self.chunks.len().saturating_sub(1)
    }

    /// Select one chunk by cursor position.
    pub fn chunk(&self, cursor: i64) -> Result<&str, EdgarError> {
        let max_cursor = self.max_cursor();
        if self.chunks.is_empty() || cursor < 0 || cursor as usize > max_cursor {
            return Err(EdgarError::CursorOutOfRange { cursor, max_cursor });
        }
        Ok(&self.chunks[cursor as usize])
    }

    /// Render the lookup response payload for one cursor position.
    pub fn to_response(&self, cursor: i64) -> Result<Value, EdgarError> {
        let chunk = self.chunk(cursor)?;
        let mut payload = Map::new();
        payload.insert("company_cik".to_string(), Value::String(self.cik.clone()));
        payload.insert(
            "filing_accession".to_string(),
            Value::String(self.record.accession_number.clone()),
        );
        payload.insert(
            "filing_report_date".to_string(),
            Value::String(self.record.report_date.clone()),
        );
        payload.insert(
            "filing_form".to_string(),
            Value::String(self.record.form.to_string()),
        );
        payload.insert(
            "company_context_1".to_string(),
            Value::Object(self.primary_metadata.clone()),
        );
        payload.insert(
            "company_context_2".to_string(),
            Value::Object(self.secondary_metadata.clone()),
        );
        payload.insert(
            "filing_filename".to_string(),
            Value::String(self.record.primary_document.clone()),
        );
        payload.insert(
            "max_cursor".to_string(),
            Value::from(self.max_cursor() as u64),
        );
        payload.insert(
            format!("filing_chunk_{}", cursor),
            Value::String(chunk.to_string()),
        );
        Ok(Value::Object(payload))
    }
}

/// Validate a caller-supplied User-Agent before any network call. EDGAR
/// rejects requests without a contact address.
pub fn validate_user_agent(user_agent: &str) -> Result<String, EdgarError> {
    let ua = user_agent.trim();
    if !ua.contains('@') {
        return Err(EdgarError::MissingContactEmail);
    }
    Ok(ua.to_string())
}

fn find_ticker(
    catalog: HashMap<String, TickerRecord>,
    ticker: &str,
) -> Result<TickerRecord, EdgarError> {
    let wanted = ticker.trim().to_uppercase();
    catalog
        .into_values()
        .find(|record| record.ticker.to_uppercase() == wanted)
        .ok_or_else(|| EdgarError::TickerNotFound {
            ticker: ticker.to_string(),
        })
}

/// Replace values Python-falsy style: null, empty strings, empty
/// collections, zero, and false all read as "N/A".
fn fill_empty(value: Value) -> Value {
    let empty = match &value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    };
    if empty {
        Value::String("N/A".to_string())
    } else {
        value
    }
}

fn metadata_subset(doc: &Value, keys: &[&str]) -> Map<String, Value> {
    let mut subset = Map::new();
    for key in keys {
        if let Some(value) = doc.get(*key) {
            subset.insert((*key).to_string(), fill_empty(value.clone()));
        }
    }
    subset
}

/// Client for the SEC EDGAR public endpoints.
#[derive(Clone)]
pub struct EdgarClient {
    http_client: reqwest::Client,
    max_retries: u32,
    backoff_ms: u64,
    fetch_concurrency: usize,
}

impl EdgarClient {
    pub fn new(config: &EdgarConfig) -> Result<Self, EdgarError> {
        let http_client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http_client,
            max_retries: config.max_retries,
            backoff_ms: config.backoff_ms,
            fetch_concurrency: config.fetch_concurrency,
        })
    }

    /// Fetch a URL with retry logic and exponential backoff, carrying the
    /// caller's User-Agent.
    async fn fetch_bytes(&self, url: &str, user_agent: &str) -> Result<Vec<u8>, EdgarError> {
        let mut last_error: Option<EdgarError> = None;

        for attempt in 0..self.max_retries {
            match self
                .http_client
                .get(url)
                .header(reqwest::header::USER_AGENT, user_agent)
                .send()
                .await
            {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => match response.bytes().await {
                        Ok(body) => return Ok(body.to_vec()),
                        Err(e) => last_error = Some(e.into()),
                    },
                    Err(e) => last_error = Some(e.into()),
                },
                Err(e) => last_error = Some(e.into()),
            }

            // If not the last attempt, wait with exponential backoff
            if attempt < self.max_retries - 1 {
                let backoff_ms = self.backoff_ms * (1 << attempt);
                warn!(
                    "fetch failed for {} (attempt {}/{}), retrying in {}ms: {:?}",
                    url,
                    attempt + 1,
                    self.max_retries,
                    backoff_ms,
                    last_error
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            EdgarError::FetchError(format!(
                "fetch failed for {} after {} attempts",
                url, self.max_retries
            ))
        }))
    }

    /// Look up a company in the SEC master ticker catalog. The match is
    /// case-insensitive.
    pub async fn cik_by_ticker(
        &self,
        ticker: &str,
        user_agent: &str,
    ) -> Result<TickerRecord, EdgarError> {
        let body = self.fetch_bytes(TICKER_CATALOG_URL, user_agent).await?;
        let catalog: HashMap<String, TickerRecord> = serde_json::from_slice(&body)?;
        find_ticker(catalog, ticker)
    }

    /// Fetch company metadata and the recent-filings block.
    pub async fn company_submissions(
        &self,
        padded_cik: &str,
        user_agent: &str,
    ) -> Result<CompanySubmissions, EdgarError> {
        let url = format!("{}/CIK{}.json", SUBMISSIONS_URL_BASE, padded_cik);
        let body = self.fetch_bytes(&url, user_agent).await?;
        let doc: Value = serde_json::from_slice(&body)?;
        CompanySubmissions::from_document(&doc)
    }

    /// Fetch the primary document of one filing.
    pub async fn fetch_filing(
        &self,
        record: &FilingRecord,
        user_agent: &str,
    ) -> Result<Vec<u8>, EdgarError> {
        self.fetch_bytes(&record.document_url(), user_agent).await
    }

    /// Fetch several filing documents with bounded concurrency. Results come
    /// back in the order of the input records.
    pub async fn fetch_filings(
        &self,
        records: &[FilingRecord],
        user_agent: &str,
    ) -> Vec<Result<Vec<u8>, EdgarError>> {
        futures::stream::iter(
            records
                .iter()
                .map(|record| self.fetch_filing(record, user_agent)),
        )
        .buffered(self.fetch_concurrency)
        .collect()
        .await
    }

    /// Run the full latest-filing lookup: resolve the ticker, pick the most
    /// recent filing of the requested form, fetch it, convert it to text,
    /// and slice it into chunks.
    pub async fn latest_filing_chunks(
        &self,
        ticker: &str,
        form: FormType,
        user_agent: &str,
        chunk_size: usize,
    ) -> Result<FilingChunks, EdgarError> {
        let ua = validate_user_agent(user_agent)?;

        let company = self.cik_by_ticker(ticker, &ua).await?;
        let cik = company.padded_cik();
        let submissions = self.company_submissions(&cik, &ua).await?;
        let record = submissions.latest_filing(form, &cik).ok_or_else(|| {
            EdgarError::FormNotAvailable {
                form,
                ticker: ticker.to_string(),
            }
        })?;

        let raw = self.fetch_filing(&record, &ua).await?;
        info!(
            "fetched {} {} for {} ({} bytes)",
            record.form, record.accession_number, company.ticker, raw.len()
        );

        let converted = text::html_to_text(&raw);
        let chunks = text::chunk_text(&converted, chunk_size);

        Ok(FilingChunks {
            cik,
            record,
            primary_metadata: submissions.primary_metadata,
            secondary_metadata: submissions.secondary_metadata,
            chunks,
        })
    }

    /// Fetch and chunk the latest filing of every catalog form the company
    /// has filed, in catalog order. Documents come down with bounded
    /// concurrency.
    pub async fn latest_filings_all(
        &self,
        ticker: &str,
        user_agent: &str,
        chunk_size: usize,
    ) -> Result<Vec<FilingChunks>, EdgarError> {
        let ua = validate_user_agent(user_agent)?;

        let company = self.cik_by_ticker(ticker, &ua).await?;
        let cik = company.padded_cik();
        let submissions = self.company_submissions(&cik, &ua).await?;
        let records = submissions.latest_filings(&cik);

        let documents = self.fetch_filings(&records, &ua).await;
        let mut filings = Vec::with_capacity(records.len());
        for (record, document) in records.into_iter().zip(documents) {
            let converted = text::html_to_text(&document?);
            let chunks = text::chunk_text(&converted, chunk_size);
            filings.push(FilingChunks {
                cik: cik.clone(),
                record,
                primary_metadata: submissions.primary_metadata.clone(),
                secondary_metadata: submissions.secondary_metadata.clone(),
                chunks,
            });
        }
        info!(
            "fetched {} latest filings for {}",
            filings.len(),
            company.ticker
        );
        Ok(filings)
    }
}
