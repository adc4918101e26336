/*!
# Overview

[google-oauth2-server][crate] is a self-hostable API-key portal in front of the
SEC EDGAR filings archive. Users sign in with Google, mint `sk_mcp_` API keys in
a small browser portal, and call the `/filings/latest` endpoint with those keys
to read the latest filing of any listed company as chunked plain text.

This crate provides the client SDK for a running server. The server itself, the
SQLite key store, and the command-line interface are behind the `cli` feature
(enabled by default).

# Examples

## Using Iterator

The recommended way to read a whole filing is the built-in iterator. The
[FilingChunkIterator] walks the chunk cursor one page at a time until the server
reports no more pages, so callers never deal with `max_cursor` themselves.

```no_run
use google_oauth2_server::GoogleOauth2Server;

let client = GoogleOauth2Server::new()
    .api_key("sk_mcp_0123456789abcdef")
    .ticker("AAPL")
    .form("10-K")
    .user_agent("ExampleApp/1.0 (contact@example.com)");

// method 1: create iterator from reference (so that you can reuse the client)
for chunk in &client {
    println!("{}", chunk);
}

// method 2: create iterator from the client object (taking ownership)
let chunks = client.into_iter().collect::<Vec<String>>();
```

## Making Individual Queries

Each page of a filing can also be fetched on its own with
[GoogleOauth2Server::latest_filing], which returns the chunk at the current
cursor together with the filing metadata and company profile.

```no_run
use google_oauth2_server::GoogleOauth2Server;

let mut client = GoogleOauth2Server::new()
    .api_key("sk_mcp_0123456789abcdef")
    .ticker("MSFT")
    .form("DEF 14A")
    .user_agent("ExampleApp/1.0 (contact@example.com)");

let page = client.latest_filing().unwrap();
println!(
    "{} filed {} with {} chunk pages",
    page.filing_form,
    page.filing_report_date,
    page.max_cursor + 1
);

client.turn_page(1);
let page = client.latest_filing().unwrap();
println!("{}", page.chunk(1).unwrap_or_default());
```

## Checking Server Health

```no_run
use google_oauth2_server::GoogleOauth2Server;

let client = GoogleOauth2Server::new().server_url("http://localhost:8000");
assert!(client.health_check().is_ok());
```
*/

#[cfg(feature = "cli")]
mod api;
pub mod config;
#[cfg(feature = "cli")]
mod edgar;
mod error;
#[cfg(feature = "backend")]
mod keystore;
#[cfg(feature = "cli")]
mod oauth;
#[cfg(feature = "cli")]
mod session;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Display;

#[cfg(feature = "cli")]
pub use crate::api::{build_router, start_api_service, AppState};
#[cfg(feature = "cli")]
pub use crate::edgar::{EdgarClient, EdgarError, FilingChunks, FilingRecord, FormType};
pub use crate::error::ServerError;
#[cfg(feature = "backend")]
pub use crate::keystore::{ApiKey, KeyStore};
#[cfg(feature = "cli")]
pub use crate::oauth::GoogleOauth;

/// Query parameters for the latest-filings endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingParams {
    /// Stock ticker symbol, case-insensitive (e.g. `AAPL`).
    pub ticker: String,
    /// Form type to look up (e.g. `10-K`, `10-Q`, `8-K`, `DEF 14A`).
    pub form: String,
    /// Chunk cursor, starting from 0.
    pub cursor: u64,
    /// Contact identification forwarded to SEC EDGAR. Must contain an email
    /// address, e.g. `ExampleApp/1.0 (you@example.com)`.
    pub user_agent: String,
}

impl Default for FilingParams {
    fn default() -> Self {
        FilingParams {
            ticker: "".to_string(),
            form: "10-K".to_string(),
            cursor: 0,
            user_agent: "".to_string(),
        }
    }
}

/// One page of a filing, as served by the `/filings/latest` endpoint.
///
/// Every page repeats the filing metadata and the company profile; the text
/// chunk itself is keyed by the cursor it was requested with and is read with
/// [FilingPage::chunk].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingPage {
    /// Zero-padded CIK of the company.
    pub company_cik: String,
    /// Accession number of the filing, without dashes.
    pub filing_accession: String,
    /// Report date from the EDGAR submissions index.
    pub filing_report_date: String,
    /// Form type of the filing.
    pub filing_form: String,
    /// Core company profile fields (name, tickers, exchanges, ...).
    pub company_context_1: Map<String, Value>,
    /// Supplementary company profile fields.
    pub company_context_2: Map<String, Value>,
    /// Primary document filename inside the filing archive.
    pub filing_filename: String,
    /// Highest valid chunk cursor for this filing.
    pub max_cursor: u64,
    #[serde(flatten)]
    chunks: HashMap<String, String>,
}

impl FilingPage {
    /// Text chunk at the given cursor, if this page carries it.
    pub fn chunk(&self, cursor: u64) -> Option<&str> {
        self.chunks
            .get(&format!("filing_chunk_{}", cursor))
            .map(String::as_str)
    }
}

/// GoogleOauth2Server struct maintains the server URL, the API key, and the
/// filing query parameters, and handles making API queries.
///
/// See [module doc][crate#examples] for usage examples.
#[derive(Clone)]
pub struct GoogleOauth2Server {
    pub server_url: String,
    pub api_key: Option<String>,
    pub query_params: FilingParams,
    client: reqwest::blocking::Client,
}

impl Default for GoogleOauth2Server {
    fn default() -> Self {
        let url = match std::env::var("GOOGLE_OAUTH2_SERVER_URL") {
            Ok(url) => url.trim_end_matches('/').to_string(),
            Err(_) => "http://localhost:8000".to_string(),
        };
        Self {
            server_url: url,
            api_key: None,
            query_params: Default::default(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl GoogleOauth2Server {
    /// Construct new GoogleOauth2Server client.
    ///
    /// The URL and query parameters can be adjusted with other functions.
    ///
    /// # Examples
    /// ```
    /// use google_oauth2_server::GoogleOauth2Server;
    /// let client = GoogleOauth2Server::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure server URL.
    ///
    /// You can change the default server URL to point to your own deployment.
    /// You can also change the URL by setting environment variable
    /// `GOOGLE_OAUTH2_SERVER_URL`.
    ///
    /// # Examples
    /// ```
    /// let client = google_oauth2_server::GoogleOauth2Server::new()
    ///     .server_url("https://filings.example.com");
    /// ```
    pub fn server_url<S: Display>(self, url: S) -> Self {
        let server_url = url.to_string().trim_end_matches('/').to_string();
        Self {
            server_url,
            api_key: self.api_key,
            query_params: self.query_params,
            client: self.client,
        }
    }

    /// Set the API key sent as a bearer token with every filings query.
    ///
    /// Keys are minted in the server's browser portal and start with `sk_mcp_`.
    ///
    /// # Examples
    /// ```
    /// let client = google_oauth2_server::GoogleOauth2Server::new()
    ///     .api_key("sk_mcp_0123456789abcdef");
    /// ```
    pub fn api_key<S: Display>(self, api_key: S) -> Self {
        Self {
            server_url: self.server_url,
            api_key: Some(api_key.to_string()),
            query_params: self.query_params,
            client: self.client,
        }
    }

    pub fn disable_ssl_check(self) -> Self {
        Self {
            server_url: self.server_url,
            api_key: self.api_key,
            query_params: self.query_params,
            client: reqwest::blocking::ClientBuilder::new()
                .danger_accept_invalid_certs(true)
                .build()
                .unwrap(),
        }
    }

    /// Set the ticker symbol to look up.
    ///
    /// # Examples
    /// ```
    /// let client = google_oauth2_server::GoogleOauth2Server::new()
    ///     .ticker("AAPL");
    /// ```
    pub fn ticker<S: Display>(self, ticker: S) -> Self {
        let mut query_params = self.query_params;
        query_params.ticker = ticker.to_string();
        Self {
            server_url: self.server_url,
            api_key: self.api_key,
            query_params,
            client: self.client,
        }
    }

    /// Set the form type to look up. Defaults to `10-K`.
    ///
    /// # Examples
    /// ```
    /// let client = google_oauth2_server::GoogleOauth2Server::new()
    ///     .form("DEF 14A");
    /// ```
    pub fn form<S: Display>(self, form: S) -> Self {
        let mut query_params = self.query_params;
        query_params.form = form.to_string();
        Self {
            server_url: self.server_url,
            client: self.client,
            api_key: self.api_key,
            query_params,
        }
    }

    /// Set the chunk cursor for the next query. Defaults to 0.
    ///
    /// # Examples
    /// ```
    /// let client = google_oauth2_server::GoogleOauth2Server::new()
    ///     .cursor(2);
    /// ```
    pub fn cursor(self, cursor: u64) -> Self {
        let mut query_params = self.query_params;
        query_params.cursor = cursor;
        Self {
            server_url: self.server_url,
            client: self.client,
            api_key: self.api_key,
            query_params,
        }
    }

    /// Set the User-Agent forwarded to SEC EDGAR.
    ///
    /// EDGAR rejects anonymous traffic, so the value must carry a contact
    /// email address. The server checks this before resolving the ticker.
    ///
    /// # Examples
    /// ```
    /// let client = google_oauth2_server::GoogleOauth2Server::new()
    ///     .user_agent("ExampleApp/1.0 (contact@example.com)");
    /// ```
    pub fn user_agent<S: Display>(self, user_agent: S) -> Self {
        let mut query_params = self.query_params;
        query_params.user_agent = user_agent.to_string();
        Self {
            server_url: self.server_url,
            api_key: self.api_key,
            query_params,
            client: self.client,
        }
    }

    /// Jump to the given chunk cursor, starting from 0.
    pub fn turn_page(&mut self, cursor: u64) {
        self.query_params.cursor = cursor;
    }

    /// Check the health of the server.
    ///
    /// # Examples
    /// ```no_run
    /// let client = google_oauth2_server::GoogleOauth2Server::new();
    /// assert!(client.health_check().is_ok());
    /// ```
    pub fn health_check(&self) -> Result<(), ServerError> {
        let url = format!("{}/health", &self.server_url);
        match self.client.get(url.as_str()).send() {
            Ok(response) => {
                if response.status() == reqwest::StatusCode::OK {
                    Ok(())
                } else {
                    Err(ServerError::ApiError(format!(
                        "endpoint unhealthy {}",
                        self.server_url
                    )))
                }
            }
            Err(_e) => Err(ServerError::ApiError(format!(
                "endpoint unhealthy {}",
                self.server_url
            ))),
        }
    }

    /// Fetch the page of the latest filing at the current cursor.
    ///
    /// # Examples
    /// ```no_run
    /// let client = google_oauth2_server::GoogleOauth2Server::new()
    ///     .api_key("sk_mcp_0123456789abcdef")
    ///     .ticker("AAPL")
    ///     .user_agent("ExampleApp/1.0 (contact@example.com)");
    /// let page = client.latest_filing().unwrap();
    /// println!("{}", page.chunk(0).unwrap_or_default());
    /// ```
    pub fn latest_filing(&self) -> Result<FilingPage, ServerError> {
        let url = self.query_url(&self.query_params)?;
        self.run_query(url)
    }

    /// Fetch **all** chunks of the latest filing, from the current cursor to
    /// the last page.
    ///
    /// This is usually what one needs.
    ///
    /// # Examples
    /// ```no_run
    /// let client = google_oauth2_server::GoogleOauth2Server::new()
    ///     .api_key("sk_mcp_0123456789abcdef")
    ///     .ticker("AAPL")
    ///     .form("10-Q")
    ///     .user_agent("ExampleApp/1.0 (contact@example.com)");
    /// let text = client.chunks().unwrap().join("\n");
    /// ```
    pub fn chunks(&self) -> Result<Vec<String>, ServerError> {
        let mut params = self.query_params.clone();

        let mut collected = vec![];
        loop {
            let url = self.query_url(&params)?;
            let page: FilingPage = self.run_query(url)?;
            match page.chunk(params.cursor) {
                Some(chunk) => collected.push(chunk.to_string()),
                None => break,
            }
            if params.cursor >= page.max_cursor {
                // reaches the end
                break;
            }
            params.cursor += 1;
        }
        Ok(collected)
    }

    fn query_url(&self, params: &FilingParams) -> Result<reqwest::Url, ServerError> {
        let cursor = params.cursor.to_string();
        reqwest::Url::parse_with_params(
            format!("{}/filings/latest", &self.server_url).as_str(),
            &[
                ("ticker", params.ticker.as_str()),
                ("form", params.form.as_str()),
                ("cursor", cursor.as_str()),
                ("user_agent", params.user_agent.as_str()),
            ],
        )
        .map_err(|e| ServerError::ConfigError(format!("invalid server url: {}", e)))
    }

    fn run_query<T: serde::de::DeserializeOwned>(
        &self,
        url: reqwest::Url,
    ) -> Result<T, ServerError> {
        log::info!("sending filings query to {}", &url);
        let mut request = self.client.get(url);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        match request.send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.json::<T>() {
                        Ok(page) => Ok(page),
                        Err(e) => {
                            // json decoding error. most likely the response is
                            // missing the chunk payload fields.
                            Err(ServerError::ApiError(e.to_string()))
                        }
                    }
                } else {
                    // error responses carry a JSON body with an `error` field
                    let message = match response.json::<Value>() {
                        Ok(body) => body
                            .get("error")
                            .and_then(|e| e.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("query failed with status {}", status)),
                        Err(_) => format!("query failed with status {}", status),
                    };
                    Err(ServerError::ApiError(message))
                }
            }
            Err(e) => Err(ServerError::from(e)),
        }
    }
}

/// Iterator that reads a filing one text chunk at a time.
///
/// The [IntoIterator] trait is implemented for both the struct and the
/// reference, so you can either iterate through chunks by taking the ownership
/// of the client, or use a reference to the client to iterate.
///
/// ```no_run
/// use google_oauth2_server::GoogleOauth2Server;
///
/// let client = GoogleOauth2Server::new()
///     .api_key("sk_mcp_0123456789abcdef")
///     .ticker("AAPL")
///     .form("8-K")
///     .user_agent("ExampleApp/1.0 (contact@example.com)");
///
/// // create iterator from reference (so that you can reuse the client)
/// for chunk in &client {
///     println!("{}", chunk);
/// }
///
/// // create iterator from the client object (taking ownership)
/// let chunks = client.into_iter().collect::<Vec<String>>();
/// ```
pub struct FilingChunkIterator {
    client: GoogleOauth2Server,
    max_cursor: Option<u64>,
    first_run: bool,
}

impl FilingChunkIterator {
    pub fn new(client: GoogleOauth2Server) -> FilingChunkIterator {
        FilingChunkIterator {
            client,
            max_cursor: None,
            first_run: true,
        }
    }
}

impl Iterator for FilingChunkIterator {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first_run {
            // if it's the first time running, query at the starting cursor.
            self.first_run = false;
        } else {
            // advance the cursor, stopping at the last page the server reported.
            let next_cursor = self.client.query_params.cursor + 1;
            match self.max_cursor {
                Some(max_cursor) if next_cursor > max_cursor => return None,
                _ => self.client.query_params.cursor = next_cursor,
            }
        }

        let page = match self.client.latest_filing() {
            Ok(page) => page,
            Err(_) => return None,
        };
        self.max_cursor = Some(page.max_cursor);
        page.chunk(self.client.query_params.cursor)
            .map(str::to_string)
    }
}

impl IntoIterator for GoogleOauth2Server {
    type Item = String;
    type IntoIter = FilingChunkIterator;

    fn into_iter(self) -> Self::IntoIter {
        FilingChunkIterator::new(self)
    }
}

impl IntoIterator for &GoogleOauth2Server {
    type Item = String;
    type IntoIter = FilingChunkIterator;

    fn into_iter(self) -> Self::IntoIter {
        FilingChunkIterator::new(self.clone())
    }
}
