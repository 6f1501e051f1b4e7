//! Defines the raw CMS wire types ([`Record`], [`ApiPage`]) and the
//! [`CmsClient`] which implements the read-only query contract the site
//! depends on: a page of documents by type, a follow-up page by cursor, and a
//! single document by its `uid`.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use log::debug;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::pagination::PageSource;

/// The page size used when enumerating every document of a type.
const ENUMERATION_PAGE_SIZE: usize = 100;

const ACCESS_TOKEN_PARAM: &str = "access_token";

/// A document as returned by the CMS. Only the fields the site reads are
/// modeled; `data` is left as free-form JSON so that a single malformed
/// document can be rejected by the projector without failing the whole page.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Record {
    #[serde(default)]
    pub uid: Option<String>,

    #[serde(default)]
    pub first_publication_date: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,
}

/// One page of query results. `next_page` is the cursor (a URL) for the
/// following page, absent on the last page.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ApiPage {
    #[serde(default)]
    pub results: Vec<Record>,

    #[serde(default)]
    pub next_page: Option<String>,
}

#[derive(Deserialize)]
struct ApiEntry {
    refs: Vec<ApiRef>,
}

#[derive(Deserialize)]
struct ApiRef {
    #[serde(rename = "ref")]
    reference: String,

    #[serde(default, rename = "isMasterRef")]
    is_master_ref: bool,
}

/// HTTP client for the CMS repository API.
#[derive(Clone)]
pub struct CmsClient {
    client: Client,

    /// The API entry point, always with a trailing slash so that
    /// [`Url::join`] resolves `documents/search` beneath it rather than
    /// beside it.
    endpoint: Url,

    access_token: Option<String>,
}

impl CmsClient {
    /// Constructs a client for the repository at `endpoint` (e.g.,
    /// `https://my-blog.cdn.prismic.io/api/v2`). Every request is bounded by
    /// `timeout`.
    pub fn new(endpoint: Url, access_token: Option<String>, timeout: Duration) -> Result<CmsClient> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(CmsClient {
            client,
            endpoint: with_trailing_slash(endpoint),
            access_token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetches the first page of documents of `document_type`, newest first.
    pub async fn get_by_type(&self, document_type: &str, page_size: usize) -> Result<ApiPage> {
        let master_ref = self.master_ref().await?;
        let url = self.search_url(
            &master_ref,
            &format!("[[at(document.type,\"{}\")]]", document_type),
            page_size,
        )?;
        Ok(without_token(self.get_json(url).await?))
    }

    /// Fetches the page identified by `cursor`. The cursor must point at the
    /// configured CMS; anything else is rejected with [`Error::ForeignCursor`].
    ///
    /// The CMS repeats the access token in the cursors it hands out. Those
    /// cursors end up in public pages, so the token is stripped from every
    /// returned `next_page` and added back here.
    pub async fn get_page(&self, cursor: &str) -> Result<ApiPage> {
        let url = self.check_cursor(cursor)?;
        Ok(without_token(self.get_json(url).await?))
    }

    /// Fetches the document of `document_type` whose `uid` is `uid`. Returns
    /// `Ok(None)` when no such document exists.
    pub async fn get_by_uid(&self, document_type: &str, uid: &str) -> Result<Option<Record>> {
        // uids are slugs; anything that would break out of the predicate
        // literal can't match a document anyway.
        if uid.contains('"') || uid.contains('\\') {
            return Ok(None);
        }
        let master_ref = self.master_ref().await?;
        let url = self.search_url(
            &master_ref,
            &format!("[[at(my.{}.uid,\"{}\")]]", document_type, uid),
            1,
        )?;
        let page: ApiPage = self.get_json(url).await?;
        Ok(page.results.into_iter().next())
    }

    /// Fetches every document of `document_type` by following cursors until
    /// the last page. Fails with [`Error::RepeatedCursor`] if the CMS hands
    /// out a cursor it already handed out.
    pub async fn get_all_by_type(&self, document_type: &str) -> Result<Vec<Record>> {
        let mut page = self.get_by_type(document_type, ENUMERATION_PAGE_SIZE).await?;
        let mut records = std::mem::take(&mut page.results);
        let mut visited = HashSet::new();
        while let Some(cursor) = page.next_page.take() {
            if !visited.insert(cursor.clone()) {
                return Err(Error::RepeatedCursor(cursor));
            }
            page = self.get_page(&cursor).await?;
            records.append(&mut page.results);
        }
        Ok(records)
    }

    async fn master_ref(&self) -> Result<String> {
        let mut url = self.endpoint.clone();
        if let Some(token) = &self.access_token {
            url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
        }
        let entry: ApiEntry = self.get_json(url).await?;
        entry
            .refs
            .into_iter()
            .find(|r| r.is_master_ref)
            .map(|r| r.reference)
            .ok_or(Error::MissingMasterRef)
    }

    fn search_url(&self, master_ref: &str, predicate: &str, page_size: usize) -> Result<Url> {
        let mut url = self.endpoint.join("documents/search")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("ref", master_ref)
                .append_pair("q", predicate)
                .append_pair("orderings", "[document.first_publication_date desc]")
                .append_pair("pageSize", &page_size.to_string());
            if let Some(token) = &self.access_token {
                query.append_pair(ACCESS_TOKEN_PARAM, token);
            }
        }
        Ok(url)
    }

    fn check_cursor(&self, cursor: &str) -> Result<Url> {
        let mut url = Url::parse(cursor)?;
        if url.origin() != self.endpoint.origin() {
            return Err(Error::ForeignCursor(cursor.to_owned()));
        }
        if let Some(token) = &self.access_token {
            if !url.query_pairs().any(|(key, _)| key == ACCESS_TOKEN_PARAM) {
                url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        // The query string may carry the access token; keep it out of logs.
        debug!("GET {}", url.path());
        get_json(&self.client, url).await
    }
}

impl PageSource for CmsClient {
    fn fetch_page<'a>(&'a self, cursor: &'a str) -> BoxFuture<'a, Result<ApiPage>> {
        self.get_page(cursor).boxed()
    }
}

/// Issues a GET request and decodes the JSON response body, treating any
/// non-success status as an error.
pub(crate) async fn get_json<T: DeserializeOwned>(client: &Client, url: Url) -> Result<T> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        let mut url = url;
        url.set_query(None);
        return Err(Error::Status { url, status });
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn without_token(page: ApiPage) -> ApiPage {
    ApiPage {
        next_page: page.next_page.map(|cursor| strip_token(&cursor)),
        ..page
    }
}

/// Removes the `access_token` query parameter from `cursor`. Cursors that
/// aren't URLs are returned unchanged; [`CmsClient::get_page`] rejects them.
fn strip_token(cursor: &str) -> String {
    let mut url = match Url::parse(cursor) {
        Ok(url) => url,
        Err(_) => return cursor.to_owned(),
    };
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != ACCESS_TOKEN_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&pairs);
    }
    url.into()
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// The result of a fallible CMS operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failure talking to the CMS.
#[derive(Debug)]
pub enum Error {
    /// Returned for transport-level failures.
    Http(reqwest::Error),

    /// Returned when the CMS answers with a non-success status.
    Status { url: Url, status: StatusCode },

    /// Returned when a response body isn't the expected JSON.
    Json(serde_json::Error),

    /// Returned when a URL or cursor can't be parsed.
    UrlParse(url::ParseError),

    /// Returned when a pagination cursor points somewhere other than the
    /// configured CMS.
    ForeignCursor(String),

    /// Returned when the API entry point doesn't advertise a master ref.
    MissingMasterRef,

    /// Returned when enumerating documents revisits a cursor.
    RepeatedCursor(String),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Http(err) => err.fmt(f),
            Error::Status { url, status } => write!(f, "GET {}: {}", url, status),
            Error::Json(err) => write!(f, "decoding CMS response: {}", err),
            Error::UrlParse(err) => err.fmt(f),
            Error::ForeignCursor(cursor) => {
                write!(f, "cursor `{}` does not belong to the CMS", cursor)
            }
            Error::MissingMasterRef => write!(f, "CMS API did not advertise a master ref"),
            Error::RepeatedCursor(cursor) => {
                write!(f, "CMS returned cursor `{}` twice", cursor)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(err) => Some(err),
            Error::Status { .. } => None,
            Error::Json(err) => Some(err),
            Error::UrlParse(err) => Some(err),
            Error::ForeignCursor(_) => None,
            Error::MissingMasterRef => None,
            Error::RepeatedCursor(_) => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Error {
        Error::Http(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

impl From<url::ParseError> for Error {
    /// Converts a [`url::ParseError`] into an [`Error`]. It allows us to use
    /// the `?` operator for URL parsing and joining functions.
    fn from(err: url::ParseError) -> Error {
        Error::UrlParse(err)
    }
}
