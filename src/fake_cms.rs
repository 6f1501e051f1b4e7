//! An in-process stand-in for the CMS repository API, served over HTTP on an
//! ephemeral port. It answers the entry point with its refs and
//! `documents/search` with pages of canned records, handing out cursors the
//! way the real API does (the original query plus a `page` parameter).

use crate::cms::Record;
use hyper::header::HOST;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use url::Url;

pub const MASTER_REF: &str = "master-ref";

/// Knobs for misbehaving.
#[derive(Clone, Debug, Default)]
pub struct Behavior {
    /// Advertise no master ref.
    pub no_master_ref: bool,

    /// Answer every search with this status.
    pub search_status: Option<StatusCode>,

    /// Cap page sizes, as the real API caps them at 100.
    pub max_page_size: Option<usize>,

    /// Always hand out the cursor of the page just served.
    pub repeat_cursor: bool,

    /// Require this `access_token` on every request.
    pub access_token: Option<String>,
}

struct State {
    records: Vec<Record>,
    behavior: Behavior,
}

/// Starts serving `records` and returns the API entry point. Must be called
/// from within a tokio runtime.
pub fn start(records: Vec<Record>, behavior: Behavior) -> Url {
    let state = Arc::new(State { records, behavior });
    let service = make_service_fn(move |_| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| respond(state.clone(), req))) }
    });
    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(service);
    let addr = server.local_addr();
    tokio::spawn(server);
    Url::parse(&format!("http://{}/api/v2", addr)).unwrap()
}

/// A complete post document.
pub fn post(uid: &str) -> Record {
    Record {
        uid: Some(uid.to_owned()),
        first_publication_date: Some("2021-03-25T19:25:28+0000".to_owned()),
        data: json!({
            "title": format!("Title of {}", uid),
            "subtitle": "sub",
            "author": "Lemão",
            "banner": {"url": "https://images.example.org/banner.png"},
            "content": [{
                "heading": "Intro",
                "body": [{"type": "paragraph", "text": "Hello there", "spans": []}]
            }]
        }),
    }
}

async fn respond(state: Arc<State>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .unwrap_or("localhost")
        .to_owned();
    let url = match Url::parse(&format!("http://{}{}", host, req.uri())) {
        Ok(url) => url,
        Err(_) => return Ok(status(StatusCode::BAD_REQUEST)),
    };
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(token) = &state.behavior.access_token {
        if query.get("access_token") != Some(token) {
            return Ok(status(StatusCode::UNAUTHORIZED));
        }
    }

    let body = match url.path() {
        "/api/v2" | "/api/v2/" => entry(&state.behavior),
        "/api/v2/documents/search" => {
            if let Some(code) = state.behavior.search_status {
                return Ok(status(code));
            }
            if query.get("ref").map(String::as_str) != Some(MASTER_REF) {
                return Ok(status(StatusCode::BAD_REQUEST));
            }
            search(&state, &url, &query)
        }
        _ => return Ok(status(StatusCode::NOT_FOUND)),
    };
    Ok(Response::new(Body::from(body.to_string())))
}

fn entry(behavior: &Behavior) -> Value {
    let refs = match behavior.no_master_ref {
        true => json!([{"id": "preview", "ref": "preview-ref", "isMasterRef": false}]),
        false => json!([{"id": "master", "ref": MASTER_REF, "isMasterRef": true}]),
    };
    json!({"refs": refs, "types": {"post": "Post"}})
}

fn search(state: &State, url: &Url, query: &HashMap<String, String>) -> Value {
    let predicate = query.get("q").map(String::as_str).unwrap_or("");
    let matching: Vec<&Record> = match uid_predicate(predicate) {
        Some(uid) => state
            .records
            .iter()
            .filter(|record| record.uid.as_deref() == Some(uid))
            .collect(),
        None => state.records.iter().collect(),
    };

    let mut size: usize = query
        .get("pageSize")
        .and_then(|size| size.parse().ok())
        .unwrap_or(20);
    if let Some(max) = state.behavior.max_page_size {
        size = size.min(max);
    }
    let size = size.max(1);
    let page: usize = query
        .get("page")
        .and_then(|page| page.parse().ok())
        .unwrap_or(1)
        .max(1);
    let start = ((page - 1) * size).min(matching.len());
    let end = (start + size).min(matching.len());

    let next_page = if state.behavior.repeat_cursor {
        Some(url.to_string())
    } else if end < matching.len() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .into_owned()
            .filter(|(key, _)| key != "page")
            .collect();
        let mut next = url.clone();
        next.query_pairs_mut()
            .clear()
            .extend_pairs(&pairs)
            .append_pair("page", &(page + 1).to_string());
        Some(next.to_string())
    } else {
        None
    };

    json!({
        "page": page,
        "results_per_page": size,
        "total_results_size": matching.len(),
        "results": &matching[start..end],
        "next_page": next_page,
    })
}

// Extracts `X` from `[[at(my.<type>.uid,"X")]]`.
fn uid_predicate(predicate: &str) -> Option<&str> {
    let rest = predicate.strip_prefix("[[at(my.")?;
    let start = rest.find(".uid,\"")? + ".uid,\"".len();
    let rest = &rest[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn status(code: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = code;
    res
}
