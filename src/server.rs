//! Serves the generated site over HTTP and keeps it fresh.
//!
//! Besides static files under the output directory, the server answers two
//! dynamic routes:
//!
//! * `GET /api/posts-next-page?next_page=<cursor>` proxies a follow-up page
//!   from the CMS in its raw `{results, next_page}` shape, which is what the
//!   home page's load-more script and the `browse` client consume.
//! * `GET /post/<slug>` serves the generated page, or renders (and caches)
//!   the page for a post published since the last build.

use crate::build::{self, build_site, load_templates, writer};
use crate::cms::{self, CmsClient};
use crate::config::Config;
use crate::date::DateFormat;
use crate::post::PostDetail;
use crate::write::{post_file_name, Templates, HOME_FILE};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{debug, error, info, warn};
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use url::form_urlencoded;

/// The route of the internal pagination endpoint.
pub const NEXT_PAGE_PATH: &str = "/api/posts-next-page";

/// The query parameter carrying the cursor.
pub const NEXT_PAGE_PARAM: &str = "next_page";

const POSTS_PREFIX: &str = "/post/";

const HTML: &str = "text/html; charset=utf-8";
const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// Everything a request handler needs. Shared read-only between handlers and
/// the revalidation task.
pub struct Site {
    pub config: Config,
    pub cms: CmsClient,
    templates: Templates,
}

impl Site {
    /// Loads the theme's templates and sets up the CMS client for `config`.
    pub fn new(config: Config) -> build::Result<Site> {
        let templates = load_templates(&config)?;
        // Fail now rather than on the first request.
        DateFormat::new(&config.date_format, &config.locale)?;
        let cms = CmsClient::new(
            config.cms_endpoint.clone(),
            config.cms_access_token.clone(),
            config.request_timeout,
        )?;
        Ok(Site {
            config,
            cms,
            templates,
        })
    }

    fn date_format(&self) -> build::Result<DateFormat> {
        Ok(DateFormat::new(&self.config.date_format, &self.config.locale)?)
    }

    fn render_post(&self, detail: &PostDetail) -> build::Result<String> {
        let writer = writer(&self.config, &self.templates, self.date_format()?);
        Ok(writer.render_post(detail, None, None)?)
    }

    fn render_not_found(&self, slug: Option<&str>) -> build::Result<String> {
        let writer = writer(&self.config, &self.templates, self.date_format()?);
        Ok(writer.render_not_found(slug)?)
    }
}

/// Serves `site` on `addr` until Ctrl-C is pressed.
pub async fn serve(site: Arc<Site>, addr: SocketAddr) -> Result<(), hyper::Error> {
    let root = site.config.root_output_directory.clone();
    let service = make_service_fn(move |_| {
        let site = site.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(site.clone(), req))) }
    });

    let server = Server::try_bind(&addr)?.serve(service);
    info!("Serving `{}` on http://{}", root.display(), addr);

    server.with_graceful_shutdown(shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Listening for Ctrl-C: {}", err);
    }
}

/// Rebuilds the site every `revalidate` interval. The first rebuild happens
/// one interval from now. Failures are logged and the previous build stays
/// live.
pub async fn revalidate(site: Arc<Site>) {
    if site.config.revalidate.is_zero() {
        info!("Revalidation disabled");
        return;
    }
    let mut interval = tokio::time::interval(site.config.revalidate);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        info!("Revalidating");
        if let Err(err) = build_site(&site.config, &site.cms).await {
            error!("Regenerating site: {}", err);
        }
    }
}

async fn handle(site: Arc<Site>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    debug!("{} {}", req.method(), req.uri().path());
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }

    // Page links are built with `Url::join`, which percent-encodes non-ASCII
    // uids; routing works on the decoded path.
    let path = match percent_decode_str(req.uri().path()).decode_utf8() {
        Ok(path) => path.into_owned(),
        Err(_) => return Ok(text(StatusCode::BAD_REQUEST, "invalid path")),
    };
    let query = req.uri().query().map(str::to_owned);
    let response = if path == NEXT_PAGE_PATH {
        next_page(&site, query.as_deref()).await
    } else if let Some(slug) = path.strip_prefix(POSTS_PREFIX) {
        post_page(&site, slug).await
    } else {
        static_file(&site, &path).await
    };
    Ok(response)
}

async fn next_page(site: &Site, query: Option<&str>) -> Response<Body> {
    let cursor = query.and_then(|query| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == NEXT_PAGE_PARAM)
            .map(|(_, value)| value.into_owned())
    });
    let cursor = match cursor {
        Some(cursor) if !cursor.is_empty() => cursor,
        _ => return text(StatusCode::BAD_REQUEST, "missing `next_page`"),
    };

    match site.cms.get_page(&cursor).await {
        Ok(page) => match serde_json::to_vec(&page) {
            Ok(body) => respond(StatusCode::OK, JSON, body),
            Err(err) => {
                error!("Encoding page: {}", err);
                text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        },
        Err(err @ cms::Error::ForeignCursor(_)) | Err(err @ cms::Error::UrlParse(_)) => {
            warn!("Rejecting cursor: {}", err);
            text(StatusCode::BAD_REQUEST, "invalid `next_page`")
        }
        Err(err) => {
            warn!("Fetching next page: {}", err);
            text(StatusCode::BAD_GATEWAY, "could not fetch posts")
        }
    }
}

async fn post_page(site: &Site, slug: &str) -> Response<Body> {
    let uid = slug.strip_suffix(".html").unwrap_or(slug);
    let file_name = match post_file_name(uid) {
        Some(file_name) => file_name,
        None => return not_found(site, Some(uid)),
    };

    let path = site.config.posts_output_directory.join(&file_name);
    if let Ok(body) = tokio::fs::read(&path).await {
        return respond(StatusCode::OK, HTML, body);
    }

    let record = match site.cms.get_by_uid(&site.config.document_type, uid).await {
        Ok(Some(record)) => record,
        Ok(None) => return not_found(site, Some(uid)),
        Err(err) => {
            warn!("Fetching post `{}`: {}", uid, err);
            return text(StatusCode::BAD_GATEWAY, "could not fetch post");
        }
    };
    let detail = match PostDetail::project(&record) {
        Ok(detail) => detail,
        Err(err) => {
            warn!("Skipping post: {}", err);
            return not_found(site, Some(uid));
        }
    };
    let html = match site.render_post(&detail) {
        Ok(html) => html,
        Err(err) => {
            error!("Rendering post `{}`: {}", uid, err);
            return text(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    if let Err(err) = cache(&path, &html).await {
        warn!("Caching `{}`: {}", path.display(), err);
    }
    respond(StatusCode::OK, HTML, html)
}

/// Writes a rendered page into the live posts directory. The directory is
/// owned by the build: it is never created here, or a rebuild swapping in a
/// new site could find it in the way.
async fn cache(path: &Path, html: &str) -> std::io::Result<()> {
    tokio::fs::write(path, html).await
}

async fn static_file(site: &Site, path: &str) -> Response<Body> {
    let relative = path.trim_start_matches('/');
    if relative.split('/').any(|segment| segment == "..") {
        return text(StatusCode::BAD_REQUEST, "invalid path");
    }

    let mut file = site.config.root_output_directory.join(relative);
    let is_dir = match tokio::fs::metadata(&file).await {
        Ok(metadata) => metadata.is_dir(),
        Err(_) => false,
    };
    if is_dir {
        file = file.join(HOME_FILE);
    }

    match tokio::fs::read(&file).await {
        Ok(body) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            respond(StatusCode::OK, mime.as_ref(), body)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => not_found(site, None),
        Err(err) => {
            error!("Reading `{}`: {}", file.display(), err);
            text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn not_found(site: &Site, slug: Option<&str>) -> Response<Body> {
    match site.render_not_found(slug) {
        Ok(html) => respond(StatusCode::NOT_FOUND, HTML, html),
        Err(err) => {
            error!("Rendering not-found page: {}", err);
            text(StatusCode::NOT_FOUND, "not found")
        }
    }
}

fn text(status: StatusCode, message: &'static str) -> Response<Body> {
    respond(status, TEXT, message)
}

fn respond<B: Into<Body>>(status: StatusCode, content_type: &str, body: B) -> Response<Body> {
    let mut res = Response::new(body.into());
    *res.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        res.headers_mut().insert(CONTENT_TYPE, value);
    }
    res
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cms::{ApiPage, Record};
    use crate::fake_cms::{self, post, Behavior};
    use crate::write::post_file_name;
    use std::path::PathBuf;

    fn site(name: &str) -> Arc<Site> {
        site_with(name, Vec::new(), Behavior::default())
    }

    /// A site whose CMS is a [`fake_cms`] serving `records`.
    fn site_with(name: &str, records: Vec<Record>, behavior: Behavior) -> Arc<Site> {
        let out = std::env::temp_dir().join(format!("lemao-server-{}-{}", name, std::process::id()));
        let mut config = Config::from_directory(Path::new("./testdata/project"), &out).unwrap();
        config.cms_endpoint = fake_cms::start(records, behavior);
        config.cms_access_token = None;
        Arc::new(Site::new(config).unwrap())
    }

    fn next_page_uri(cursor: &str) -> String {
        format!(
            "{}?{}",
            NEXT_PAGE_PATH,
            form_urlencoded::Serializer::new(String::new())
                .append_pair(NEXT_PAGE_PARAM, cursor)
                .finish()
        )
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body(res: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn write(path: PathBuf, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn test_static_file() {
        let site = site("static");
        let root = site.config.root_output_directory.clone();
        write(root.join("static").join("style.css"), "body {}");
        write(root.join(HOME_FILE), "<h1>home</h1>");

        let res = handle(site.clone(), get("/static/style.css")).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(res.headers()[CONTENT_TYPE], "text/css");
        assert_eq!("body {}", body(res).await);

        let res = handle(site.clone(), get("/")).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!("<h1>home</h1>", body(res).await);

        let res = handle(site, get("/missing.css")).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, res.status());
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_parent_segments_rejected() {
        let res = handle(site("dotdot"), get("/static/../../etc/passwd")).await.unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, res.status());
    }

    #[tokio::test]
    async fn test_generated_post_served_from_disk() {
        let site = site("post");
        let root = site.config.root_output_directory.clone();
        write(site.config.posts_output_directory.join("one.html"), "one");

        let res = handle(site.clone(), get("/post/one.html")).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!("one", body(res).await);

        let res = handle(site, get("/post/one")).await.unwrap();
        assert_eq!("one", body(res).await);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_unusable_slug_not_found() {
        let res = handle(site("slug"), get("/post/.hidden")).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, res.status());
        assert!(body(res).await.contains(".hidden"));
    }

    #[tokio::test]
    async fn test_next_page_requires_cursor() {
        let res = handle(site("nocursor"), get(NEXT_PAGE_PATH)).await.unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, res.status());
    }

    #[tokio::test]
    async fn test_next_page_rejects_foreign_cursor() {
        let uri = format!(
            "{}?next_page=http%3A%2F%2F169.254.169.254%2Flatest%2Fmeta-data",
            NEXT_PAGE_PATH
        );
        let res = handle(site("foreign"), get(&uri)).await.unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, res.status());
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let res = handle(site("post-method"), req).await.unwrap();
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());
    }

    #[tokio::test]
    async fn test_non_ascii_post_served_from_its_link() {
        let site = site("unicode");
        let root = site.config.root_output_directory.clone();
        let file_name = post_file_name("ação").unwrap();
        write(site.config.posts_output_directory.join(&file_name), "ação");

        // The path the home page and the feed link to.
        let link = site.config.posts_url.join(&file_name).unwrap();
        assert_eq!("/post/a%C3%A7%C3%A3o.html", link.path());

        let res = handle(site, get(link.path())).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!("ação", body(res).await);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_encoded_static_path() {
        let site = site("encoded");
        let root = site.config.root_output_directory.clone();
        write(root.join("static").join("my style.css"), "p {}");

        let res = handle(site.clone(), get("/static/my%20style.css")).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!("p {}", body(res).await);

        let res = handle(site, get("/static/%2e%2e/%2e%2e/etc/passwd")).await.unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, res.status());
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_next_page_passes_raw_page_through() {
        let site = site_with(
            "passthrough",
            vec![post("a"), post("b"), post("c")],
            Behavior::default(),
        );
        let first = site.cms.get_by_type("post", 1).await.unwrap();
        let cursor = first.next_page.unwrap();

        let res = handle(site, get(&next_page_uri(&cursor))).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(res.headers()[CONTENT_TYPE], JSON);
        let page: ApiPage = serde_json::from_str(&body(res).await).unwrap();
        assert_eq!(vec![post("b")], page.results);
        assert!(page.next_page.is_some());
    }

    #[tokio::test]
    async fn test_next_page_cms_failure_is_bad_gateway() {
        let site = site_with(
            "nextfail",
            Vec::new(),
            Behavior {
                search_status: Some(StatusCode::INTERNAL_SERVER_ERROR),
                ..Behavior::default()
            },
        );
        let mut cursor = site.cms.endpoint().join("documents/search").unwrap();
        cursor.query_pairs_mut().append_pair("page", "2");

        let res = handle(site, get(&next_page_uri(cursor.as_str()))).await.unwrap();
        assert_eq!(StatusCode::BAD_GATEWAY, res.status());
    }

    #[tokio::test]
    async fn test_unknown_post_renders_not_found_page() {
        let site = site_with("ghost", vec![post("a")], Behavior::default());
        let res = handle(site, get("/post/ghost.html")).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, res.status());
        assert!(body(res).await.contains("<p>ghost</p>"));
    }

    #[tokio::test]
    async fn test_new_post_rendered_on_demand_and_cached() {
        let site = site_with("fresh", vec![post("fresh")], Behavior::default());
        let root = site.config.root_output_directory.clone();
        std::fs::create_dir_all(&site.config.posts_output_directory).unwrap();

        let res = handle(site.clone(), get("/post/fresh.html")).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        let html = body(res).await;
        assert!(html.contains("Title of fresh"));
        assert!(html.contains("<p>Hello there</p>"));
        assert_eq!(
            html,
            std::fs::read_to_string(site.config.posts_output_directory.join("fresh.html")).unwrap()
        );
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_post_cms_failure_is_bad_gateway() {
        let site = site_with(
            "postfail",
            Vec::new(),
            Behavior {
                search_status: Some(StatusCode::INTERNAL_SERVER_ERROR),
                ..Behavior::default()
            },
        );
        let res = handle(site, get("/post/anything")).await.unwrap();
        assert_eq!(StatusCode::BAD_GATEWAY, res.status());
    }
}
