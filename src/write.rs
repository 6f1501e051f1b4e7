//! Templates the display models into HTML pages and writes them to disk: the
//! home page (with the initial pagination state), one page per post, and the
//! not-found page.

use crate::date::DateFormat;
use crate::pagination::PostsPagination;
use crate::post::{Post, PostDetail};
use crate::richtext;
use gtmpl::Value;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use url::Url;

/// The file name of the home page.
pub const HOME_FILE: &str = "index.html";

/// The file name of the serialized initial pagination state, written beside
/// the home page for clients that drive the load-more flow themselves.
pub const STATE_FILE: &str = "state.json";

/// The file name of the not-found page.
pub const NOT_FOUND_FILE: &str = "404.html";

/// The template sources for each kind of page.
pub struct Templates {
    pub index: String,
    pub post: String,
    pub not_found: String,
}

/// Responsible for templating and writing HTML pages.
pub struct Writer<'a> {
    pub templates: &'a Templates,

    /// The site title, made available to every template.
    pub title: &'a str,

    /// The URL for the site's home page. This is made available to every
    /// template, typically as the destination for the site-header link.
    pub home_page: &'a Url,

    /// The base URL for post pages. A post's page is located at
    /// `{posts_url}/{uid}.html`. Must end in a trailing slash.
    pub posts_url: &'a Url,

    /// The URL for the static assets, typically for the theme's stylesheet.
    pub static_url: &'a Url,

    /// The URL of the Atom feed.
    pub atom_url: &'a Url,

    /// How publication dates are shown.
    pub date_format: DateFormat<'a>,
}

impl Writer<'_> {
    /// Renders the home page for `listing`.
    pub fn render_home(&self, listing: &PostsPagination) -> Result<String> {
        let posts = listing
            .results
            .iter()
            .map(|post| self.post_value(post))
            .collect::<Result<Vec<Value>>>()?;

        // The state is embedded in a `<script>` element, so it must not
        // contain a closing tag.
        let state = serde_json::to_string(listing)?.replace("</", "<\\/");

        let mut item = HashMap::new();
        item.insert("posts".to_owned(), Value::Array(posts));
        item.insert("next_page".to_owned(), optional(listing.next_page.as_deref()));
        item.insert("has_more".to_owned(), Value::Bool(listing.next_page.is_some()));
        item.insert("state".to_owned(), Value::String(state));

        self.render(&Page {
            item: Value::Object(item),
            prev: None,
            next: None,
            template: &self.templates.index,
        })
    }

    /// Writes `index.html` and `state.json` into `dir`.
    pub fn write_home(&self, dir: &Path, listing: &PostsPagination) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(HOME_FILE), self.render_home(listing)?)?;
        std::fs::write(dir.join(STATE_FILE), serde_json::to_vec(listing)?)?;
        Ok(())
    }

    /// Renders the page for a single post. `prev` and `next` are the URLs of
    /// the neighbouring posts, if any.
    pub fn render_post(
        &self,
        detail: &PostDetail,
        prev: Option<Url>,
        next: Option<Url>,
    ) -> Result<String> {
        let mut item = match self.post_value(&detail.post)? {
            Value::Object(m) => m,
            _ => HashMap::new(),
        };

        let sections = detail
            .content
            .iter()
            .enumerate()
            .map(|(i, section)| {
                let mut m = HashMap::new();
                // The index is the section's stable key.
                m.insert("key".to_owned(), Value::String(i.to_string()));
                m.insert("heading".to_owned(), escaped(&section.heading));
                m.insert(
                    "body".to_owned(),
                    Value::String(richtext::to_html(&section.body)),
                );
                Value::Object(m)
            })
            .collect();

        item.insert("banner_url".to_owned(), escaped(&detail.banner_url));
        item.insert(
            "reading_time".to_owned(),
            Value::String(detail.reading_time().to_string()),
        );
        item.insert("sections".to_owned(), Value::Array(sections));

        self.render(&Page {
            item: Value::Object(item),
            prev,
            next,
            template: &self.templates.post,
        })
    }

    /// Renders and writes a page for every post with a usable `uid` into
    /// `dir`, linking each to its neighbours. Returns the written paths.
    pub fn write_posts(&self, dir: &Path, details: &[PostDetail]) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let pages: Vec<(&PostDetail, String)> = details
            .iter()
            .filter_map(|d| d.uid().and_then(post_file_name).map(|f| (d, f)))
            .collect();

        let mut written = Vec::with_capacity(pages.len());
        for (i, (detail, file_name)) in pages.iter().enumerate() {
            let prev = match i {
                0 => None,
                _ => Some(self.posts_url.join(&pages[i - 1].1)?),
            };
            let next = match pages.get(i + 1) {
                None => None,
                Some((_, file_name)) => Some(self.posts_url.join(file_name)?),
            };
            let path = dir.join(file_name);
            std::fs::write(&path, self.render_post(detail, prev, next)?)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Renders the not-found page. `slug` is the identifier that wasn't
    /// found, when there is one.
    pub fn render_not_found(&self, slug: Option<&str>) -> Result<String> {
        self.render(&Page {
            item: match slug {
                Some(slug) => escaped(slug),
                None => Value::Nil,
            },
            prev: None,
            next: None,
            template: &self.templates.not_found,
        })
    }

    /// Writes `404.html` into `dir`.
    pub fn write_not_found(&self, dir: &Path) -> Result<()> {
        std::fs::write(dir.join(NOT_FOUND_FILE), self.render_not_found(None)?)?;
        Ok(())
    }

    /// The URL of the page for the post with `uid`, or `None` if `uid` can't
    /// be used as a file name.
    pub fn post_url(&self, uid: &str) -> Result<Option<Url>> {
        match post_file_name(uid) {
            Some(file_name) => Ok(Some(self.posts_url.join(&file_name)?)),
            None => Ok(None),
        }
    }

    fn post_value(&self, post: &Post) -> Result<Value> {
        let url = match post.uid.as_deref() {
            Some(uid) => self.post_url(uid)?,
            None => None,
        };

        let mut m = HashMap::new();
        m.insert("uid".to_owned(), optional(post.uid.as_deref()));
        m.insert(
            "url".to_owned(),
            match url {
                Some(url) => Value::String(url.to_string()),
                None => Value::Nil,
            },
        );
        m.insert("title".to_owned(), escaped(&post.title));
        m.insert("subtitle".to_owned(), escaped(&post.subtitle));
        m.insert("author".to_owned(), escaped(&post.author));
        m.insert(
            "date".to_owned(),
            escaped(
                &self
                    .date_format
                    .display(post.first_publication_date.as_deref()),
            ),
        );
        m.insert(
            "published".to_owned(),
            optional(post.first_publication_date.as_deref()),
        );
        Ok(Value::Object(m))
    }

    /// Applies the page's template to its value plus the site-wide fields.
    fn render(&self, page: &Page) -> Result<String> {
        let mut value = page.to_value();
        if let Value::Object(obj) = &mut value {
            obj.insert("title".to_owned(), escaped(self.title));
            obj.insert(
                "home_page".to_owned(),
                Value::String(self.home_page.to_string()),
            );
            obj.insert(
                "static_url".to_owned(),
                Value::String(self.static_url.to_string()),
            );
            obj.insert(
                "atom_url".to_owned(),
                Value::String(self.atom_url.to_string()),
            );
        }
        gtmpl::template(page.template, value).map_err(|e| Error::Template(e.to_string()))
    }
}

/// Returns the file name for the page of the post with `uid`, or `None` if
/// `uid` isn't a plain slug (empty, hidden, or containing path separators).
pub fn post_file_name(uid: &str) -> Option<String> {
    let plain = !uid.is_empty()
        && !uid.starts_with('.')
        && uid
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.');
    match plain {
        true => Some(format!("{}.html", uid)),
        false => None,
    }
}

/// An object representing an output HTML page. A [`Page`] can be converted to
/// a [`Value`] and thus rendered in a template via [`Page::to_value`].
struct Page<'a> {
    /// The main item for the page.
    item: Value,

    /// The URL for the previous page, if any.
    prev: Option<Url>,

    /// The URL for the next page, if any.
    next: Option<Url>,

    /// The template with which the page will be rendered.
    template: &'a str,
}

impl Page<'_> {
    /// Converts a [`Page`] into a [`Value`]. The result is a [`Value::Object`]
    /// with fields `item`, `prev`, and `next` (see [`Page`] for descriptions).
    fn to_value(&self) -> Value {
        let option_to_value = |opt: &Option<Url>| match opt {
            Some(url) => Value::String(url.to_string()),
            None => Value::Nil,
        };

        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("item".to_owned(), self.item.clone());
        m.insert("prev".to_owned(), option_to_value(&self.prev));
        m.insert("next".to_owned(), option_to_value(&self.next));
        Value::Object(m)
    }
}

fn escaped(s: &str) -> Value {
    Value::String(richtext::escape(s))
}

fn optional(s: Option<&str>) -> Value {
    match s {
        Some(s) => escaped(s),
        None => Value::Nil,
    }
}

/// The result of a fallible page-writing operation.
type Result<T> = std::result::Result<T, Error>;

/// Represents an error in a page-writing operation.
#[derive(Debug)]
pub enum Error {
    /// An error during templating.
    Template(String),

    /// An error serializing the embedded pagination state.
    Json(serde_json::Error),

    /// An error building a page URL.
    UrlParse(url::ParseError),

    /// An error writing the output files.
    Io(io::Error),
}

impl From<io::Error> for Error {
    /// Converts an [`io::Error`] into an [`Error`]. This allows us to use the
    /// `?` operator for fallible I/O operations.
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Error {
        Error::UrlParse(err)
    }
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as presentable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Template(err) => err.fmt(f),
            Error::Json(err) => err.fmt(f),
            Error::UrlParse(err) => err.fmt(f),
            Error::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Template(_) => None,
            Error::Json(err) => Some(err),
            Error::UrlParse(err) => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}
