//! Defines the display models ([`Post`], [`PostDetail`], [`Section`]) and the
//! projector which shapes raw CMS [`Record`]s into them. Projection is pure:
//! no I/O, and the same record always yields the same model. Dates are passed
//! through as the raw timestamps the CMS returned; formatting them is the
//! rendering layer's job (see [`crate::date`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cms::{ApiPage, Record};
use crate::richtext::Block;

/// The fields a listing needs to show a post.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Post {
    /// The post's stable identifier, which doubles as its route slug.
    #[serde(default)]
    pub uid: Option<String>,

    /// The raw publication timestamp, if the post has been published.
    #[serde(default)]
    pub first_publication_date: Option<String>,

    pub title: String,
    pub subtitle: String,
    pub author: String,
}

/// A full post as shown on its own page.
#[derive(Clone, Debug, PartialEq)]
pub struct PostDetail {
    pub post: Post,
    pub banner_url: String,

    /// The post body, in the order the CMS returned it.
    pub content: Vec<Section>,
}

/// One section of a post body: a heading followed by rich text.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Section {
    /// Empty headings come back from the CMS as `null`.
    #[serde(default, deserialize_with = "nullable_string")]
    pub heading: String,

    #[serde(default)]
    pub body: Vec<Block>,
}

impl Post {
    /// Projects a listing [`Post`] from `record`. Fails if `data` lacks a
    /// string `title`, `subtitle` or `author`.
    pub fn project(record: &Record) -> Result<Post, MalformedRecord> {
        let data = fields(record)?;
        Ok(Post {
            uid: record.uid.clone(),
            first_publication_date: record.first_publication_date.clone(),
            title: text_field(record, data, "title")?,
            subtitle: text_field(record, data, "subtitle")?,
            author: text_field(record, data, "author")?,
        })
    }
}

impl PostDetail {
    /// Projects a [`PostDetail`] from `record`. In addition to the [`Post`]
    /// fields, requires `data.banner.url` and a well-formed `data.content`.
    pub fn project(record: &Record) -> Result<PostDetail, MalformedRecord> {
        let post = Post::project(record)?;
        let data = fields(record)?;

        let banner_url = match data.get("banner").and_then(|b| b.get("url")) {
            Some(Value::String(url)) => url.clone(),
            _ => return Err(MalformedRecord::new(record, "data.banner.url")),
        };

        let content = match data.get("content") {
            Some(content @ Value::Array(_)) => {
                Vec::<Section>::deserialize(content)
                    .map_err(|_| MalformedRecord::new(record, "data.content"))?
            }
            _ => return Err(MalformedRecord::new(record, "data.content")),
        };

        Ok(PostDetail {
            post,
            banner_url,
            content,
        })
    }

    pub fn uid(&self) -> Option<&str> {
        self.post.uid.as_deref()
    }
}

/// Projects every record of `page`. Records that fail projection are returned
/// separately so that one bad record never takes its siblings down with it.
pub fn project_page(page: &ApiPage) -> (Vec<Post>, Vec<MalformedRecord>) {
    project_all(&page.results, Post::project)
}

/// Applies `projector` to each record, partitioning successes from failures
/// while preserving order.
pub fn project_all<T>(
    records: &[Record],
    projector: impl Fn(&Record) -> Result<T, MalformedRecord>,
) -> (Vec<T>, Vec<MalformedRecord>) {
    let mut projected = Vec::with_capacity(records.len());
    let mut malformed = Vec::new();
    for record in records {
        match projector(record) {
            Ok(item) => projected.push(item),
            Err(err) => malformed.push(err),
        }
    }
    (projected, malformed)
}

fn fields(record: &Record) -> Result<&Map<String, Value>, MalformedRecord> {
    record
        .data
        .as_object()
        .ok_or_else(|| MalformedRecord::new(record, "data"))
}

fn text_field(
    record: &Record,
    data: &Map<String, Value>,
    field: &str,
) -> Result<String, MalformedRecord> {
    match data.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(MalformedRecord::new(record, &format!("data.{}", field))),
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Returned when a record lacks a field the display model requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedRecord {
    /// The record's `uid`, when it has one.
    pub uid: Option<String>,

    /// The dotted path of the missing or mistyped field, e.g. `data.title`.
    pub field: String,
}

impl MalformedRecord {
    fn new(record: &Record, field: &str) -> MalformedRecord {
        MalformedRecord {
            uid: record.uid.clone(),
            field: field.to_owned(),
        }
    }
}

impl fmt::Display for MalformedRecord {
    /// Displays a [`MalformedRecord`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.uid {
            Some(uid) => write!(f, "malformed record `{}`: missing or invalid `{}`", uid, self.field),
            None => write!(f, "malformed record: missing or invalid `{}`", self.field),
        }
    }
}

impl std::error::Error for MalformedRecord {}
