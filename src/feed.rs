//! Support for creating Atom feeds from a list of posts.

use crate::config::Author;
use crate::date::parse_timestamp;
use crate::post::Post;
use crate::write::post_file_name;
use atom_syndication::{Entry, Error as AtomError, Feed, Link, Person, Text};
use chrono::{DateTime, FixedOffset, Utc};
use log::debug;
use std::fmt;
use std::io::Write;
use url::Url;

/// Bundled configuration for creating a feed.
pub struct FeedConfig {
    pub title: String,
    pub id: String,
    pub author: Option<Author>,
    pub home_page: Url,

    /// The base URL for post pages; must end in a trailing slash.
    pub posts_url: Url,
}

/// Creates a feed from some configuration ([`FeedConfig`]) and a list of
/// [`Post`]s and writes the result to a [`std::io::Write`]. This function takes
/// ownership of the provided [`FeedConfig`]. Posts without a usable `uid` have
/// no page to link to and are left out.
pub fn write_feed<W: Write>(config: FeedConfig, posts: &[Post], w: W) -> Result<()> {
    feed(config, posts)?.write_to(w)?;
    Ok(())
}

fn feed(config: FeedConfig, posts: &[Post]) -> Result<Feed> {
    let now = now();
    let entries = feed_entries(&config, posts, now)?;

    let mut feed = Feed::default();
    feed.set_title(config.title.as_str());
    feed.set_id(config.id.as_str());
    feed.set_updated(entries.iter().map(|e| *e.updated()).max().unwrap_or(now));
    feed.set_authors(config.author.map(author_to_person).into_iter().collect::<Vec<_>>());
    feed.set_links(vec![alternate(config.home_page.as_str())]);
    feed.set_entries(entries);
    Ok(feed)
}

fn feed_entries(config: &FeedConfig, posts: &[Post], now: FixedDateTime) -> Result<Vec<Entry>> {
    let mut entries: Vec<Entry> = Vec::with_capacity(posts.len());

    for post in posts {
        let file_name = match post.uid.as_deref().and_then(post_file_name) {
            Some(file_name) => file_name,
            None => {
                debug!("Leaving post `{}` out of the feed: no uid", post.title);
                continue;
            }
        };
        let url = config.posts_url.join(&file_name)?;
        let published = post
            .first_publication_date
            .as_deref()
            .and_then(parse_timestamp);

        let mut author = Person::default();
        author.set_name(post.author.as_str());

        let mut entry = Entry::default();
        entry.set_id(url.as_str());
        entry.set_title(post.title.as_str());
        entry.set_updated(published.unwrap_or(now));
        entry.set_published(published);
        entry.set_summary(Some(Text::from(post.subtitle.as_str())));
        entry.set_authors(vec![author]);
        entry.set_links(vec![alternate(url.as_str())]);
        entries.push(entry);
    }
    Ok(entries)
}

fn alternate(href: &str) -> Link {
    let mut link = Link::default();
    link.set_href(href);
    link.set_rel("alternate");
    link
}

fn author_to_person(author: Author) -> Person {
    let mut person = Person::default();
    person.set_name(author.name);
    person.set_email(author.email);
    person
}

fn now() -> FixedDateTime {
    Utc::now().into()
}

type FixedDateTime = DateTime<FixedOffset>;

type Result<T> = std::result::Result<T, Error>;

/// Represents a problem creating a feed. Variants include I/O, Atom, and URL
/// issues.
#[derive(Debug)]
pub enum Error {
    /// Returned when there is a generic I/O error.
    Io(std::io::Error),

    /// Returned when there is an Atom-related error.
    Atom(AtomError),

    /// Returned when a post URL can't be built.
    UrlParse(url::ParseError),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => err.fmt(f),
            Error::Atom(err) => err.fmt(f),
            Error::UrlParse(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Atom(err) => Some(err),
            Error::UrlParse(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for Error {
    /// Converts [`std::io::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator in fallible feed operations.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<AtomError> for Error {
    /// Converts [`AtomError`]s into [`Error`]. This allows us to use the `?`
    /// operator in fallible feed operations.
    fn from(err: AtomError) -> Error {
        Error::Atom(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Error {
        Error::UrlParse(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> FeedConfig {
        FeedConfig {
            title: "Blog do Lemão".to_owned(),
            id: "https://blog.example.org/".to_owned(),
            author: Some(Author {
                name: "Lemão".to_owned(),
                email: None,
            }),
            home_page: Url::parse("https://blog.example.org/").unwrap(),
            posts_url: Url::parse("https://blog.example.org/post/").unwrap(),
        }
    }

    fn post(uid: Option<&str>, date: Option<&str>) -> Post {
        Post {
            uid: uid.map(str::to_owned),
            first_publication_date: date.map(str::to_owned),
            title: "Title".to_owned(),
            subtitle: "Subtitle".to_owned(),
            author: "Author".to_owned(),
        }
    }

    #[test]
    fn test_entries() -> Result<()> {
        let posts = vec![
            post(Some("new"), Some("2021-04-01T10:00:00+0000")),
            post(None, Some("2021-03-01T10:00:00+0000")),
            post(Some("undated"), None),
        ];
        let feed = feed(config(), &posts)?;
        let ids: Vec<&str> = feed.entries().iter().map(|e| e.id()).collect();
        assert_eq!(
            vec![
                "https://blog.example.org/post/new.html",
                "https://blog.example.org/post/undated.html",
            ],
            ids
        );
        assert_eq!(
            "2021-04-01T10:00:00+00:00",
            feed.entries()[0].published().unwrap().to_rfc3339()
        );
        assert_eq!(None, feed.entries()[1].published());
        Ok(())
    }

    #[test]
    fn test_write_feed() -> Result<()> {
        let mut out = Vec::new();
        write_feed(
            config(),
            &[post(Some("new"), Some("2021-04-01T10:00:00+0000"))],
            &mut out,
        )?;
        let xml = String::from_utf8_lossy(&out);
        assert!(xml.contains("https://blog.example.org/post/new.html"));
        assert!(xml.contains("Blog do Lemão"));
        Ok(())
    }
}
