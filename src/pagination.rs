//! The read-more flow. A [`Pagination`] starts from the posts rendered on the
//! home page plus the cursor to the next page, and grows by appending pages
//! fetched through a [`PageSource`] when the user asks for more.
//!
//! The state carries an explicit phase: it is either idle (with or without a
//! cursor) or fetching a particular cursor. [`Pagination::begin`] moves from
//! idle to fetching and hands out a [`Ticket`]; [`Pagination::complete`] and
//! [`Pagination::abort`] consume that ticket and move back to idle. This
//! allows at most one fetch in flight, and lets event-loop callers drive the
//! transitions directly. [`Pagination::fetch_and_append`] runs the whole
//! cycle for callers that can simply await.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cms::{self, ApiPage};
use crate::post::{project_page, MalformedRecord, Post};

/// Something that can fetch the page a cursor points at.
pub trait PageSource {
    fn fetch_page<'a>(&'a self, cursor: &'a str) -> BoxFuture<'a, cms::Result<ApiPage>>;
}

/// The listing as produced by page generation: the first page of projected
/// posts and the cursor for the next one.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PostsPagination {
    pub results: Vec<Post>,

    #[serde(default)]
    pub next_page: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
enum Phase {
    Idle { next: Option<String> },
    Fetching { cursor: String },
}

/// The accumulated listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Pagination {
    posts: Vec<Post>,
    phase: Phase,
}

/// Proof that a fetch was started. Not `Clone`: each fetch completes at most
/// once.
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket {
    cursor: String,
}

impl Ticket {
    /// The cursor to fetch.
    pub fn cursor(&self) -> &str {
        &self.cursor
    }
}

/// What a load-more request did.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// A page was fetched and appended.
    Appended(Appended),

    /// There's no next page; nothing happened.
    Exhausted,

    /// A fetch is already in flight; nothing happened.
    Busy,
}

/// Details of an appended page.
#[derive(Debug, Default, PartialEq)]
pub struct Appended {
    /// The number of posts appended.
    pub added: usize,

    /// Posts skipped because their `uid` was already listed.
    pub duplicates: usize,

    /// Records skipped because they couldn't be projected.
    pub malformed: Vec<MalformedRecord>,
}

impl From<PostsPagination> for Pagination {
    fn from(initial: PostsPagination) -> Pagination {
        Pagination {
            posts: initial.results,
            phase: Phase::Idle {
                next: initial.next_page,
            },
        }
    }
}

impl Pagination {
    pub fn new(posts: Vec<Post>, next_page: Option<String>) -> Pagination {
        Pagination::from(PostsPagination {
            results: posts,
            next_page,
        })
    }

    /// The posts accumulated so far, in display order.
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    /// The cursor of the next page to fetch (or being fetched).
    pub fn next_cursor(&self) -> Option<&str> {
        match &self.phase {
            Phase::Idle { next } => next.as_deref(),
            Phase::Fetching { cursor } => Some(cursor),
        }
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.phase, Phase::Fetching { .. })
    }

    /// Whether a load-more action should be offered right now.
    pub fn can_load_more(&self) -> bool {
        matches!(self.phase, Phase::Idle { next: Some(_) })
    }

    /// Moves to the fetching phase and returns the ticket for the fetch.
    /// Returns `None`, leaving the state untouched, when there's no next page
    /// or a fetch is already in flight.
    pub fn begin(&mut self) -> Option<Ticket> {
        let cursor = match &mut self.phase {
            Phase::Idle { next } => next.take()?,
            Phase::Fetching { .. } => return None,
        };
        self.phase = Phase::Fetching {
            cursor: cursor.clone(),
        };
        Some(Ticket { cursor })
    }

    /// Appends the projected posts of `page`, fetched for `ticket`, and
    /// replaces the cursor with the page's `next_page`. Records that fail to
    /// project are skipped and reported, as are posts whose `uid` is already
    /// listed. Fails with [`Error::StaleTicket`], leaving the state untouched,
    /// if `ticket` isn't the fetch in flight.
    pub fn complete(&mut self, ticket: Ticket, page: ApiPage) -> Result<Appended> {
        self.check_ticket(&ticket)?;

        let (posts, malformed) = project_page(&page);
        for err in &malformed {
            warn!("Skipping post: {}", err);
        }

        let mut seen: HashSet<String> = self.posts.iter().filter_map(|p| p.uid.clone()).collect();
        let mut appended = Appended {
            malformed,
            ..Appended::default()
        };
        for post in posts {
            if let Some(uid) = &post.uid {
                if !seen.insert(uid.clone()) {
                    debug!("Skipping duplicate post `{}`", uid);
                    appended.duplicates += 1;
                    continue;
                }
            }
            self.posts.push(post);
            appended.added += 1;
        }

        self.phase = Phase::Idle {
            next: page.next_page,
        };
        Ok(appended)
    }

    /// Abandons the fetch for `ticket`, restoring its cursor so the user can
    /// try again. Stale tickets are ignored.
    pub fn abort(&mut self, ticket: Ticket) {
        if self.check_ticket(&ticket).is_ok() {
            self.phase = Phase::Idle {
                next: Some(ticket.cursor),
            };
        }
    }

    /// Fetches the next page from `source` and appends it. When there's no
    /// next page, or a fetch is already in flight, this is a no-op reported
    /// through the [`Outcome`]. On failure (including exceeding `timeout`)
    /// the posts and cursor are left exactly as they were.
    pub async fn fetch_and_append<S>(&mut self, source: &S, timeout: Duration) -> Result<Outcome>
    where
        S: PageSource + ?Sized,
    {
        let ticket = match self.begin() {
            Some(ticket) => ticket,
            None if self.is_fetching() => return Ok(Outcome::Busy),
            None => return Ok(Outcome::Exhausted),
        };

        debug!("Fetching next page `{}`", ticket.cursor());
        let fetched = tokio::time::timeout(timeout, source.fetch_page(ticket.cursor())).await;
        match fetched {
            Ok(Ok(page)) => Ok(Outcome::Appended(self.complete(ticket, page)?)),
            Ok(Err(err)) => {
                self.abort(ticket);
                Err(Error::Fetch(err))
            }
            Err(_) => {
                self.abort(ticket);
                Err(Error::TimedOut(timeout))
            }
        }
    }

    fn check_ticket(&self, ticket: &Ticket) -> Result<()> {
        match &self.phase {
            Phase::Fetching { cursor } if *cursor == ticket.cursor => Ok(()),
            _ => Err(Error::StaleTicket),
        }
    }
}

/// The result of a fallible pagination step.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failed pagination step. None of these change the listing.
#[derive(Debug)]
pub enum Error {
    /// Returned when fetching the next page failed.
    Fetch(cms::Error),

    /// Returned when fetching the next page took longer than allowed.
    TimedOut(Duration),

    /// Returned when completing a fetch that isn't the one in flight.
    StaleTicket,
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Fetch(err) => write!(f, "fetching next page: {}", err),
            Error::TimedOut(timeout) => {
                write!(f, "fetching next page: timed out after {:?}", timeout)
            }
            Error::StaleTicket => write!(f, "no fetch in flight for this cursor"),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Fetch(err) => Some(err),
            Error::TimedOut(_) => None,
            Error::StaleTicket => None,
        }
    }
}

impl From<cms::Error> for Error {
    fn from(err: cms::Error) -> Error {
        Error::Fetch(err)
    }
}
