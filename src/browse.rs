//! A terminal reader for a served site. It loads the home page's initial
//! pagination state, prints the listing, and loads more posts on demand
//! through the server's next-page endpoint.

use crate::cms::{self, get_json, ApiPage};
use crate::date::DateFormat;
use crate::pagination::{Outcome, PageSource, Pagination, PostsPagination};
use crate::post::Post;
use crate::server::{NEXT_PAGE_PARAM, NEXT_PAGE_PATH};
use crate::write::STATE_FILE;
use anyhow::{Context, Result};
use futures_util::future::{BoxFuture, FutureExt};
use log::debug;
use reqwest::Client;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

/// Fetches pages from a served site rather than from the CMS directly.
pub struct EndpointClient {
    client: Client,
    base: Url,
}

impl EndpointClient {
    /// Constructs a client for the site served at `base`.
    pub fn new(base: Url, timeout: Duration) -> cms::Result<EndpointClient> {
        Ok(EndpointClient {
            client: Client::builder().timeout(timeout).build()?,
            base,
        })
    }

    /// Fetches the pagination state written beside the home page.
    pub async fn initial_state(&self) -> cms::Result<PostsPagination> {
        get_json(&self.client, self.base.join(STATE_FILE)?).await
    }

    fn next_page_url(&self, cursor: &str) -> cms::Result<Url> {
        let mut url = self.base.join(NEXT_PAGE_PATH)?;
        url.query_pairs_mut().append_pair(NEXT_PAGE_PARAM, cursor);
        Ok(url)
    }

    async fn next_page(&self, cursor: &str) -> cms::Result<ApiPage> {
        let url = self.next_page_url(cursor)?;
        debug!("GET {}", url.path());
        get_json(&self.client, url).await
    }
}

impl PageSource for EndpointClient {
    fn fetch_page<'a>(&'a self, cursor: &'a str) -> BoxFuture<'a, cms::Result<ApiPage>> {
        self.next_page(cursor).boxed()
    }
}

/// Runs the interactive reader against the site at `base` until the user
/// quits, stdin closes, or there are no more posts.
pub async fn run(base: Url, timeout: Duration, date_format: DateFormat<'_>) -> Result<()> {
    let client = EndpointClient::new(base.clone(), timeout)?;
    let initial = client
        .initial_state()
        .await
        .with_context(|| format!("Loading the listing from `{}`", base))?;
    let mut pagination = Pagination::from(initial);
    print!("{}", listing(pagination.posts(), 0, date_format));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while pagination.can_load_more() {
        println!("[Enter] load more posts, [q] quit");
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => return Ok(()),
        };
        if line.trim() == "q" {
            return Ok(());
        }

        let shown = pagination.posts().len();
        match pagination.fetch_and_append(&client, timeout).await {
            Ok(Outcome::Appended(appended)) => {
                print!("{}", listing(&pagination.posts()[shown..], shown, date_format));
                if appended.added == 0 {
                    println!("(no new posts on that page)");
                }
            }
            Ok(Outcome::Exhausted) | Ok(Outcome::Busy) => {}
            Err(err) => println!("Could not load more posts: {}", err),
        }
    }
    println!("No more posts.");
    Ok(())
}

/// Formats `posts` as numbered entries starting after `offset`.
fn listing(posts: &[Post], offset: usize, date_format: DateFormat) -> String {
    let mut out = String::new();
    for (i, post) in posts.iter().enumerate() {
        out.push_str(&format!("{:>3}. {}\n", offset + i + 1, post.title));
        if !post.subtitle.is_empty() {
            out.push_str(&format!("     {}\n", post.subtitle));
        }
        out.push_str(&format!(
            "     {} · {}\n",
            date_format.display(post.first_publication_date.as_deref()),
            post.author
        ));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn client() -> EndpointClient {
        EndpointClient::new(
            Url::parse("http://127.0.0.1:3000/").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_next_page_url() -> cms::Result<()> {
        let url = client().next_page_url("https://blog.cdn.prismic.io/api/v2/documents/search?page=2&x=y")?;
        assert_eq!("/api/posts-next-page", url.path());
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            vec![(
                "next_page".to_owned(),
                "https://blog.cdn.prismic.io/api/v2/documents/search?page=2&x=y".to_owned()
            )],
            pairs
        );
        Ok(())
    }

    #[test]
    fn test_listing() {
        let posts = vec![
            Post {
                uid: Some("one".to_owned()),
                first_publication_date: Some("2021-03-25T19:25:28+0000".to_owned()),
                title: "One".to_owned(),
                subtitle: "First".to_owned(),
                author: "Lemão".to_owned(),
            },
            Post {
                uid: None,
                first_publication_date: None,
                title: "Two".to_owned(),
                subtitle: String::new(),
                author: "Lemão".to_owned(),
            },
        ];
        let date_format = DateFormat::new("%d %b %Y", "en_US").unwrap();
        assert_eq!(
            "  3. One\n     First\n     25 Mar 2021 · Lemão\n  4. Two\n      · Lemão\n",
            listing(&posts, 2, date_format)
        );
    }
}
