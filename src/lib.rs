//! The library code for the `lemao` blog generator. The site's posts live in
//! a headless CMS; the architecture breaks down into:
//!
//! 1. Fetching raw records from the CMS ([`crate::cms`])
//! 2. Projecting them into display models ([`crate::post`]), which the
//!    rich-text renderer ([`crate::richtext`]) and the reading-time estimator
//!    ([`crate::reading_time`]) work from
//! 3. Rendering the home page, post pages and feed to disk
//!    ([`crate::write`], [`crate::feed`], orchestrated by [`crate::build`])
//!
//! The home page carries only the first page of posts plus a cursor for the
//! next one. Further pages are loaded on demand through the pagination
//! accumulator ([`crate::pagination`]), either by the page's own script or by
//! the terminal reader ([`crate::browse`]), both of which go through the
//! server's next-page endpoint ([`crate::server`]). The server also
//! regenerates the site periodically so newly published posts show up.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod browse;
pub mod build;
pub mod cms;
pub mod config;
pub mod date;
#[cfg(test)]
mod fake_cms;
pub mod feed;
pub mod pagination;
pub mod post;
pub mod reading_time;
pub mod richtext;
pub mod server;
pub mod util;
pub mod write;
