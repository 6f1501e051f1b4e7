//! Exports the [`build_site`] function which stitches together the high-level
//! steps of generating the static site: fetching posts from the CMS
//! ([`crate::cms`]), projecting them ([`crate::post`]), rendering the home,
//! post and not-found pages ([`crate::write`]), copying the theme's static
//! assets, and generating the Atom feed.
//!
//! The site is built into a staging directory beside the output directory and
//! swapped into place only once every step has succeeded, so a server reading
//! the output directory never sees a half-built site.

use crate::cms::{self, CmsClient};
use crate::config::Config;
use crate::date::{DateFormat, UnknownLocale};
use crate::feed::{write_feed, Error as FeedError, FeedConfig};
use crate::pagination::PostsPagination;
use crate::post::{project_all, project_page, MalformedRecord, Post, PostDetail};
use crate::util::sibling;
use crate::write::{Error as WriteError, Templates, Writer};
use gtmpl::Template;
use log::{error, info, warn};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Used when the theme doesn't provide a not-found template.
const DEFAULT_NOT_FOUND_TEMPLATE: &str = "<!DOCTYPE html><html><head><title>{{.title}}</title></head>\
     <body><h1>Not found</h1><p><a href=\"{{.home_page}}\">{{.title}}</a></p></body></html>";

/// Summarizes a build.
#[derive(Debug, Default, PartialEq)]
pub struct Report {
    /// The number of posts on the home page.
    pub listed: usize,

    /// The number of post pages written.
    pub pages: usize,

    /// The number of records skipped as malformed.
    pub malformed: usize,
}

/// Everything fetched from the CMS for one build.
pub struct Content {
    /// The first page, which becomes the home page's initial state.
    pub listing: PostsPagination,

    /// Every post that can get a page of its own.
    pub details: Vec<PostDetail>,

    /// Every post that can be listed, for the feed.
    pub posts: Vec<Post>,

    pub malformed: Vec<MalformedRecord>,
}

/// Builds the site described by `config` from the CMS behind `cms`. See the
/// module documentation for the steps.
pub async fn build_site(config: &Config, cms: &CmsClient) -> Result<Report> {
    let templates = load_templates(config)?;
    let date_format = DateFormat::new(&config.date_format, &config.locale)?;

    let content = fetch_content(config, cms).await?;

    let staging = sibling(&config.root_output_directory, "staging");
    let report = write_site(
        &config.with_output_directory(&staging),
        &templates,
        date_format,
        &content,
    )?;
    swap(&staging, &config.root_output_directory)?;

    info!(
        "Built {} post pages into `{}` ({} listed, {} malformed records skipped)",
        report.pages,
        config.root_output_directory.display(),
        report.listed,
        report.malformed,
    );
    Ok(report)
}

/// Fetches the home page listing and every post. Malformed records are logged
/// and left out.
pub async fn fetch_content(config: &Config, cms: &CmsClient) -> Result<Content> {
    let first = cms
        .get_by_type(&config.document_type, config.home_page_size)
        .await?;
    let (results, mut malformed) = project_page(&first);
    let listing = PostsPagination {
        results,
        next_page: first.next_page,
    };

    let records = cms.get_all_by_type(&config.document_type).await?;
    let (posts, _) = project_all(&records, Post::project);
    let (details, malformed_details) = project_all(&records, PostDetail::project);
    // The first page's records are enumerated again here.
    for err in malformed_details {
        if !malformed.contains(&err) {
            malformed.push(err);
        }
    }

    for err in &malformed {
        warn!("Skipping post: {}", err);
    }

    Ok(Content {
        listing,
        details,
        posts,
        malformed,
    })
}

/// Writes the whole site for `content` into the output directories named by
/// `config`, replacing whatever was there.
pub fn write_site(
    config: &Config,
    templates: &Templates,
    date_format: DateFormat,
    content: &Content,
) -> Result<Report> {
    rmdir(&config.root_output_directory)?;

    let writer = writer(config, templates, date_format);
    writer.write_home(&config.root_output_directory, &content.listing)?;
    let pages = writer.write_posts(&config.posts_output_directory, &content.details)?;
    writer.write_not_found(&config.root_output_directory)?;

    if config.static_source_directory.is_dir() {
        copy_dir(
            &config.static_source_directory,
            &config.static_output_directory,
        )?;
    }

    write_feed(
        FeedConfig {
            title: config.title.clone(),
            id: config.home_page.to_string(),
            author: config.author.clone(),
            home_page: config.home_page.clone(),
            posts_url: config.posts_url.clone(),
        },
        &content.posts,
        File::create(config.root_output_directory.join("feed.atom"))?,
    )?;

    Ok(Report {
        listed: content.listing.results.len(),
        pages: pages.len(),
        malformed: content.malformed.len(),
    })
}

/// Constructs the page [`Writer`] for `config`.
pub fn writer<'a>(
    config: &'a Config,
    templates: &'a Templates,
    date_format: DateFormat<'a>,
) -> Writer<'a> {
    Writer {
        templates,
        title: &config.title,
        home_page: &config.home_page,
        posts_url: &config.posts_url,
        static_url: &config.static_url,
        atom_url: &config.atom_url,
        date_format,
    }
}

/// Loads and validates the theme's templates.
pub fn load_templates(config: &Config) -> Result<Templates> {
    Ok(Templates {
        index: parse_template(config.index_template.iter())?,
        post: parse_template(config.posts_template.iter())?,
        not_found: match config.not_found_template.is_empty() {
            true => DEFAULT_NOT_FOUND_TEMPLATE.to_owned(),
            false => parse_template(config.not_found_template.iter())?,
        },
    })
}

// Loads the template file contents, concatenating them in order, and checks
// that the result parses.
fn parse_template<P: AsRef<Path>>(template_files: impl Iterator<Item = P>) -> Result<String> {
    let mut contents = String::new();
    for template_file in template_files {
        use std::io::Read;
        let template_file = template_file.as_ref();
        File::open(template_file)
            .map_err(|e| Error::OpenTemplateFile {
                path: template_file.to_owned(),
                err: e,
            })?
            .read_to_string(&mut contents)?;
        contents.push(' ');
    }

    let mut template = Template::default();
    template
        .parse(contents.as_str())
        .map_err(|e| Error::ParseTemplate(e.to_string()))?;
    Ok(contents)
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for result in WalkDir::new(src) {
        let entry = result?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Moves the freshly built `staging` directory to `live`, discarding the
/// previous build. If `staging` can't be moved into place, the previous build
/// is put back.
fn swap(staging: &Path, live: &Path) -> Result<()> {
    let old = sibling(live, "old");
    rmdir(&old)?;
    let moved = live.exists();
    if moved {
        std::fs::rename(live, &old)?;
    }
    if let Err(err) = std::fs::rename(staging, live) {
        if moved {
            if let Err(restore) = std::fs::rename(&old, live) {
                error!(
                    "Restoring `{}` from `{}`: {}",
                    live.display(),
                    old.display(),
                    restore
                );
            }
        }
        return Err(Error::Io(err));
    }
    rmdir(&old)
}

fn rmdir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(x) => Ok(x),
        Err(e) => match e.kind() {
            std::io::ErrorKind::NotFound => Ok(()),
            _ => Err(Error::Clean {
                path: dir.to_owned(),
                err: e,
            }),
        },
    }
}

/// The result of a fallible build step.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for building a site. Errors can be during fetching, writing,
/// cleaning output directories, parsing template files, and other I/O.
#[derive(Debug)]
pub enum Error {
    /// Returned for errors fetching posts from the CMS.
    Cms(cms::Error),

    /// Returned for errors writing pages to disk as HTML files.
    Write(WriteError),

    /// Returned for I/O problems while cleaning output directories.
    Clean { path: PathBuf, err: std::io::Error },

    /// Returned for I/O problems while opening template files.
    OpenTemplateFile { path: PathBuf, err: std::io::Error },

    /// Returned for errors parsing template files.
    ParseTemplate(String),

    /// Returned when the configured date locale is unknown.
    Locale(UnknownLocale),

    /// Returned for errors writing the feed.
    Feed(FeedError),

    /// Returned for errors walking the static directory.
    WalkDir(walkdir::Error),

    /// Returned for other I/O errors.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Cms(err) => write!(f, "Fetching posts: {}", err),
            Error::Write(err) => err.fmt(f),
            Error::Clean { path, err } => {
                write!(f, "Cleaning directory '{}': {}", path.display(), err)
            }
            Error::OpenTemplateFile { path, err } => {
                write!(f, "Opening template file '{}': {}", path.display(), err)
            }
            Error::ParseTemplate(err) => err.fmt(f),
            Error::Locale(err) => err.fmt(f),
            Error::Feed(err) => err.fmt(f),
            Error::WalkDir(err) => err.fmt(f),
            Error::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Cms(err) => Some(err),
            Error::Write(err) => Some(err),
            Error::Clean { path: _, err } => Some(err),
            Error::OpenTemplateFile { path: _, err } => Some(err),
            Error::ParseTemplate(_) => None,
            Error::Locale(err) => Some(err),
            Error::Feed(err) => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for Error {
    /// Converts [`std::io::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<cms::Error> for Error {
    fn from(err: cms::Error) -> Error {
        Error::Cms(err)
    }
}

impl From<WriteError> for Error {
    /// Converts [`WriteError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: WriteError) -> Error {
        Error::Write(err)
    }
}

impl From<FeedError> for Error {
    /// Converts [`FeedError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: FeedError) -> Error {
        Error::Feed(err)
    }
}

impl From<UnknownLocale> for Error {
    fn from(err: UnknownLocale) -> Error {
        Error::Locale(err)
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}
