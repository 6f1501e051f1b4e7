//! Loads the project configuration from `blog.yaml` and the theme's
//! `theme.yaml`, resolving them into a [`Config`].

use crate::util::open;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// The name of the project file.
pub const PROJECT_FILE: &str = "blog.yaml";

/// The environment variable that overrides `cms.access_token`.
pub const ACCESS_TOKEN_VAR: &str = "CMS_ACCESS_TOKEN";

#[derive(Deserialize)]
struct PageSize(usize);
impl Default for PageSize {
    fn default() -> Self {
        PageSize(1)
    }
}

#[derive(Deserialize)]
struct Project {
    pub title: String,
    pub site_root: Url,

    #[serde(default)]
    pub author: Option<Author>,

    pub cms: Cms,

    #[serde(default)]
    pub home_page_size: PageSize,

    #[serde(default = "default_revalidate_seconds")]
    pub revalidate_seconds: u64,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_date_format")]
    pub date_format: String,

    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_revalidate_seconds() -> u64 {
    60 * 30
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_date_format() -> String {
    String::from("%d %b %Y")
}

fn default_locale() -> String {
    String::from("pt_BR")
}

#[derive(Deserialize)]
struct Cms {
    endpoint: Url,

    #[serde(default)]
    access_token: Option<String>,

    #[serde(default = "default_document_type")]
    document_type: String,
}

fn default_document_type() -> String {
    String::from("post")
}

#[derive(Deserialize)]
struct Theme {
    index_template: Vec<PathBuf>,
    posts_template: Vec<PathBuf>,

    #[serde(default)]
    not_found_template: Vec<PathBuf>,
}

/// The site's author, used for the feed.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Author {
    pub name: String,

    #[serde(default)]
    pub email: Option<String>,
}

pub struct Config {
    pub title: String,
    pub author: Option<Author>,

    pub home_page: Url,
    pub posts_url: Url,
    pub static_url: Url,
    pub atom_url: Url,

    pub cms_endpoint: Url,
    pub cms_access_token: Option<String>,
    pub document_type: String,

    /// The number of posts on the home page, and per load-more page.
    pub home_page_size: usize,

    /// How often the server regenerates the site.
    pub revalidate: Duration,

    /// The bound on each CMS request.
    pub request_timeout: Duration,

    pub date_format: String,
    pub locale: String,

    pub index_template: Vec<PathBuf>,
    pub posts_template: Vec<PathBuf>,
    pub not_found_template: Vec<PathBuf>,
    pub static_source_directory: PathBuf,

    pub root_output_directory: PathBuf,
    pub posts_output_directory: PathBuf,
    pub static_output_directory: PathBuf,
}

impl Config {
    /// Searches `dir` and then its ancestors for `blog.yaml` and loads it.
    pub fn from_directory(dir: &Path, output_directory: &Path) -> Result<Config> {
        let path = dir.join(PROJECT_FILE);
        if path.exists() {
            Config::from_project_file(&path, output_directory)
                .with_context(|| format!("Loading configuration `{}`", path.display()))
        } else {
            match dir.parent() {
                Some(parent) => Config::from_directory(parent, output_directory),
                None => Err(anyhow!(
                    "Could not find `{}` in any parent directory",
                    PROJECT_FILE
                )),
            }
        }
    }

    pub fn from_project_file(path: &Path, output_directory: &Path) -> Result<Config> {
        let project: Project = serde_yaml::from_reader(open(path, "project")?)?;
        let project_root = path.parent().ok_or_else(|| {
            anyhow!(
                "Can't get parent directory for provided project file path '{:?}'",
                path
            )
        })?;

        let theme_dir = project_root.join("theme");
        let theme: Theme = serde_yaml::from_reader(open(&theme_dir.join("theme.yaml"), "theme")?)?;
        let in_theme = |paths: Vec<PathBuf>| -> Vec<PathBuf> {
            paths.iter().map(|relpath| theme_dir.join(relpath)).collect()
        };

        // Relative joins resolve against the last path segment's directory, so
        // the site root needs a trailing slash.
        let site_root = with_trailing_slash(project.site_root);

        Ok(Config {
            title: project.title,
            author: project.author,
            home_page: site_root.clone(),
            posts_url: site_root.join("post/")?,
            static_url: site_root.join("static/")?,
            atom_url: site_root.join("feed.atom")?,
            cms_endpoint: project.cms.endpoint,
            cms_access_token: std::env::var(ACCESS_TOKEN_VAR)
                .ok()
                .or(project.cms.access_token),
            document_type: project.cms.document_type,
            home_page_size: project.home_page_size.0.max(1),
            revalidate: Duration::from_secs(project.revalidate_seconds),
            request_timeout: Duration::from_secs(project.request_timeout_seconds),
            date_format: project.date_format,
            locale: project.locale,
            index_template: in_theme(theme.index_template),
            posts_template: in_theme(theme.posts_template),
            not_found_template: in_theme(theme.not_found_template),
            static_source_directory: theme_dir.join("static"),
            root_output_directory: output_directory.to_owned(),
            posts_output_directory: output_directory.join("post"),
            static_output_directory: output_directory.join("static"),
        })
    }

    /// Returns a copy of this configuration writing into `output_directory`
    /// instead.
    pub fn with_output_directory(&self, output_directory: &Path) -> Config {
        Config {
            title: self.title.clone(),
            author: self.author.clone(),
            home_page: self.home_page.clone(),
            posts_url: self.posts_url.clone(),
            static_url: self.static_url.clone(),
            atom_url: self.atom_url.clone(),
            cms_endpoint: self.cms_endpoint.clone(),
            cms_access_token: self.cms_access_token.clone(),
            document_type: self.document_type.clone(),
            home_page_size: self.home_page_size,
            revalidate: self.revalidate,
            request_timeout: self.request_timeout,
            date_format: self.date_format.clone(),
            locale: self.locale.clone(),
            index_template: self.index_template.clone(),
            posts_template: self.posts_template.clone(),
            not_found_template: self.not_found_template.clone(),
            static_source_directory: self.static_source_directory.clone(),
            root_output_directory: output_directory.to_owned(),
            posts_output_directory: output_directory.join("post"),
            static_output_directory: output_directory.join("static"),
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
