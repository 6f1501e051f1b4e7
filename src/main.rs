use anyhow::{anyhow, Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use lemao::build::build_site;
use lemao::cms::CmsClient;
use lemao::config::Config;
use lemao::date::DateFormat;
use lemao::server::{self, Site};
use log::error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = App::new("lemao")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Builds and serves a blog whose posts live in a headless CMS")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("build")
                .about("Fetches every post and writes the site")
                .arg(output_arg()),
        )
        .subcommand(
            SubCommand::with_name("serve")
                .about("Builds the site, serves it, and rebuilds it periodically")
                .arg(output_arg())
                .arg(
                    Arg::with_name("addr")
                        .long("addr")
                        .takes_value(true)
                        .default_value("127.0.0.1:3000")
                        .help("The address to listen on"),
                ),
        )
        .subcommand(
            SubCommand::with_name("browse")
                .about("Reads a served site from the terminal")
                .arg(
                    Arg::with_name("url")
                        .default_value("http://127.0.0.1:3000/")
                        .help("The served site's home page"),
                )
                .arg(
                    Arg::with_name("locale")
                        .long("locale")
                        .takes_value(true)
                        .default_value("pt_BR")
                        .help("The locale for publication dates"),
                )
                .arg(
                    Arg::with_name("timeout")
                        .long("timeout")
                        .takes_value(true)
                        .default_value("10")
                        .help("Seconds to wait for each page"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("build", Some(matches)) => build(matches).await,
        ("serve", Some(matches)) => serve(matches).await,
        ("browse", Some(matches)) => browse(matches).await,
        (name, _) => Err(anyhow!("Unknown subcommand `{}`", name)),
    }
}

fn output_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("output")
        .short("o")
        .long("output")
        .takes_value(true)
        .default_value("_output")
        .help("The directory the site is written to")
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let output = PathBuf::from(matches.value_of("output").unwrap_or("_output"));
    Config::from_directory(&std::env::current_dir()?, &output)
}

async fn build(matches: &ArgMatches<'_>) -> Result<()> {
    let config = load_config(matches)?;
    let cms = CmsClient::new(
        config.cms_endpoint.clone(),
        config.cms_access_token.clone(),
        config.request_timeout,
    )?;
    build_site(&config, &cms).await?;
    Ok(())
}

async fn serve(matches: &ArgMatches<'_>) -> Result<()> {
    let addr: SocketAddr = matches
        .value_of("addr")
        .unwrap_or("127.0.0.1:3000")
        .parse()
        .context("Parsing --addr")?;
    let site = Arc::new(Site::new(load_config(matches)?)?);

    // Whatever was built before stays servable when the CMS is unreachable.
    if let Err(err) = build_site(&site.config, &site.cms).await {
        error!("Building site: {}", err);
    }

    tokio::spawn(server::revalidate(site.clone()));
    server::serve(site, addr).await?;
    Ok(())
}

async fn browse(matches: &ArgMatches<'_>) -> Result<()> {
    let base = Url::parse(matches.value_of("url").unwrap_or("http://127.0.0.1:3000/"))
        .context("Parsing the site URL")?;
    let timeout: u64 = matches
        .value_of("timeout")
        .unwrap_or("10")
        .parse()
        .context("Parsing --timeout")?;
    let date_format = DateFormat::new("%d %b %Y", matches.value_of("locale").unwrap_or("pt_BR"))?;
    lemao::browse::run(base, Duration::from_secs(timeout), date_format).await
}
