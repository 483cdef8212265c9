//! pathmark - command line front end for the browsing history store
//!
//! Every command goes through the history service, exactly like a browser
//! embedding the library would.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/pathmark/history.db (~/.local/share/pathmark/history.db)
//! - Logs: $XDG_STATE_HOME/pathmark/pathmark.log (~/.local/state/pathmark/pathmark.log)
//! - Config: $XDG_CONFIG_HOME/pathmark/config.toml (~/.config/pathmark/config.toml)

mod render;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pathmark_core::db::host_candidates;
use pathmark_core::{
    Config, Error, Host, HistoryService, PageVisit, Query, SortType, VisitType,
};
use render::OutputFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pathmark")]
#[command(about = "Record and query browsing history")]
#[command(version)]
struct Args {
    /// History database (defaults to the configured path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Open the database read-only
    #[arg(long, global = true)]
    read_only: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

/// Filters shared by the listing commands
#[derive(clap::Args)]
struct QueryArgs {
    /// Only entries whose url or title contains this text (repeatable)
    #[arg(short, long = "search")]
    search: Vec<String>,

    /// Earliest visit time, epoch seconds
    #[arg(long)]
    from: Option<i64>,

    /// Latest visit time, epoch seconds
    #[arg(long)]
    to: Option<i64>,

    /// Result order: none, recent, oldest, most-visited, least-visited
    #[arg(long, default_value = "none")]
    sort: SortType,

    /// Maximum number of results (0 for all)
    #[arg(short = 'n', long, default_value = "0")]
    limit: u32,

    /// Skip urls hidden from overviews
    #[arg(long)]
    skip_hidden: bool,

    /// Skip local files
    #[arg(long)]
    skip_local: bool,
}

impl QueryArgs {
    fn to_query(&self) -> Query {
        let mut query = Query::new()
            .sort(self.sort)
            .limit(self.limit)
            .ignore_hidden(self.skip_hidden)
            .ignore_local(self.skip_local);
        if let Some(from) = self.from {
            query = query.from_time(from);
        }
        if let Some(to) = self.to {
            query = query.to_time(to);
        }
        for term in &self.search {
            query = query.substring(term);
        }
        query
    }
}

#[derive(Subcommand)]
enum Command {
    /// Record a visit
    Visit {
        url: String,

        /// Page title, used when the url is new
        #[arg(long)]
        title: Option<String>,

        /// Visit type (link, typed, startup, form_submission, ...)
        #[arg(long = "type", default_value = "link")]
        visit_type: VisitType,

        /// Visit time in epoch seconds (defaults to now)
        #[arg(long)]
        time: Option<i64>,

        /// Id of the visit that led here
        #[arg(long)]
        referrer: Option<i64>,
    },

    /// List urls
    Urls {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List hosts
    Hosts {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List visits
    Visits {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show one url
    Show { url: String },

    /// Set the title of a visited url
    Title { url: String, title: String },

    /// Set the zoom level of a url and its host
    Zoom { url: String, level: f64 },

    /// Hide a url from overviews (or show it again)
    Hide {
        url: String,

        #[arg(long)]
        show: bool,
    },

    /// Delete urls and their visits
    Delete {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Delete a host with all of its urls
    DeleteHost { url: String },

    /// Delete all history
    Clear {
        /// Required, there is no undo
        #[arg(long)]
        yes: bool,
    },

    /// Show database location and row counts
    Info,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        pathmark_core::logging::init(&config.logging).context("failed to initialize logging")?;

    if let Some(db) = &args.db {
        config.history.database_path = Some(db.clone());
    }
    if args.read_only {
        config.history.read_only = true;
    }

    let options = config.history.service_options();
    tracing::info!(
        path = %options.path.display(),
        read_only = options.read_only,
        "pathmark starting"
    );

    let service = HistoryService::open(options).context("failed to start history service")?;
    let result = run(&service, &args);
    let shutdown = service.quit().wait();

    result?;
    shutdown.context("failed to shut down history service")?;
    Ok(())
}

fn run(service: &HistoryService, args: &Args) -> Result<()> {
    let format = args.format;

    match &args.command {
        Command::Visit {
            url,
            title,
            visit_type,
            time,
            referrer,
        } => {
            let mut visit = match time {
                Some(time) => PageVisit::new(url.as_str(), *time, *visit_type),
                None => PageVisit::now(url.as_str(), *visit_type),
            };
            if let Some(title) = title {
                visit = visit.with_title(title.as_str());
            }
            if let Some(referrer) = referrer {
                visit = visit.with_referrer(*referrer);
            }
            service
                .add_visit(visit)
                .wait()
                .with_context(|| format!("failed to record visit to {}", url))?;

            let stored = service.get_url(url.as_str()).wait()?;
            render::url(format, &stored)?;
        }

        Command::Urls { query } => {
            let urls = service
                .query_urls(query.to_query())
                .wait()
                .context("failed to query urls")?;
            render::urls(format, &urls)?;
        }

        Command::Hosts { query } => {
            let hosts = service
                .query_hosts(query.to_query())
                .wait()
                .context("failed to query hosts")?;
            render::hosts(format, &hosts)?;
        }

        Command::Visits { query } => {
            let visits = service
                .query_visits(query.to_query())
                .wait()
                .context("failed to query visits")?;
            // Visit rows only carry the url id
            let urls = service
                .query_urls(Query::new())
                .wait()
                .context("failed to load urls")?;
            render::visits(format, &visits, &urls)?;
        }

        Command::Show { url } => {
            let stored = service.get_url(url.as_str()).wait().map_err(|e| match e {
                Error::NotFound(_) => anyhow::anyhow!("{} is not in the history", url),
                other => anyhow::Error::new(other),
            })?;
            render::url(format, &stored)?;
        }

        Command::Title { url, title } => {
            service
                .set_url_title(url.as_str(), title.as_str())
                .wait()
                .with_context(|| format!("failed to set title of {}", url))?;
        }

        Command::Zoom { url, level } => {
            if !level.is_finite() || *level <= 0.0 {
                bail!("zoom level must be a positive number");
            }
            service
                .set_url_zoom_level(url.as_str(), *level)
                .wait()
                .with_context(|| format!("failed to set zoom level of {}", url))?;
        }

        Command::Hide { url, show } => {
            service
                .set_url_hidden(url.as_str(), !show)
                .wait()
                .with_context(|| format!("failed to update {}", url))?;
        }

        Command::Delete { urls } => delete_urls(&service, &urls, format)?,

        Command::DeleteHost { url } => delete_host(service, url, format)?,

        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to clear history without --yes");
            }
            service.clear().wait().context("failed to clear history")?;
            render::message(format, "history cleared")?;
        }

        Command::Info => {
            let info = render::Info {
                database: service.path().display().to_string(),
                read_only: service.is_read_only(),
                state: service.state().to_string(),
                hosts: service.get_hosts().wait()?.len(),
                urls: service.query_urls(Query::new()).wait()?.len(),
                visits: service.query_visits(Query::new()).wait()?.len(),
            };
            render::info(format, &info)?;
        }
    }

    Ok(())
}

/// Deletes the stored urls among `urls` and reports how many there were
fn delete_urls(service: &HistoryService, urls: &[String], format: OutputFormat) -> Result<()> {
    let mut doomed = Vec::new();
    for url in urls {
        match service.get_url(url.as_str()).wait() {
            Ok(row) => doomed.push(row),
            Err(Error::NotFound(_)) => eprintln!("{} is not in the history, skipped", url),
            Err(e) => return Err(e).with_context(|| format!("failed to look up {}", url)),
        }
    }

    let deleted = doomed.len();
    if deleted > 0 {
        service
            .delete_urls(doomed)
            .wait()
            .context("failed to delete urls")?;
        tracing::info!(count = deleted, "Deleted urls");
    }
    render::message(format, &format!("deleted {} url(s)", deleted))
}

/// Accepts either a host key such as `http://example.com/` or any url on it
fn delete_host(service: &HistoryService, url: &str, format: OutputFormat) -> Result<()> {
    for key in host_candidates(url).keys {
        match service.delete_host(Host::new(key.as_str(), "")).wait() {
            Ok(()) => {
                tracing::info!(host = %key, "Deleted host");
                return render::message(format, &format!("deleted host {}", key));
            }
            Err(Error::NotFound(_)) => continue,
            Err(e) => return Err(e).with_context(|| format!("failed to delete host {}", key)),
        }
    }
    bail!("no stored host matches {}", url)
}
