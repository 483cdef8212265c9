//! Text and JSON rendering for command output

use anyhow::Result;
use chrono::DateTime;
use pathmark_core::{Host, PageVisit, Url};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Summary printed by `pathmark info`
#[derive(Debug, Serialize)]
pub struct Info {
    pub database: String,
    pub read_only: bool,
    pub state: String,
    pub hosts: usize,
    pub urls: usize,
    pub visits: usize,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Formats epoch seconds as UTC; zero means never
pub fn format_time(secs: i64) -> String {
    if secs <= 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

pub fn url(format: OutputFormat, url: &Url) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(url),
        OutputFormat::Text => {
            println!("{}", url.url);
            if !url.title.is_empty() {
                println!("  title:      {}", url.title);
            }
            println!("  visits:     {} ({} typed)", url.visit_count, url.typed_count);
            println!("  last visit: {}", format_time(url.last_visit_time));
            println!("  zoom:       {}", url.zoom_level);
            if url.hidden {
                println!("  hidden");
            }
            Ok(())
        }
    }
}

pub fn urls(format: OutputFormat, urls: &[Url]) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(urls),
        OutputFormat::Text => {
            if urls.is_empty() {
                println!("No urls found.");
            }
            for url in urls {
                println!(
                    "{:>5}  {}  {}  {}",
                    url.visit_count,
                    format_time(url.last_visit_time),
                    url.url,
                    url.title
                );
            }
            Ok(())
        }
    }
}

pub fn hosts(format: OutputFormat, hosts: &[Host]) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(hosts),
        OutputFormat::Text => {
            if hosts.is_empty() {
                println!("No hosts found.");
            }
            for host in hosts {
                println!("{:>5}  {}  {}", host.visit_count, host.url, host.title);
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct VisitRow<'a> {
    id: i64,
    url: &'a str,
    visit_time: i64,
    visit_type: &'static str,
    referring_visit: Option<i64>,
}

pub fn visits(format: OutputFormat, visits: &[PageVisit], urls: &[Url]) -> Result<()> {
    let addresses: HashMap<i64, &str> = urls.iter().map(|u| (u.id, u.url.as_str())).collect();
    let rows: Vec<VisitRow<'_>> = visits
        .iter()
        .map(|v| VisitRow {
            id: v.id,
            url: addresses.get(&v.url.id).copied().unwrap_or("?"),
            visit_time: v.visit_time,
            visit_type: v.visit_type.as_str(),
            referring_visit: v.referring_visit,
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No visits found.");
            }
            for row in &rows {
                println!(
                    "{:>6}  {}  {:<15}  {}",
                    row.id,
                    format_time(row.visit_time),
                    row.visit_type,
                    row.url
                );
            }
            Ok(())
        }
    }
}

pub fn info(format: OutputFormat, info: &Info) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(info),
        OutputFormat::Text => {
            println!("Database: {}", info.database);
            if info.read_only {
                println!("Mode:     read-only");
            }
            println!("State:    {}", info.state);
            println!("Hosts:    {}", info.hosts);
            println!("Urls:     {}", info.urls);
            println!("Visits:   {}", info.visits);
            Ok(())
        }
    }
}

pub fn message(format: OutputFormat, text: &str) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "message": text })),
        OutputFormat::Text => {
            println!("{}", text);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "-");
        assert_eq!(format_time(86_400), "1970-01-02 00:00:00");
    }
}
