//! Hosts table accessors and host resolution

use super::query::{order_clause, SqlBuilder};
use super::{HistoryStore, RowKey};
use crate::error::{Error, Result};
use crate::types::{Host, Query};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use url::Url as ParsedUrl;

/// Bucket for `file://` URLs
pub const LOCAL_FILES_HOST: &str = "file://";
pub const LOCAL_FILES_TITLE: &str = "Local files";
/// Bucket for `about:` pages
pub const ABOUT_HOST: &str = "about:";
/// Bucket for anything that does not parse or has no hostname
pub const OTHERS_HOST: &str = "others:";
pub const OTHERS_TITLE: &str = "Others";

const HOST_COLUMNS: &str =
    "hosts.id, hosts.url, hosts.title, hosts.visit_count, hosts.zoom_level";

/// Lookup keys a URL may be stored under, most specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCandidates {
    pub keys: Vec<String>,
    /// Title for a freshly created host
    pub title: String,
}

impl HostCandidates {
    fn bucket(key: &str, title: &str) -> Self {
        Self {
            keys: vec![key.to_string()],
            title: title.to_string(),
        }
    }
}

/// Derive the host keys for a raw URL.
///
/// `https` URLs also try the `http` key, and `www.`-prefixed names also try
/// the bare name (and the other way around), so the same site lands on one
/// host row however it was first reached.
pub fn host_candidates(raw: &str) -> HostCandidates {
    let parsed = match ParsedUrl::parse(raw.trim()) {
        Ok(parsed) => parsed,
        Err(_) => return HostCandidates::bucket(OTHERS_HOST, OTHERS_TITLE),
    };

    match parsed.scheme() {
        "file" => return HostCandidates::bucket(LOCAL_FILES_HOST, LOCAL_FILES_TITLE),
        "about" => return HostCandidates::bucket(ABOUT_HOST, ABOUT_HOST),
        _ => {}
    }

    let hostname = match parsed.host_str() {
        Some(h) if !h.is_empty() => h.to_lowercase(),
        _ => return HostCandidates::bucket(OTHERS_HOST, OTHERS_TITLE),
    };
    let scheme = parsed.scheme();

    let mut keys = vec![format!("{}://{}/", scheme, hostname)];
    if scheme == "https" {
        keys.push(format!("http://{}/", hostname));
    }
    match hostname.strip_prefix("www.") {
        Some(bare) if !bare.is_empty() => keys.push(format!("{}://{}/", scheme, bare)),
        _ => keys.push(format!("{}://www.{}/", scheme, hostname)),
    }

    HostCandidates {
        keys,
        title: hostname,
    }
}

impl HistoryStore {
    // ============================================
    // Host operations
    // ============================================

    /// Insert a host; its id is filled in from the new row
    pub fn add_host(&self, host: &mut Host) -> Result<i64> {
        self.ensure_writable()?;
        self.conn.execute(
            "INSERT INTO hosts (url, title, visit_count, zoom_level) VALUES (?1, ?2, ?3, ?4)",
            params![host.url, host.title, host.visit_count, host.zoom_level],
        )?;
        host.id = self.conn.last_insert_rowid();
        tracing::debug!(id = host.id, url = %host.url, "Inserted host");
        Ok(host.id)
    }

    /// Persist every column of a saved host
    pub fn update_host(&self, host: &Host) -> Result<()> {
        self.ensure_writable()?;
        if !host.is_saved() {
            return Err(Error::InvalidArgument(format!(
                "cannot update unsaved host {}",
                host.url
            )));
        }
        let changed = self.conn.execute(
            "UPDATE hosts SET url = ?1, title = ?2, visit_count = ?3, zoom_level = ?4 WHERE id = ?5",
            params![host.url, host.title, host.visit_count, host.zoom_level, host.id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("host {}", host.id)));
        }
        Ok(())
    }

    /// Get a host by id or url
    pub fn get_host(&self, key: RowKey<'_>) -> Result<Option<Host>> {
        let host = match key {
            RowKey::Id(id) => self
                .conn
                .query_row(
                    &format!("SELECT {} FROM hosts WHERE id = ?1", HOST_COLUMNS),
                    [id],
                    Self::row_to_host,
                )
                .optional()?,
            RowKey::Url(url) => self
                .conn
                .query_row(
                    &format!("SELECT {} FROM hosts WHERE url = ?1", HOST_COLUMNS),
                    [url],
                    Self::row_to_host,
                )
                .optional()?,
        };
        Ok(host)
    }

    /// All hosts in insertion order
    pub fn all_hosts(&self) -> Result<Vec<Host>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM hosts ORDER BY hosts.id", HOST_COLUMNS))?;
        let hosts = stmt
            .query_map([], Self::row_to_host)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hosts)
    }

    /// Hosts matching a query.
    ///
    /// Joins `urls` only when a filter needs URL columns, and `visits` only
    /// for a time range.
    pub fn find_hosts(&self, query: &Query) -> Result<Vec<Host>> {
        let needs_urls = !query.substrings.is_empty() || query.has_time_range() || query.ignore_hidden;

        let mut builder = SqlBuilder::new(format!("SELECT {} FROM hosts", HOST_COLUMNS));
        if needs_urls {
            builder.join("JOIN urls ON urls.host = hosts.id");
        }
        if query.has_time_range() {
            builder
                .join("JOIN visits ON visits.url = urls.id")
                .time_range("visits.visit_time", query);
        }
        if let Some(host_id) = query.host {
            let p = builder.bind(host_id);
            builder.condition(format!("hosts.id = {}", p));
        }
        if query.ignore_hidden {
            builder.condition("urls.hidden_from_overview = 0");
        }
        if query.ignore_local {
            builder.condition("hosts.url NOT LIKE 'file:%'");
        }
        if needs_urls {
            builder.substrings(
                &["hosts.url", "hosts.title", "urls.url", "urls.title"],
                &query.substrings,
            );
        }
        builder
            .group_by("hosts.id")
            .order_by(order_clause(
                query.sort,
                "hosts.visit_count",
                "(SELECT MAX(u.last_visit_time) FROM urls u WHERE u.host = hosts.id)",
            ))
            .limit(query.limit);

        let (sql, values) = builder.build();
        tracing::trace!(%sql, "find_hosts");
        let mut stmt = self.conn.prepare(&sql)?;
        let hosts = stmt
            .query_map(params_from_iter(values), Self::row_to_host)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hosts)
    }

    /// Delete a host; its urls and their visits go with it
    pub fn delete_host(&self, key: RowKey<'_>) -> Result<usize> {
        self.ensure_writable()?;
        let deleted = match key {
            RowKey::Id(id) => self.conn.execute("DELETE FROM hosts WHERE id = ?1", [id])?,
            RowKey::Url(url) => self.conn.execute("DELETE FROM hosts WHERE url = ?1", [url])?,
        };
        Ok(deleted)
    }

    /// Delete every host no url refers to anymore
    pub fn delete_orphan_hosts(&self) -> Result<usize> {
        self.ensure_writable()?;
        let deleted = self.conn.execute(
            r#"
            DELETE FROM hosts WHERE id IN (
                SELECT hosts.id FROM hosts
                LEFT JOIN urls ON urls.host = hosts.id
                WHERE urls.host IS NULL
            )
            "#,
            [],
        )?;
        if deleted > 0 {
            tracing::debug!(deleted, "Deleted orphan hosts");
        }
        Ok(deleted)
    }

    /// Find the stored host for a URL.
    ///
    /// Tries every candidate key in order. On a total miss a new host is
    /// inserted under the first key when `create` is set.
    pub fn host_for_url(&self, url: &str, create: bool) -> Result<Option<Host>> {
        let candidates = host_candidates(url);
        for key in &candidates.keys {
            if let Some(host) = self.get_host(RowKey::Url(key))? {
                return Ok(Some(host));
            }
        }

        if !create {
            return Ok(None);
        }

        let mut host = Host::new(candidates.keys[0].clone(), candidates.title);
        self.add_host(&mut host)?;
        Ok(Some(host))
    }

    fn row_to_host(row: &Row) -> rusqlite::Result<Host> {
        let title: Option<String> = row.get(2)?;
        Ok(Host {
            id: row.get(0)?,
            url: row.get(1)?,
            title: title.unwrap_or_default(),
            visit_count: row.get(3)?,
            zoom_level: row.get(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SortType, Url};

    fn store() -> HistoryStore {
        let store = HistoryStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    #[test]
    fn test_candidates_for_plain_http() {
        let c = host_candidates("http://www.gnome.org/about/index.html");
        assert_eq!(
            c.keys,
            vec!["http://www.gnome.org/", "http://gnome.org/"]
        );
        assert_eq!(c.title, "www.gnome.org");
    }

    #[test]
    fn test_candidates_for_https_without_www() {
        let c = host_candidates("https://Example.com:8443/x");
        assert_eq!(
            c.keys,
            vec![
                "https://example.com/",
                "http://example.com/",
                "https://www.example.com/"
            ]
        );
    }

    #[test]
    fn test_candidates_for_buckets() {
        assert_eq!(host_candidates("file:///home/me/a.txt").keys, vec![LOCAL_FILES_HOST]);
        assert_eq!(host_candidates("file:///home/me/a.txt").title, LOCAL_FILES_TITLE);
        assert_eq!(host_candidates("about:blank").keys, vec![ABOUT_HOST]);
        assert_eq!(host_candidates("").keys, vec![OTHERS_HOST]);
        assert_eq!(host_candidates("not a url").title, OTHERS_TITLE);
        assert_eq!(host_candidates("data:text/plain,hi").keys, vec![OTHERS_HOST]);
    }

    #[test]
    fn test_host_for_url_is_stable() {
        let store = store();
        let first = store.host_for_url("http://www.gnome.org/a", true).unwrap().unwrap();
        let second = store.host_for_url("http://www.gnome.org/b", true).unwrap().unwrap();
        let bare = store.host_for_url("http://gnome.org/c", true).unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, bare.id);
        assert_eq!(store.all_hosts().unwrap().len(), 1);
    }

    #[test]
    fn test_host_for_url_without_create() {
        let store = store();
        assert!(store.host_for_url("http://example.com/", false).unwrap().is_none());
        assert!(store.all_hosts().unwrap().is_empty());
    }

    #[test]
    fn test_update_and_get_host() {
        let store = store();
        let mut host = Host::new("http://example.com/", "example.com");
        store.add_host(&mut host).unwrap();

        host.visit_count = 3;
        host.zoom_level = 1.5;
        store.update_host(&host).unwrap();

        let by_url = store.get_host(RowKey::Url("http://example.com/")).unwrap().unwrap();
        assert_eq!(by_url, host);
        assert!(store.get_host(RowKey::Id(999)).unwrap().is_none());
        assert!(matches!(
            store.update_host(&Host::new("http://nope/", "")),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_delete_orphan_hosts() {
        let store = store();
        let mut kept = Host::new("http://kept.org/", "kept.org");
        let mut orphan = Host::new("http://orphan.org/", "orphan.org");
        store.add_host(&mut kept).unwrap();
        store.add_host(&mut orphan).unwrap();

        let mut url = Url::new("http://kept.org/page", "");
        url.host_id = kept.id;
        store.add_url(&mut url).unwrap();

        assert_eq!(store.delete_orphan_hosts().unwrap(), 1);
        let hosts = store.all_hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, kept.id);
    }

    #[test]
    fn test_find_hosts_by_substring_and_sort() {
        let store = store();
        for (name, count) in [("alpha.org", 2), ("beta.org", 7), ("gamma.net", 4)] {
            let mut host = Host::new(format!("http://{}/", name), name);
            host.visit_count = count;
            store.add_host(&mut host).unwrap();
            let mut url = Url::new(format!("http://{}/index", name), "");
            url.host_id = host.id;
            store.add_url(&mut url).unwrap();
        }

        let hosts = store
            .find_hosts(&Query::new().substring("org").sort(SortType::MostVisited))
            .unwrap();
        let titles: Vec<_> = hosts.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["beta.org", "alpha.org"]);

        let hosts = store
            .find_hosts(&Query::new().sort(SortType::LeastVisited).limit(1))
            .unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].title, "alpha.org");
    }
}
