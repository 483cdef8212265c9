//! Urls table accessors

use super::query::{order_clause, SqlBuilder};
use super::{HistoryStore, RowKey};
use crate::error::{Error, Result};
use crate::types::{Query, Url};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

const URL_COLUMNS: &str = "urls.id, urls.host, urls.url, urls.title, urls.visit_count, \
     urls.typed_count, urls.last_visit_time, urls.zoom_level, urls.hidden_from_overview";

impl HistoryStore {
    // ============================================
    // Url operations
    // ============================================

    /// Insert a url. The owning host must already be stored.
    pub fn add_url(&self, url: &mut Url) -> Result<i64> {
        self.ensure_writable()?;
        if url.host_id < 0 {
            return Err(Error::InvalidArgument(format!(
                "url {} has no resolved host",
                url.url
            )));
        }
        self.conn.execute(
            r#"
            INSERT INTO urls (host, url, title, visit_count, typed_count,
                              last_visit_time, zoom_level, hidden_from_overview)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                url.host_id,
                url.url,
                url.title,
                url.visit_count,
                url.typed_count,
                url.last_visit_time,
                url.zoom_level,
                url.hidden,
            ],
        )?;
        url.id = self.conn.last_insert_rowid();
        tracing::debug!(id = url.id, url = %url.url, "Inserted url");
        Ok(url.id)
    }

    /// Persist the mutable columns of a saved url
    pub fn update_url(&self, url: &Url) -> Result<()> {
        self.ensure_writable()?;
        if !url.is_saved() {
            return Err(Error::InvalidArgument(format!(
                "cannot update unsaved url {}",
                url.url
            )));
        }
        let changed = self.conn.execute(
            r#"
            UPDATE urls SET title = ?1, visit_count = ?2, typed_count = ?3,
                            last_visit_time = ?4, zoom_level = ?5, hidden_from_overview = ?6
            WHERE id = ?7
            "#,
            params![
                url.title,
                url.visit_count,
                url.typed_count,
                url.last_visit_time,
                url.zoom_level,
                url.hidden,
                url.id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("url {}", url.id)));
        }
        Ok(())
    }

    /// Get a url by id or address
    pub fn get_url(&self, key: RowKey<'_>) -> Result<Option<Url>> {
        let url = match key {
            RowKey::Id(id) => self
                .conn
                .query_row(
                    &format!("SELECT {} FROM urls WHERE id = ?1", URL_COLUMNS),
                    [id],
                    Self::row_to_url,
                )
                .optional()?,
            RowKey::Url(url) => self
                .conn
                .query_row(
                    &format!("SELECT {} FROM urls WHERE url = ?1", URL_COLUMNS),
                    [url],
                    Self::row_to_url,
                )
                .optional()?,
        };
        Ok(url)
    }

    /// Urls matching a query.
    ///
    /// A time range joins `visits` so that only urls with a visit inside the
    /// range come back.
    pub fn find_urls(&self, query: &Query) -> Result<Vec<Url>> {
        let mut builder = SqlBuilder::new(format!("SELECT {} FROM urls", URL_COLUMNS));
        if query.has_time_range() {
            builder
                .join("JOIN visits ON visits.url = urls.id")
                .time_range("visits.visit_time", query);
        }
        if let Some(host_id) = query.host {
            let p = builder.bind(host_id);
            builder.condition(format!("urls.host = {}", p));
        }
        if query.ignore_hidden {
            builder.condition("urls.hidden_from_overview = 0");
        }
        if query.ignore_local {
            builder.condition("urls.url NOT LIKE 'file:%'");
        }
        builder
            .substrings(&["urls.url", "urls.title"], &query.substrings)
            .group_by("urls.id")
            .order_by(order_clause(
                query.sort,
                "urls.visit_count",
                "urls.last_visit_time",
            ))
            .limit(query.limit);

        let (sql, values) = builder.build();
        tracing::trace!(%sql, "find_urls");
        let mut stmt = self.conn.prepare(&sql)?;
        let urls = stmt
            .query_map(params_from_iter(values), Self::row_to_url)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(urls)
    }

    /// Delete a url; its visits go with it
    pub fn delete_url(&self, key: RowKey<'_>) -> Result<usize> {
        self.ensure_writable()?;
        let deleted = match key {
            RowKey::Id(id) => self.conn.execute("DELETE FROM urls WHERE id = ?1", [id])?,
            RowKey::Url(url) => self.conn.execute("DELETE FROM urls WHERE url = ?1", [url])?,
        };
        Ok(deleted)
    }

    fn row_to_url(row: &Row) -> rusqlite::Result<Url> {
        let title: Option<String> = row.get(3)?;
        let last_visit_time: Option<i64> = row.get(6)?;
        Ok(Url {
            id: row.get(0)?,
            host_id: row.get(1)?,
            url: row.get(2)?,
            title: title.unwrap_or_default(),
            visit_count: row.get(4)?,
            typed_count: row.get(5)?,
            last_visit_time: last_visit_time.unwrap_or(0),
            zoom_level: row.get(7)?,
            hidden: row.get(8)?,
        })
    }
}
