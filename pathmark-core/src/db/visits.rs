//! Visits table accessors

use super::query::SqlBuilder;
use super::HistoryStore;
use crate::error::{Error, Result};
use crate::types::{PageVisit, Query, SortType, Url, VisitType};
use rusqlite::{params, params_from_iter, Row};

impl HistoryStore {
    // ============================================
    // Visit operations
    // ============================================

    /// Append a visit row. `visit.url.id` must point at a stored url.
    pub fn add_visit_row(&self, visit: &mut PageVisit) -> Result<i64> {
        self.ensure_writable()?;
        if !visit.url.is_saved() {
            return Err(Error::InvalidArgument(format!(
                "visit to {} has no stored url",
                visit.url.url
            )));
        }
        self.conn.execute(
            "INSERT INTO visits (url, visit_time, visit_type, referring_visit) VALUES (?1, ?2, ?3, ?4)",
            params![
                visit.url.id,
                visit.visit_time,
                visit.visit_type.as_i32(),
                visit.referring_visit,
            ],
        )?;
        visit.id = self.conn.last_insert_rowid();
        Ok(visit.id)
    }

    /// Visits matching a query, oldest first unless the query sorts by recency.
    ///
    /// `urls` is joined only for filters that need it. Returned visits carry
    /// only the url id.
    pub fn find_visits(&self, query: &Query) -> Result<Vec<PageVisit>> {
        let needs_urls = !query.substrings.is_empty()
            || query.host.is_some()
            || query.ignore_hidden
            || query.ignore_local;

        let mut builder = SqlBuilder::new(
            "SELECT visits.id, visits.url, visits.visit_time, visits.visit_type, \
             visits.referring_visit FROM visits",
        );
        if needs_urls {
            builder.join("JOIN urls ON urls.id = visits.url");
        }
        builder.time_range("visits.visit_time", query);
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
        let order = match query.sort {
            SortType::MostRecentlyVisited => "visits.visit_time DESC, visits.id DESC",
            _ => "visits.visit_time ASC, visits.id ASC",
        };
        builder
            .substrings(&["urls.url", "urls.title"], &query.substrings)
            .order_by(Some(order.to_string()))
            .limit(query.limit);

        let (sql, values) = builder.build();
        tracing::trace!(%sql, "find_visits");
        let mut stmt = self.conn.prepare(&sql)?;
        let visits = stmt
            .query_map(params_from_iter(values), Self::row_to_visit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(visits)
    }

    fn row_to_visit(row: &Row) -> rusqlite::Result<PageVisit> {
        let raw_type: i32 = row.get(3)?;
        let visit_type = VisitType::from_i32(raw_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                format!("unknown visit type {}", raw_type).into(),
            )
        })?;
        Ok(PageVisit {
            id: row.get(0)?,
            url: Url::with_id(row.get(1)?),
            visit_time: row.get(2)?,
            visit_type,
            referring_visit: row.get(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RowKey;
    use crate::types::Host;

    fn store_with_url(address: &str) -> (HistoryStore, Url) {
        let store = HistoryStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        let mut host = Host::new("http://example.com/", "example.com");
        store.add_host(&mut host).unwrap();
        let mut url = Url::new(address, "Example");
        url.host_id = host.id;
        store.add_url(&mut url).unwrap();
        (store, url)
    }

    fn visit(store: &HistoryStore, url: &Url, time: i64) -> PageVisit {
        let mut visit = PageVisit::new(url.url.clone(), time, VisitType::Link);
        visit.url = url.clone();
        store.add_visit_row(&mut visit).unwrap();
        visit
    }

    #[test]
    fn test_ids_are_synthesized() {
        let (store, url) = store_with_url("http://example.com/a");
        let first = visit(&store, &url, 10);
        let second = visit(&store, &url, 20);
        assert!(first.id > 0);
        assert!(second.id > first.id);
    }

    #[test]
    fn test_unsaved_url_rejected() {
        let (store, _) = store_with_url("http://example.com/a");
        let mut visit = PageVisit::new("http://example.com/b", 1, VisitType::Typed);
        assert!(matches!(
            store.add_visit_row(&mut visit),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let (store, url) = store_with_url("http://example.com/a");
        for t in [5, 10, 15, 20, 25] {
            visit(&store, &url, t);
        }

        let times: Vec<i64> = store
            .find_visits(&Query::new().from_time(10).to_time(20))
            .unwrap()
            .iter()
            .map(|v| v.visit_time)
            .collect();
        assert_eq!(times, vec![10, 15, 20]);

        assert!(store
            .find_visits(&Query::new().from_time(100))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_substring_filter_joins_urls() {
        let (store, url) = store_with_url("http://example.com/a");
        visit(&store, &url, 10);

        assert_eq!(store.find_visits(&Query::new().substring("example")).unwrap().len(), 1);
        assert!(store.find_visits(&Query::new().substring("nothing")).unwrap().is_empty());
    }

    #[test]
    fn test_visits_cascade_with_url() {
        let (store, url) = store_with_url("http://example.com/a");
        visit(&store, &url, 10);
        visit(&store, &url, 11);

        store.delete_url(RowKey::Id(url.id)).unwrap();
        assert!(store.find_visits(&Query::new()).unwrap().is_empty());
    }

    #[test]
    fn test_recent_first_sort() {
        let (store, url) = store_with_url("http://example.com/a");
        for t in [1, 3, 2] {
            visit(&store, &url, t);
        }
        let times: Vec<i64> = store
            .find_visits(&Query::new().sort(SortType::MostRecentlyVisited).limit(2))
            .unwrap()
            .iter()
            .map(|v| v.visit_time)
            .collect();
        assert_eq!(times, vec![3, 2]);
    }
}
