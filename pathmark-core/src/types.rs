//! Core domain types for pathmark
//!
//! These are plain values. Every request sent to the history worker carries
//! owned copies of them, and every result comes back the same way, so no
//! row is ever shared between the worker and a caller.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Host** | Aggregate record for a scheme+hostname grouping (`http://example.com/`) |
//! | **Url** | One distinct visited address |
//! | **PageVisit** | One recorded visit event; append-only |
//! | **Query** | Filter, sort and limit parameters for a read |

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Id carried by rows that have not been inserted yet
pub const UNSAVED_ID: i64 = -1;

fn default_zoom_level() -> f64 {
    1.0
}

// ============================================
// Host
// ============================================

/// A scheme+hostname grouping of visited URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Row id, [`UNSAVED_ID`] until persisted
    pub id: i64,
    /// Canonical key, e.g. `http://example.com/`
    pub url: String,
    /// Display name, e.g. `example.com`
    pub title: String,
    /// Number of visits recorded against URLs of this host
    pub visit_count: i32,
    /// Zoom level applied to every page of this host
    #[serde(default = "default_zoom_level")]
    pub zoom_level: f64,
}

impl Host {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: UNSAVED_ID,
            url: url.into(),
            title: title.into(),
            visit_count: 0,
            zoom_level: default_zoom_level(),
        }
    }

    /// A host addressed only by its row id
    pub fn with_id(id: i64) -> Self {
        Self {
            id,
            ..Self::new("", "")
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id != UNSAVED_ID
    }
}

// ============================================
// Url
// ============================================

/// One distinct visited address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Url {
    /// Row id, [`UNSAVED_ID`] until persisted
    pub id: i64,
    /// The address itself; unique
    pub url: String,
    pub title: String,
    pub visit_count: i32,
    /// Visits where the address was typed rather than followed
    pub typed_count: i32,
    /// Epoch seconds of the most recent visit
    pub last_visit_time: i64,
    #[serde(default = "default_zoom_level")]
    pub zoom_level: f64,
    /// Hidden from overview listings
    #[serde(default)]
    pub hidden: bool,
    /// Owning host row, [`UNSAVED_ID`] until resolved
    pub host_id: i64,
}

impl Url {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: UNSAVED_ID,
            url: url.into(),
            title: title.into(),
            visit_count: 0,
            typed_count: 0,
            last_visit_time: 0,
            zoom_level: default_zoom_level(),
            hidden: false,
            host_id: UNSAVED_ID,
        }
    }

    /// A url addressed only by its row id
    pub fn with_id(id: i64) -> Self {
        Self {
            id,
            ..Self::new("", "")
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id != UNSAVED_ID
    }
}

// ============================================
// PageVisit
// ============================================

/// How a visit came about.
///
/// Stored as an integer; the discriminants are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    /// Followed a link
    Link = 1,
    /// Typed into the location bar
    Typed = 2,
    ManualSubframe = 3,
    AutoSubframe = 4,
    /// Loaded as a startup page
    Startup = 5,
    FormSubmission = 6,
    FormReload = 7,
}

impl VisitType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(VisitType::Link),
            2 => Some(VisitType::Typed),
            3 => Some(VisitType::ManualSubframe),
            4 => Some(VisitType::AutoSubframe),
            5 => Some(VisitType::Startup),
            6 => Some(VisitType::FormSubmission),
            7 => Some(VisitType::FormReload),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisitType::Link => "link",
            VisitType::Typed => "typed",
            VisitType::ManualSubframe => "manual_subframe",
            VisitType::AutoSubframe => "auto_subframe",
            VisitType::Startup => "startup",
            VisitType::FormSubmission => "form_submission",
            VisitType::FormReload => "form_reload",
        }
    }
}

impl std::str::FromStr for VisitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link" => Ok(VisitType::Link),
            "typed" => Ok(VisitType::Typed),
            "manual_subframe" => Ok(VisitType::ManualSubframe),
            "auto_subframe" => Ok(VisitType::AutoSubframe),
            "startup" => Ok(VisitType::Startup),
            "form_submission" => Ok(VisitType::FormSubmission),
            "form_reload" => Ok(VisitType::FormReload),
            _ => Err(format!("unknown visit type: {}", s)),
        }
    }
}

/// One recorded visit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageVisit {
    /// Row id, [`UNSAVED_ID`] until persisted
    pub id: i64,
    /// Visited url. Rows read back from the visits table only carry `url.id`.
    pub url: Url,
    /// Epoch seconds
    pub visit_time: i64,
    pub visit_type: VisitType,
    pub referring_visit: Option<i64>,
}

impl PageVisit {
    pub fn new(url: impl Into<String>, visit_time: i64, visit_type: VisitType) -> Self {
        Self {
            id: UNSAVED_ID,
            url: Url::new(url, ""),
            visit_time,
            visit_type,
            referring_visit: None,
        }
    }

    /// A visit happening right now
    pub fn now(url: impl Into<String>, visit_type: VisitType) -> Self {
        Self::new(url, Utc::now().timestamp(), visit_type)
    }

    /// Sets the page title recorded with the url on first insertion
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.url.title = title.into();
        self
    }

    pub fn with_referrer(mut self, visit_id: i64) -> Self {
        self.referring_visit = Some(visit_id);
        self
    }
}

// ============================================
// Query
// ============================================

/// Result ordering for queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortType {
    #[default]
    None,
    MostRecentlyVisited,
    LeastRecentlyVisited,
    MostVisited,
    LeastVisited,
}

impl std::str::FromStr for SortType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SortType::None),
            "most-recently-visited" | "recent" => Ok(SortType::MostRecentlyVisited),
            "least-recently-visited" | "oldest" => Ok(SortType::LeastRecentlyVisited),
            "most-visited" => Ok(SortType::MostVisited),
            "least-visited" => Ok(SortType::LeastVisited),
            _ => Err(format!("unknown sort type: {}", s)),
        }
    }
}

/// Describes a read request. Never persisted.
///
/// `from`/`to` are inclusive epoch seconds; values `<= 0` leave that end
/// unbounded. A `limit` of 0 means no limit. Substrings are ANDed together
/// and each one is matched case-insensitively against the url and title
/// columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub from: i64,
    pub to: i64,
    pub limit: u32,
    pub substrings: Vec<String>,
    pub sort: SortType,
    /// Restrict to URLs of this host id
    pub host: Option<i64>,
    pub ignore_hidden: bool,
    /// Skip `file:` URLs
    pub ignore_local: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_time(mut self, from: i64) -> Self {
        self.from = from;
        self
    }

    pub fn to_time(mut self, to: i64) -> Self {
        self.to = to;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn substring(mut self, substring: impl Into<String>) -> Self {
        self.substrings.push(substring.into().to_lowercase());
        self
    }

    pub fn sort(mut self, sort: SortType) -> Self {
        self.sort = sort;
        self
    }

    pub fn host(mut self, host_id: i64) -> Self {
        self.host = Some(host_id);
        self
    }

    pub fn ignore_hidden(mut self, ignore: bool) -> Self {
        self.ignore_hidden = ignore;
        self
    }

    pub fn ignore_local(mut self, ignore: bool) -> Self {
        self.ignore_local = ignore;
        self
    }

    pub fn has_time_range(&self) -> bool {
        self.from > 0 || self.to > 0
    }
}

/// Generic url property setter payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlProperty {
    Title(String),
    ZoomLevel(f64),
    Hidden(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_type_round_trips_through_storage_value() {
        for raw in 1..=7 {
            let visit_type = VisitType::from_i32(raw).unwrap();
            assert_eq!(visit_type.as_i32(), raw);
        }
        assert_eq!(VisitType::from_i32(0), None);
        assert_eq!(VisitType::from_i32(8), None);
    }

    #[test]
    fn test_new_rows_are_unsaved() {
        assert!(!Host::new("http://example.com/", "example.com").is_saved());
        assert!(!Url::new("http://example.com/a", "").is_saved());
        assert!(Url::with_id(4).is_saved());

        let visit = PageVisit::new("http://example.com/", 10, VisitType::Typed);
        assert_eq!(visit.id, UNSAVED_ID);
        assert_eq!(visit.url.zoom_level, 1.0);
    }

    #[test]
    fn test_query_builder_normalizes_substrings() {
        let query = Query::new()
            .substring("GNOME")
            .substring("Org")
            .limit(5)
            .sort(SortType::MostVisited);
        assert_eq!(query.substrings, vec!["gnome", "org"]);
        assert_eq!(query.limit, 5);
        assert!(!query.has_time_range());
        assert!(Query::new().to_time(20).has_time_range());
    }

    #[test]
    fn test_sort_type_parse() {
        assert_eq!(
            "most-visited".parse::<SortType>().unwrap(),
            SortType::MostVisited
        );
        assert_eq!(
            "recent".parse::<SortType>().unwrap(),
            SortType::MostRecentlyVisited
        );
        assert!("sideways".parse::<SortType>().is_err());
    }
}
