//! Asynchronous history service
//!
//! [`HistoryService`] is the only way callers reach the database. Every
//! operation is turned into a message, queued, and executed later by a single
//! worker thread that owns the [`HistoryStore`](crate::db::HistoryStore).
//! Calls return immediately with a [`Request`] that resolves once the worker
//! is done with it.
//!
//! ```no_run
//! use pathmark_core::{HistoryService, PageVisit, ServiceOptions, VisitType};
//!
//! let service = HistoryService::open(ServiceOptions::new("/tmp/history.db"))?;
//! service
//!     .add_visit(PageVisit::now("https://example.com/", VisitType::Typed))
//!     .wait()?;
//! let url = service.get_url("https://example.com/").wait()?;
//! assert_eq!(url.visit_count, 1);
//! # Ok::<(), pathmark_core::Error>(())
//! ```

pub mod cancel;
mod message;
pub mod queue;
pub mod request;
mod worker;

pub use cancel::CancellationToken;
pub use message::MessageClass;
pub use queue::MessageQueue;
pub use request::{Callback, CallbackContext, IdleQueue, Request, TokioContext};

use crate::error::{Error, Result};
use crate::types::{Host, PageVisit, Query, Url, UrlProperty, VisitType};
use message::{Message, Operation, Responder};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};

/// Capacity of the change notification channel
const EVENT_CAPACITY: usize = 256;

/// How long a statement waits on another connection's lock by default
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// Options
// ============================================

/// When the worker commits its long-running transaction.
///
/// Pending writes are always committed when the service quits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPolicy {
    /// Commit whenever the queue runs empty
    pub commit_on_idle: bool,
    /// Commit after this many write requests
    pub max_pending_writes: Option<usize>,
    /// Commit once this much time has passed since the last commit
    pub max_interval: Option<Duration>,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            commit_on_idle: true,
            max_pending_writes: None,
            max_interval: None,
        }
    }
}

impl CommitPolicy {
    /// Only commit on the size or time thresholds (and on quit)
    pub fn batched(max_pending_writes: Option<usize>, max_interval: Option<Duration>) -> Self {
        Self {
            commit_on_idle: false,
            max_pending_writes,
            max_interval,
        }
    }
}

/// How to open a [`HistoryService`]
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub path: PathBuf,
    pub read_only: bool,
    pub commit: CommitPolicy,
    /// Wait on locks held by other connections before a statement fails
    pub busy_timeout: Duration,
}

impl ServiceOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
            commit: CommitPolicy::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit = policy;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

// ============================================
// State and events
// ============================================

/// Lifecycle of the worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running,
    Quiescing,
    Stopped,
    /// The database could not be opened or initialized
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Quiescing => "quiescing",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change notifications published after a write succeeds
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    VisitAdded {
        url: String,
        visit_time: i64,
        visit_type: VisitType,
    },
    UrlTitleChanged {
        url: String,
        title: String,
    },
    UrlDeleted {
        url: String,
    },
    HostDeleted {
        url: String,
    },
    Cleared,
}

// ============================================
// Service
// ============================================

/// Handle on the history worker.
///
/// Cheap to share behind an `Arc`. Dropping the last handle asks the worker
/// to quit and waits for it to finish committing.
pub struct HistoryService {
    path: PathBuf,
    read_only: bool,
    queue: Arc<MessageQueue<Message>>,
    state: watch::Receiver<ServiceState>,
    events: broadcast::Sender<HistoryEvent>,
    worker: Option<JoinHandle<()>>,
}

impl HistoryService {
    /// Spawn the worker thread for the database at `options.path`.
    ///
    /// Opening the database happens on the worker. If it fails the service
    /// goes to [`ServiceState::Failed`] and every request resolves with
    /// [`Error::ServiceUnavailable`].
    pub fn open(options: ServiceOptions) -> Result<Self> {
        let queue = Arc::new(MessageQueue::new());
        let (state_tx, state_rx) = watch::channel(ServiceState::Starting);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let path = options.path.clone();
        let read_only = options.read_only;
        let worker = {
            let queue = Arc::clone(&queue);
            let events = events.clone();
            std::thread::Builder::new()
                .name("pathmark-history".to_string())
                .spawn(move || worker::run(options, queue, state_tx, events))?
        };

        tracing::debug!(path = %path.display(), read_only, "Spawned history worker");

        Ok(Self {
            path,
            read_only,
            queue,
            state: state_rx,
            events,
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current worker state
    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Wait until the worker has opened the database.
    ///
    /// Fails with [`Error::ServiceUnavailable`] if it could not.
    pub async fn wait_until_started(&self) -> Result<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s != ServiceState::Starting)
            .await
            .map(|s| *s)
            .map_err(|_| Error::ServiceUnavailable)?;
        match reached {
            ServiceState::Failed => Err(Error::ServiceUnavailable),
            _ => Ok(()),
        }
    }

    /// Receive change notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    fn submit<T>(&self, build: impl FnOnce(Responder<T>) -> Operation) -> Request<T> {
        let (tx, rx) = oneshot::channel();
        let token = CancellationToken::new();
        let request = Request::new(rx, token.clone());

        let op = build(tx);
        if self.read_only && op.is_write() {
            tracing::debug!(op = op.name(), "Rejected write on read-only service");
            op.reject(Error::ReadOnly);
            return request;
        }

        let rank = op.class().rank();
        if let Err(message) = self.queue.push(rank, Message { token, op }) {
            tracing::debug!(op = message.op.name(), "History worker is gone");
            message.op.reject(Error::ServiceUnavailable);
        }
        request
    }

    // ============================================
    // Visits
    // ============================================

    /// Record a visit, creating its host and url rows as needed
    pub fn add_visit(&self, visit: PageVisit) -> Request<()> {
        self.submit(|respond| Operation::AddVisit { visit, respond })
    }

    /// Record several visits and commit once they are all staged.
    ///
    /// Every visit is attempted; the result is the first failure, if any.
    pub fn add_visits(&self, visits: Vec<PageVisit>) -> Request<()> {
        self.submit(|respond| Operation::AddVisits { visits, respond })
    }

    /// Visits with `from <= visit_time <= to`, oldest first
    pub fn find_visits_in_time(&self, from: i64, to: i64) -> Request<Vec<PageVisit>> {
        self.query_visits(Query::new().from_time(from).to_time(to))
    }

    pub fn query_visits(&self, query: Query) -> Request<Vec<PageVisit>> {
        self.submit(|respond| Operation::QueryVisits { query, respond })
    }

    // ============================================
    // Urls
    // ============================================

    pub fn query_urls(&self, query: Query) -> Request<Vec<Url>> {
        self.submit(|respond| Operation::QueryUrls { query, respond })
    }

    /// Fails with [`Error::NotFound`] for urls never visited
    pub fn set_url_title(&self, url: impl Into<String>, title: impl Into<String>) -> Request<()> {
        self.set_url_property(url, UrlProperty::Title(title.into()))
    }

    /// Applies to the url's host, and to the url itself if it is stored
    pub fn set_url_zoom_level(&self, url: impl Into<String>, zoom_level: f64) -> Request<()> {
        self.set_url_property(url, UrlProperty::ZoomLevel(zoom_level))
    }

    pub fn set_url_hidden(&self, url: impl Into<String>, hidden: bool) -> Request<()> {
        self.set_url_property(url, UrlProperty::Hidden(hidden))
    }

    pub fn set_url_property(&self, url: impl Into<String>, property: UrlProperty) -> Request<()> {
        let url = url.into();
        self.submit(|respond| Operation::SetUrlProperty {
            url,
            property,
            respond,
        })
    }

    pub fn get_url(&self, url: impl Into<String>) -> Request<Url> {
        let url = url.into();
        self.submit(|respond| Operation::GetUrl { url, respond })
    }

    /// Delete urls (by id, or by address for unsaved ones) and any host left
    /// without urls
    pub fn delete_urls(&self, urls: Vec<Url>) -> Request<()> {
        self.submit(|respond| Operation::DeleteUrls { urls, respond })
    }

    // ============================================
    // Hosts
    // ============================================

    /// Stored host for a url. Writable services create it on a miss.
    pub fn get_host_for_url(&self, url: impl Into<String>) -> Request<Host> {
        let url = url.into();
        self.submit(|respond| Operation::GetHostForUrl { url, respond })
    }

    pub fn get_hosts(&self) -> Request<Vec<Host>> {
        self.submit(|respond| Operation::GetHosts { respond })
    }

    pub fn query_hosts(&self, query: Query) -> Request<Vec<Host>> {
        self.submit(|respond| Operation::QueryHosts { query, respond })
    }

    /// Delete a host with all of its urls and visits
    pub fn delete_host(&self, host: Host) -> Request<()> {
        self.submit(|respond| Operation::DeleteHost { host, respond })
    }

    // ============================================
    // Whole database
    // ============================================

    pub fn clear(&self) -> Request<()> {
        self.submit(|respond| Operation::Clear { respond })
    }

    /// Ask the worker to stop.
    ///
    /// Quit has the lowest priority, so every read and write still waiting
    /// in the queue runs first, including ones submitted after this call.
    /// The worker then commits pending history, retrying while another
    /// connection holds the lock. The reply is [`Error::Failed`] if that
    /// commit never went through. Requests that reach the queue after the
    /// worker has stopped resolve with [`Error::ServiceUnavailable`].
    pub fn quit(&self) -> Request<()> {
        self.submit(|respond| Operation::Quit { respond })
    }
}

impl Drop for HistoryService {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let (respond, _) = oneshot::channel();
        let _ = self.queue.push(
            MessageClass::Quit.rank(),
            Message {
                token: CancellationToken::new(),
                op: Operation::Quit { respond },
            },
        );
        if worker.join().is_err() {
            tracing::error!("History worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_commits_on_idle() {
        let policy = CommitPolicy::default();
        assert!(policy.commit_on_idle);
        assert_eq!(policy.max_pending_writes, None);

        let batched = CommitPolicy::batched(Some(10), None);
        assert!(!batched.commit_on_idle);
        assert_eq!(batched.max_pending_writes, Some(10));
    }

    #[test]
    fn test_options_builder() {
        let options = ServiceOptions::new("/tmp/h.db")
            .read_only(true)
            .commit_policy(CommitPolicy::batched(None, Some(Duration::from_secs(1))));
        assert!(options.read_only);
        assert_eq!(options.path, PathBuf::from("/tmp/h.db"));
        assert_eq!(options.commit.max_interval, Some(Duration::from_secs(1)));
        assert_eq!(options.busy_timeout, DEFAULT_BUSY_TIMEOUT);
        let options = options.busy_timeout(Duration::from_millis(50));
        assert_eq!(options.busy_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ServiceState::Failed.to_string(), "failed");
    }
}
