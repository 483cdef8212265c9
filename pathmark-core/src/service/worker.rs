//! The history worker thread
//!
//! Owns the [`HistoryStore`] for its whole life. Pulls messages off the
//! shared queue, runs them inside one long-running transaction, and commits
//! according to the [`CommitPolicy`].

use super::cancel::CancellationToken;
use super::message::{Message, Operation, Responder};
use super::queue::MessageQueue;
use super::{CommitPolicy, HistoryEvent, ServiceOptions, ServiceState};
use crate::db::{HistoryStore, RowKey};
use crate::error::{Error, Result};
use crate::types::{Host, PageVisit, Url, UrlProperty, VisitType, UNSAVED_ID};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

/// Pause before committing again after a refused commit
const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Commit attempts made while quitting
const FINAL_COMMIT_ATTEMPTS: u32 = 5;

/// Thread entry point. Returns once the service has stopped or failed.
pub(crate) fn run(
    options: ServiceOptions,
    queue: Arc<MessageQueue<Message>>,
    state: watch::Sender<ServiceState>,
    events: broadcast::Sender<HistoryEvent>,
) {
    let mut worker = match Worker::start(&options, Arc::clone(&queue), events) {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(
                path = %options.path.display(),
                error = %e,
                "History service failed to start"
            );
            state.send_replace(ServiceState::Failed);
            for message in queue.close() {
                message.op.reject(Error::ServiceUnavailable);
            }
            return;
        }
    };

    state.send_replace(ServiceState::Running);
    tracing::info!(
        path = %options.path.display(),
        read_only = options.read_only,
        "History service running"
    );

    let quit = worker.serve();

    state.send_replace(ServiceState::Quiescing);
    let outcome = worker.quiesce();
    drop(worker);
    state.send_replace(ServiceState::Stopped);
    tracing::info!("History service stopped");

    if let Some(respond) = quit {
        let _ = respond.send(outcome);
    }
}

struct Worker {
    store: HistoryStore,
    queue: Arc<MessageQueue<Message>>,
    policy: CommitPolicy,
    events: broadcast::Sender<HistoryEvent>,
    dirty: bool,
    /// The last commit was refused and the transaction still holds its writes
    commit_failed: bool,
    pending_writes: usize,
    last_commit: Instant,
}

impl Worker {
    fn start(
        options: &ServiceOptions,
        queue: Arc<MessageQueue<Message>>,
        events: broadcast::Sender<HistoryEvent>,
    ) -> Result<Self> {
        let mut store = HistoryStore::open(&options.path, options.read_only)?;
        store.set_busy_timeout(options.busy_timeout)?;
        store.begin_transaction()?;
        let created = store.initialize()?;
        if created {
            tracing::info!(path = %options.path.display(), "Created history tables");
        }

        Ok(Self {
            store,
            queue,
            policy: options.commit.clone(),
            events,
            dirty: created,
            commit_failed: false,
            pending_writes: 0,
            last_commit: Instant::now(),
        })
    }

    /// Process messages until `quit` arrives. Hands back its reply slot.
    fn serve(&mut self) -> Option<Responder<()>> {
        while let Some(Message { token, op }) = self.next_message() {
            if token.is_cancelled() {
                tracing::debug!(op = op.name(), "Skipping cancelled request");
                op.reject(Error::Cancelled);
                continue;
            }

            let is_write = op.is_write();
            match op {
                Operation::Quit { respond } => return Some(respond),
                op => self.dispatch(op, &token),
            }

            if is_write {
                self.dirty = true;
                self.pending_writes += 1;
                self.maybe_commit();
            }
        }
        None
    }

    /// Next message, committing while the queue is idle
    fn next_message(&mut self) -> Option<Message> {
        if let Some(message) = self.queue.try_pop() {
            return Some(message);
        }
        if self.policy.commit_on_idle {
            self.commit("idle");
        }

        loop {
            let Some(wait) = self.next_commit_in() else {
                return self.queue.pop();
            };
            if let Some(message) = self.queue.pop_timeout(wait) {
                return Some(message);
            }
            if self.queue.is_closed() {
                return None;
            }
            let reason = if self.commit_failed { "retry" } else { "interval" };
            self.commit(reason);
        }
    }

    /// Time until the next timed commit, if one is due while idle
    fn next_commit_in(&self) -> Option<Duration> {
        if !self.dirty {
            return None;
        }
        if self.commit_failed {
            return Some(COMMIT_RETRY_DELAY);
        }
        self.policy
            .max_interval
            .map(|interval| interval.saturating_sub(self.last_commit.elapsed()))
    }

    fn maybe_commit(&mut self) {
        if let Some(max) = self.policy.max_pending_writes {
            if self.pending_writes >= max {
                self.commit("pending writes");
                return;
            }
        }
        if let Some(interval) = self.policy.max_interval {
            if self.last_commit.elapsed() >= interval {
                self.commit("interval");
            }
        }
    }

    /// Commit staged writes and open the next transaction.
    ///
    /// A refused commit keeps every staged write in the open transaction
    /// and is retried at the next commit point.
    fn commit(&mut self, reason: &str) {
        if !self.dirty || self.store.is_read_only() {
            return;
        }

        match self.store.commit() {
            Ok(()) => {
                tracing::debug!(reason, writes = self.pending_writes, "Committed history");
                self.commit_failed = false;
            }
            Err(e) if self.store.in_transaction() => {
                tracing::warn!(
                    reason,
                    writes = self.pending_writes,
                    error = %e,
                    "Commit refused, keeping writes staged"
                );
                self.commit_failed = true;
                return;
            }
            Err(e) => {
                tracing::error!(
                    reason,
                    writes = self.pending_writes,
                    error = %e,
                    "Commit failed and the transaction was aborted"
                );
                self.commit_failed = false;
            }
        }

        self.dirty = false;
        self.pending_writes = 0;
        self.last_commit = Instant::now();

        if let Err(e) = self.store.begin_transaction() {
            tracing::error!(error = %e, "Could not reopen transaction");
        }
    }

    /// Close the transaction for good, retrying a refused commit
    fn finish_transaction(&mut self) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.store.commit() {
                Ok(()) => {
                    self.dirty = false;
                    return Ok(());
                }
                Err(e) if self.store.in_transaction() && attempt < FINAL_COMMIT_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "Final commit refused, retrying");
                    attempt += 1;
                    std::thread::sleep(COMMIT_RETRY_DELAY);
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Final commit failed");
                    return Err(Error::Failed(format!(
                        "pending history was not committed: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Flush pending work and turn away whatever is still queued.
    ///
    /// The result is the reply to `quit`.
    fn quiesce(&mut self) -> Result<()> {
        let outcome = self.finish_transaction();
        let leftovers = self.queue.close();
        if !leftovers.is_empty() {
            tracing::debug!(count = leftovers.len(), "Rejecting requests queued after quit");
        }
        for message in leftovers {
            message.op.reject(Error::ServiceUnavailable);
        }
        outcome
    }

    fn emit(&self, event: HistoryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ============================================
    // Dispatch
    // ============================================

    fn dispatch(&mut self, op: Operation, token: &CancellationToken) {
        let name = op.name();
        tracing::trace!(op = name, "Dispatching");

        match op {
            Operation::AddVisit { visit, respond } => {
                let result = self.add_visit(visit);
                complete(name, respond, token, result);
            }
            Operation::AddVisits { visits, respond } => {
                let result = self.add_visits(visits);
                self.dirty = true;
                self.commit("visit batch");
                complete(name, respond, token, result);
            }
            Operation::SetUrlProperty {
                url,
                property,
                respond,
            } => {
                let result = self.set_url_property(&url, property);
                complete(name, respond, token, result);
            }
            Operation::DeleteUrls { urls, respond } => {
                let result = self.delete_urls(&urls);
                complete(name, respond, token, result);
            }
            Operation::DeleteHost { host, respond } => {
                let result = self.delete_host(&host);
                complete(name, respond, token, result);
            }
            Operation::Clear { respond } => {
                let result = self.store.clear_all().map(|()| self.emit(HistoryEvent::Cleared));
                complete(name, respond, token, result);
            }
            Operation::Quit { respond } => {
                complete(name, respond, token, Ok(()));
            }
            Operation::GetUrl { url, respond } => {
                let result = self.existing_url(&url);
                complete(name, respond, token, result);
            }
            Operation::GetHostForUrl { url, respond } => {
                let result = self.get_host_for_url(&url);
                complete(name, respond, token, result);
            }
            Operation::QueryUrls { query, respond } => {
                complete(name, respond, token, self.store.find_urls(&query));
            }
            Operation::QueryVisits { query, respond } => {
                complete(name, respond, token, self.store.find_visits(&query));
            }
            Operation::GetHosts { respond } => {
                complete(name, respond, token, self.store.all_hosts());
            }
            Operation::QueryHosts { query, respond } => {
                complete(name, respond, token, self.store.find_hosts(&query));
            }
        }
    }

    // ============================================
    // Handlers
    // ============================================

    fn add_visit(&mut self, visit: PageVisit) -> Result<()> {
        if visit.url.url.is_empty() {
            return Err(Error::InvalidArgument("visit has no url".to_string()));
        }
        let address = visit.url.url.clone();
        self.record_visit(visit).map_err(|e| match e {
            Error::InvalidArgument(_) | Error::ReadOnly => e,
            other => Error::Failed(format!("recording visit to {}: {}", address, other)),
        })
    }

    fn record_visit(&mut self, mut visit: PageVisit) -> Result<()> {
        let mut host = self.resolve_host(&visit.url.url)?;
        host.visit_count += 1;
        self.store.update_host(&host)?;

        let typed = visit.visit_type == VisitType::Typed;
        match self.store.get_url(RowKey::Url(&visit.url.url))? {
            Some(mut existing) => {
                existing.visit_count += 1;
                if typed {
                    existing.typed_count += 1;
                }
                existing.last_visit_time = existing.last_visit_time.max(visit.visit_time);
                self.store.update_url(&existing)?;
                visit.url = existing;
            }
            None => {
                let url = &mut visit.url;
                url.host_id = host.id;
                url.visit_count = 1;
                url.typed_count = i32::from(typed);
                url.last_visit_time = visit.visit_time;
                url.zoom_level = host.zoom_level;
                self.store.add_url(url)?;
            }
        }

        self.store.add_visit_row(&mut visit)?;
        tracing::debug!(url = %visit.url.url, visit = visit.id, "Recorded visit");

        self.emit(HistoryEvent::VisitAdded {
            url: visit.url.url,
            visit_time: visit.visit_time,
            visit_type: visit.visit_type,
        });
        Ok(())
    }

    fn add_visits(&mut self, visits: Vec<PageVisit>) -> Result<()> {
        let total = visits.len();
        let mut first_error = None;
        let mut failed = 0usize;
        for visit in visits {
            if let Err(e) = self.add_visit(visit) {
                tracing::warn!(error = %e, "Visit in batch failed");
                failed += 1;
                first_error.get_or_insert(e);
            }
        }
        tracing::debug!(total, failed, "Recorded visit batch");
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn set_url_property(&mut self, url: &str, property: UrlProperty) -> Result<()> {
        RowKey::resolve(UNSAVED_ID, url)?;

        match property {
            UrlProperty::Title(title) => {
                let mut row = self.existing_url(url)?;
                row.title = title.clone();
                self.store.update_url(&row)?;
                self.emit(HistoryEvent::UrlTitleChanged {
                    url: row.url,
                    title,
                });
            }
            UrlProperty::Hidden(hidden) => {
                let mut row = self.existing_url(url)?;
                row.hidden = hidden;
                self.store.update_url(&row)?;
            }
            UrlProperty::ZoomLevel(zoom) => {
                let mut host = self.resolve_host(url)?;
                host.zoom_level = zoom;
                self.store.update_host(&host)?;
                if let Some(mut row) = self.store.get_url(RowKey::Url(url))? {
                    row.zoom_level = zoom;
                    self.store.update_url(&row)?;
                }
            }
        }
        Ok(())
    }

    fn delete_urls(&mut self, urls: &[Url]) -> Result<()> {
        for url in urls {
            let Some(row) = self.store.get_url(url.key()?)? else {
                tracing::debug!(url = %url.url, "Url to delete is not stored");
                continue;
            };
            self.store.delete_url(RowKey::Id(row.id))?;
            self.emit(HistoryEvent::UrlDeleted { url: row.url });
        }
        self.store.delete_orphan_hosts()?;
        Ok(())
    }

    fn delete_host(&mut self, host: &Host) -> Result<()> {
        let key = host.key()?;
        let stored = self
            .store
            .get_host(key)?
            .ok_or_else(|| Error::NotFound(format!("host {}", describe(host))))?;
        self.store.delete_host(RowKey::Id(stored.id))?;
        self.emit(HistoryEvent::HostDeleted { url: stored.url });
        Ok(())
    }

    fn get_host_for_url(&mut self, url: &str) -> Result<Host> {
        RowKey::resolve(UNSAVED_ID, url)?;
        if self.store.is_read_only() {
            return self
                .store
                .host_for_url(url, false)?
                .ok_or_else(|| Error::NotFound(format!("host for {}", url)));
        }
        // May insert the host
        self.dirty = true;
        self.resolve_host(url)
    }

    fn resolve_host(&self, url: &str) -> Result<Host> {
        self.store
            .host_for_url(url, true)?
            .ok_or_else(|| Error::Failed(format!("could not resolve host for {}", url)))
    }

    fn existing_url(&self, url: &str) -> Result<Url> {
        self.store
            .get_url(RowKey::resolve(UNSAVED_ID, url)?)?
            .ok_or_else(|| Error::NotFound(format!("url {}", url)))
    }
}

fn describe(host: &Host) -> String {
    if host.url.is_empty() {
        host.id.to_string()
    } else {
        host.url.clone()
    }
}

/// Resolve a request. A request cancelled while running keeps its effect but
/// reports `Cancelled`.
fn complete<T>(
    name: &'static str,
    respond: Responder<T>,
    token: &CancellationToken,
    result: Result<T>,
) {
    let result = match result {
        Ok(_) if token.is_cancelled() => Err(Error::Cancelled),
        other => other,
    };

    if let Err(e) = &result {
        match e {
            Error::Cancelled | Error::NotFound(_) | Error::InvalidArgument(_) | Error::ReadOnly => {
                tracing::debug!(op = name, error = %e, "Request did not succeed");
            }
            _ => tracing::warn!(op = name, error = %e, "Request failed"),
        }
    }

    // The caller may have dropped its Request
    let _ = respond.send(result);
}
