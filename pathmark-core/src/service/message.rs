//! Messages travelling from callers to the history worker

use super::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::types::{Host, PageVisit, Query, Url, UrlProperty};
use tokio::sync::oneshot;

/// Reply slot of a single request
pub(crate) type Responder<T> = oneshot::Sender<Result<T>>;

/// Scheduling class of a message.
///
/// Writes run before reads, and `Quit` only runs once nothing else is
/// queued. Inside a class messages keep their arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageClass {
    Write,
    Read,
    Quit,
}

impl MessageClass {
    pub fn rank(self) -> u8 {
        match self {
            MessageClass::Write => 0,
            MessageClass::Read => 1,
            MessageClass::Quit => 2,
        }
    }
}

/// One operation with its typed reply slot
pub(crate) enum Operation {
    AddVisit {
        visit: PageVisit,
        respond: Responder<()>,
    },
    AddVisits {
        visits: Vec<PageVisit>,
        respond: Responder<()>,
    },
    SetUrlProperty {
        url: String,
        property: UrlProperty,
        respond: Responder<()>,
    },
    DeleteUrls {
        urls: Vec<Url>,
        respond: Responder<()>,
    },
    DeleteHost {
        host: Host,
        respond: Responder<()>,
    },
    Clear {
        respond: Responder<()>,
    },
    Quit {
        respond: Responder<()>,
    },
    GetUrl {
        url: String,
        respond: Responder<Url>,
    },
    GetHostForUrl {
        url: String,
        respond: Responder<Host>,
    },
    QueryUrls {
        query: Query,
        respond: Responder<Vec<Url>>,
    },
    QueryVisits {
        query: Query,
        respond: Responder<Vec<PageVisit>>,
    },
    GetHosts {
        respond: Responder<Vec<Host>>,
    },
    QueryHosts {
        query: Query,
        respond: Responder<Vec<Host>>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::AddVisit { .. } => "add_visit",
            Operation::AddVisits { .. } => "add_visits",
            Operation::SetUrlProperty { .. } => "set_url_property",
            Operation::DeleteUrls { .. } => "delete_urls",
            Operation::DeleteHost { .. } => "delete_host",
            Operation::Clear { .. } => "clear",
            Operation::Quit { .. } => "quit",
            Operation::GetUrl { .. } => "get_url",
            Operation::GetHostForUrl { .. } => "get_host_for_url",
            Operation::QueryUrls { .. } => "query_urls",
            Operation::QueryVisits { .. } => "query_visits",
            Operation::GetHosts { .. } => "get_hosts",
            Operation::QueryHosts { .. } => "query_hosts",
        }
    }

    pub fn class(&self) -> MessageClass {
        match self {
            Operation::AddVisit { .. }
            | Operation::AddVisits { .. }
            | Operation::SetUrlProperty { .. }
            | Operation::DeleteUrls { .. }
            | Operation::DeleteHost { .. }
            | Operation::Clear { .. } => MessageClass::Write,
            Operation::Quit { .. } => MessageClass::Quit,
            Operation::GetUrl { .. }
            | Operation::GetHostForUrl { .. }
            | Operation::QueryUrls { .. }
            | Operation::QueryVisits { .. }
            | Operation::GetHosts { .. }
            | Operation::QueryHosts { .. } => MessageClass::Read,
        }
    }

    pub fn is_write(&self) -> bool {
        self.class() == MessageClass::Write
    }

    /// Resolve the request with an error without running it
    pub fn reject(self, error: Error) {
        match self {
            Operation::AddVisit { respond, .. }
            | Operation::AddVisits { respond, .. }
            | Operation::SetUrlProperty { respond, .. }
            | Operation::DeleteUrls { respond, .. }
            | Operation::DeleteHost { respond, .. }
            | Operation::Clear { respond }
            | Operation::Quit { respond } => {
                let _ = respond.send(Err(error));
            }
            Operation::GetUrl { respond, .. } => {
                let _ = respond.send(Err(error));
            }
            Operation::GetHostForUrl { respond, .. } => {
                let _ = respond.send(Err(error));
            }
            Operation::QueryUrls { respond, .. } => {
                let _ = respond.send(Err(error));
            }
            Operation::QueryVisits { respond, .. } => {
                let _ = respond.send(Err(error));
            }
            Operation::GetHosts { respond } | Operation::QueryHosts { respond, .. } => {
                let _ = respond.send(Err(error));
            }
        }
    }
}

/// A queued operation plus the token that may cancel it
pub(crate) struct Message {
    pub token: CancellationToken,
    pub op: Operation,
}
