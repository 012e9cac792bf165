//! Outbound page requests and their outcomes as seen by the access policy

use crate::job_scheduling::events::Ticket;
use reqwest::Method;
use reqwest::header::HeaderMap;
use std::fmt;
use url::Url;

/// Target substituted for requests the filter rejects
pub const BLOCKED_URL: &str = "about:blank";

/// TLS adjustments applied to a single request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Skip peer certificate verification
    pub accept_invalid_certs: bool,
}

/// A request the page engine is about to send
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub tls: TlsOptions,
    /// Job the request was issued for, stamped when it is intercepted
    pub ticket: Option<Ticket>,
}

impl OutboundRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            tls: TlsOptions::default(),
            ticket: None,
        }
    }
}

/// What the engine should do with an intercepted request
#[derive(Debug, Clone)]
pub enum RequestDisposition {
    /// Send this (possibly rewritten) request
    Forward(OutboundRequest),
    /// Do not touch the network; the request resolves to [`BLOCKED_URL`]
    Blocked,
}

impl RequestDisposition {
    pub fn is_blocked(&self) -> bool {
        matches!(self, RequestDisposition::Blocked)
    }

    /// The URL the engine ends up requesting
    pub fn target(&self) -> String {
        match self {
            RequestDisposition::Forward(request) => request.url.to_string(),
            RequestDisposition::Blocked => BLOCKED_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The engine cancelled the request itself, e.g. on navigation
    OperationCanceled,
    Timeout,
    Connection,
    Proxy,
    /// The server answered with an error status
    Status(u16),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
}

impl NetworkError {
    pub fn new<S: Into<String>>(kind: NetworkErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            NetworkErrorKind::Timeout
        } else if error.is_connect() {
            NetworkErrorKind::Connection
        } else if let Some(status) = error.status() {
            NetworkErrorKind::Status(status.as_u16())
        } else {
            NetworkErrorKind::Other
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A finished page request
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Ticket carried by the request that produced this outcome
    pub ticket: Option<Ticket>,
    pub url: Url,
    pub error: Option<NetworkError>,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
}

impl RequestOutcome {
    pub fn succeeded(
        ticket: Option<Ticket>,
        url: Url,
        request_headers: HeaderMap,
        response_headers: HeaderMap,
    ) -> Self {
        Self {
            ticket,
            url,
            error: None,
            request_headers,
            response_headers,
        }
    }

    pub fn failed(
        ticket: Option<Ticket>,
        url: Url,
        error: NetworkError,
        request_headers: HeaderMap,
        response_headers: HeaderMap,
    ) -> Self {
        Self {
            ticket,
            url,
            error: Some(error),
            request_headers,
            response_headers,
        }
    }
}

/// Render headers one per line for diagnostics
pub fn format_headers(headers: &HeaderMap) -> String {
    let mut rendered = String::new();
    for (name, value) in headers {
        rendered.push_str(name.as_str());
        rendered.push_str(": ");
        rendered.push_str(&String::from_utf8_lossy(value.as_bytes()));
        rendered.push('\n');
    }
    rendered
}
