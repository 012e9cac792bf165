//! Per-worker network access policy
//!
//! Every page request a worker's engine makes passes through its
//! [`AccessController`]: filter rules may block it, the proxy settings may
//! rewrite it, cookies are attached and collected, and a failed request turns
//! into a backoff abort of the job that issued it.

pub mod backoff;
pub mod cookies;
pub mod filter;
pub mod proxy;
pub mod request;

pub use backoff::BackoffPolicy;
pub use cookies::CookieJar;
pub use filter::{FilterRule, RuleDecision, RuleKind};
pub use proxy::{ProxyConfig, ProxyCredentials};
pub use request::{
    NetworkError, NetworkErrorKind, OutboundRequest, RequestDisposition, RequestOutcome,
};

use crate::errors::AccessResult;
use crate::job_scheduling::events::{
    ControlCall, CoordinatorEvent, EventSender, Ticket, WorkerEvent, WorkerId,
};
use crate::utils::UrlUtils;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

#[derive(Debug, Default)]
struct AccessState {
    /// Job the policy currently applies to, `None` while the worker is idle
    ticket: Option<Ticket>,
    rules: Vec<FilterRule>,
    proxy: Option<ProxyConfig>,
    anonymizing: bool,
}

/// Network policy for one worker
#[derive(Debug)]
pub struct AccessController {
    worker: WorkerId,
    state: RwLock<AccessState>,
    cookies: CookieJar,
    backoff: BackoffPolicy,
    events: EventSender,
}

impl AccessController {
    pub fn new(worker: WorkerId, backoff: BackoffPolicy, events: EventSender) -> Self {
        Self {
            worker,
            state: RwLock::new(AccessState::default()),
            cookies: CookieJar::new(),
            backoff,
            events,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AccessState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AccessState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Start applying policy on behalf of the job holding `ticket`
    pub fn bind(&self, ticket: Ticket, anonymizing: bool) {
        let mut state = self.write();
        state.ticket = Some(ticket);
        state.anonymizing = anonymizing;
    }

    /// Replace the filter rules
    ///
    /// Entries are parsed in order. On the first invalid entry the rules
    /// parsed so far stay installed and the error is returned.
    pub fn set_filter_rules<S: AsRef<str>>(&self, entries: &[S]) -> AccessResult<()> {
        let (rules, failure) = filter::parse_filter_rules(entries);
        debug!(
            "Worker {}: installing {} filter rules",
            self.worker,
            rules.len()
        );
        self.write().rules = rules;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Install or clear the proxy
    ///
    /// A missing or empty proxy string clears it. An unparsable one leaves the
    /// worker without a proxy and returns the error.
    pub fn set_proxy(&self, proxy: Option<&str>, auth: Option<&str>) -> AccessResult<()> {
        let parsed = match proxy.map(str::trim).filter(|proxy| !proxy.is_empty()) {
            Some(proxy) => ProxyConfig::parse(proxy, auth).map(Some),
            None => Ok(None),
        };

        let mut state = self.write();
        match parsed {
            Ok(proxy) => {
                if let Some(proxy) = &proxy {
                    info!(
                        "Worker {}: using proxy {} ({})",
                        self.worker,
                        proxy.url(),
                        auth.map(UrlUtils::obfuscate_auth)
                            .unwrap_or_else(|| "no auth".to_string())
                    );
                }
                state.proxy = proxy;
                Ok(())
            }
            Err(e) => {
                state.proxy = None;
                Err(e)
            }
        }
    }

    pub fn proxy(&self) -> Option<ProxyConfig> {
        self.read().proxy.clone()
    }

    pub fn decide(&self, url: &str) -> RuleDecision {
        filter::decide(&self.read().rules, url)
    }

    /// Apply the policy to a request about to leave the engine
    pub fn intercept(&self, mut request: OutboundRequest) -> RequestDisposition {
        let state = self.read();
        if state.ticket.is_none() {
            return RequestDisposition::Forward(request);
        }

        let url = request.url.to_string();
        if filter::decide(&state.rules, &url) == RuleDecision::Reject {
            debug!(
                "Worker {}: blocking {}",
                self.worker,
                UrlUtils::obfuscate_credentials(&url)
            );
            return RequestDisposition::Blocked;
        }

        request.ticket = state.ticket;
        self.cookies.apply(&request.url, &mut request.headers);

        match &state.proxy {
            Some(proxy) if state.anonymizing => {
                match proxy::apply_anonymizing_rewrite(request, proxy) {
                    Some(rewritten) => RequestDisposition::Forward(rewritten),
                    None => {
                        debug!(
                            "Worker {}: blocking {}, scheme not supported by the proxy",
                            self.worker,
                            UrlUtils::obfuscate_credentials(&url)
                        );
                        RequestDisposition::Blocked
                    }
                }
            }
            _ => RequestDisposition::Forward(request),
        }
    }

    /// Record a finished request
    ///
    /// Cookies from the response are kept. A failure other than a
    /// cancellation aborts the job that issued the request, provided it is
    /// still the bound one; the returned delay is the backoff it was aborted
    /// with.
    pub fn request_finished(&self, outcome: &RequestOutcome) -> Option<Duration> {
        self.cookies
            .store_from_headers(&outcome.url, &outcome.response_headers);

        let error = outcome.error.as_ref()?;
        let ticket = self.issuing_job(outcome.ticket, &outcome.url)?;
        let url = UrlUtils::obfuscate_credentials(outcome.url.as_str());

        if error.kind == NetworkErrorKind::OperationCanceled {
            debug!("Worker {}: request to {} was cancelled", self.worker, url);
            return None;
        }

        let delay = self.backoff.delay_for(&outcome.response_headers);
        error!(
            "Worker {}: request to {} failed ({}), aborting job with retry in {:?}\nRequest headers:\n{}Response headers:\n{}",
            self.worker,
            url,
            error,
            delay,
            request::format_headers(&outcome.request_headers),
            request::format_headers(&outcome.response_headers)
        );
        self.send(WorkerEvent::NetworkFailure {
            ticket,
            retry_after: delay,
        });
        Some(delay)
    }

    /// Credentials for a proxy authentication challenge
    pub fn proxy_credentials(&self) -> Option<ProxyCredentials> {
        match &self.read().proxy {
            Some(proxy) => proxy.credentials.clone(),
            None => {
                error!(
                    "Worker {}: proxy authentication requested but no proxy is configured",
                    self.worker
                );
                None
            }
        }
    }

    /// A server demanded authentication; the job that asked cannot proceed
    pub fn authentication_required(&self, ticket: Option<Ticket>, url: &Url) {
        let Some(ticket) = self.issuing_job(ticket, url) else {
            return;
        };
        error!(
            "Worker {}: {} requires authentication, aborting job",
            self.worker,
            UrlUtils::obfuscate_credentials(url.as_str())
        );
        self.send(WorkerEvent::Control {
            ticket,
            call: ControlCall::Abort { retry_after: None },
        });
    }

    /// `ticket` if the job it names is still bound to this worker
    fn issuing_job(&self, ticket: Option<Ticket>, url: &Url) -> Option<Ticket> {
        let ticket = ticket?;
        if self.read().ticket != Some(ticket) {
            debug!(
                "Worker {}: ignoring {} from finished job {}",
                self.worker,
                UrlUtils::obfuscate_credentials(url.as_str()),
                ticket
            );
            return None;
        }
        Some(ticket)
    }

    /// Return to the idle policy: no job, no rules, no proxy
    pub fn reset(&self) {
        *self.write() = AccessState::default();
    }

    pub fn clear_cookies(&self) {
        let cleared = self.cookies.clear();
        debug!("Worker {}: cleared {} cookies", self.worker, cleared);
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    fn send(&self, event: WorkerEvent) {
        if self
            .events
            .send(CoordinatorEvent::Worker {
                worker: self.worker,
                event,
            })
            .is_err()
        {
            debug!("Worker {}: coordinator has shut down", self.worker);
        }
    }
}
