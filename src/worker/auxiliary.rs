//! Out-of-band HTTP requests issued on behalf of scripts
//!
//! These bypass the page engine and its access policy. GET responses are
//! delivered back to the coordinator; POSTs are fire-and-forget and only
//! logged.

use crate::access::request::format_headers;
use crate::job_scheduling::events::{
    CoordinatorEvent, EventSender, HttpCallbackResult, Ticket, WorkerEvent, WorkerId,
};
use crate::utils::UrlUtils;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct AuxiliaryHttp {
    client: Client,
}

impl AuxiliaryHttp {
    pub fn new(timeout: Duration, user_agent: &str) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Perform a GET and wait for its result
    pub async fn get(&self, url: &str) -> HttpCallbackResult {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return HttpCallbackResult::failure(0, e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return HttpCallbackResult::failure(status.as_u16(), format!("HTTP {status}"));
        }

        match response.text().await {
            Ok(body) => HttpCallbackResult::success(status.as_u16(), body),
            Err(e) => HttpCallbackResult::failure(status.as_u16(), e.to_string()),
        }
    }

    /// GET in the background and report the result for `callback_id`
    pub fn spawn_get(
        &self,
        worker: WorkerId,
        ticket: Ticket,
        callback_id: u64,
        url: String,
        events: EventSender,
    ) {
        let http = self.clone();
        tokio::spawn(async move {
            debug!(
                "Worker {}: auxiliary GET {} (callback {})",
                worker,
                UrlUtils::obfuscate_credentials(&url),
                callback_id
            );
            let response = http.get(&url).await;
            let event = CoordinatorEvent::Worker {
                worker,
                event: WorkerEvent::HttpResponse {
                    ticket,
                    callback_id,
                    response,
                },
            };
            if events.send(event).is_err() {
                debug!("Worker {}: coordinator has shut down", worker);
            }
        });
    }

    /// POST a JSON body in the background
    pub fn spawn_post(&self, worker: WorkerId, url: String, body: String) {
        let client = self.client.clone();
        tokio::spawn(async move {
            let safe_url = UrlUtils::obfuscate_credentials(&url);
            let result = client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    info!("Worker {}: post to {} successful", worker, safe_url);
                }
                Ok(response) => {
                    error!(
                        "Worker {}: post to {} failed with {}\nResponse headers:\n{}",
                        worker,
                        safe_url,
                        response.status(),
                        format_headers(response.headers())
                    );
                }
                Err(e) => {
                    error!("Worker {}: post to {} failed: {}", worker, safe_url, e);
                }
            }
        });
    }
}
