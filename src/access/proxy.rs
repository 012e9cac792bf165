//! Proxy settings and the anonymizing-proxy request rewrite

use super::request::{OutboundRequest, TlsOptions};
use crate::errors::AccessError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{HeaderName, HeaderValue};
use std::fmt;

/// Header names understood by the anonymizing proxy
pub mod headers {
    pub const PROXY_AUTHORIZATION: &str = "proxy-authorization";
    pub const PROXY_CONNECTION: &str = "proxy-connection";
    pub const USE_HTTPS: &str = "x-crawlera-use-https";
    pub const COOKIES: &str = "x-crawlera-cookies";
    pub const USER_AGENT_PROFILE: &str = "x-crawlera-ua";
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub user: String,
    pub password: String,
}

impl ProxyCredentials {
    /// Parse a `user:password` string
    pub fn parse(auth: &str) -> Result<Self, AccessError> {
        match auth.split_once(':') {
            Some((user, password)) => Ok(Self {
                user: user.to_string(),
                password: password.to_string(),
            }),
            None => Err(AccessError::invalid_proxy(
                crate::utils::UrlUtils::obfuscate_auth(auth),
                "credentials must be user:password",
            )),
        }
    }

    /// `Basic <base64(user:password)>`
    pub fn basic_authorization(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.user, self.password));
        format!("Basic {token}")
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

/// An HTTP proxy applied to a worker's page traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyConfig {
    /// Parse a `host:port` proxy string with optional `user:password` auth
    pub fn parse(proxy: &str, auth: Option<&str>) -> Result<Self, AccessError> {
        let Some((host, port)) = proxy.trim().rsplit_once(':') else {
            return Err(AccessError::invalid_proxy(proxy, "expected host:port"));
        };
        if host.is_empty() {
            return Err(AccessError::invalid_proxy(proxy, "empty host"));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|port| *port > 0)
            .ok_or_else(|| AccessError::invalid_proxy(proxy, format!("invalid port '{port}'")))?;

        let credentials = auth
            .filter(|auth| !auth.is_empty())
            .map(ProxyCredentials::parse)
            .transpose()?;

        Ok(Self {
            host: host.to_string(),
            port,
            credentials,
        })
    }

    /// Proxy URL suitable for an HTTP client
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Build the client-side proxy for the page engine's HTTP client,
    /// answering authentication challenges with `credentials`
    pub fn to_reqwest(
        &self,
        credentials: Option<&ProxyCredentials>,
    ) -> reqwest::Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(self.url())?;
        Ok(match credentials {
            Some(credentials) => proxy.basic_auth(&credentials.user, &credentials.password),
            None => proxy,
        })
    }
}

fn set_header(request: &mut OutboundRequest, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        request
            .headers
            .insert(HeaderName::from_static(name), value);
    }
}

/// Rewrite a request for an anonymizing proxy
///
/// HTTPS requests are sent as plain HTTP with a flag header telling the proxy
/// to upgrade upstream. Certificate checks are disabled for the proxy leg.
/// Returns `None` for schemes the proxy cannot carry.
pub fn apply_anonymizing_rewrite(
    mut request: OutboundRequest,
    proxy: &ProxyConfig,
) -> Option<OutboundRequest> {
    match request.url.scheme() {
        "http" => {}
        "https" => {
            request.url.set_scheme("http").ok()?;
            set_header(&mut request, headers::USE_HTTPS, "1");
            request.tls = TlsOptions {
                accept_invalid_certs: true,
            };
        }
        _ => return None,
    }

    set_header(&mut request, headers::COOKIES, "disable");
    set_header(&mut request, headers::USER_AGENT_PROFILE, "desktop");
    set_header(&mut request, headers::PROXY_CONNECTION, "Keep-Alive");

    if let Some(credentials) = &proxy.credentials {
        set_header(
            &mut request,
            headers::PROXY_AUTHORIZATION,
            &credentials.basic_authorization(),
        );
    }

    Some(request)
}
