//! HTTP clients for the running agent
//!
//! [`NoSessionProxy`] answers status queries without a session binding;
//! [`SessionProxy`] forwards commands under `/session/<id>`. Both are built
//! from the same [`ProxyOptions`]. Neither retries: readiness polling lives
//! in the builder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::status::StatusSnapshot;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid agent url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("agent answered {code} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        code: u16,
        body: String,
    },

    #[error("could not decode agent response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

/// Connection parameters shared by both proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    pub scheme: String,
    pub server: String,
    pub port: u16,
    /// Path prefix, empty when the agent is mounted at `/`.
    pub base: String,
    pub timeout: Duration,
    pub keep_alive: bool,
}

impl ProxyOptions {
    pub fn from_url(url: &Url, timeout: Duration, keep_alive: bool) -> Result<Self, ProxyError> {
        let invalid = |reason: &str| ProxyError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let server = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            server: server.to_string(),
            port,
            base: base_path(url),
            timeout,
            keep_alive,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}://{}:{}{}{}",
            self.scheme, self.server, self.port, self.base, path
        )
    }
}

/// Path component of an agent URL with any trailing slash removed.
pub fn base_path(url: &Url) -> String {
    let path = url.path();
    if path == "/" {
        String::new()
    } else {
        path.trim_end_matches('/').to_string()
    }
}

/// Anything that can answer a status query.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// `timeout` applies to this request only; `None` uses the default.
    async fn status(&self, timeout: Option<Duration>) -> Result<StatusSnapshot, ProxyError>;
}

/// Status-only client with no session binding.
#[derive(Debug, Clone)]
pub struct NoSessionProxy {
    opts: ProxyOptions,
    client: reqwest::Client,
}

impl NoSessionProxy {
    pub fn new(opts: ProxyOptions) -> Result<Self, ProxyError> {
        let mut builder = reqwest::Client::builder();
        if !opts.keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }
        let client = builder.build().map_err(|source| ProxyError::Request {
            endpoint: opts.endpoint(""),
            source,
        })?;
        Ok(Self { opts, client })
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.opts
    }

    /// Send one command and unwrap the `value` member of the answer.
    pub async fn command(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, ProxyError> {
        self.send(path, method, body, None).await
    }

    async fn send(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ProxyError> {
        let endpoint = self.opts.endpoint(path);
        debug!(%method, endpoint = %endpoint, "proxying agent command");

        let mut request = self
            .client
            .request(method, &endpoint)
            .timeout(timeout.unwrap_or(self.opts.timeout));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| ProxyError::Request {
            endpoint: endpoint.clone(),
            source,
        })?;
        let code = response.status();
        let text = response.text().await.map_err(|source| ProxyError::Request {
            endpoint: endpoint.clone(),
            source,
        })?;
        if !code.is_success() {
            return Err(ProxyError::Status {
                endpoint,
                code: code.as_u16(),
                body: text,
            });
        }

        let mut value: Value = serde_json::from_str(&text).map_err(|e| ProxyError::Decode {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;
        Ok(match value.get_mut("value") {
            Some(inner) => inner.take(),
            None => value,
        })
    }
}

#[async_trait]
impl StatusSource for NoSessionProxy {
    async fn status(&self, timeout: Option<Duration>) -> Result<StatusSnapshot, ProxyError> {
        let value = self.send("/status", Method::GET, None, timeout).await?;
        serde_json::from_value(value).map_err(|e| ProxyError::Decode {
            endpoint: self.opts.endpoint("/status"),
            message: e.to_string(),
        })
    }
}

/// Forwarding client bound to one automation session.
#[derive(Debug, Clone)]
pub struct SessionProxy {
    inner: NoSessionProxy,
    session_id: Option<String>,
}

impl SessionProxy {
    pub fn new(opts: ProxyOptions, session_id: Option<String>) -> Result<Self, ProxyError> {
        Ok(Self {
            inner: NoSessionProxy::new(opts)?,
            session_id,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
    }

    /// Path the command is sent to once the session binding is applied.
    pub fn session_path(&self, path: &str) -> String {
        match &self.session_id {
            Some(id) if !path.starts_with("/session") && path != "/status" => {
                format!("/session/{id}{path}")
            }
            _ => path.to_string(),
        }
    }

    pub async fn command(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, ProxyError> {
        self.inner
            .command(&self.session_path(path), method, body)
            .await
    }
}

/// The pair of clients a launched agent is reached through.
#[derive(Debug, Clone)]
pub struct Proxies {
    pub no_session: Arc<NoSessionProxy>,
    pub session: SessionProxy,
}

/// Build both proxies from one agent URL.
pub fn setup_proxies(
    url: &Url,
    session_id: Option<String>,
    timeout: Duration,
    keep_alive: bool,
) -> Result<Proxies, ProxyError> {
    let opts = ProxyOptions::from_url(url, timeout, keep_alive)?;
    Ok(Proxies {
        no_session: Arc::new(NoSessionProxy::new(opts.clone())?),
        session: SessionProxy::new(opts, session_id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn opts_for(url: &str) -> ProxyOptions {
        ProxyOptions::from_url(&Url::parse(url).unwrap(), Duration::from_secs(5), true).unwrap()
    }

    #[test]
    fn options_from_url() {
        let opts = opts_for("http://127.0.0.1:8100");
        assert_eq!(opts.server, "127.0.0.1");
        assert_eq!(opts.port, 8100);
        assert_eq!(opts.base, "");
        assert_eq!(opts.endpoint("/status"), "http://127.0.0.1:8100/status");

        let opts = opts_for("https://device.local/wda/");
        assert_eq!(opts.port, 443);
        assert_eq!(opts.base, "/wda");
    }

    #[test]
    fn session_path_binding() {
        let mut proxy = SessionProxy::new(opts_for("http://127.0.0.1:8100"), None).unwrap();
        assert_eq!(proxy.session_path("/url"), "/url");

        proxy.set_session_id(Some("abc".to_string()));
        assert_eq!(proxy.session_path("/url"), "/session/abc/url");
        assert_eq!(proxy.session_path("/status"), "/status");
        assert_eq!(proxy.session_path("/session/abc/url"), "/session/abc/url");
    }

    #[tokio::test]
    async fn status_unwraps_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": {
                    "state": "success",
                    "build": {"productBundleIdentifier": "com.example.wda"}
                },
                "sessionId": null
            })))
            .mount(&server)
            .await;

        let proxy = NoSessionProxy::new(opts_for(&server.uri())).unwrap();
        let status = proxy.status(None).await.unwrap();
        assert_eq!(status.product_bundle_id(), Some("com.example.wda"));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503).set_body_string("booting"))
            .mount(&server)
            .await;

        let proxy = NoSessionProxy::new(opts_for(&server.uri())).unwrap();
        let err = proxy.status(Some(Duration::from_millis(500))).await.unwrap_err();
        assert!(matches!(err, ProxyError::Status { code: 503, .. }));
    }
}
