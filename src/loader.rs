use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use ureq::Agent;

/// Default time allowed for fetching the library script.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to load script {url}: {message}")]
pub struct LoadError {
    pub url: String,
    pub message: String,
}

impl LoadError {
    pub fn new<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// A fetched library script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    url: String,
    body: String,
}

impl Script {
    pub fn new<U: Into<String>, B: Into<String>>(url: U, body: B) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

pub trait ScriptSource {
    /// Fetch and bring up the script found at `url`.
    #[allow(async_fn_in_trait)]
    async fn load(&self, url: &str) -> Result<Script, LoadError>;
}

type LoadFuture = Shared<LocalBoxFuture<'static, Result<Arc<Script>, LoadError>>>;

/// Loads each script at most once per key.
///
/// Every caller asking for a key that is already being loaded waits on the same
/// in-flight load, and once it settled they all see the same result. Failed loads are
/// not retried.
pub struct ScriptLoader<S> {
    source: Arc<S>,
    loads: Mutex<HashMap<String, LoadFuture>>,
}

impl<S: ScriptSource + 'static> ScriptLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            loads: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn ensure_loaded(&self, url: &str, once_key: &str) -> Result<Arc<Script>, LoadError> {
        let load = {
            let mut loads = self.loads.lock().unwrap_or_else(PoisonError::into_inner);
            loads
                .entry(once_key.to_string())
                .or_insert_with(|| {
                    log::info!("Loading {once_key} from {url}");

                    let source = Arc::clone(&self.source);
                    let url = url.to_string();
                    async move { source.load(&url).await.map(Arc::new) }
                        .boxed_local()
                        .shared()
                })
                .clone()
        };

        load.await
    }

    /// Whether the load for `once_key` finished successfully.
    pub fn is_loaded(&self, once_key: &str) -> bool {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(once_key)
            .and_then(|load| load.peek())
            .is_some_and(|result| result.is_ok())
    }
}

/// Fetches scripts over HTTP.
pub struct HttpScriptSource {
    agent: Agent,
}

impl HttpScriptSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: Agent::config_builder()
                .timeout_global(Some(timeout))
                .http_status_as_error(false)
                .build()
                .into(),
        }
    }
}

impl Default for HttpScriptSource {
    fn default() -> Self {
        Self::new(DEFAULT_LOAD_TIMEOUT)
    }
}

impl ScriptSource for HttpScriptSource {
    async fn load(&self, url: &str) -> Result<Script, LoadError> {
        let agent = self.agent.clone();
        let request_url = url.to_string();
        let body = tokio::task::spawn_blocking(move || fetch(&agent, &request_url))
            .await
            .map_err(|e| LoadError::new(url, e.to_string()))??;

        log::debug!("Fetched {} bytes from {url}", body.len());

        Ok(Script::new(url, body))
    }
}

fn fetch(agent: &Agent, url: &str) -> Result<String, LoadError> {
    let response = agent
        .get(url)
        .call()
        .map_err(|e| LoadError::new(url, e.to_string()))?;

    let status = response.status().as_u16();
    let mut body = response.into_body();

    if status >= 400 {
        return Err(LoadError::new(url, format!("HTTP {status}")));
    }

    body.read_to_string()
        .map_err(|e| LoadError::new(url, e.to_string()))
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[derive(Default, Clone)]
    struct CountingSource {
        loads: Rc<Cell<usize>>,
        fail: bool,
    }

    impl ScriptSource for CountingSource {
        async fn load(&self, url: &str) -> Result<Script, LoadError> {
            self.loads.set(self.loads.get() + 1);
            // give the other callers a chance to pile up on the same load
            tokio::task::yield_now().await;

            if self.fail {
                Err(LoadError::new(url, "offline"))
            } else {
                Ok(Script::new(url, "window.mermaid = {}"))
            }
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_load() {
        let source = CountingSource::default();
        let loader = ScriptLoader::new(source.clone());

        let (first, second) = futures::join!(
            loader.ensure_loaded("http://cdn/mermaid.js", "mermaid"),
            loader.ensure_loaded("http://cdn/mermaid.js", "mermaid"),
        );

        assert_eq!(source.loads.get(), 1);
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert!(loader.is_loaded("mermaid"));
    }

    #[tokio::test]
    async fn sequential_callers_reuse_the_load() {
        let source = CountingSource::default();
        let loader = ScriptLoader::new(source.clone());

        loader.ensure_loaded("http://cdn/a.js", "mermaid").await.unwrap();
        let script = loader.ensure_loaded("http://cdn/b.js", "mermaid").await.unwrap();

        // the key decides, not the url
        assert_eq!(script.url(), "http://cdn/a.js");
        assert_eq!(source.loads.get(), 1);
    }

    #[tokio::test]
    async fn different_keys_load_separately() {
        let source = CountingSource::default();
        let loader = ScriptLoader::new(source.clone());

        loader.ensure_loaded("http://cdn/a.js", "a").await.unwrap();
        loader.ensure_loaded("http://cdn/b.js", "b").await.unwrap();

        assert_eq!(source.loads.get(), 2);
    }

    #[tokio::test]
    async fn failed_loads_are_not_retried() {
        let source = CountingSource {
            fail: true,
            ..Default::default()
        };
        let loader = ScriptLoader::new(source.clone());

        let err = loader
            .ensure_loaded("http://cdn/mermaid.js", "mermaid")
            .await
            .unwrap_err();
        assert_eq!(err, LoadError::new("http://cdn/mermaid.js", "offline"));

        assert!(loader
            .ensure_loaded("http://cdn/mermaid.js", "mermaid")
            .await
            .is_err());
        assert_eq!(source.loads.get(), 1);
        assert!(!loader.is_loaded("mermaid"));
    }

    #[tokio::test]
    #[ignore = "opens a TCP connection"]
    async fn http_source_reports_unreachable_hosts() {
        let source = HttpScriptSource::new(Duration::from_secs(2));
        let err = source
            .load("http://127.0.0.1:9/mermaid.min.js")
            .await
            .unwrap_err();

        assert_eq!(err.url, "http://127.0.0.1:9/mermaid.min.js");
    }
}
