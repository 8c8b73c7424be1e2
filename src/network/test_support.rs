//! Scriptable in-memory ports for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::extract::unwrap_json_payload;
use super::lifecycle::Lifecycle;
use super::{NetworkAccessPort, PortBuilder};
use crate::error::{Error, Result};
use crate::types::BackendKind;

/// Canned answer for URLs containing a pattern
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    Text(String),
    Bytes(Vec<u8>),
    Fail(Error),
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    json: AtomicUsize,
    post: AtomicUsize,
    html: AtomicUsize,
    bytes: AtomicUsize,
    initializations: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

/// Fake [`NetworkAccessPort`]
///
/// Siblings created with [`FakePort::sibling`] share replies and counters but
/// own their lifecycle and cookies, like separate instances of one backend.
pub(crate) struct FakePort {
    kind: BackendKind,
    script: Arc<Mutex<Vec<(String, Reply)>>>,
    counters: Arc<Counters>,
    delay: Option<Duration>,
    init_error: Option<Error>,
    cookies: Mutex<Vec<String>>,
    lifecycle: Lifecycle,
}

impl FakePort {
    pub(crate) fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            script: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            delay: None,
            init_error: None,
            cookies: Mutex::new(Vec::new()),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Sleep this long inside every request
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing_initialize(mut self, error: Error) -> Self {
        self.init_error = Some(error);
        self
    }

    /// Answer URLs containing `pattern`; later registrations win
    pub(crate) fn reply(&self, pattern: &str, reply: Reply) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push((pattern.to_string(), reply));
        self
    }

    pub(crate) fn sibling(&self) -> Self {
        Self {
            kind: self.kind,
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
            delay: self.delay,
            init_error: self.init_error.clone(),
            cookies: Mutex::new(Vec::new()),
            lifecycle: Lifecycle::new(),
        }
    }

    pub(crate) fn json_calls(&self) -> usize {
        self.counters.json.load(Ordering::SeqCst)
    }

    pub(crate) fn post_calls(&self) -> usize {
        self.counters.post.load(Ordering::SeqCst)
    }

    pub(crate) fn html_calls(&self) -> usize {
        self.counters.html.load(Ordering::SeqCst)
    }

    pub(crate) fn bytes_calls(&self) -> usize {
        self.counters.bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.json_calls() + self.post_calls() + self.html_calls() + self.bytes_calls()
    }

    pub(crate) fn initializations(&self) -> usize {
        self.counters.initializations.load(Ordering::SeqCst)
    }

    /// Number of requests whose URL contained `pattern`
    pub(crate) fn requests_matching(&self, pattern: &str) -> usize {
        self.counters
            .urls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.contains(pattern))
            .count()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    async fn answer(&self, counter: &AtomicUsize, url: &Url) -> Result<Reply> {
        self.lifecycle.ensure_ready()?;
        counter.fetch_add(1, Ordering::SeqCst);
        self.counters.urls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self.script.lock().unwrap();
        let reply = script
            .iter()
            .rev()
            .find(|(pattern, _)| url.as_str().contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());
        match reply {
            Some(Reply::Fail(e)) => Err(e),
            Some(reply) => Ok(reply),
            None => Err(Error::Http {
                status: 404,
                body: format!("no scripted reply for {url}"),
            }),
        }
    }
}

fn into_text(reply: Reply) -> Result<String> {
    match reply {
        Reply::Text(text) => Ok(text),
        Reply::Bytes(bytes) => String::from_utf8(bytes)
            .map_err(|e| Error::MalformedResponse(e.to_string())),
        Reply::Fail(e) => Err(e),
    }
}

#[async_trait]
impl NetworkAccessPort for FakePort {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn initialize(&self, _base_url: Option<&Url>) -> Result<()> {
        self.lifecycle
            .initialize(|| async {
                self.counters.initializations.fetch_add(1, Ordering::SeqCst);
                match &self.init_error {
                    Some(e) => Err(e.clone()),
                    None => Ok(()),
                }
            })
            .await
    }

    async fn fetch_json(&self, url: &Url) -> Result<String> {
        let reply = self.answer(&self.counters.json, url).await?;
        unwrap_json_payload(&into_text(reply)?)
    }

    async fn post_form_and_fetch_json(
        &self,
        url: &Url,
        _fields: &[(String, String)],
    ) -> Result<String> {
        let reply = self.answer(&self.counters.post, url).await?;
        unwrap_json_payload(&into_text(reply)?)
    }

    async fn fetch_raw_html(&self, url: &Url) -> Result<String> {
        let reply = self.answer(&self.counters.html, url).await?;
        into_text(reply)
    }

    async fn fetch_raw_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        match self.answer(&self.counters.bytes, url).await? {
            Reply::Bytes(bytes) => Ok(bytes),
            Reply::Text(text) => Ok(text.into_bytes()),
            Reply::Fail(e) => Err(e),
        }
    }

    async fn export_cookies(&self, _url: &Url) -> Result<Vec<String>> {
        Ok(self.cookies.lock().unwrap().clone())
    }

    async fn import_cookies(&self, _url: &Url, cookies: &[String]) -> Result<()> {
        let mut jar = self.cookies.lock().unwrap();
        for cookie in cookies {
            let name = cookie.split('=').next().unwrap_or_default();
            jar.retain(|existing| existing.split('=').next() != Some(name));
            jar.push(cookie.clone());
        }
        Ok(())
    }

    async fn dispose(&self) {
        self.lifecycle.dispose();
    }
}

/// [`PortBuilder`] handing out siblings of registered templates
#[derive(Default)]
pub(crate) struct FakeBuilder {
    templates: HashMap<BackendKind, FakePort>,
    built: Mutex<Vec<Arc<FakePort>>>,
}

impl FakeBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, template: FakePort) -> Self {
        self.templates.insert(template.kind, template);
        self
    }

    pub(crate) fn template(&self, kind: BackendKind) -> &FakePort {
        &self.templates[&kind]
    }

    /// Every port built so far, oldest first
    pub(crate) fn built(&self) -> Vec<Arc<FakePort>> {
        self.built.lock().unwrap().clone()
    }

    pub(crate) fn built_of(&self, kind: BackendKind) -> Vec<Arc<FakePort>> {
        self.built()
            .into_iter()
            .filter(|port| port.kind == kind)
            .collect()
    }
}

impl PortBuilder for FakeBuilder {
    fn create(&self, kind: BackendKind) -> Result<Arc<dyn NetworkAccessPort>> {
        let Some(template) = self.templates.get(&kind) else {
            return Err(Error::config(format!("no fake for {kind}"), "backend"));
        };
        let port = Arc::new(template.sibling());
        self.built.lock().unwrap().push(Arc::clone(&port));
        Ok(port)
    }
}
