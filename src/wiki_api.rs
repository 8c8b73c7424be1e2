//! MediaWiki action API calls
//!
//! URL construction and response parsing for the handful of API calls the
//! pipeline makes. Every call goes through a [`NetworkAccessPort`], so the
//! same code works for all three backends.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};
use crate::network::NetworkAccessPort;
use crate::types::WikiTarget;

/// `action=query&meta=siteinfo` subset used to validate an API endpoint
#[derive(Clone, Debug, Deserialize)]
pub struct SiteInfo {
    /// Human-readable wiki name
    pub sitename: String,
    /// MediaWiki version string, e.g. `MediaWiki 1.41.0`
    #[serde(default)]
    pub generator: Option<String>,
    /// Main page title
    #[serde(default, rename = "mainpage")]
    pub main_page: Option<String>,
}

/// Rendered article body as returned by `action=parse`
#[derive(Clone, Debug)]
pub struct RenderedPage {
    /// Title after redirects were followed
    pub title: String,
    /// Rendered HTML fragment
    pub html: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct SiteInfoBody {
    query: SiteInfoQuery,
}

#[derive(Debug, Deserialize)]
struct SiteInfoQuery {
    general: SiteInfo,
}

#[derive(Debug, Deserialize)]
struct RandomBody {
    query: RandomQuery,
}

#[derive(Debug, Deserialize)]
struct RandomQuery {
    random: Vec<TitleOnly>,
}

#[derive(Debug, Deserialize)]
struct TitleOnly {
    title: String,
}

#[derive(Debug, Deserialize)]
struct RevisionsBody {
    query: RevisionsQuery,
}

#[derive(Debug, Deserialize)]
struct RevisionsQuery {
    #[serde(default)]
    pages: Vec<RevisionPage>,
}

#[derive(Debug, Deserialize)]
struct RevisionPage {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<Revision>,
}

#[derive(Debug, Deserialize)]
struct Revision {
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ParseBody {
    parse: ParseResult,
}

#[derive(Debug, Deserialize)]
struct ParseResult {
    title: String,
    text: String,
}

/// API endpoint of `target` with `params` appended
pub fn api_url(target: &WikiTarget, params: &[(&str, &str)]) -> Url {
    let mut url = target.api_url();
    url.query_pairs_mut().extend_pairs(params);
    url
}

/// Lightweight probe used by negotiation and connection tests
pub fn siteinfo_url(target: &WikiTarget) -> Url {
    api_url(
        target,
        &[("action", "query"), ("meta", "siteinfo"), ("format", "json")],
    )
}

/// `list=random` restricted to one main-namespace page
pub fn random_title_url(target: &WikiTarget) -> Url {
    api_url(
        target,
        &[
            ("action", "query"),
            ("list", "random"),
            ("rnnamespace", "0"),
            ("rnlimit", "1"),
            ("format", "json"),
        ],
    )
}

/// Latest revision timestamp of one title
pub fn revision_timestamp_url(target: &WikiTarget, title: &str) -> Url {
    api_url(
        target,
        &[
            ("action", "query"),
            ("prop", "revisions"),
            ("rvprop", "timestamp"),
            ("titles", title),
            ("redirects", "1"),
            ("format", "json"),
            ("formatversion", "2"),
        ],
    )
}

/// Rendered HTML of one title, following redirects
pub fn parse_url(target: &WikiTarget, title: &str) -> Url {
    api_url(
        target,
        &[
            ("action", "parse"),
            ("page", title),
            ("prop", "text"),
            ("redirects", "1"),
            ("format", "json"),
            ("formatversion", "2"),
        ],
    )
}

/// Decode an API answer, turning `{"error": ...}` replies into errors
fn decode<T: DeserializeOwned>(json: &str) -> Result<T> {
    let mut value: serde_json::Value = serde_json::from_str(json)?;
    if let Some(error) = value.get_mut("error").map(serde_json::Value::take) {
        let error: ApiError = serde_json::from_value(error)
            .map_err(|e| Error::MalformedResponse(format!("unreadable API error: {e}")))?;
        return Err(Error::MalformedResponse(format!(
            "API error {}: {}",
            error.code, error.info
        )));
    }
    serde_json::from_value(value)
        .map_err(|e| Error::MalformedResponse(format!("unexpected API response shape: {e}")))
}

/// Fetch and validate siteinfo
pub async fn siteinfo(port: &dyn NetworkAccessPort, target: &WikiTarget) -> Result<SiteInfo> {
    let json = port.fetch_json(&siteinfo_url(target)).await?;
    let body: SiteInfoBody = decode(&json)?;
    Ok(body.query.general)
}

/// Ask the wiki for one random main-namespace title
pub async fn random_title(port: &dyn NetworkAccessPort, target: &WikiTarget) -> Result<String> {
    let json = port.fetch_json(&random_title_url(target)).await?;
    let body: RandomBody = decode(&json)?;
    body.query
        .random
        .into_iter()
        .next()
        .map(|page| page.title)
        .ok_or_else(|| Error::MalformedResponse("random list was empty".to_string()))
}

/// Timestamp of the latest revision of `title`
///
/// A page that does not exist (or has no revisions) is a
/// [`Error::MalformedResponse`]: its freshness cannot be judged.
pub async fn last_revision(
    port: &dyn NetworkAccessPort,
    target: &WikiTarget,
    title: &str,
) -> Result<DateTime<Utc>> {
    let json = port
        .fetch_json(&revision_timestamp_url(target, title))
        .await?;
    let body: RevisionsBody = decode(&json)?;
    let page = body
        .query
        .pages
        .into_iter()
        .next()
        .ok_or_else(|| Error::MalformedResponse(format!("no page entry for {title}")))?;
    if page.missing {
        return Err(Error::MalformedResponse(format!("page {title} does not exist")));
    }
    page.revisions
        .into_iter()
        .next()
        .map(|revision| revision.timestamp)
        .ok_or_else(|| Error::MalformedResponse(format!("no revisions for {title}")))
}

/// Rendered HTML of `title`
pub async fn rendered_page(
    port: &dyn NetworkAccessPort,
    target: &WikiTarget,
    title: &str,
) -> Result<RenderedPage> {
    let json = port.fetch_json(&parse_url(target, title)).await?;
    let body: ParseBody = decode(&json)?;
    Ok(RenderedPage {
        title: body.parse.title,
        html: body.parse.text,
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::test_support::{FakePort, Reply};
    use crate::types::BackendKind;

    fn target() -> WikiTarget {
        let mut target = WikiTarget::new("ex", Url::parse("https://example.org/").unwrap());
        target.script_path = "w/".to_string();
        target
    }

    async fn port() -> FakePort {
        let port = FakePort::new(BackendKind::Direct);
        port.initialize(None).await.unwrap();
        port
    }

    #[test]
    fn urls_point_at_the_script_path() {
        assert_eq!(
            siteinfo_url(&target()).as_str(),
            "https://example.org/w/api.php?action=query&meta=siteinfo&format=json"
        );
        let parse = parse_url(&target(), "Hot dog");
        assert!(parse.as_str().contains("action=parse&page=Hot+dog&prop=text"));
        assert!(parse.as_str().contains("formatversion=2"));
        let random = random_title_url(&target());
        assert!(random.as_str().contains("list=random&rnnamespace=0&rnlimit=1"));
    }

    #[tokio::test]
    async fn random_title_takes_first_entry() {
        let port = port().await;
        port.reply(
            "list=random",
            Reply::Text(r#"{"batchcomplete":"","query":{"random":[{"id":42,"ns":0,"title":"Dog"}]}}"#.into()),
        );
        assert_eq!(random_title(&port, &target()).await.unwrap(), "Dog");
    }

    #[tokio::test]
    async fn last_revision_parses_utc_timestamp() {
        let port = port().await;
        port.reply(
            "prop=revisions",
            Reply::Text(
                r#"{"query":{"pages":[{"pageid":1,"title":"Dog","revisions":[{"timestamp":"2024-05-01T12:00:00Z"}]}]}}"#
                    .into(),
            ),
        );
        let timestamp = last_revision(&port, &target(), "Dog").await.unwrap();
        assert_eq!(timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[tokio::test]
    async fn missing_page_has_no_revision() {
        let port = port().await;
        port.reply(
            "prop=revisions",
            Reply::Text(r#"{"query":{"pages":[{"title":"Nope","missing":true}]}}"#.into()),
        );
        assert!(matches!(
            last_revision(&port, &target(), "Nope").await,
            Err(Error::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn api_error_reply_is_malformed() {
        let port = port().await;
        port.reply(
            "action=parse",
            Reply::Text(r#"{"error":{"code":"missingtitle","info":"The page you specified doesn't exist."}}"#.into()),
        );
        match rendered_page(&port, &target(), "Nope").await {
            Err(Error::MalformedResponse(message)) => assert!(message.contains("missingtitle")),
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rendered_page_follows_redirect_title() {
        let port = port().await;
        port.reply(
            "action=parse",
            Reply::Text(r#"{"parse":{"title":"Dog","pageid":1,"text":"<p>Woof</p>"}}"#.into()),
        );
        let page = rendered_page(&port, &target(), "Doggo").await.unwrap();
        assert_eq!(page.title, "Dog");
        assert_eq!(page.html, "<p>Woof</p>");
    }

    #[tokio::test]
    async fn siteinfo_requires_general_block() {
        let port = port().await;
        port.reply(
            "meta=siteinfo",
            Reply::Text(r#"{"query":{"general":{"sitename":"Example Wiki","generator":"MediaWiki 1.41.0"}}}"#.into()),
        );
        let info = siteinfo(&port, &target()).await.unwrap();
        assert_eq!(info.sitename, "Example Wiki");

        port.reply("meta=siteinfo", Reply::Text("{}".into()));
        assert!(siteinfo(&port, &target()).await.is_err());
    }
}
