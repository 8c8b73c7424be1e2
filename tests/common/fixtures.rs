//! Canned MediaWiki responses and client construction helpers

use std::sync::Arc;

use tempfile::TempDir;
use wiki_fetch::{Config, FsStorage, StaticConnectivity, SurfaceFactory, WikiClient};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

/// Siteinfo answer accepted by the API probe
pub const SITEINFO: &str = r#"{"batchcomplete":"","query":{"general":{"sitename":"Example Wiki","generator":"MediaWiki 1.41.0","mainpage":"Main Page"}}}"#;

/// Last revision of "Dog"
pub const DOG_REVISION: &str = r#"{"batchcomplete":true,"query":{"pages":[{"pageid":7,"ns":0,"title":"Dog","revisions":[{"timestamp":"2024-05-01T12:00:00Z"}]}]}}"#;

/// Rendered body of "Dog"
pub const DOG_PARSE: &str = r#"{"parse":{"title":"Dog","pageid":7,"text":"<div class=\"mw-parser-output\"><p>Woof</p></div>"}}"#;

/// Header a solved challenge adds to every request from the browser surface
pub const CLEARANCE: (&str, &str) = ("x-clearance", "solved");

/// Root page of a MediaWiki install at `origin` using the `w/` + `wiki/` layout
pub fn root_html(origin: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en"><head>
<meta charset="UTF-8">
<title>Example Wiki</title>
<link rel="EditURI" type="application/rsd+xml" href="{origin}/w/api.php?action=rsd">
<link rel="alternate" type="application/x-wiki" title="Edit" href="{origin}/w/index.php?title=Main_Page&amp;action=edit">
<link rel="canonical" href="{origin}/wiki/Main_Page">
</head><body><a href="{origin}/wiki/Dog">Dog</a></body></html>"#
    )
}

fn given(route: &str, clearance: bool) -> MockBuilder {
    let builder = Mock::given(method("GET")).and(path(route));
    if clearance {
        builder.and(header(CLEARANCE.0, CLEARANCE.1))
    } else {
        builder
    }
}

/// Serve a complete wiki from `server`
///
/// With `clearance` the wiki only answers requests carrying [`CLEARANCE`];
/// see [`mount_challenge_wall`] for what everyone else gets.
pub async fn mount_wiki(server: &MockServer, clearance: bool) {
    given("/", clearance)
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=UTF-8")
                .set_body_string(root_html(&server.uri())),
        )
        .mount(server)
        .await;
    given("/w/api.php", clearance)
        .and(query_param("meta", "siteinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SITEINFO))
        .mount(server)
        .await;
    given("/w/api.php", clearance)
        .and(query_param("prop", "revisions"))
        .and(query_param("titles", "Dog"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DOG_REVISION))
        .mount(server)
        .await;
    given("/w/api.php", clearance)
        .and(query_param("action", "parse"))
        .and(query_param("page", "Dog"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DOG_PARSE))
        .mount(server)
        .await;
}

/// Answer every request without clearance with a 403 challenge page
pub async fn mount_challenge_wall(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("cf-mitigated", "challenge")
                .set_body_string(
                    "<html><title>Just a moment...</title><body>Verifying you are human</body></html>",
                ),
        )
        .with_priority(10)
        .mount(server)
        .await;
}

/// Config rooted in `dir` with retries disabled
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.cache.root_dir = dir.path().to_path_buf();
    config.retry.max_attempts = 0;
    config
}

/// A client over the filesystem plus the switch controlling its reachability
pub struct TestClient {
    pub client: WikiClient,
    pub connectivity: Arc<StaticConnectivity>,
}

/// Build a client over `config.cache.root_dir`
pub async fn client_with(config: Config, surfaces: Option<Arc<dyn SurfaceFactory>>) -> TestClient {
    let storage = Arc::new(FsStorage::new(config.cache.root_dir.clone()));
    let connectivity = Arc::new(StaticConnectivity::new(true));
    let client = WikiClient::new(config, storage, connectivity.clone(), surfaces)
        .await
        .expect("client construction failed");
    TestClient {
        client,
        connectivity,
    }
}
