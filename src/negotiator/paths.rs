//! Script and article path detection from a wiki's root HTML.
//!
//! Paths are returned relative to the base URL with a trailing `/` and no
//! leading `/` (`w/`, `wiki/`), or an empty string for the root itself.

use std::cell::RefCell;
use std::rc::Rc;

use lol_html::{RewriteStrSettings, element, rewrite_str};
use url::Url;

/// Marker used by the anchor fallback
const WIKI_PREFIX: &str = "/wiki/";

/// Link hrefs collected in one pass over the document
#[derive(Debug, Default)]
struct PageLinks {
    edit_uri: Option<String>,
    alternate_edit: Option<String>,
    canonical: Option<String>,
    wiki_anchor: Option<String>,
}

fn rel_contains(rel: &str, wanted: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|token| token.eq_ignore_ascii_case(wanted))
}

fn scan(html: &str) -> PageLinks {
    let links = Rc::new(RefCell::new(PageLinks::default()));

    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("link[rel][href]", {
                    let links = Rc::clone(&links);
                    move |el| {
                        let rel = el.get_attribute("rel").unwrap_or_default();
                        let Some(href) = el.get_attribute("href") else {
                            return Ok(());
                        };
                        let mut links = links.borrow_mut();
                        if rel_contains(&rel, "EditURI") {
                            links.edit_uri.get_or_insert(href);
                        } else if rel_contains(&rel, "alternate")
                            && el.get_attribute("type").as_deref() == Some("application/x-wiki")
                        {
                            links.alternate_edit.get_or_insert(href);
                        } else if rel_contains(&rel, "canonical") {
                            links.canonical.get_or_insert(href);
                        }
                        Ok(())
                    }
                }),
                element!("a[href]", {
                    let links = Rc::clone(&links);
                    move |el| {
                        let mut links = links.borrow_mut();
                        if links.wiki_anchor.is_none()
                            && let Some(href) = el.get_attribute("href")
                            && href.contains(WIKI_PREFIX)
                        {
                            links.wiki_anchor = Some(href);
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    );

    if let Err(e) = result {
        tracing::debug!(error = %e, "could not scan root HTML for wiki paths");
    }
    links.take()
}

/// Directory of `path` (everything up to and including the last `/`)
fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..=index],
        None => "/",
    }
}

/// Express an absolute directory path relative to the base URL's path
fn relative_to_base(dir: &str, resolved: &Url, base: &Url) -> Option<String> {
    if resolved.host_str() != base.host_str() {
        return None;
    }
    let base_dir = directory_of(base.path());
    dir.strip_prefix(base_dir).map(str::to_string)
}

/// Directory holding the API script, from the page's edit links
///
/// Prefers the `EditURI` (RSD) link, which points straight at `api.php`;
/// falls back to the `alternate` `application/x-wiki` edit link, which
/// points at `index.php` in the same directory. `None` when neither exists
/// or resolves under the base URL.
pub fn detect_script_path(html: &str, base: &Url) -> Option<String> {
    let links = scan(html);
    script_path_from(&links, base)
}

fn script_path_from(links: &PageLinks, base: &Url) -> Option<String> {
    let href = links.edit_uri.as_ref().or(links.alternate_edit.as_ref())?;
    let resolved = base.join(href).ok()?;
    relative_to_base(directory_of(resolved.path()), &resolved, base)
}

/// Article path prefix, from the canonical link or `/wiki/` anchors
///
/// Returns an empty string when nothing usable is found.
pub fn detect_article_path(html: &str, base: &Url) -> String {
    let links = scan(html);
    article_path_from(&links, base)
}

fn article_path_from(links: &PageLinks, base: &Url) -> String {
    if let Some(canonical) = &links.canonical
        && let Ok(resolved) = base.join(canonical)
        && let Some(path) = relative_to_base(directory_of(resolved.path()), &resolved, base)
    {
        return path;
    }

    if let Some(anchor) = &links.wiki_anchor
        && let Ok(resolved) = base.join(anchor)
        && let Some(index) = resolved.path().find(WIKI_PREFIX)
    {
        let dir = &resolved.path()[..index + WIKI_PREFIX.len()];
        if let Some(path) = relative_to_base(dir, &resolved, base) {
            return path;
        }
    }

    String::new()
}

/// Both paths from a single scan
pub(crate) fn detect_paths(html: &str, base: &Url) -> (Option<String>, String) {
    let links = scan(html);
    (
        script_path_from(&links, base),
        article_path_from(&links, base),
    )
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const MEDIAWIKI_HEAD: &str = r#"<!DOCTYPE html>
<html><head>
<link rel="alternate" type="application/x-wiki" title="Edit" href="/w/index.php?title=Main_Page&amp;action=edit">
<link rel="EditURI" type="application/rsd+xml" href="//example.org/w/api.php?action=rsd">
<link rel="canonical" href="https://example.org/wiki/Main_Page">
</head><body><a href="/wiki/Help:Contents">Help</a></body></html>"#;

    fn base() -> Url {
        Url::parse("https://example.org/").unwrap()
    }

    #[test]
    fn canonical_link_yields_article_path() {
        assert_eq!(detect_article_path(MEDIAWIKI_HEAD, &base()), "wiki/");
    }

    #[test]
    fn edit_uri_yields_script_path() {
        assert_eq!(
            detect_script_path(MEDIAWIKI_HEAD, &base()).as_deref(),
            Some("w/")
        );
    }

    #[test]
    fn alternate_edit_link_is_a_fallback() {
        let html = r#"<link rel="alternate" type="application/x-wiki" href="/mw/index.php?title=X&action=edit">"#;
        assert_eq!(detect_script_path(html, &base()).as_deref(), Some("mw/"));
    }

    #[test]
    fn root_installation_gives_empty_paths() {
        let html = r#"<link rel="EditURI" href="/api.php?action=rsd"><link rel="canonical" href="/Main_Page">"#;
        assert_eq!(detect_script_path(html, &base()).as_deref(), Some(""));
        assert_eq!(detect_article_path(html, &base()), "");
    }

    #[test]
    fn anchors_are_used_without_canonical() {
        let html = r#"<body><a href="/about">About</a><a href="/wiki/Dog">Dog</a></body>"#;
        assert_eq!(detect_article_path(html, &base()), "wiki/");
    }

    #[test]
    fn missing_elements_are_tolerated() {
        let html = "<html><body><p>Nothing here</p></body></html>";
        assert_eq!(detect_script_path(html, &base()), None);
        assert_eq!(detect_article_path(html, &base()), "");
        assert_eq!(detect_paths("", &base()), (None, String::new()));
    }

    #[test]
    fn paths_are_relative_to_a_nested_base() {
        let base = Url::parse("https://example.org/fandom/").unwrap();
        let html = r#"<link rel="EditURI" href="/fandom/w/api.php?action=rsd">
<link rel="canonical" href="https://example.org/fandom/wiki/Main_Page">"#;
        assert_eq!(detect_paths(html, &base), (Some("w/".to_string()), "wiki/".to_string()));
    }

    #[test]
    fn foreign_host_links_are_ignored() {
        let html = r#"<link rel="EditURI" href="https://other.org/w/api.php?action=rsd">"#;
        assert_eq!(detect_script_path(html, &base()), None);
    }
}
