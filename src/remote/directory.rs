use crate::error::{IngestError, Result};
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// Fetch an HTTP directory index and return the absolute URLs of every linked
/// file whose name ends with `ext`.
#[instrument(skip(client))]
pub async fn list_http_directory(client: &Client, url: &str, ext: &str) -> Result<Vec<String>> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let html = resp.text().await?;
    let files = parse_directory_listing(url, &html, ext)?;
    info!("Found {} '{}' files at {}", files.len(), ext, url);
    Ok(files)
}

/// Extract matching links from a directory index page.
///
/// Relative hrefs are resolved against `base_url` treated as a directory.
/// Duplicate links (index pages often link a file twice) are reported once,
/// in page order.
pub fn parse_directory_listing(base_url: &str, html: &str, ext: &str) -> Result<Vec<String>> {
    let base = directory_url(base_url)?;
    let document = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").expect("static selector");

    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for link in document.select(&link_sel) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let path = href.split(['?', '#']).next().unwrap_or_default();
        if path.is_empty() || path.ends_with('/') || !path.ends_with(ext) {
            continue;
        }
        let absolute = match base.join(href) {
            Ok(u) => u.to_string(),
            Err(e) => {
                debug!("Skipping unparseable link '{}': {}", href, e);
                continue;
            }
        };
        if seen.insert(absolute.clone()) {
            files.push(absolute);
        }
    }
    Ok(files)
}

fn directory_url(url: &str) -> Result<Url> {
    let with_slash = if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| IngestError::Config(format!("invalid directory URL '{}': {}", url, e)))
}

/// The local file name for a remote URL: its last path segment.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const APACHE_INDEX: &str = r#"
        <html><body><h1>Index of /Gaia/gedr3/gaia_source</h1>
        <a href="?C=N;O=D">Name</a>
        <a href="../">Parent Directory</a>
        <a href="GaiaSource_000000-003111.csv.gz">GaiaSource_000000-003111.csv.gz</a>
        <a href="GaiaSource_003112-005263.csv.gz">GaiaSource_003112-005263.csv.gz</a>
        <a href="GaiaSource_003112-005263.csv.gz">again</a>
        <a href="_MD5SUM.txt">_MD5SUM.txt</a>
        <a>no href</a>
        </body></html>
    "#;

    #[test]
    fn test_lists_only_matching_files() {
        let files = parse_directory_listing(
            "http://cdn.example.org/Gaia/gedr3/gaia_source/",
            APACHE_INDEX,
            "gz",
        )
        .unwrap();
        assert_eq!(
            files,
            vec![
                "http://cdn.example.org/Gaia/gedr3/gaia_source/GaiaSource_000000-003111.csv.gz",
                "http://cdn.example.org/Gaia/gedr3/gaia_source/GaiaSource_003112-005263.csv.gz",
            ]
        );
    }

    #[test]
    fn test_base_without_trailing_slash() {
        let files = parse_directory_listing(
            "http://cdn.example.org/gaia_source",
            APACHE_INDEX,
            ".txt",
        )
        .unwrap();
        assert_eq!(files, vec!["http://cdn.example.org/gaia_source/_MD5SUM.txt"]);
    }

    #[test]
    fn test_empty_extension_matches_every_file_but_not_directories() {
        let files =
            parse_directory_listing("http://cdn.example.org/d/", APACHE_INDEX, "").unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| !f.ends_with('/')));
    }

    #[test]
    fn test_absolute_links_are_kept() {
        let html = r#"<a href="https://mirror.example.org/x/file.csv.gz">f</a>"#;
        let files = parse_directory_listing("http://cdn.example.org/d/", html, "gz").unwrap();
        assert_eq!(files, vec!["https://mirror.example.org/x/file.csv.gz"]);
    }

    #[test]
    fn test_invalid_base_url_is_an_error() {
        assert!(parse_directory_listing("not a url", APACHE_INDEX, "gz").is_err());
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("http://h/a/GaiaSource_1-2.csv.gz"),
            "GaiaSource_1-2.csv.gz"
        );
        assert_eq!(file_name_from_url("http://h/a/f.csv?x=1"), "f.csv");
    }
}
