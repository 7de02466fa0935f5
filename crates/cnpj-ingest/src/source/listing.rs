//! Remote listing resolver
//!
//! The release page is a plain directory index. Archive names are recovered
//! by scanning for the `.zip` marker and walking back to the nearest `href=`
//! attribute, which tolerates most markup changes. Entries that still carry
//! markup after extraction are dropped instead of failing the run.

use reqwest::Client;
use tracing::{debug, info};

use crate::error::{EtlError, Result};

/// Extension of the archives published on the listing page
pub const ARCHIVE_EXTENSION: &str = ".zip";

/// How far back from a marker the `href=` attribute may start
const HREF_LOOKBACK: usize = 160;

/// Resolves the archive names published on the listing page
pub struct ListingResolver {
    client: Client,
    url: String,
}

impl ListingResolver {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the listing page and return archive names in page order
    ///
    /// An unreachable page, or one that lists no archive, is an error.
    pub async fn resolve(&self) -> Result<Vec<String>> {
        info!(url = %self.url, "Fetching archive listing");

        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(EtlError::Listing(format!(
                "{} returned HTTP {}",
                self.url,
                response.status()
            )));
        }

        let body = response.bytes().await?;
        let html = String::from_utf8_lossy(&body);
        let names = parse_archive_names(&html, ARCHIVE_EXTENSION);

        if names.is_empty() {
            return Err(EtlError::Listing(format!(
                "{} lists no {} archives",
                self.url, ARCHIVE_EXTENSION
            )));
        }

        info!("Found {} archives to process", names.len());
        for name in &names {
            debug!(archive = %name, "Listed");
        }
        Ok(names)
    }
}

/// Extract every archive name ending in `extension` from raw markup
///
/// Duplicates (an anchor whose text repeats its target) are reported once,
/// at their first position.
pub fn parse_archive_names(html: &str, extension: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    for (marker_start, _) in html.match_indices(extension) {
        let marker_end = marker_start + extension.len();
        let mut window_start = marker_start.saturating_sub(HREF_LOOKBACK);
        while !html.is_char_boundary(window_start) {
            window_start += 1;
        }

        let window = &html[window_start..marker_end];
        let Some(href) = window.rfind("href=") else {
            continue;
        };

        let candidate = window[href + "href=".len()..].trim_start_matches(['"', '\'']);
        if is_artifact(candidate) {
            debug!(candidate = %candidate, "Dropping malformed listing entry");
            continue;
        }

        let name = candidate.rsplit('/').next().unwrap_or(candidate);
        if name.len() > extension.len() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    names
}

/// Leftover markup means the marker belonged to text after the link
fn is_artifact(candidate: &str) -> bool {
    candidate.contains('>')
        || candidate.contains('<')
        || candidate.contains('"')
        || candidate.contains('\'')
        || candidate.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const APACHE_INDEX: &str = r#"<html><body><h1>Index of /dados/cnpj/2025-06</h1>
<table>
<tr><td><a href="Cnaes.zip">Cnaes.zip</a></td><td>2025-06-15 10:02</td><td>22K</td></tr>
<tr><td><a href="Empresas0.zip">Empresas0.zip</a></td><td>2025-06-15 10:03</td><td>42M</td></tr>
<tr><td><a href="Estabelecimentos0.zip">Estabelecimentos0.zip</a></td><td>2025-06-15 10:05</td><td>300M</td></tr>
<tr><td><a href="LAYOUT_DADOS_ABERTOS_CNPJ.pdf">LAYOUT_DADOS_ABERTOS_CNPJ.pdf</a></td></tr>
</table></body></html>"#;

    #[test]
    fn test_parses_names_in_page_order() {
        let names = parse_archive_names(APACHE_INDEX, ARCHIVE_EXTENSION);
        assert_eq!(names, vec!["Cnaes.zip", "Empresas0.zip", "Estabelecimentos0.zip"]);
    }

    #[test]
    fn test_anchor_text_artifacts_are_filtered() {
        let html = r#"<a href="Simples.zip">Simples.zip</a>"#;
        assert_eq!(parse_archive_names(html, ARCHIVE_EXTENSION), vec!["Simples.zip"]);
    }

    #[test]
    fn test_marker_without_href_is_skipped() {
        let html = "<p>Download the Socios0.zip file from the mirror</p>";
        assert!(parse_archive_names(html, ARCHIVE_EXTENSION).is_empty());
    }

    #[test]
    fn test_absolute_links_keep_file_name_only() {
        let html = r#"<a href='/dados/cnpj/2025-06/Paises.zip'>Países</a>"#;
        assert_eq!(parse_archive_names(html, ARCHIVE_EXTENSION), vec!["Paises.zip"]);
    }

    #[test]
    fn test_multibyte_text_before_marker() {
        let html = format!("{}<a href=\"Municipios.zip\">x</a>", "çãé".repeat(80));
        assert_eq!(parse_archive_names(&html, ARCHIVE_EXTENSION), vec!["Municipios.zip"]);
    }

    #[tokio::test]
    async fn test_resolve_fetches_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dados/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(APACHE_INDEX))
            .mount(&server)
            .await;

        let resolver = ListingResolver::new(Client::new(), format!("{}/dados/", server.uri()));
        let names = resolver.resolve().await.unwrap();
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_fails_when_listing_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = ListingResolver::new(Client::new(), server.uri());
        assert!(matches!(resolver.resolve().await, Err(EtlError::Listing(_))));
    }

    #[tokio::test]
    async fn test_resolve_fails_on_listing_without_archives() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a href="LAYOUT_DADOS_ABERTOS_CNPJ.pdf">layout</a>"#),
            )
            .mount(&server)
            .await;

        let resolver = ListingResolver::new(Client::new(), server.uri());
        assert!(matches!(resolver.resolve().await, Err(EtlError::Listing(_))));
    }
}
