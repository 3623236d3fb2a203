//! Hub endpoint URL composition.

use ::url::Url;

use crate::ClientError;

/// Query parameter carrying the original service base url.
pub const BASE_URL_QUERY_PARAM: &str = "base-url";

/// Builds `{base}/{path}[?base-url=...]` hub urls.
#[derive(Debug, Clone)]
pub struct ConnectionUrlBuilder {
    path: String,
    base_url: Option<String>,
    base_url_query: Option<String>,
}

impl ConnectionUrlBuilder {
    /// Create a builder for a hub path. A leading `/` is ignored.
    ///
    /// # Errors
    /// Returns `ClientError::Argument` if the path is empty.
    pub fn new(path: &str) -> Result<Self, ClientError> {
        let path = path.strip_prefix('/').unwrap_or(path);
        if path.is_empty() {
            return Err(ClientError::Argument("path"));
        }
        Ok(Self {
            path: path.to_string(),
            base_url: None,
            base_url_query: None,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Forward `url` to the hub in the `base-url` query parameter.
    #[must_use]
    pub fn with_base_url_query(mut self, url: impl Into<String>) -> Self {
        self.base_url_query = Some(url.into());
        self
    }

    /// Compose the url.
    ///
    /// # Errors
    /// Returns `ClientError::Argument` if no base url was given or it does
    /// not parse.
    pub fn build(&self) -> Result<String, ClientError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or(ClientError::Argument("base_url"))?;

        let mut base = Url::parse(base).map_err(|_| ClientError::Argument("base_url"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut url = base
            .join(&self.path)
            .map_err(|_| ClientError::Argument("path"))?;

        if let Some(query) = self.base_url_query.as_deref().filter(|q| !q.is_empty()) {
            url.query_pairs_mut().append_pair(BASE_URL_QUERY_PARAM, query);
        }

        Ok(url.into())
    }
}

/// `scheme://host[:port]` of a url, without path or query.
///
/// # Errors
/// Returns `ClientError::Argument` if `url` is not absolute or has no host.
pub fn origin_of(url: &str) -> Result<String, ClientError> {
    if !url.contains("://") {
        return Err(ClientError::Argument("url"));
    }
    let parsed = Url::parse(url).map_err(|_| ClientError::Argument("url"))?;
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or(ClientError::Argument("url"))?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    })
}

/// Host part of a url, used to tag trace output.
#[must_use]
pub fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_leading_slash() {
        let url = ConnectionUrlBuilder::new("/signalr")
            .unwrap()
            .with_base_url("http://hub.local")
            .build()
            .unwrap();
        assert_eq!(url, "http://hub.local/signalr");
    }

    #[test]
    fn test_keeps_base_path() {
        let url = ConnectionUrlBuilder::new("events")
            .unwrap()
            .with_base_url("https://api.local/v2")
            .build()
            .unwrap();
        assert_eq!(url, "https://api.local/v2/events");
    }

    #[test]
    fn test_appends_encoded_base_url_query() {
        let url = ConnectionUrlBuilder::new("signalr")
            .unwrap()
            .with_base_url("http://hub.local/")
            .with_base_url_query("http://app.local/a b")
            .build()
            .unwrap();
        assert_eq!(
            url,
            "http://hub.local/signalr?base-url=http%3A%2F%2Fapp.local%2Fa+b"
        );
    }

    #[test]
    fn test_rejects_missing_parts() {
        assert!(matches!(
            ConnectionUrlBuilder::new("/"),
            Err(ClientError::Argument("path"))
        ));
        assert!(matches!(
            ConnectionUrlBuilder::new("hub").unwrap().build(),
            Err(ClientError::Argument("base_url"))
        ));
    }

    #[test]
    fn test_origin_and_host() {
        assert_eq!(
            origin_of("https://logs.local:8443/app/page?x=1").unwrap(),
            "https://logs.local:8443"
        );
        assert!(origin_of("logs.local/app").is_err());
        assert_eq!(origin_of("http://logs.local:80/app").unwrap(), "http://logs.local");
        assert_eq!(host_of("wss://hub.local:5000/hub"), "hub.local:5000");
        assert_eq!(host_of("hub.local"), "hub.local");
    }

    #[test]
    fn test_origin_of_custom_scheme() {
        assert_eq!(
            origin_of("memory://demo.local:7/app/home").unwrap(),
            "memory://demo.local:7"
        );
        assert_eq!(origin_of("memory://demo.local/app").unwrap(), "memory://demo.local");
        assert!(matches!(origin_of("memory:///app"), Err(ClientError::Argument("url"))));
    }
}
