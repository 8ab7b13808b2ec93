//! Request classification.

use http::Method;
use offkit_net::{Destination, RequestDescriptor, UrlPattern};
use url::Url;

use crate::config::OfflineConfig;

/// What kind of request the engine is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Any method other than GET. Never intercepted.
    NonCacheable,
    /// Full-page navigation.
    Navigation,
    /// Own script, style, image or other asset.
    StaticAsset,
    /// JSON API endpoint under the API prefix.
    ApiData,
    /// Cross-origin asset on the allow-list.
    ThirdPartyAllowed,
    /// Cross-origin request not on the allow-list. Never intercepted.
    ThirdPartyBlocked,
}

impl RequestClass {
    /// Whether the worker answers this request or lets the platform handle it.
    pub fn intercepts(&self) -> bool {
        !matches!(
            self,
            RequestClass::NonCacheable | RequestClass::ThirdPartyBlocked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::NonCacheable => "non-cacheable",
            RequestClass::Navigation => "navigation",
            RequestClass::StaticAsset => "static-asset",
            RequestClass::ApiData => "api-data",
            RequestClass::ThirdPartyAllowed => "third-party-allowed",
            RequestClass::ThirdPartyBlocked => "third-party-blocked",
        }
    }
}

impl std::fmt::Display for RequestClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps request descriptors to [`RequestClass`]. Pure; holds only patterns.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    own_origin: UrlPattern,
    allowlist: Vec<UrlPattern>,
    api: UrlPattern,
    statics: UrlPattern,
}

impl RequestClassifier {
    /// Build a classifier for `origin` from the configured prefixes.
    pub fn new(origin: &Url, config: &OfflineConfig) -> Self {
        Self {
            own_origin: UrlPattern::origin(origin),
            allowlist: config
                .third_party_allowlist
                .iter()
                .map(|prefix| UrlPattern::prefix(prefix))
                .collect(),
            api: UrlPattern::path_prefix(&config.api_prefix),
            statics: UrlPattern::path_prefix(&config.static_prefix),
        }
    }

    /// Classify a request. First matching rule wins:
    ///
    /// 1. non-GET
    /// 2. cross-origin and not allow-listed
    /// 3. navigation signals, or the extension-less path heuristic
    /// 4. API prefix
    /// 5. everything else is an asset
    pub fn classify(&self, request: &RequestDescriptor) -> RequestClass {
        if request.method != Method::GET {
            return RequestClass::NonCacheable;
        }

        let same_origin = self.own_origin.matches(&request.url);
        if !same_origin && !self.is_allowlisted(&request.url) {
            return RequestClass::ThirdPartyBlocked;
        }

        if self.is_navigation(request) {
            return RequestClass::Navigation;
        }

        if self.api.matches(&request.url) {
            return RequestClass::ApiData;
        }

        if same_origin {
            RequestClass::StaticAsset
        } else {
            RequestClass::ThirdPartyAllowed
        }
    }

    /// Whether a successful response to this request may be stored.
    pub fn is_cacheable_response(&self, request: &RequestDescriptor) -> bool {
        matches!(
            request.destination,
            Destination::Document | Destination::Script | Destination::Style | Destination::Image
        ) || self.api.matches(&request.url)
            || self.statics.matches(&request.url)
            || self.is_allowlisted(&request.url)
    }

    /// Whether the URL is on the third-party allow-list.
    pub fn is_allowlisted(&self, url: &Url) -> bool {
        self.allowlist.iter().any(|pattern| pattern.matches(url))
    }

    fn is_navigation(&self, request: &RequestDescriptor) -> bool {
        if request.is_navigation
            || request.destination == Destination::Document
            || request.accepts_html()
        {
            return true;
        }

        // Not every engine sets mode or destination on top-level loads, so an
        // extension-less path outside the API and static trees is a page.
        !has_file_extension(request.url.path())
            && !self.api.matches(&request.url)
            && !self.statics.matches(&request.url)
    }
}

/// Whether the last path segment looks like `name.ext`.
fn has_file_extension(path: &str) -> bool {
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && !ext.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::header::{HeaderValue, ACCEPT};
    use offkit_net::{Request, RequestMode};

    fn classifier() -> RequestClassifier {
        let config = OfflineConfig::for_origin("https://farm.example/");
        RequestClassifier::new(&Url::parse(&config.origin).unwrap(), &config)
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn classify(request: Request) -> RequestClass {
        classifier().classify(&request.descriptor())
    }

    #[test]
    fn test_non_get_wins_over_everything() {
        let post = Request::post(
            Url::parse("https://farm.example/api/sync/").unwrap(),
            Bytes::from_static(b"{}"),
        )
        .mode(RequestMode::Navigate);
        assert_eq!(classify(post), RequestClass::NonCacheable);

        let delete = Request::with_method(
            Url::parse("https://cdn.other.example/x.js").unwrap(),
            Method::DELETE,
        );
        assert_eq!(classify(delete), RequestClass::NonCacheable);
    }

    #[test]
    fn test_cross_origin_blocked_unless_allowlisted() {
        assert_eq!(
            classify(get("https://fonts.example/inter.woff2")),
            RequestClass::ThirdPartyBlocked
        );
        assert_eq!(
            classify(
                get("https://unpkg.com/html5-qrcode@2.3.8/html5-qrcode.min.js")
                    .destination(Destination::Script)
            ),
            RequestClass::ThirdPartyAllowed
        );
    }

    #[test]
    fn test_navigation_signals() {
        assert_eq!(
            classify(Request::navigate(Url::parse("https://farm.example/scan/").unwrap())),
            RequestClass::Navigation
        );
        assert_eq!(
            classify(get("https://farm.example/report.html").destination(Destination::Document)),
            RequestClass::Navigation
        );
        assert_eq!(
            classify(
                get("https://farm.example/report.html")
                    .header(ACCEPT, HeaderValue::from_static("text/html"))
            ),
            RequestClass::Navigation
        );
    }

    #[test]
    fn test_extensionless_path_heuristic() {
        assert_eq!(classify(get("https://farm.example/scan")), RequestClass::Navigation);
        assert_eq!(classify(get("https://farm.example/")), RequestClass::Navigation);
        assert_eq!(
            classify(get("https://farm.example/api/tree/T-1/")),
            RequestClass::ApiData
        );
        assert_eq!(
            classify(get("https://farm.example/static/farm_app/icons/")),
            RequestClass::StaticAsset
        );
    }

    #[test]
    fn test_assets_and_api() {
        assert_eq!(
            classify(
                get("https://farm.example/static/farm_app/app.js")
                    .destination(Destination::Script)
            ),
            RequestClass::StaticAsset
        );
        assert_eq!(
            classify(get("https://farm.example/favicon.ico")),
            RequestClass::StaticAsset
        );
        assert_eq!(
            classify(get("https://farm.example/api/synced-activities/?page=2")),
            RequestClass::ApiData
        );
    }

    #[test]
    fn test_cacheable_response_subclasses() {
        let classifier = classifier();
        let check = |request: Request| classifier.is_cacheable_response(&request.descriptor());

        assert!(check(get("https://farm.example/logo.png").destination(Destination::Image)));
        assert!(check(get("https://farm.example/api/tree/T-1/")));
        assert!(check(get("https://farm.example/static/farm_app/manifest.json")));
        assert!(check(get("https://unpkg.com/html5-qrcode@2.3.8/html5-qrcode.min.js")));
        assert!(!check(get("https://farm.example/favicon.ico")));
        assert!(!check(
            get("https://farm.example/fonts/inter.woff2").destination(Destination::Font)
        ));
    }

    #[test]
    fn test_has_file_extension() {
        assert!(has_file_extension("/static/app.js"));
        assert!(has_file_extension("/a/b/c.tar.gz"));
        assert!(!has_file_extension("/scan/"));
        assert!(!has_file_extension("/scan"));
        assert!(!has_file_extension("/.well-known"));
        assert!(!has_file_extension("/trailing."));
    }

    #[test]
    fn test_intercepts() {
        assert!(!RequestClass::NonCacheable.intercepts());
        assert!(!RequestClass::ThirdPartyBlocked.intercepts());
        assert!(RequestClass::Navigation.intercepts());
        assert!(RequestClass::ThirdPartyAllowed.intercepts());
    }
}
