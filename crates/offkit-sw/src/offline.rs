//! Responses produced without the network or the store.
//!
//! Navigation fallbacks are always 200: rendering engines treat non-2xx
//! top-level responses poorly. API fallbacks are 503 so client code can tell
//! "offline" from "empty".

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use offkit_net::{Response, ResponseSource};

/// Error message carried by the offline API response.
pub const API_OFFLINE_MESSAGE: &str = "Offline - no cached data";

/// Last-resort page for navigations.
pub const OFFLINE_PAGE: &str = concat!(
    "<!DOCTYPE html>\n",
    "<html lang=\"en\">\n",
    "<head>\n",
    "<meta charset=\"utf-8\">\n",
    "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
    "<title>Offline</title>\n",
    "</head>\n",
    "<body>\n",
    "<h1>Offline</h1>\n",
    "<p>You are offline and this page has not been saved on this device yet. ",
    "Reconnect to the internet and try again.</p>\n",
    "</body>\n",
    "</html>\n"
);

/// `503` JSON response for API requests with neither network nor cache.
pub fn api_unavailable() -> Response {
    let body = serde_json::json!({ "error": API_OFFLINE_MESSAGE }).to_string();
    Response::new(StatusCode::SERVICE_UNAVAILABLE, body)
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .with_source(ResponseSource::Synthesized)
}

/// `200` HTML page for navigations nothing else could answer.
pub fn offline_page() -> Response {
    Response::new(StatusCode::OK, OFFLINE_PAGE)
        .header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
        .with_source(ResponseSource::Synthesized)
}

/// Re-issue a cached page as `200 OK` so it can stand in for another navigation.
pub fn as_fallback(mut response: Response) -> Response {
    if response.status != StatusCode::OK {
        response.status = StatusCode::OK;
        response.status_text = "OK".to_string();
    }
    response
}
