/// Security response headers
///
/// Applied to everything the API returns, including the 404s produced by
/// tenant resolution. Responses carry patient data, so they are also marked
/// `no-store`. HSTS is only sent in production, where the API sits behind TLS.
///
/// ```no_run
/// use axum::{middleware::map_response_with_state, Router};
/// use clinicore_api::middleware::security::set_security_headers;
///
/// let production = true;
/// let app: Router = Router::new().layer(map_response_with_state(production, set_security_headers));
/// ```

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};

const STATIC_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    ("cache-control", "no-store"),
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
];

const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Response mapper for `map_response_with_state`; the state is whether to send HSTS
pub async fn set_security_headers(State(hsts): State<bool>, mut response: Response) -> Response {
    insert_security_headers(response.headers_mut(), hsts);
    response
}

fn insert_security_headers(headers: &mut HeaderMap, hsts: bool) {
    for &(name, value) in STATIC_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    if hsts {
        headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body, http::StatusCode, middleware::map_response_with_state, routing::get, Router,
    };
    use tower::ServiceExt;

    async fn headers_for(hsts: bool) -> HeaderMap {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::NOT_FOUND }))
            .layer(map_response_with_state(hsts, set_security_headers));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        response.headers().clone()
    }

    #[tokio::test]
    async fn test_headers_on_every_response() {
        let headers = headers_for(false).await;

        assert_eq!(headers.get("X-Content-Type-Options").unwrap(), "nosniff");
        assert_eq!(headers.get("X-Frame-Options").unwrap(), "DENY");
        assert_eq!(headers.get("Cache-Control").unwrap(), "no-store");
        assert_eq!(headers.get("Referrer-Policy").unwrap(), "no-referrer");
        assert!(headers.get(header::STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[tokio::test]
    async fn test_hsts_only_when_enabled() {
        let headers = headers_for(true).await;
        assert_eq!(headers.get(header::STRICT_TRANSPORT_SECURITY).unwrap(), HSTS);
    }

    #[test]
    fn test_existing_cache_control_is_overridden() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));

        insert_security_headers(&mut headers, false);

        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(headers.get_all(header::CACHE_CONTROL).iter().count(), 1);
    }
}
