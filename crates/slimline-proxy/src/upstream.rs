//! The storage server as seen from the proxy.
//!
//! # Design
//! - One pooled client for every upstream call; redirects are relayed, never followed.
//! - Request and response headers are copied minus hop-by-hop headers. `Host` is left to
//!   the client so it always names the upstream.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{Method, Uri};
use axum::response::Response;
use url::Url;

use crate::error::{ProxyError, ProxyResult};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Handle to the upstream server.
#[derive(Clone, Debug)]
pub struct Upstream {
    client: reqwest::Client,
    base: Url,
}

impl Upstream {
    /// Build a client for `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Client`] when the HTTP client cannot be constructed.
    pub fn new(base: Url) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|source| ProxyError::Client { source })?;
        Ok(Self { client, base })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    pub(crate) const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Upstream URL for a request target, keeping any path prefix of the base.
    pub(crate) fn url_for(&self, target: &str) -> ProxyResult<Url> {
        let joined = format!("{}{}", self.base.as_str().trim_end_matches('/'), target);
        Url::parse(&joined).map_err(|_| ProxyError::InvalidUrl { value: joined })
    }

    /// Send `method target` upstream with the caller's end-to-end headers.
    pub(crate) async fn send(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: reqwest::Body,
    ) -> ProxyResult<reqwest::Response> {
        let url = self.url_for(request_target(uri))?;
        self.client
            .request(method, url)
            .headers(forwarded_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|source| ProxyError::upstream("send", source))
    }

    /// Stream a request upstream unchanged and relay the answer.
    pub(crate) async fn forward(&self, request: Request) -> ProxyResult<Response> {
        let (parts, body) = request.into_parts();
        let response = self
            .send(parts.method, &parts.uri, &parts.headers, stream_body(body))
            .await?;
        Ok(relay(response))
    }
}

/// Path and query of `uri`, `/` when empty.
pub(crate) fn request_target(uri: &Uri) -> &str {
    uri.path_and_query().map_or("/", |target| target.as_str())
}

/// End-to-end request headers to send upstream.
pub(crate) fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = strip_hop_by_hop(headers);
    forwarded.remove(header::HOST);
    forwarded
}

/// Copy of `headers` without hop-by-hop headers, including any named in `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut stripped = headers.clone();
    for value in headers.get_all(header::CONNECTION) {
        if let Ok(listed) = value.to_str() {
            for name in listed.split(',') {
                if let Ok(name) = HeaderName::from_bytes(name.trim().as_bytes()) {
                    stripped.remove(name);
                }
            }
        }
    }
    for name in HOP_BY_HOP {
        stripped.remove(*name);
    }
    stripped
}

/// Relay an upstream response to the client, streaming its body.
pub(crate) fn relay(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = strip_hop_by_hop(response.headers());
    let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    relayed
}

/// Stream an axum request body upstream.
pub(crate) fn stream_body(body: Body) -> reqwest::Body {
    reqwest::Body::wrap_stream(body.into_data_stream())
}
