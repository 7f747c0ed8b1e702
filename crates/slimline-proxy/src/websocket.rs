//! Websocket passthrough.
//!
//! The handshake is forwarded with its upgrade headers. When the upstream switches
//! protocols, both upgraded connections are spliced until either side closes.

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::Response;
use hyper_util::rt::TokioIo;
use tracing::{Instrument, debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::state::ProxyState;
use crate::upstream::{relay, request_target};

/// Forward an upgrade request and splice the connections on success.
pub(crate) async fn handle_websocket(
    state: &ProxyState,
    mut request: Request,
) -> ProxyResult<Response> {
    let client_upgrade = hyper::upgrade::on(&mut request);
    let (parts, _body) = request.into_parts();
    let mut headers = parts.headers;
    headers.remove(header::HOST);

    let url = state.upstream.url_for(request_target(&parts.uri))?;
    let response = state
        .upstream
        .client()
        .request(parts.method, url)
        .headers(headers)
        .send()
        .await
        .map_err(|source| ProxyError::upstream("websocket.handshake", source))?;

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Ok(relay(response));
    }

    let mut switched = Response::new(Body::empty());
    *switched.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *switched.headers_mut() = response.headers().clone();

    tokio::spawn(
        async move {
            let mut upstream_io = match response.upgrade().await {
                Ok(upgraded) => upgraded,
                Err(err) => {
                    warn!(error = %err, "upstream websocket upgrade failed");
                    return;
                }
            };
            let mut client_io = match client_upgrade.await {
                Ok(upgraded) => TokioIo::new(upgraded),
                Err(err) => {
                    warn!(error = %err, "client websocket upgrade failed");
                    return;
                }
            };
            match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
                Ok((sent, received)) => debug!(sent, received, "websocket closed"),
                Err(err) => debug!(error = %err, "websocket ended with error"),
            }
        }
        .in_current_span(),
    );

    Ok(switched)
}
