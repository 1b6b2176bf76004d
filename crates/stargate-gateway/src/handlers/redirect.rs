use crate::error::Result;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use stargate_redirector::VisitContext;
use std::net::SocketAddr;
use tracing::debug;

/// Cookie carrying a stable visitor id across redirects.
pub const VISITOR_COOKIE: &str = "uv";
const FORWARDED_FOR: &str = "x-forwarded-for";

pub async fn redirect_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response> {
    let visit = visit_context(&headers, peer);
    let origin = state.redirector().resolve(&code, &visit).await?;
    debug!(%code, %origin, "redirecting");
    Ok((StatusCode::FOUND, [(header::LOCATION, origin)]).into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// First hop of `X-Forwarded-For`, or the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    header_str(headers, FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

fn visitor_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == VISITOR_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub(crate) fn visit_context(headers: &HeaderMap, peer: SocketAddr) -> VisitContext {
    VisitContext {
        user: visitor_cookie(headers),
        ip: client_ip(headers, peer),
        user_agent: header_str(headers, header::USER_AGENT)
            .unwrap_or_default()
            .to_string(),
        network: None,
        // Filled in by the resolver when a geoip database is configured.
        locale: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "10.0.0.9:51000".parse().unwrap()
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "10.0.0.9");

        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(""));
        assert_eq!(client_ip(&headers, peer()), "10.0.0.9");
    }

    #[test]
    fn visitor_cookie_is_picked_out_of_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; uv=abc123; x=1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));

        let visit = visit_context(&headers, peer());
        assert_eq!(visit.user.as_deref(), Some("abc123"));
        assert_eq!(visit.user_agent, "curl/8.0");
        assert_eq!(visit.visitor_id(), "abc123");
    }

    #[test]
    fn empty_visitor_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("uv="));
        assert_eq!(visit_context(&headers, peer()).user, None);
    }
}
