//! Cross-origin gate for AMP email requests.
//!
//! Email clients identify the sending mailbox in one of two ways:
//!
//! - v2: an `AMP-Email-Sender` request header,
//! - v1: an `__amp_source_origin` query value alongside a browser `Origin`.
//!
//! Both claims are checked by the same [`AllowList`], which matches on whole
//! DNS labels so `example.org.evil.com` never passes for `example.org`.
//! Requests carrying neither claim are not from an email client and pass
//! through untouched.

use axum::{
    extract::{Query, Request, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
            ORIGIN,
        },
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::AccessError;
use crate::state::AppState;

pub const SENDER_HEADER: HeaderName = HeaderName::from_static("amp-email-sender");
pub const ALLOW_SENDER_HEADER: HeaderName = HeaderName::from_static("amp-email-allow-sender");
pub const ALLOW_SOURCE_ORIGIN_HEADER: HeaderName =
    HeaderName::from_static("amp-access-control-allow-source-origin");

pub const SOURCE_ORIGIN_PARAM: &str = "__amp_source_origin";

pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, AMP-Email-Sender";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Domains allowed to call the bridge, normalised to lowercase without a
/// leading `@` or `.`.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    domains: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .filter_map(|d| {
                let d = d.as_ref().trim().trim_start_matches(['@', '.']);
                normalise_domain(d)
            })
            .collect();
        Self { domains }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Does the claimed mailbox or origin belong to an allowed domain?
    pub fn permits(&self, claimed: &str) -> bool {
        let Some(candidate) = claimed_domain(claimed) else {
            return false;
        };
        self.domains.iter().any(|allowed| domain_matches(&candidate, allowed))
    }
}

/// Label-boundary suffix match: equal, or ends with `"." + allowed`.
pub fn domain_matches(candidate: &str, allowed: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    candidate == allowed
        || candidate
            .strip_suffix(allowed)
            .is_some_and(|head| head.len() > 1 && head.ends_with('.'))
}

/// Pull the host out of a mailbox (`user@host`) or an origin
/// (`https://host:443/path`).
pub fn claimed_domain(value: &str) -> Option<String> {
    let value = value.trim();
    let host = match value.rsplit_once('@') {
        Some((_, host)) => host,
        None => {
            let rest = value.split_once("://").map_or(value, |(_, rest)| rest);
            let rest = rest.split(['/', '?', '#']).next().unwrap_or_default();
            rest.rsplit_once(':').map_or(rest, |(host, _port)| host)
        }
    };
    normalise_domain(host)
}

fn normalise_domain(raw: &str) -> Option<String> {
    let host = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    let labels_ok = host.split('.').all(|label| {
        !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    labels_ok.then_some(host)
}

/// What the caller claims about where it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderClaim {
    V2 { sender: String },
    V1 { origin: String, source_origin: String },
    /// A claim is present but blank or not visible ASCII. Always refused.
    Unreadable { what: &'static str },
    /// Not an email client; not subject to the gate.
    Absent,
}

/// A single claim field as found on the request.
enum Field {
    Missing,
    Unreadable,
    Value(String),
}

impl Field {
    fn from_header(headers: &HeaderMap, name: &HeaderName) -> Self {
        match headers.get(name) {
            None => Self::Missing,
            Some(v) => Self::from_text(v.to_str().ok()),
        }
    }

    fn from_text(text: Option<&str>) -> Self {
        match text.map(str::trim) {
            Some(s) if !s.is_empty() => Self::Value(s.to_string()),
            _ => Self::Unreadable,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SourceOriginQuery {
    #[serde(rename = "__amp_source_origin")]
    source_origin: Option<String>,
}

fn source_origin_field(uri: &Uri) -> Field {
    match Query::<SourceOriginQuery>::try_from_uri(uri) {
        Ok(Query(q)) => match q.source_origin {
            None => Field::Missing,
            Some(v) => Field::from_text(Some(v.as_str())),
        },
        // A query we cannot decode still counts if it names the parameter.
        Err(_) if uri.query().is_some_and(|q| q.contains(SOURCE_ORIGIN_PARAM)) => Field::Unreadable,
        Err(_) => Field::Missing,
    }
}

impl SenderClaim {
    pub fn from_parts(headers: &HeaderMap, uri: &Uri) -> Self {
        match Field::from_header(headers, &SENDER_HEADER) {
            Field::Value(sender) => return Self::V2 { sender },
            Field::Unreadable => return Self::Unreadable { what: "AMP-Email-Sender" },
            Field::Missing => {}
        }

        match (Field::from_header(headers, &ORIGIN), source_origin_field(uri)) {
            (Field::Value(origin), Field::Value(source_origin)) => Self::V1 {
                origin,
                source_origin,
            },
            (Field::Unreadable, Field::Value(_) | Field::Unreadable) => {
                Self::Unreadable { what: "Origin" }
            }
            (Field::Value(_), Field::Unreadable) => Self::Unreadable {
                what: SOURCE_ORIGIN_PARAM,
            },
            _ => Self::Absent,
        }
    }

    /// The value checked against the allow-list.
    fn claimed(&self) -> Option<&str> {
        match self {
            Self::V2 { sender } => Some(sender),
            Self::V1 { source_origin, .. } => Some(source_origin),
            Self::Unreadable { .. } | Self::Absent => None,
        }
    }

    /// Response headers acknowledging an approved claim.
    fn echo_headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        let value = |s: &str| HeaderValue::from_str(s).ok();
        let mut out = Vec::new();
        match self {
            Self::V2 { sender } => {
                if let Some(v) = value(sender) {
                    out.push((ALLOW_SENDER_HEADER, v));
                    out.push((
                        ACCESS_CONTROL_EXPOSE_HEADERS,
                        HeaderValue::from_static("AMP-Email-Allow-Sender"),
                    ));
                }
            }
            Self::V1 {
                origin,
                source_origin,
            } => {
                if let (Some(o), Some(s)) = (value(origin), value(source_origin)) {
                    out.push((ACCESS_CONTROL_ALLOW_ORIGIN, o));
                    out.push((ALLOW_SOURCE_ORIGIN_HEADER, s));
                    out.push((
                        ACCESS_CONTROL_EXPOSE_HEADERS,
                        HeaderValue::from_static("AMP-Access-Control-Allow-Source-Origin"),
                    ));
                }
            }
            Self::Unreadable { .. } | Self::Absent => {}
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct OriginGuard {
    allow: AllowList,
}

impl OriginGuard {
    pub fn new(allow: AllowList) -> Self {
        Self { allow }
    }

    /// Approve a claim, returning the headers to echo on the response.
    pub fn check(&self, claim: &SenderClaim) -> Result<Vec<(HeaderName, HeaderValue)>, AccessError> {
        if let SenderClaim::Unreadable { what } = claim {
            return Err(AccessError::ForbiddenOrigin(format!("unreadable {what}")));
        }
        match claim.claimed() {
            None => Ok(Vec::new()),
            Some(value) if self.allow.permits(value) => Ok(claim.echo_headers()),
            Some(value) => Err(AccessError::ForbiddenOrigin(value.to_string())),
        }
    }
}

/// Middleware run ahead of every bridge route.
pub async fn enforce_origin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let claim = SenderClaim::from_parts(req.headers(), req.uri());
    let verdict = state.guard.check(&claim);

    // Preflight discovery is never blocked.
    if req.method() == Method::OPTIONS {
        let mut resp = preflight().await;
        if let Ok(echo) = verdict {
            apply(&mut resp, echo);
        }
        return resp;
    }

    let echo = match verdict {
        Ok(echo) => echo,
        Err(e) => {
            warn!("Rejected AMP request to {}: {}", req.uri().path(), e);
            return (e.status(), e.reply_message()).into_response();
        }
    };

    if claim != SenderClaim::Absent {
        debug!("AMP sender approved: {:?}", claim);
    }

    let mut resp = next.run(req).await;
    apply(&mut resp, echo);
    resp
}

/// `OPTIONS` handler: fixed method list, always 204.
pub async fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
            (ACCESS_CONTROL_MAX_AGE, PREFLIGHT_MAX_AGE),
        ],
    )
        .into_response()
}

fn apply(resp: &mut Response, echo: Vec<(HeaderName, HeaderValue)>) {
    let headers = resp.headers_mut();
    for (name, value) in echo {
        headers.insert(name, value);
    }
}
