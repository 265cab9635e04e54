//! Consent metadata captured from the incoming request

use axum::http::HeaderMap;
use chrono::Utc;
use funnel_core::ConsentMetadata;
use woothee::parser::Parser;

/// Placeholder for parts of the user agent that could not be identified
const UNKNOWN: &str = "N/D";

/// What the parser reports for a part it could not identify
const PARSER_UNKNOWN: &str = "UNKNOWN";

/// Raw user agent recorded when the header is absent
const MISSING_USER_AGENT: &str = "desconocido";

const FALLBACK_IP: &str = "0.0.0.0";

/// Caller IP: first `x-forwarded-for` hop, else `x-real-ip`
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header("x-real-ip"))
        .unwrap_or(FALLBACK_IP)
        .to_string()
}

/// Consent evidence for a registration arriving now
pub fn consent_metadata(headers: &HeaderMap, medium: &str) -> ConsentMetadata {
    let raw = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(MISSING_USER_AGENT);

    ConsentMetadata {
        accepted_at: Utc::now(),
        ip: client_ip(headers),
        user_agent: describe_user_agent(raw),
        medium: medium.to_string(),
    }
}

/// In-app browsers reported by their host app rather than the engine
const IN_APP: [(&str, &str); 5] = [
    ("Instagram ", "Instagram"),
    ("FBAV/", "Facebook"),
    ("FBAN/", "Facebook"),
    ("WhatsApp/", "WhatsApp"),
    ("YaBrowser/", "Yandex"),
];

/// Short descriptor such as `Chrome 141.0.0.0 (Windows 10)`
pub fn describe_user_agent(raw: &str) -> String {
    let parsed = Parser::new().parse(raw);
    let known = |value: &str| (value != PARSER_UNKNOWN && !value.is_empty()).then(|| value.to_string());

    let (browser, browser_version) = match in_app(raw) {
        Some(app) => app,
        None => parsed.as_ref().map_or((None, None), |ua| (known(&*ua.name), known(&*ua.version))),
    };
    let (os, os_version) = parsed.as_ref().map_or((None, None), |ua| {
        let os = known(&*ua.os).map(|os| match os.as_str() {
            "iPhone" | "iPad" | "iPod" => "iOS".to_string(),
            _ => os,
        });
        // Windows names already carry the release; the NT number adds nothing
        let version = known(&*ua.os_version).filter(|v| !v.starts_with("NT "));
        (os, version)
    });

    format!(
        "{} ({})",
        join(browser.as_deref(), browser_version.as_deref()),
        join(os.as_deref(), os_version.as_deref())
    )
}

fn in_app(raw: &str) -> Option<(Option<String>, Option<String>)> {
    IN_APP.iter().find_map(|(token, app)| {
        let start = raw.find(token)? + token.len();
        let version: String = raw[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        Some((Some((*app).to_string()), Some(version).filter(|v| !v.is_empty())))
    })
}

fn join(name: Option<&str>, version: Option<&str>) -> String {
    match (name, version) {
        (Some(name), Some(version)) => format!("{name} {version}"),
        (Some(name), None) => name.to_string(),
        (None, _) => UNKNOWN.to_string(),
    }
}
