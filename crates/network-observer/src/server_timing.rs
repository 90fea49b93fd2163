use soulbrowser_core_types::{ChannelRef, ServerTimingEntry};

pub const SERVER_TIMING_HEADER: &str = "Server-Timing";

pub fn server_timings(channel: &ChannelRef) -> Vec<ServerTimingEntry> {
    channel
        .response_header(SERVER_TIMING_HEADER)
        .map(|value| parse_server_timing(&value))
        .unwrap_or_default()
}

/// Parse a `Server-Timing` header value, e.g. `db;dur=53, cache;desc="Cache Read";dur=23.2`.
///
/// Entries without a name are skipped; a missing or unparsable duration is 0.
/// When a parameter repeats, the first one wins.
pub fn parse_server_timing(value: &str) -> Vec<ServerTimingEntry> {
    split_unquoted(value, ',')
        .into_iter()
        .filter_map(|metric| {
            let mut parts = split_unquoted(&metric, ';').into_iter();
            let name = parts.next()?.trim().to_owned();
            if name.is_empty() {
                return None;
            }
            let mut duration = None;
            let mut description = None;
            for param in parts {
                let (key, raw) = match param.split_once('=') {
                    Some((key, raw)) => (key.trim(), raw.trim()),
                    None => (param.trim(), ""),
                };
                if key.eq_ignore_ascii_case("dur") && duration.is_none() {
                    duration = Some(unquote(raw).parse::<f64>().unwrap_or(0.0));
                } else if key.eq_ignore_ascii_case("desc") && description.is_none() {
                    description = Some(unquote(raw));
                }
            }
            Some(ServerTimingEntry {
                name,
                duration: duration.unwrap_or(0.0),
                description: description.unwrap_or_default(),
            })
        })
        .collect()
}

fn split_unquoted(value: &str, separator: char) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for ch in value.chars() {
        if escaped {
            escaped = false;
        } else if quoted && ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            quoted = !quoted;
        } else if ch == separator && !quoted {
            pieces.push(std::mem::take(&mut current));
            continue;
        }
        current.push(ch);
    }
    pieces.push(current);
    pieces
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"') else {
        return raw.to_owned();
    };
    let inner = inner.strip_suffix('"').unwrap_or(inner);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}
