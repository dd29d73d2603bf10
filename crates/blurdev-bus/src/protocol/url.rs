//! `blurdev:` URL parsing.
//!
//! `blurdev://<handler-name>/<command>[?<key>=<value>[&...]]`
//!
//! Nothing is validated here. Unknown handler names and odd commands pass
//! straight through; the registry decides what to do with them.

use std::collections::btree_map::Entry;

use percent_encoding::percent_decode_str;

use super::command::{Command, ParamValue, Params};

/// Scheme handled by this crate.
pub const SCHEME: &str = "blurdev";

const SCHEME_PREFIX: &str = "blurdev:";

/// Result of splitting a protocol URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub handler_name: String,
    pub command: String,
    pub params: Params,
}

impl ParsedUrl {
    pub fn into_command(self) -> Command {
        Command::new(self.handler_name, self.command, self.params)
    }
}

/// Split a URL into scheme, handler name, command and params.
///
/// The handler name is the authority taken verbatim, the command is the path
/// with surrounding `/` stripped, and the query is decoded with repeated keys
/// collapsing into lists in encounter order.
pub fn parse(url: &str) -> ParsedUrl {
    let url = url.trim();
    let (scheme, rest) = split_scheme(url);

    let (authority, rest) = match rest.strip_prefix("//") {
        Some(after) => {
            let end = after.find(['/', '?', '#']).unwrap_or(after.len());
            after.split_at(end)
        }
        None => ("", rest),
    };

    let rest = rest.split_once('#').map_or(rest, |(before, _fragment)| before);
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));

    ParsedUrl {
        scheme,
        handler_name: authority.to_string(),
        command: path.trim_matches('/').to_string(),
        params: parse_query(query),
    }
}

/// Decode a query string.
///
/// Pairs without `=` or with an empty value are dropped.
pub fn parse_query(query: &str) -> Params {
    let mut params = Params::new();
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let value = decode_component(value);
        match params.entry(decode_component(key)) {
            Entry::Vacant(slot) => {
                slot.insert(ParamValue::Single(value));
            }
            Entry::Occupied(mut slot) => slot.get_mut().push(value),
        }
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

fn split_scheme(url: &str) -> (String, &str) {
    if let Some(prefix) = url.get(..SCHEME_PREFIX.len())
        && prefix.eq_ignore_ascii_case(SCHEME_PREFIX)
    {
        return (SCHEME.to_string(), &url[SCHEME_PREFIX.len()..]);
    }

    if let Some((candidate, rest)) = url.split_once(':')
        && is_scheme(candidate)
    {
        return (candidate.to_ascii_lowercase(), rest);
    }

    (String::new(), url)
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
