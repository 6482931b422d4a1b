//! Token extraction from an implicit-grant redirect Location
//!
//! The implicit grant delivers the token inside the redirect target itself:
//! `https://client.example/cb#access_token=...&expires_in=...`. Most issuers
//! put the parameters in the URL fragment, some in the query string, so both
//! positions are searched. Pure string work, no I/O.

use url::form_urlencoded;

use crate::error::ParseError;

/// Extract `(access_token, expires_in)` from a redirect Location.
///
/// The query string is consulted before the fragment; within a section the
/// first occurrence of a parameter wins. Values are percent-decoded.
/// `expires_in` must parse as a base-10 signed integer (seconds of
/// validity); a malformed value fails the whole parse.
pub fn parse_location(location: &str) -> Result<(String, i64), ParseError> {
    let token = find_param(location, "access_token")
        .filter(|t| !t.is_empty())
        .ok_or(ParseError::MissingToken)?;

    let expiry_raw = find_param(location, "expires_in").ok_or(ParseError::MissingExpiry)?;
    let validity_secs = expiry_raw
        .parse::<i64>()
        .map_err(|_| ParseError::MalformedExpiry(expiry_raw))?;

    Ok((token, validity_secs))
}

/// Find a parameter in the location's query string or fragment.
fn find_param(location: &str, name: &str) -> Option<String> {
    let (head, fragment) = match location.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (location, None),
    };
    let query = head.split_once('?').map(|(_, query)| query);

    [query, fragment]
        .into_iter()
        .flatten()
        .flat_map(|section| form_urlencoded::parse(section.as_bytes()))
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
