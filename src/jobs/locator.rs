use std::fmt;

use thiserror::Error;

/// Label used when the locator carries no `dn=` parameter
pub const DEFAULT_DISPLAY_NAME: &str = "Unknown Torrent";

const MAGNET_SCHEME: &str = "magnet:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("locator is empty")]
    Empty,
    #[error("locator must start with 'magnet:'")]
    NotMagnet,
    #[error("locator is {actual} bytes, limit is {limit}")]
    TooLong { actual: usize, limit: usize },
}

/// A validated magnet-style locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    display_name: String,
}

impl Locator {
    /// Validate a submitted locator and extract its display name.
    ///
    /// Whitespace around the locator is ignored. The scheme check is
    /// case-insensitive.
    pub fn parse(input: &str, max_bytes: usize) -> Result<Self, LocatorError> {
        let raw = input.trim();

        if raw.is_empty() {
            return Err(LocatorError::Empty);
        }

        if raw.len() > max_bytes {
            return Err(LocatorError::TooLong {
                actual: raw.len(),
                limit: max_bytes,
            });
        }

        let has_scheme = raw
            .get(..MAGNET_SCHEME.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MAGNET_SCHEME));
        if !has_scheme {
            return Err(LocatorError::NotMagnet);
        }

        let display_name =
            extract_display_name(raw).unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        Ok(Self {
            raw: raw.to_string(),
            display_name,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Finds the first `dn=` parameter and URL-decodes its value.
///
/// The parameter does not have to sit in a well-formed query string: any
/// `dn=` not preceded by an alphanumeric character counts, and the value runs
/// to the next `&`.
fn extract_display_name(locator: &str) -> Option<String> {
    let bytes = locator.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = locator[search_from..].find("dn=") {
        let start = search_from + offset;
        let preceded_by_word = start > 0 && bytes[start - 1].is_ascii_alphanumeric();

        if !preceded_by_word {
            let value_start = start + "dn=".len();
            let value_end = locator[value_start..]
                .find('&')
                .map_or(locator.len(), |end| value_start + end);
            let pair = &locator[start..value_end];

            let decoded = url::form_urlencoded::parse(pair.as_bytes())
                .find(|(key, _)| key == "dn")
                .map(|(_, value)| value.trim().to_string())
                .filter(|value| !value.is_empty());

            if decoded.is_some() {
                return decoded;
            }
        }

        search_from = start + "dn=".len();
    }

    None
}
