//! Connection string parsing and name-or-connection-string classification

use std::fmt;

use crate::{OrmError, Result};

/// Keyword holding the model metadata paths of a metadata-bearing connection string
pub const METADATA_KEYWORD: &str = "metadata";
/// Keyword holding the store provider of a metadata-bearing connection string
pub const PROVIDER_KEYWORD: &str = "provider";
/// Keyword holding the store connection string of a metadata-bearing connection string
pub const PROVIDER_CONNECTION_STRING_KEYWORD: &str = "provider connection string";

/// Whether the input should be treated as a connection string rather than a name
pub fn treat_as_connection_string(name_or_connection_string: &str) -> bool {
    name_or_connection_string.contains('=')
}

/// Extract a connection name from the input.
///
/// A string without `=` is a name as a whole; a string with exactly one `=`
/// whose keyword is `name` (case-insensitive) yields the trimmed value. Any
/// other input is a connection string and returns `None`.
pub fn try_get_connection_name(name_or_connection_string: &str) -> Option<String> {
    let Some(first_equals) = name_or_connection_string.find('=') else {
        return Some(name_or_connection_string.to_string());
    };

    if name_or_connection_string[first_equals + 1..].contains('=') {
        return None;
    }

    let keyword = name_or_connection_string[..first_equals].trim();
    if keyword.eq_ignore_ascii_case("name") {
        return Some(name_or_connection_string[first_equals + 1..].trim().to_string());
    }

    None
}

/// Whether the input is a complete metadata-bearing connection string.
///
/// Tokens are found by splitting on `=` and `;`, so the check is
/// case-insensitive and does not depend on keyword order.
pub fn is_full_metadata_connection_string(name_or_connection_string: &str) -> bool {
    let upper = name_or_connection_string.to_uppercase();
    let tokens: Vec<&str> = upper.split(['=', ';']).map(str::trim).collect();

    ["PROVIDER", "PROVIDER CONNECTION STRING", "METADATA"]
        .iter()
        .all(|required| tokens.contains(required))
}

/// The part of a dotted name after its last `.`, or `None` if there is no namespace
pub fn strip_namespace(name: &str) -> Option<&str> {
    name.rfind('.').map(|index| &name[index + 1..])
}

/// Ordered keyword/value pairs of a connection string.
///
/// Keywords are compared case-insensitively and stored trimmed. Values may be
/// quoted with `'` or `"`; a doubled quote inside a quoted value stands for one
/// quote character.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStringBuilder {
    pairs: Vec<(String, String)>,
}

impl ConnectionStringBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut builder = Self::new();
        let mut chars = connection_string.chars().peekable();

        loop {
            while chars.peek().is_some_and(|c| *c == ';' || c.is_whitespace()) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut keyword = String::new();
            loop {
                match chars.next() {
                    Some('=') => break,
                    Some(';') | None => {
                        return Err(OrmError::InvalidConnectionString(format!(
                            "keyword '{}' has no value",
                            keyword.trim()
                        )));
                    }
                    Some(c) => keyword.push(c),
                }
            }
            let keyword = keyword.trim().to_string();
            if keyword.is_empty() {
                return Err(OrmError::InvalidConnectionString(
                    "empty keyword".to_string(),
                ));
            }

            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }

            let value = match chars.peek().copied() {
                Some(quote @ ('"' | '\'')) => {
                    chars.next();
                    let mut value = String::new();
                    loop {
                        match chars.next() {
                            Some(c) if c == quote => {
                                if chars.peek() == Some(&quote) {
                                    chars.next();
                                    value.push(quote);
                                } else {
                                    break;
                                }
                            }
                            Some(c) => value.push(c),
                            None => {
                                return Err(OrmError::InvalidConnectionString(format!(
                                    "unterminated quoted value for '{keyword}'"
                                )));
                            }
                        }
                    }
                    while chars.peek().is_some_and(|c| c.is_whitespace()) {
                        chars.next();
                    }
                    match chars.next() {
                        Some(';') | None => {}
                        Some(other) => {
                            return Err(OrmError::InvalidConnectionString(format!(
                                "unexpected '{other}' after quoted value for '{keyword}'"
                            )));
                        }
                    }
                    value
                }
                _ => {
                    let mut value = String::new();
                    for c in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                        value.push(c);
                    }
                    value.trim().to_string()
                }
            };

            builder.set(&keyword, value);
        }

        Ok(builder)
    }

    /// Value for a keyword, compared case-insensitively
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, v)| v.as_str())
    }

    /// Set a value, replacing an existing keyword in place
    pub fn set(&mut self, keyword: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .pairs
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
        {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((keyword.to_string(), value)),
        }
    }

    pub fn with(mut self, keyword: &str, value: impl Into<String>) -> Self {
        self.set(keyword, value);
        self
    }

    pub fn remove(&mut self, keyword: &str) -> Option<String> {
        let index = self
            .pairs
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(keyword))?;
        Some(self.pairs.remove(index).1)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ConnectionStringBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (keyword, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                f.write_str(";")?;
            }
            let needs_quotes = value.contains([';', '"', '\''])
                || value.starts_with(char::is_whitespace)
                || value.ends_with(char::is_whitespace);
            if needs_quotes {
                write!(f, "{keyword}=\"{}\"", value.replace('"', "\"\""))?;
            } else {
                write!(f, "{keyword}={value}")?;
            }
        }
        Ok(())
    }
}
