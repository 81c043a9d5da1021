// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Extension tokens of a `Sec-WebSocket-Extensions` header value as per
//! [RFC 6455, section 9][ext].
//!
//! A header value is a comma separated list of tokens. Each token is an
//! extension name followed by semicolon separated parameters, which are
//! either flags (`primary`) or carry a possibly quoted value
//! (`connection_id="AbCd=="`).
//!
//! [ext]: https://tools.ietf.org/html/rfc6455#section-9

use smallvec::SmallVec;
use std::{borrow::Cow, fmt};

/// Extension parameter (used for negotiation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param<'a> {
    name: Cow<'a, str>,
    value: Option<Cow<'a, str>>
}

impl<'a> Param<'a> {
    /// Create a new parameter without a value (a flag).
    pub fn new(name: impl Into<Cow<'a, str>>) -> Self {
        Param { name: name.into(), value: None }
    }

    /// The parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The optional parameter value.
    pub fn value(&self) -> Option<&str> {
        self.value.as_ref().map(|v| v.as_ref())
    }

    /// Set the parameter value.
    pub fn set_value(&mut self, value: Option<impl Into<Cow<'a, str>>>) -> &mut Self {
        self.value = value.map(Into::into);
        self
    }

    /// Turn this parameter into one that owns its values.
    pub fn acquire<'b>(self) -> Param<'b> {
        Param {
            name: Cow::Owned(self.name.into_owned()),
            value: self.value.map(|v| Cow::Owned(v.into_owned()))
        }
    }
}

impl fmt::Display for Param<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(v) = &self.value {
            write!(f, "{}=\"{}\"", self.name, v)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// One extension token of a header value: a name plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    name: Cow<'a, str>,
    params: SmallVec<[Param<'a>; 4]>
}

impl<'a> Token<'a> {
    /// The extension name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The token's parameters.
    pub fn params(&self) -> &[Param<'a>] {
        &self.params
    }

    /// The first parameter with the given name.
    pub fn param(&self, name: &str) -> Option<&Param<'a>> {
        self.params.iter().find(|p| p.name() == name)
    }

    /// Consume `self` and return the parameters.
    pub fn into_params(self) -> SmallVec<[Param<'a>; 4]> {
        self.params
    }
}

/// Split a `Sec-WebSocket-Extensions` header value into extension tokens.
///
/// Surrounding whitespace is trimmed and quotes around parameter values are
/// removed. Empty list entries are skipped, so parsing never fails; whether
/// the parameters of a token make sense is for the negotiator to decide.
pub fn parse(header: &str) -> SmallVec<[Token<'_>; 1]> {
    let mut tokens = SmallVec::new();
    for entry in header.split(',') {
        let mut items = entry.split(';');
        let name = items.next().map(str::trim).unwrap_or("");
        if name.is_empty() {
            continue
        }
        let mut params = SmallVec::new();
        for item in items {
            let mut pair = item.splitn(2, '=');
            let key = pair.next().map(str::trim).unwrap_or("");
            if key.is_empty() {
                continue
            }
            let mut param = Param::new(key);
            if let Some(value) = pair.next() {
                param.set_value(Some(unquote(value.trim())));
            }
            params.push(param)
        }
        tokens.push(Token { name: Cow::Borrowed(name), params })
    }
    tokens
}

/// Strip one pair of surrounding double quotes, if present.
fn unquote(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1 .. s.len() - 1]
    } else {
        s
    }
}
