// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The `mobile-signaling` extension negotiator.
//!
//! The extension token carries four attributes:
//!
//! - `connection_id` (quoted string, required): the logical session id,
//!   generated by the client on the first offer and presented on every
//!   physical handshake of the session.
//! - `primary` (flag): present on the primary link only.
//! - `coordinator` (quoted URI, required): the proxy terminating the
//!   signaling link.
//! - `destination` (quoted URI): the origin server, required on offers and
//!   echoed on responses when known.
//!
//! [`MobileSignaling`] tracks the negotiation state of one physical
//! connection. Clients use [`generate_offer`], [`validate_response`] and
//! [`process_response`]; servers and proxies use [`negotiate_request`].
//! Negotiation never panics; every outcome is a value.
//!
//! [`generate_offer`]: MobileSignaling::generate_offer
//! [`validate_response`]: MobileSignaling::validate_response
//! [`process_response`]: MobileSignaling::process_response
//! [`negotiate_request`]: MobileSignaling::negotiate_request

use crate::extension::{self, Param, Token};
use http::Uri;
use log::trace;
use rand::Rng;
use smallvec::SmallVec;
use static_assertions::const_assert;
use std::fmt;

/// The extension token name.
pub const EXTENSION_NAME: &str = "mobile-signaling";

pub(crate) const CONNECTION_ID: &str = "connection_id";
pub(crate) const PRIMARY: &str = "primary";
pub(crate) const SECONDARY: &str = "secondary";
pub(crate) const COORDINATOR: &str = "coordinator";
pub(crate) const DESTINATION: &str = "destination";

/// Bytes of entropy behind a freshly drawn connection-id.
const ID_ENTROPY: usize = 16;

// Negotiation errors /////////////////////////////////////////////////////////////////////////////

/// Enumeration of possible negotiation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Catch-all for failures without a more specific kind.
    General,
    /// Invalid extension attributes.
    InvalidAttributes,
    /// Invalid extension attribute value.
    InvalidAttributeValue,
    /// Invalid negotiation mode.
    InvalidMode,
    /// Unsupported extension attributes.
    UnsupportedAttributes,
    /// The extension must be initialized before use.
    Uninitialized,
    /// Error in the extension configuration.
    ConfigurationError
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::General => f.write_str("generic mobile-signaling error"),
            Error::InvalidAttributes => f.write_str("invalid extension attributes"),
            Error::InvalidAttributeValue => f.write_str("invalid extension attribute value"),
            Error::InvalidMode => f.write_str("invalid mobile-signaling negotiation mode"),
            Error::UnsupportedAttributes => f.write_str("unsupported extension attributes"),
            Error::Uninitialized => f.write_str("mobile-signaling extension must be initialized before use"),
            Error::ConfigurationError => f.write_str("error in mobile-signaling extension configuration")
        }
    }
}

impl std::error::Error for Error {}

// Configuration //////////////////////////////////////////////////////////////////////////////////

/// Endpoint configuration of the mobile-signaling extension.
#[derive(Debug, Clone)]
pub struct Config {
    coordinator: Option<Uri>,
    destination: Option<Uri>,
    primary_connection: bool,
    override_coordinator: bool,
    enable_extensions: bool
}

impl Default for Config {
    fn default() -> Self {
        Config {
            coordinator: None,
            destination: None,
            primary_connection: true,
            override_coordinator: false,
            enable_extensions: true
        }
    }
}

impl Config {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Config::default()
    }

    /// The coordinator URI included in offers.
    pub fn coordinator(&self) -> Option<&Uri> {
        self.coordinator.as_ref()
    }

    /// The destination URI included in offers.
    pub fn destination(&self) -> Option<&Uri> {
        self.destination.as_ref()
    }

    /// May this endpoint offer the `primary` flag?
    pub fn primary_connection(&self) -> bool {
        self.primary_connection
    }

    /// Is the locally configured coordinator preferred over an offered one?
    pub fn override_coordinator(&self) -> bool {
        self.override_coordinator
    }

    /// Is extension negotiation enabled at all?
    pub fn enable_extensions(&self) -> bool {
        self.enable_extensions
    }

    /// Set the coordinator URI to use in offers and reconciliation.
    pub fn set_coordinator(&mut self, uri: Uri) -> &mut Self {
        self.coordinator = Some(uri);
        self
    }

    /// Set the destination URI to use in offers.
    pub fn set_destination(&mut self, uri: Uri) -> &mut Self {
        self.destination = Some(uri);
        self
    }

    /// Allow or forbid offering the `primary` flag on this endpoint.
    pub fn set_primary_connection(&mut self, value: bool) -> &mut Self {
        self.primary_connection = value;
        self
    }

    /// Prefer the locally configured coordinator over offered ones.
    pub fn set_override_coordinator(&mut self, value: bool) -> &mut Self {
        self.override_coordinator = value;
        self
    }

    /// Master switch for extension negotiation.
    pub fn set_enable_extensions(&mut self, value: bool) -> &mut Self {
        self.enable_extensions = value;
        self
    }
}

// Negotiator /////////////////////////////////////////////////////////////////////////////////////

/// Per-connection negotiation state of the mobile-signaling extension.
#[derive(Debug)]
pub struct MobileSignaling {
    config: Config,
    connection_id: Option<String>,
    enabled: bool,
    primary_connection: bool,
    coordinator: Option<Uri>,
    destination: Option<Uri>,
    initialized: bool
}

impl MobileSignaling {
    /// Create a new negotiator for one physical connection.
    pub fn new(config: Config) -> Self {
        let coordinator = config.coordinator().cloned();
        MobileSignaling {
            config,
            connection_id: None,
            enabled: false,
            primary_connection: false,
            coordinator,
            destination: None,
            initialized: false
        }
    }

    /// Does this negotiator implement the extension?
    ///
    /// False when extension negotiation is disabled by configuration, in
    /// which case no offer can be generated.
    pub fn is_implemented(&self) -> bool {
        self.config.enable_extensions()
    }

    /// Was the extension negotiated for this connection?
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Initialize state for the extension.
    ///
    /// To be called after the negotiation methods; the negotiated values
    /// determine how the connection behaves from here on.
    pub fn init(&mut self) -> Result<(), Error> {
        self.initialized = true;
        Ok(())
    }

    /// Has [`init`](MobileSignaling::init) been called?
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The connection-id of the logical session, once offered or negotiated.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_ref().map(|id| id.as_str())
    }

    /// The negotiated coordinator URI.
    pub fn coordinator(&self) -> Option<&Uri> {
        self.coordinator.as_ref()
    }

    /// The destination URI taken from the offer.
    pub fn destination(&self) -> Option<&Uri> {
        self.destination.as_ref()
    }

    /// Did this link negotiate as the primary one?
    pub fn is_primary(&self) -> bool {
        self.primary_connection
    }

    /// Create the offer string for a handshake directed at `request_uri`.
    ///
    /// If `existing` holds a previously prepared `Sec-WebSocket-Extensions`
    /// request header, its connection-id is reused so that every physical
    /// handshake of a session presents the same id; otherwise a fresh id is
    /// drawn. The `primary` flag is emitted iff this endpoint may open
    /// primary links and the request goes to the configured destination
    /// (or no coordinator is configured at all).
    pub fn generate_offer(&mut self, request_uri: &Uri, existing: Option<&str>) -> Result<String, Error> {
        if !self.is_implemented() {
            return Err(Error::Uninitialized)
        }
        let mut id = None;
        if let Some(header) = existing {
            for token in extension::parse(header) {
                if token.name() != EXTENSION_NAME {
                    continue
                }
                if let Some(v) = token.param(CONNECTION_ID).and_then(Param::value) {
                    if !v.is_empty() {
                        id = Some(v.to_string())
                    }
                }
            }
        }
        let id = id.unwrap_or_else(new_connection_id);
        let mut offer = String::from(EXTENSION_NAME);
        offer.push_str("; connection_id=\"");
        offer.push_str(&id);
        offer.push('"');
        if self.offers_primary(request_uri) {
            offer.push_str("; primary")
        }
        offer.push_str("; coordinator=\"");
        if let Some(c) = self.config.coordinator() {
            offer.push_str(&c.to_string())
        }
        offer.push('"');
        offer.push_str("; destination=\"");
        if let Some(d) = self.config.destination() {
            offer.push_str(&d.to_string())
        }
        offer.push('"');
        trace!("offer for {}: {}", request_uri, offer);
        self.connection_id = Some(id);
        Ok(offer)
    }

    /// Check that a response carries settings compatible with our offer.
    ///
    /// Every attribute must be from the recognized set and appear at most
    /// once; `connection_id` and `coordinator` are required and non-empty;
    /// `primary`/`secondary` are flags and carry no value.
    pub fn validate_response(&self, response: &[Param<'_>]) -> Result<(), Error> {
        let mut id = false;
        let mut primary = false;
        let mut coordinator = false;
        let mut destination = false;
        for p in response {
            match p.name() {
                CONNECTION_ID => {
                    if p.value().map_or(true, str::is_empty) || id {
                        return Err(Error::InvalidAttributes)
                    }
                    id = true
                }
                PRIMARY | SECONDARY => {
                    if p.value().map_or(false, |v| !v.is_empty()) || primary {
                        return Err(Error::InvalidAttributes)
                    }
                    primary = true
                }
                COORDINATOR => {
                    if p.value().map_or(true, str::is_empty) || coordinator {
                        return Err(Error::InvalidAttributes)
                    }
                    coordinator = true
                }
                DESTINATION => {
                    if p.value().map_or(true, str::is_empty) || destination {
                        return Err(Error::InvalidAttributes)
                    }
                    destination = true
                }
                _ => return Err(Error::InvalidAttributes)
            }
        }
        if !id || !coordinator {
            return Err(Error::InvalidAttributes)
        }
        Ok(())
    }

    /// Apply a validated response: adopt the echoed connection-id and mark
    /// the extension enabled for this connection.
    pub fn process_response(&mut self, response: &[Param<'_>]) -> Result<(), Error> {
        for p in response {
            if p.name() == CONNECTION_ID {
                self.connection_id = p.value().map(str::to_string)
            }
        }
        self.enabled = true;
        Ok(())
    }

    /// Negotiate a client offer and produce the response string.
    ///
    /// The client's connection-id is adopted as the session id. Unknown
    /// attributes fail the negotiation; the coordinator is reconciled with
    /// the local configuration.
    pub fn negotiate_request(&mut self, offer: &[Param<'_>]) -> Result<String, Error> {
        for p in offer {
            match p.name() {
                CONNECTION_ID => self.accept_connection_id(p.value().unwrap_or(""))?,
                PRIMARY => self.primary_connection = true,
                COORDINATOR => self.negotiate_coordinator(p.value().unwrap_or(""))?,
                DESTINATION => {
                    // An unusable destination is not an error, it is just
                    // not echoed in the response.
                    self.destination = valid_uri(p.value().unwrap_or(""))
                }
                _ => return Err(Error::InvalidAttributes)
            }
        }
        self.enabled = true;
        let response = self.generate_response();
        trace!("negotiated response: {}", response);
        Ok(response)
    }

    /// Format the negotiation response from the current state.
    fn generate_response(&self) -> String {
        let mut response = String::from(EXTENSION_NAME);
        response.push_str("; connection_id=\"");
        if let Some(id) = &self.connection_id {
            response.push_str(id)
        }
        response.push('"');
        if self.primary_connection {
            response.push_str("; primary")
        }
        response.push_str("; coordinator=\"");
        if let Some(c) = &self.coordinator {
            response.push_str(&c.to_string())
        }
        response.push('"');
        if let Some(d) = &self.destination {
            response.push_str("; destination=\"");
            response.push_str(&d.to_string());
            response.push('"')
        }
        response
    }

    /// Adopt the connection-id offered by the client.
    fn accept_connection_id(&mut self, value: &str) -> Result<(), Error> {
        if value.is_empty() {
            return Err(Error::InvalidAttributeValue)
        }
        self.connection_id = Some(value.to_string());
        Ok(())
    }

    /// Reconcile the offered coordinator URI with the local configuration.
    ///
    /// An invalid offer falls back to the configured coordinator if there is
    /// one. A valid offer is used as-is unless the configuration overrides
    /// it, in which case the configured coordinator must itself be valid.
    fn negotiate_coordinator(&mut self, value: &str) -> Result<(), Error> {
        match valid_uri(value) {
            None => {
                if let Some(c) = self.config.coordinator() {
                    self.coordinator = Some(c.clone());
                    Ok(())
                } else {
                    Err(Error::InvalidAttributeValue)
                }
            }
            Some(offered) => {
                if !self.config.override_coordinator() {
                    self.coordinator = Some(offered);
                    Ok(())
                } else if let Some(c) = self.config.coordinator() {
                    self.coordinator = Some(c.clone());
                    Ok(())
                } else {
                    Err(Error::ConfigurationError)
                }
            }
        }
    }

    fn offers_primary(&self, request_uri: &Uri) -> bool {
        if !self.config.primary_connection() {
            return false
        }
        // The direct connection to the destination is always the primary
        // one; signaling links only ever go through a coordinator.
        match self.config.coordinator() {
            None => true,
            Some(_) => Some(request_uri) == self.config.destination()
        }
    }
}

/// The `mobile-signaling` parameters of a `Sec-WebSocket-Extensions` header
/// value, if the token is present.
pub fn offered_params(header: &str) -> Option<SmallVec<[Param<'_>; 4]>> {
    extension::parse(header)
        .into_iter()
        .find(|t| t.name() == EXTENSION_NAME)
        .map(Token::into_params)
}

/// Parse a URI that is usable for dialing: absolute, with scheme and
/// authority.
fn valid_uri(value: &str) -> Option<Uri> {
    let uri: Uri = value.parse().ok()?;
    if uri.scheme_part().is_some() && uri.authority_part().is_some() {
        Some(uri)
    } else {
        None
    }
}

/// Draw a fresh connection-id from strong randomness.
fn new_connection_id() -> String {
    // Ids are drawn in whole 32-bit words.
    const_assert!(ID_ENTROPY % 4 == 0);
    let mut raw = [0; ID_ENTROPY];
    rand::thread_rng().fill(&mut raw);
    base64::encode(&raw[..])
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use http::Uri;
    use quickcheck::{Arbitrary, Gen};
    use rand::Rng;
    use super::{offered_params, Config, Error, MobileSignaling, EXTENSION_NAME};

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    fn client_config() -> Config {
        let mut c = Config::new();
        c.set_coordinator(uri("ws://proxy:9000"));
        c.set_destination(uri("ws://origin:9002"));
        c
    }

    fn server_config() -> Config {
        let mut c = Config::new();
        c.set_coordinator(uri("ws://proxy:9000"));
        c
    }

    #[test]
    fn offer_to_destination_is_primary() {
        let mut ms = MobileSignaling::new(client_config());
        let offer = ms.generate_offer(&uri("ws://origin:9002"), None).unwrap();
        let params = offered_params(&offer).unwrap();
        assert!(params.iter().any(|p| p.name() == "primary"));
        assert!(params.iter().any(|p| p.name() == "coordinator"));
        assert!(params.iter().any(|p| p.name() == "destination"));
        assert!(ms.connection_id().is_some())
    }

    #[test]
    fn offer_to_coordinator_is_not_primary() {
        let mut ms = MobileSignaling::new(client_config());
        let offer = ms.generate_offer(&uri("ws://proxy:9000"), None).unwrap();
        let params = offered_params(&offer).unwrap();
        assert!(!params.iter().any(|p| p.name() == "primary"))
    }

    #[test]
    fn offer_without_coordinator_is_primary() {
        let mut cfg = Config::new();
        cfg.set_destination(uri("ws://origin:9002"));
        let mut ms = MobileSignaling::new(cfg);
        let offer = ms.generate_offer(&uri("ws://elsewhere:1"), None).unwrap();
        let params = offered_params(&offer).unwrap();
        assert!(params.iter().any(|p| p.name() == "primary"))
    }

    #[test]
    fn offer_reuses_existing_connection_id() {
        let mut ms = MobileSignaling::new(client_config());
        let existing = format!("{}; connection_id=\"KnownId==\"", EXTENSION_NAME);
        let offer = ms.generate_offer(&uri("ws://proxy:9000"), Some(&existing)).unwrap();
        let params = offered_params(&offer).unwrap();
        let id = params.iter().find(|p| p.name() == "connection_id").unwrap();
        assert_eq!(Some("KnownId=="), id.value());
        assert_eq!(Some("KnownId=="), ms.connection_id())
    }

    #[test]
    fn primary_connection_config_gates_the_flag() {
        let mut cfg = client_config();
        cfg.set_primary_connection(false);
        let mut ms = MobileSignaling::new(cfg);
        let offer = ms.generate_offer(&uri("ws://origin:9002"), None).unwrap();
        let params = offered_params(&offer).unwrap();
        assert!(!params.iter().any(|p| p.name() == "primary"))
    }

    #[test]
    fn disabled_extensions_generate_no_offer() {
        let mut cfg = client_config();
        cfg.set_enable_extensions(false);
        let mut ms = MobileSignaling::new(cfg);
        assert!(!ms.is_implemented());
        assert_matches!(ms.generate_offer(&uri("ws://origin:9002"), None), Err(Error::Uninitialized))
    }

    #[test]
    fn response_with_unknown_attribute_is_invalid() {
        let ms = MobileSignaling::new(client_config());
        let params = offered_params("mobile-signaling; connection_id=\"x\"; coordinator=\"ws://p:1\"; compression=\"zlib\"").unwrap();
        assert_matches!(ms.validate_response(&params), Err(Error::InvalidAttributes))
    }

    #[test]
    fn response_with_duplicate_connection_id_is_invalid() {
        let ms = MobileSignaling::new(client_config());
        let params = offered_params("mobile-signaling; connection_id=\"x\"; connection_id=\"x\"; coordinator=\"ws://p:1\"").unwrap();
        assert_matches!(ms.validate_response(&params), Err(Error::InvalidAttributes))
    }

    #[test]
    fn response_without_coordinator_is_invalid() {
        let ms = MobileSignaling::new(client_config());
        let params = offered_params("mobile-signaling; connection_id=\"x\"; primary").unwrap();
        assert_matches!(ms.validate_response(&params), Err(Error::InvalidAttributes))
    }

    #[test]
    fn response_with_valued_flag_is_invalid() {
        let ms = MobileSignaling::new(client_config());
        let params = offered_params("mobile-signaling; connection_id=\"x\"; primary=\"yes\"; coordinator=\"ws://p:1\"").unwrap();
        assert_matches!(ms.validate_response(&params), Err(Error::InvalidAttributes))
    }

    #[test]
    fn secondary_counts_as_the_primary_flag() {
        let ms = MobileSignaling::new(client_config());
        let params = offered_params("mobile-signaling; connection_id=\"x\"; secondary; coordinator=\"ws://p:1\"").unwrap();
        assert!(ms.validate_response(&params).is_ok());
        let params = offered_params("mobile-signaling; connection_id=\"x\"; primary; secondary; coordinator=\"ws://p:1\"").unwrap();
        assert_matches!(ms.validate_response(&params), Err(Error::InvalidAttributes))
    }

    #[test]
    fn process_response_adopts_the_echoed_id() {
        let mut ms = MobileSignaling::new(client_config());
        ms.generate_offer(&uri("ws://origin:9002"), None).unwrap();
        let params = offered_params("mobile-signaling; connection_id=\"Echoed==\"; coordinator=\"ws://p:1\"").unwrap();
        ms.process_response(&params).unwrap();
        assert!(ms.is_enabled());
        assert_eq!(Some("Echoed=="), ms.connection_id())
    }

    #[test]
    fn negotiate_request_adopts_client_values() {
        let mut ms = MobileSignaling::new(server_config());
        let offer = "mobile-signaling; connection_id=\"AbCd==\"; primary; coordinator=\"ws://proxy:9000\"; destination=\"ws://origin:9002\"";
        let response = ms.negotiate_request(&offered_params(offer).unwrap()).unwrap();
        assert!(ms.is_enabled());
        assert!(ms.is_primary());
        assert_eq!(Some("AbCd=="), ms.connection_id());
        let params = offered_params(&response).unwrap();
        assert_eq!(Some("AbCd=="), params.iter().find(|p| p.name() == "connection_id").and_then(|p| p.value()));
        assert!(params.iter().any(|p| p.name() == "primary"));
        let destination = params.iter().find(|p| p.name() == "destination").and_then(|p| p.value()).unwrap();
        assert_eq!(uri("ws://origin:9002"), destination.parse::<Uri>().unwrap())
    }

    #[test]
    fn negotiate_request_rejects_unknown_attributes() {
        let mut ms = MobileSignaling::new(server_config());
        let offer = offered_params("mobile-signaling; connection_id=\"x\"; riddle=\"?\"").unwrap();
        assert_matches!(ms.negotiate_request(&offer), Err(Error::InvalidAttributes))
    }

    #[test]
    fn negotiate_request_rejects_empty_connection_id() {
        let mut ms = MobileSignaling::new(server_config());
        let offer = offered_params("mobile-signaling; connection_id=\"\"").unwrap();
        assert_matches!(ms.negotiate_request(&offer), Err(Error::InvalidAttributeValue))
    }

    // The coordinator reconciliation table.

    #[test]
    fn coordinator_invalid_offer_falls_back_to_configured() {
        let mut ms = MobileSignaling::new(server_config());
        let offer = offered_params("mobile-signaling; connection_id=\"x\"; coordinator=\"\"").unwrap();
        ms.negotiate_request(&offer).unwrap();
        assert_eq!(Some(&uri("ws://proxy:9000")), ms.coordinator())
    }

    #[test]
    fn coordinator_invalid_offer_without_config_fails() {
        let mut ms = MobileSignaling::new(Config::new());
        let offer = offered_params("mobile-signaling; connection_id=\"x\"; coordinator=\"\"").unwrap();
        assert_matches!(ms.negotiate_request(&offer), Err(Error::InvalidAttributeValue))
    }

    #[test]
    fn coordinator_valid_offer_is_used_without_override() {
        let mut ms = MobileSignaling::new(server_config());
        let offer = offered_params("mobile-signaling; connection_id=\"x\"; coordinator=\"ws://other:9999\"").unwrap();
        ms.negotiate_request(&offer).unwrap();
        assert_eq!(Some(&uri("ws://other:9999")), ms.coordinator())
    }

    #[test]
    fn coordinator_override_prefers_configured() {
        let mut cfg = server_config();
        cfg.set_override_coordinator(true);
        let mut ms = MobileSignaling::new(cfg);
        let offer = offered_params("mobile-signaling; connection_id=\"x\"; coordinator=\"ws://other:9999\"").unwrap();
        ms.negotiate_request(&offer).unwrap();
        assert_eq!(Some(&uri("ws://proxy:9000")), ms.coordinator())
    }

    #[test]
    fn coordinator_override_without_config_is_a_configuration_error() {
        let mut cfg = Config::new();
        cfg.set_override_coordinator(true);
        let mut ms = MobileSignaling::new(cfg);
        let offer = offered_params("mobile-signaling; connection_id=\"x\"; coordinator=\"ws://other:9999\"").unwrap();
        assert_matches!(ms.negotiate_request(&offer), Err(Error::ConfigurationError))
    }

    #[test]
    fn init_marks_the_extension_initialized() {
        let mut ms = MobileSignaling::new(client_config());
        assert!(!ms.is_initialized());
        ms.init().unwrap();
        assert!(ms.is_initialized())
    }

    // Round-trip laws.

    #[derive(Debug, Clone)]
    struct WellFormed(Config, Uri);

    impl Arbitrary for WellFormed {
        fn arbitrary<G: Gen>(g: &mut G) -> Self {
            let hosts = ["origin", "gateway", "relay.example.com"];
            let host = hosts[g.gen_range(0, hosts.len())];
            let destination: Uri = format!("ws://{}:{}", host, g.gen_range(1024u16, 65535)).parse().unwrap();
            let coordinator: Uri = format!("ws://proxy:{}", g.gen_range(1024u16, 65535)).parse().unwrap();
            let mut cfg = Config::new();
            cfg.set_destination(destination.clone()).set_coordinator(coordinator.clone());
            cfg.set_override_coordinator(g.gen());
            let request = if g.gen() { destination } else { coordinator };
            WellFormed(cfg, request)
        }
    }

    #[test]
    fn offers_validate_as_responses() {
        fn prop(w: WellFormed) -> bool {
            let mut ms = MobileSignaling::new(w.0);
            let offer = ms.generate_offer(&w.1, None).unwrap();
            let params = offered_params(&offer).unwrap();
            ms.validate_response(&params).is_ok()
        }
        quickcheck::quickcheck(prop as fn(WellFormed) -> bool)
    }

    #[test]
    fn negotiated_connection_ids_match() {
        fn prop(w: WellFormed) -> bool {
            let mut client = MobileSignaling::new(w.0);
            let offer = client.generate_offer(&w.1, None).unwrap();
            let mut server = MobileSignaling::new(server_config());
            let response = server.negotiate_request(&offered_params(&offer).unwrap()).unwrap();
            let params = offered_params(&response).unwrap();
            if client.validate_response(&params).is_err() {
                return false
            }
            client.process_response(&params).unwrap();
            client.connection_id() == server.connection_id()
        }
        quickcheck::quickcheck(prop as fn(WellFormed) -> bool)
    }
}
