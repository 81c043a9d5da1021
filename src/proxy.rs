// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The signaling proxy.
//!
//! The proxy is a server towards clients and a client towards destination
//! servers. Every accepted inbound signaling link is paired with exactly
//! one outbound link, dialed to the destination declared in the inbound
//! offer with the session's connection-id injected into the request.
//! Data frames are spliced in both directions with their opcode preserved;
//! payloads are never inspected.
//!
//! Teardown is symmetric: when one side closes, the other side is closed
//! with the remote's close code; when one side fails, the other side is
//! closed with `protocol_error`. The splice record goes away with the
//! pair.

use crate::connection::{alive, close_with, lock, CloseCode, ConnectError, Endpoint, Handle, HandleId, Slots, State};
use crate::data::Data;
use crate::signaling;
use http::Uri;
use log::{debug, error, trace};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A proxy splicing inbound signaling links onto outbound links.
pub struct Proxy {
    inner: Arc<Inner>
}

struct Inner {
    endpoint: Arc<dyn Endpoint>,
    splices: Mutex<HashMap<HandleId, Splice>>
}

/// One spliced pair of links, keyed by the inbound handle's identity.
struct Splice {
    outbound: Handle,
    connection_id: String
}

impl Proxy {
    /// Create a proxy dialing outbound links on the given endpoint.
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Proxy {
            inner: Arc::new(Inner {
                endpoint,
                splices: Mutex::new(HashMap::new())
            })
        }
    }

    /// Screen an inbound link during its opening handshake.
    ///
    /// Only signaling links are accepted: an offer with the `primary` flag,
    /// without a connection-id or without a dialable destination is
    /// rejected, as is the link when the destination cannot be reached.
    /// On success the destination has been dialed and the splice is
    /// installed.
    pub fn validate(&self, in_handle: &Handle) -> bool {
        Inner::validate(&self.inner, in_handle)
    }

    /// The number of active splices.
    pub fn splice_count(&self) -> usize {
        lock(&self.inner.splices).len()
    }

    /// Close every outbound link and stop the outbound endpoint.
    ///
    /// Joining the endpoint's worker thread is left to the embedding
    /// application.
    pub fn shutdown(&self) {
        debug!("shutting down proxy");
        let drained = {
            let mut splices = lock(&self.inner.splices);
            splices.drain().map(|(_, s)| s).collect::<Vec<_>>()
        };
        for splice in drained {
            trace!("{}: closing outbound link", splice.connection_id);
            close_with(&splice.outbound, CloseCode::GoingAway, "proxy shutting down")
        }
        self.inner.endpoint.stop()
    }
}

impl Inner {
    fn validate(inner: &Arc<Inner>, in_handle: &Handle) -> bool {
        let con = match in_handle.upgrade() {
            Some(con) => con,
            None => return false
        };
        let header = match con.extensions_header() {
            Some(h) => h,
            None => {
                debug!("inbound link without mobile-signaling extension");
                return false
            }
        };
        let mut primary = false;
        let mut id = None;
        let mut destination = None;
        match signaling::offered_params(&header) {
            None => {
                debug!("inbound link without mobile-signaling extension");
                return false
            }
            Some(params) => for p in params.iter() {
                match p.name() {
                    signaling::PRIMARY => primary = true,
                    signaling::CONNECTION_ID => id = p.value().map(str::to_string),
                    signaling::DESTINATION => destination = p.value().map(str::to_string),
                    _ => {}
                }
            }
        }
        // Only signaling connections are accepted at the proxy.
        if primary {
            debug!("rejecting primary link at the proxy");
            return false
        }
        let id = match id {
            Some(id) => if id.is_empty() { return false } else { id },
            None => {
                debug!("inbound link without connection-id");
                return false
            }
        };
        let destination = match destination.and_then(|d| d.parse::<Uri>().ok()) {
            Some(d) => d,
            None => {
                debug!("{}: missing or invalid destination", id);
                return false
            }
        };
        let outbound = match Inner::dial(inner, &destination, &id, in_handle) {
            Ok(h) => h,
            Err(e) => {
                error!("{}: dialing {} failed: {}", id, destination, e);
                return false
            }
        };
        if outbound.upgrade().map_or(true, |c| c.state().is_terminal()) {
            error!("{}: outbound link died during setup", id);
            return false
        }

        // Splice the inbound side onto the outbound link.
        let out = outbound.clone();
        con.set_message_handler(Box::new(move |_, data| Inner::on_message_in(&out, data)));
        let out = outbound.clone();
        let weak = Arc::downgrade(inner);
        con.set_close_handler(Box::new(move |in_h| {
            if let Some(i) = weak.upgrade() {
                Inner::on_close_in(&i, in_h, &out)
            }
        }));
        let out = outbound.clone();
        let weak = Arc::downgrade(inner);
        con.set_fail_handler(Box::new(move |in_h| {
            if let Some(i) = weak.upgrade() {
                Inner::on_fail_in(&i, in_h, &out)
            }
        }));

        let mut splices = lock(&inner.splices);
        splices.insert(HandleId::of(in_handle), Splice { outbound, connection_id: id });
        true
    }

    /// Dial the declared destination, injecting the connection-id.
    fn dial(inner: &Arc<Inner>, destination: &Uri, id: &str, in_handle: &Handle) -> Result<Handle, ConnectError> {
        debug!("{}: dialing destination {}", id, destination);
        let header = format!("{}; connection_id=\"{}\"", signaling::EXTENSION_NAME, id);
        let in_close = in_handle.clone();
        let in_fail = in_handle.clone();
        let in_msg = in_handle.clone();
        let weak_close = Arc::downgrade(inner);
        let weak_fail = Arc::downgrade(inner);
        let slots = Slots {
            open: None,
            close: Some(Box::new(move |out_h| {
                if let Some(i) = weak_close.upgrade() {
                    Inner::on_close_out(&i, &in_close, out_h)
                }
            })),
            fail: Some(Box::new(move |out_h| {
                if let Some(i) = weak_fail.upgrade() {
                    Inner::on_fail_out(&i, &in_fail, out_h)
                }
            })),
            message: Some(Box::new(move |_, data| Inner::on_message_out(&in_msg, data)))
        };
        inner.endpoint.connect(destination, Some(&header), slots)
    }

    /// Forward a frame from the inbound link onto the outbound one.
    fn on_message_in(out: &Handle, data: Data) {
        trace!("forwarding uplink ({} bytes)", data.len());
        forward(out, data, "uplink")
    }

    /// Forward a frame from the outbound link onto the inbound one.
    fn on_message_out(in_: &Handle, data: Data) {
        trace!("forwarding downlink ({} bytes)", data.len());
        forward(in_, data, "downlink")
    }

    /// The inbound side closed: mirror the close onto the outbound link.
    fn on_close_in(inner: &Arc<Inner>, in_h: &Handle, out: &Handle) {
        debug!("inbound side closed, closing outbound");
        let code = in_h
            .upgrade()
            .and_then(|c| c.remote_close_code())
            .unwrap_or(CloseCode::GoingAway);
        mirror_close(out, code);
        Inner::remove(inner, in_h)
    }

    /// The outbound side closed: mirror the close onto the inbound link.
    fn on_close_out(inner: &Arc<Inner>, in_h: &Handle, out_h: &Handle) {
        debug!("outbound side closed, closing inbound");
        let code = out_h
            .upgrade()
            .and_then(|c| c.remote_close_code())
            .unwrap_or(CloseCode::GoingAway);
        mirror_close(in_h, code);
        Inner::remove(inner, in_h)
    }

    fn on_fail_in(inner: &Arc<Inner>, in_h: &Handle, out: &Handle) {
        debug!("inbound side failed, closing outbound");
        close_with(out, CloseCode::ProtocolError, "outgoing connection has failed");
        Inner::remove(inner, in_h)
    }

    fn on_fail_out(inner: &Arc<Inner>, in_h: &Handle, _out_h: &Handle) {
        debug!("outbound side failed, closing inbound");
        close_with(in_h, CloseCode::ProtocolError, "outgoing connection has failed");
        Inner::remove(inner, in_h)
    }

    fn remove(inner: &Arc<Inner>, in_h: &Handle) {
        lock(&inner.splices).remove(&HandleId::of(in_h));
    }
}

/// Send `data` on `link` if it is open; a splice never buffers.
fn forward(link: &Handle, data: Data, direction: &str) {
    match alive(link) {
        Some(con) => {
            if let Err(e) = con.send(data) {
                debug!("forwarding {} failed: {}", direction, e)
            }
        }
        None => debug!("{} dropped, link not open", direction)
    }
}

/// Close `link` with `code` unless it is already closing or closed.
fn mirror_close(link: &Handle, code: CloseCode) {
    if let Some(con) = link.upgrade() {
        if con.state() != State::Closing && con.state() != State::Closed {
            if let Err(e) = con.close(code, "remote destination has gone away") {
                debug!("mirror close failed: {}", e)
            }
        }
    }
}
