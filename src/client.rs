// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The client-side dual-link dispatcher.
//!
//! A [`Client`] owns one logical websocket session carried by two physical
//! links: the primary one, dialed directly to the configured destination,
//! and the signaling one, dialed to the coordinator once the primary
//! handshake returned the session's connection-id.
//!
//! Outbound messages prefer the primary link and fall back to the
//! signaling link; the choice is made per [`send`](Client::send), at send
//! time. When the primary link closes or fails while the signaling link is
//! alive, a reconnect of the primary is scheduled with exponential backoff.
//! The signaling link is never abandoned while the session lives; it is
//! the fallback of last resort.

use crate::connection::{alive, close_with, lock, send_preferring, CloseCode, ConnectError, Endpoint, Handle, SendError, Slots};
use crate::data::Data;
use crate::signaling::{self, Config, MobileSignaling, EXTENSION_NAME};
use log::{debug, error, trace};
use std::cmp;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// First reconnect delay after a primary link failure.
const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);
/// Upper bound of the reconnect delay.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
/// Largest backoff exponent (500ms << 6 caps beyond `RETRY_MAX_DELAY`).
const RETRY_MAX_SHIFT: u32 = 6;

/// Handler receiving application messages from either link.
pub type MessageHandler = Box<dyn Fn(Data) + Send + Sync>;

/// A logical websocket session over a primary and a signaling link.
pub struct Client {
    inner: Arc<Inner>
}

struct Inner {
    endpoint: Arc<dyn Endpoint>,
    config: Config,
    extension: Mutex<MobileSignaling>,
    links: Mutex<Links>,
    handler: Mutex<Option<MessageHandler>>
}

/// The mutable link state, guarded by one mutex.
///
/// `open` is true while at least one link is usable; `done` is set once
/// the session is finished and suppresses reconnects.
#[derive(Default)]
struct Links {
    primary: Option<Handle>,
    signaling: Option<Handle>,
    open: bool,
    done: bool,
    attempt: u32
}

impl Client {
    /// Create a dispatcher for the configured destination and coordinator.
    pub fn new(endpoint: Arc<dyn Endpoint>, config: Config) -> Self {
        let extension = MobileSignaling::new(config.clone());
        Client {
            inner: Arc::new(Inner {
                endpoint,
                config,
                extension: Mutex::new(extension),
                links: Mutex::new(Links::default()),
                handler: Mutex::new(None)
            })
        }
    }

    /// Install the handler receiving inbound messages.
    ///
    /// Each message is delivered exactly once, no matter which link
    /// carried it.
    pub fn set_message_handler(&self, f: MessageHandler) {
        *lock(&self.inner.handler) = Some(f)
    }

    /// Open the primary link.
    ///
    /// The signaling link follows automatically from the primary link's
    /// open callback, once the connection-id is known.
    pub fn connect(&self) -> Result<(), ConnectError> {
        let destination = self.inner.config.destination().cloned().ok_or(ConnectError::InvalidUri)?;
        let offer = lock(&self.inner.extension).generate_offer(&destination, None)?;
        let handle = self.inner.endpoint.connect(&destination, Some(&offer), Inner::primary_slots(&self.inner))?;
        let mut links = lock(&self.inner.links);
        if links.primary.is_none() {
            links.primary = Some(handle)
        }
        Ok(())
    }

    /// Send a message over the preferred link.
    ///
    /// Tries the primary link first, then the signaling link. Fails with
    /// [`SendError::LinksDown`] when neither link accepted the message; the
    /// message is not buffered in that case.
    pub fn send(&self, data: Data) -> Result<(), SendError> {
        let (primary, signaling) = {
            let links = lock(&self.inner.links);
            (links.primary.clone(), links.signaling.clone())
        };
        send_preferring(primary.as_ref(), signaling.as_ref(), data)
    }

    /// Close both links and mark the session done.
    pub fn close(&self) {
        let (primary, signaling) = {
            let mut links = lock(&self.inner.links);
            links.done = true;
            links.open = false;
            (links.primary.take(), links.signaling.take())
        };
        for handle in primary.iter().chain(signaling.iter()) {
            close_with(handle, CloseCode::Normal, "session finished")
        }
    }

    /// Is at least one link usable?
    pub fn is_open(&self) -> bool {
        lock(&self.inner.links).open
    }

    /// Has the session been closed for good?
    pub fn is_done(&self) -> bool {
        lock(&self.inner.links).done
    }

    /// The connection-id of the session, once negotiated.
    pub fn connection_id(&self) -> Option<String> {
        lock(&self.inner.extension).connection_id().map(str::to_string)
    }
}

impl Inner {
    /// The handler slots of a (re)dialed primary link.
    fn primary_slots(inner: &Arc<Inner>) -> Slots {
        let on_open = Arc::downgrade(inner);
        let on_close = Arc::downgrade(inner);
        let on_fail = Arc::downgrade(inner);
        let on_message = Arc::downgrade(inner);
        Slots {
            open: Some(Box::new(move |h| Inner::with(&on_open, |i| Inner::on_open_primary(i, h)))),
            close: Some(Box::new(move |_| {
                debug!("primary link closed");
                Inner::with(&on_close, Inner::primary_down)
            })),
            fail: Some(Box::new(move |_| {
                debug!("primary link failed");
                Inner::with(&on_fail, Inner::primary_down)
            })),
            message: Some(Box::new(move |_, data| Inner::with(&on_message, |i| Inner::on_message(i, data))))
        }
    }

    /// The handler slots of the signaling link.
    fn signaling_slots(inner: &Arc<Inner>) -> Slots {
        let on_open = Arc::downgrade(inner);
        let on_close = Arc::downgrade(inner);
        let on_fail = Arc::downgrade(inner);
        let on_message = Arc::downgrade(inner);
        Slots {
            open: Some(Box::new(move |h| Inner::with(&on_open, |i| Inner::on_open_signaling(i, h)))),
            close: Some(Box::new(move |_| {
                debug!("signaling link closed");
                Inner::with(&on_close, Inner::signaling_down)
            })),
            fail: Some(Box::new(move |_| {
                debug!("signaling link failed");
                Inner::with(&on_fail, Inner::signaling_down)
            })),
            message: Some(Box::new(move |_, data| Inner::with(&on_message, |i| Inner::on_message(i, data))))
        }
    }

    fn with(weak: &Weak<Inner>, f: impl FnOnce(&Arc<Inner>)) {
        if let Some(inner) = weak.upgrade() {
            f(&inner)
        }
    }

    /// The primary handshake finished: record the session id from the
    /// response and follow up with the signaling link.
    fn on_open_primary(inner: &Arc<Inner>, handle: &Handle) {
        debug!("primary link open");
        let header = match handle.upgrade().and_then(|c| c.extensions_header()) {
            Some(h) => h,
            None => {
                error!("primary response carries no extension header");
                close_with(handle, CloseCode::ProtocolError, "mobile-signaling not negotiated");
                return
            }
        };
        let accepted = {
            let mut ext = lock(&inner.extension);
            match signaling::offered_params(&header) {
                None => Err(signaling::Error::General),
                Some(params) => {
                    let mut result = ext.validate_response(&params);
                    if result.is_ok() {
                        result = ext.process_response(&params)
                    }
                    if result.is_ok() {
                        result = ext.init()
                    }
                    result
                }
            }
        };
        if let Err(e) = accepted {
            error!("primary extension response rejected: {}", e);
            close_with(handle, CloseCode::ProtocolError, "invalid extension response");
            return
        }
        {
            let mut links = lock(&inner.links);
            links.primary = Some(handle.clone());
            links.open = true;
            links.attempt = 0;
        }
        Inner::connect_signaling(inner)
    }

    /// Open the signaling link through the coordinator, presenting the
    /// connection-id of the session.
    fn connect_signaling(inner: &Arc<Inner>) {
        let coordinator = match inner.config.coordinator() {
            Some(c) => c.clone(),
            None => {
                trace!("no coordinator configured, staying single-link");
                return
            }
        };
        {
            let links = lock(&inner.links);
            if links.done {
                return
            }
            if links.signaling.as_ref().map_or(false, |h| alive(h).is_some()) {
                return
            }
        }
        let offer = {
            let mut ext = lock(&inner.extension);
            let id = match ext.connection_id() {
                Some(id) => id.to_string(),
                None => {
                    error!("no connection-id for the signaling link");
                    return
                }
            };
            // What a transport would do with a replaced request header:
            // keep the connection-id, regenerate the remaining attributes.
            let replaced = format!("{}; connection_id=\"{}\"", EXTENSION_NAME, id);
            match ext.generate_offer(&coordinator, Some(&replaced)) {
                Ok(offer) => offer,
                Err(e) => {
                    error!("signaling offer failed: {}", e);
                    return
                }
            }
        };
        debug!("opening signaling link via {}", coordinator);
        match inner.endpoint.connect(&coordinator, Some(&offer), Inner::signaling_slots(inner)) {
            Ok(handle) => {
                let mut links = lock(&inner.links);
                if links.signaling.is_none() {
                    links.signaling = Some(handle)
                }
            }
            Err(e) => error!("signaling dial failed: {}", e)
        }
    }

    fn on_open_signaling(inner: &Arc<Inner>, handle: &Handle) {
        debug!("signaling link open");
        if let Some(header) = handle.upgrade().and_then(|c| c.extensions_header()) {
            if let Some(params) = signaling::offered_params(&header) {
                if let Err(e) = lock(&inner.extension).validate_response(&params) {
                    error!("signaling extension response rejected: {}", e);
                    close_with(handle, CloseCode::ProtocolError, "invalid extension response");
                    return
                }
            }
        }
        let mut links = lock(&inner.links);
        links.signaling = Some(handle.clone());
        links.open = true
    }

    /// The primary link went down: clear it and, while the signaling link
    /// keeps the session alive, schedule a reconnect.
    fn primary_down(inner: &Arc<Inner>) {
        let delay = {
            let mut links = lock(&inner.links);
            links.primary = None;
            let fallback = links.signaling.as_ref().map_or(false, |h| alive(h).is_some());
            links.open = fallback;
            if links.done || !fallback {
                None
            } else {
                let shift = cmp::min(links.attempt, RETRY_MAX_SHIFT);
                links.attempt = links.attempt.saturating_add(1);
                Some(cmp::min(RETRY_INITIAL_DELAY * (1u32 << shift), RETRY_MAX_DELAY))
            }
        };
        if let Some(delay) = delay {
            debug!("signaling link still up, reconnecting primary in {:?}", delay);
            let weak = Arc::downgrade(inner);
            inner.endpoint.schedule(delay, Box::new(move || {
                Inner::with(&weak, Inner::reconnect_primary)
            }))
        }
    }

    fn signaling_down(inner: &Arc<Inner>) {
        let mut links = lock(&inner.links);
        links.signaling = None;
        links.open = links.primary.as_ref().map_or(false, |h| alive(h).is_some())
    }

    /// Re-dial the primary link, presenting the session's connection-id.
    fn reconnect_primary(inner: &Arc<Inner>) {
        {
            let links = lock(&inner.links);
            if links.done {
                return
            }
            if links.primary.as_ref().map_or(false, |h| alive(h).is_some()) {
                return
            }
        }
        let destination = match inner.config.destination() {
            Some(d) => d.clone(),
            None => return
        };
        let offer = {
            let mut ext = lock(&inner.extension);
            let replaced = ext
                .connection_id()
                .map(|id| format!("{}; connection_id=\"{}\"", EXTENSION_NAME, id));
            match ext.generate_offer(&destination, replaced.as_ref().map(String::as_str)) {
                Ok(offer) => offer,
                Err(e) => {
                    error!("primary reconnect offer failed: {}", e);
                    return
                }
            }
        };
        debug!("reconnecting primary link to {}", destination);
        match inner.endpoint.connect(&destination, Some(&offer), Inner::primary_slots(inner)) {
            Ok(handle) => {
                let mut links = lock(&inner.links);
                if links.primary.is_none() {
                    links.primary = Some(handle)
                }
            }
            Err(e) => {
                error!("primary reconnect failed: {}", e);
                Inner::primary_down(inner)
            }
        }
    }

    fn on_message(inner: &Arc<Inner>, data: Data) {
        trace!("message received ({} bytes)", data.len());
        let handler = lock(&inner.handler);
        if let Some(f) = handler.as_ref() {
            f(data)
        }
    }
}
