// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Server-side pairing of physical links into logical sessions.
//!
//! The [`Registry`] maps every negotiated connection-id to a session of up
//! to two links, one primary and one signaling. [`validate`] screens
//! handshakes before they complete, [`on_open`] applies the pairing
//! transitions and [`on_close`] retires halves and erases sessions whose
//! links are all gone.
//!
//! A message arriving on either link of a session is one logical message;
//! replies go back over the preferred link, the primary one when it is
//! open and the signaling link otherwise.
//!
//! [`validate`]: Registry::validate
//! [`on_open`]: Registry::on_open
//! [`on_close`]: Registry::on_close

use crate::connection::{alive, close_with, lock, send_preferring, CloseCode, Handle, HandleId, Role, SendError};
use crate::data::Data;
use crate::signaling;
use log::{debug, error, trace};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Application handler producing an optional reply to an inbound message.
///
/// Receives the connection-id of the session and the message; the returned
/// reply is routed downlink over the preferred link.
pub type MessageHandler = Box<dyn Fn(&str, &Data) -> Option<Data> + Send + Sync>;

/// One logical session: up to one primary and one signaling link.
#[derive(Default)]
struct Session {
    primary: Option<Handle>,
    signaling: Option<Handle>
}

impl Session {
    fn half(&self, role: Role) -> Option<&Handle> {
        match role {
            Role::Primary => self.primary.as_ref(),
            Role::Signaling => self.signaling.as_ref()
        }
    }

    fn half_mut(&mut self, role: Role) -> &mut Option<Handle> {
        match role {
            Role::Primary => &mut self.primary,
            Role::Signaling => &mut self.signaling
        }
    }

    fn has_live_primary(&self) -> bool {
        self.primary.as_ref().map_or(false, |h| h.upgrade().is_some())
    }
}

/// The session registry: connection-id to pair of physical links.
pub struct Registry {
    sessions: Mutex<HashMap<String, Session>>,
    handler: Mutex<Option<MessageHandler>>
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Registry {
            sessions: Mutex::new(HashMap::new()),
            handler: Mutex::new(None)
        }
    }

    /// Install the application message handler.
    pub fn set_message_handler(&self, f: MessageHandler) {
        *lock(&self.handler) = Some(f)
    }

    /// The number of live sessions.
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// The handle of a session half, if present.
    pub fn session_link(&self, id: &str, role: Role) -> Option<Handle> {
        let sessions = lock(&self.sessions);
        sessions.get(id).and_then(|s| s.half(role).cloned())
    }

    /// Screen a connection during its opening handshake, before `on_open`.
    ///
    /// Returns false to reject the handshake: a signaling link without an
    /// existing session, or a primary link for a session that already has a
    /// live primary. Connections without the extension pass through.
    pub fn validate(&self, handle: &Handle) -> bool {
        let (id, primary) = match link_params(handle) {
            Some(p) => p,
            None => return true
        };
        let sessions = lock(&self.sessions);
        match sessions.get(&id) {
            None if !primary => {
                debug!("{}: no primary connection to signal", id);
                false
            }
            Some(session) if primary && session.has_live_primary() => {
                debug!("{}: primary link exists", id);
                false
            }
            _ => true
        }
    }

    /// Attach a freshly opened connection to its session.
    ///
    /// A violation of the pairing rules that slipped past [`validate`]
    /// closes the new connection with `protocol_error`; existing sessions
    /// are never disturbed by a rejected newcomer.
    ///
    /// [`validate`]: Registry::validate
    pub fn on_open(self: &Arc<Self>, handle: &Handle) {
        let (id, primary) = match link_params(handle) {
            Some(p) => p,
            None => return
        };
        let role = if primary { Role::Primary } else { Role::Signaling };
        let verdict = {
            let mut sessions = lock(&self.sessions);
            match sessions.get_mut(&id) {
                None => {
                    if primary {
                        let mut session = Session::default();
                        session.primary = Some(handle.clone());
                        sessions.insert(id.clone(), session);
                        Ok(())
                    } else {
                        Err("no primary connection to signal")
                    }
                }
                Some(session) => {
                    if primary {
                        if session.has_live_primary() {
                            Err("primary link exists")
                        } else {
                            // The primary died earlier; this link replaces it.
                            session.primary = Some(handle.clone());
                            Ok(())
                        }
                    } else {
                        session.signaling = Some(handle.clone());
                        Ok(())
                    }
                }
            }
        };
        match verdict {
            Err(reason) => {
                debug!("{}: rejecting {} link: {}", id, role, reason);
                close_with(handle, CloseCode::ProtocolError, reason)
            }
            Ok(()) => {
                debug!("{}: opened {} link", id, role);
                self.install(handle, role, id)
            }
        }
    }

    /// Wire the per-connection handlers of an attached link.
    fn install(self: &Arc<Self>, handle: &Handle, role: Role, id: String) {
        let con = match handle.upgrade() {
            Some(con) => con,
            None => return
        };
        let registry = Arc::downgrade(self);
        let close_id = id.clone();
        con.set_close_handler(Box::new(move |_| {
            if let Some(r) = registry.upgrade() {
                r.on_close(role, &close_id)
            }
        }));
        let registry = Arc::downgrade(self);
        con.set_message_handler(Box::new(move |_, data| {
            if let Some(r) = registry.upgrade() {
                r.on_message(role, &id, data)
            }
        }));
    }

    /// Retire the closed half of a session.
    ///
    /// When the other half is absent, expired or going down as well, the
    /// session is erased.
    pub fn on_close(&self, role: Role, id: &str) {
        debug!("{}: closed {} link", id, role);
        let mut sessions = lock(&self.sessions);
        let erase = match sessions.get_mut(id) {
            None => {
                error!("{}: close event for unknown session", id);
                return
            }
            Some(session) => {
                *session.half_mut(role) = None;
                match session.half(role.peer()) {
                    None => true,
                    Some(peer) => match peer.upgrade() {
                        None => true,
                        Some(con) => con.state().is_terminal()
                    }
                }
            }
        };
        if erase {
            trace!("{}: {} also dead, erasing session", id, role.peer());
            sessions.remove(id);
        }
    }

    /// Dispatch an inbound frame to the application and route its reply.
    fn on_message(&self, role: Role, id: &str, data: Data) {
        trace!("{}: message on {} link ({} bytes)", id, role, data.len());
        let reply = {
            let handler = lock(&self.handler);
            handler.as_ref().and_then(|f| f(id, &data))
        };
        if let Some(reply) = reply {
            if let Err(e) = self.send_downlink(id, reply) {
                error!("{}: reply failed: {}", id, e)
            }
        }
    }

    /// Send towards the client over the preferred link.
    pub fn send_downlink(&self, id: &str, data: Data) -> Result<(), SendError> {
        let (primary, signaling) = {
            let sessions = lock(&self.sessions);
            match sessions.get(id) {
                None => return Err(SendError::LinksDown),
                Some(s) => (s.primary.clone(), s.signaling.clone())
            }
        };
        send_preferring(primary.as_ref(), signaling.as_ref(), data)
    }

    /// Do the registry invariants hold?
    ///
    /// Every session must have at least one non-expired half and no two
    /// sessions may share a live primary connection.
    pub fn check_invariants(&self) -> bool {
        let sessions = lock(&self.sessions);
        let mut primaries = Vec::new();
        for (id, session) in sessions.iter() {
            if session.primary.is_none() && session.signaling.is_none() {
                error!("{}: session with both halves absent", id);
                return false
            }
            if let Some(h) = session.primary.as_ref() {
                if alive(h).is_some() {
                    let key = HandleId::of(h);
                    if primaries.contains(&key) {
                        error!("{}: primary link shared between sessions", id);
                        return false
                    }
                    primaries.push(key)
                }
            }
        }
        true
    }
}

/// The pairing-relevant parameters negotiated on a connection.
fn link_params(handle: &Handle) -> Option<(String, bool)> {
    let con = handle.upgrade()?;
    let header = con.extensions_header()?;
    let params = signaling::offered_params(&header)?;
    let mut id = None;
    let mut primary = false;
    for p in params.iter() {
        match p.name() {
            signaling::CONNECTION_ID => id = p.value().map(str::to_string),
            signaling::PRIMARY => primary = true,
            _ => {}
        }
    }
    Some((id?, primary))
}
