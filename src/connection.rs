// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The transport-facing connection model.
//!
//! The websocket engine itself (framing, the HTTP handshake plumbing and
//! the I/O event loop) lives outside this crate. The session runtime
//! consumes it through two traits: [`Socket`], one live connection with a
//! fixed set of handler slots, and [`Endpoint`], which originates
//! connections and runs timers.
//!
//! Connections are owned by the transport; the runtime only ever holds a
//! [`Handle`], a weak reference that must be upgraded and checked for
//! [`State::Open`] before every use.

use crate::data::Data;
use http::Uri;
use log::debug;
use std::{fmt, sync::{Arc, Mutex, MutexGuard, Weak}, time::Duration};

/// The session state of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The opening handshake is in progress.
    Connecting,
    /// The connection is established.
    Open,
    /// The closing handshake is in progress.
    Closing,
    /// The connection is closed.
    Closed
}

impl State {
    /// Has the close handshake started or finished?
    pub fn is_terminal(self) -> bool {
        match self {
            State::Closing | State::Closed => true,
            State::Connecting | State::Open => false
        }
    }
}

/// The role a physical link plays within a logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The direct link from client to destination server.
    Primary,
    /// The link from client through the coordinator to the destination.
    Signaling
}

impl Role {
    /// The other half of a session.
    pub fn peer(self) -> Role {
        match self {
            Role::Primary => Role::Signaling,
            Role::Signaling => Role::Primary
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("primary"),
            Role::Signaling => f.write_str("signaling")
        }
    }
}

// Close codes ////////////////////////////////////////////////////////////////////////////////////

/// Close status codes defined in [RFC6455](https://tools.ietf.org/html/rfc6455#section-7.4).
///
/// The runtime itself only ever sends [`Normal`](CloseCode::Normal),
/// [`GoingAway`](CloseCode::GoingAway) and
/// [`ProtocolError`](CloseCode::ProtocolError); everything else is carried
/// transparently from peer to peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    CannotAccept,
    /// 1006, never sent on the wire.
    Abnormal,
    /// Any other code.
    Other(u16)
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::CannotAccept,
            1006 => CloseCode::Abnormal,
            c => CloseCode::Other(c)
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::CannotAccept => 1003,
            CloseCode::Abnormal => 1006,
            CloseCode::Other(c) => c
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

// Errors /////////////////////////////////////////////////////////////////////////////////////////

/// Errors returned by [`Socket::send`] and the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The connection is not in the open state.
    InvalidState,
    /// Neither the primary nor the signaling link could take the message.
    LinksDown
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SendError::InvalidState => f.write_str("connection is not open"),
            SendError::LinksDown => f.write_str("both links are down")
        }
    }
}

impl std::error::Error for SendError {}

/// Errors returned when an [`Endpoint`] fails to create a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// The URI was missing or not acceptable for dialing.
    InvalidUri,
    /// No listener is reachable at the remote address.
    Unreachable,
    /// The endpoint event loop is no longer running.
    Stopped,
    /// Extension negotiation failed before the connection could be queued.
    Extension(crate::signaling::Error)
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectError::InvalidUri => f.write_str("connection URI missing or invalid"),
            ConnectError::Unreachable => f.write_str("remote endpoint unreachable"),
            ConnectError::Stopped => f.write_str("endpoint event loop stopped"),
            ConnectError::Extension(e) => write!(f, "extension negotiation failed: {}", e)
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<crate::signaling::Error> for ConnectError {
    fn from(e: crate::signaling::Error) -> Self {
        ConnectError::Extension(e)
    }
}

// Handler slots //////////////////////////////////////////////////////////////////////////////////

/// Handler invoked when a connection finished its opening handshake.
pub type OnOpen = Box<dyn Fn(&Handle) + Send + Sync>;
/// Handler invoked when a connection finished the closing handshake.
pub type OnClose = Box<dyn Fn(&Handle) + Send + Sync>;
/// Handler invoked when a connection failed before or instead of closing.
pub type OnFail = Box<dyn Fn(&Handle) + Send + Sync>;
/// Handler invoked for every data frame arriving on a connection.
pub type OnMessage = Box<dyn Fn(&Handle, Data) + Send + Sync>;

/// The handler slots installed on a connection when it is created.
///
/// Each slot holds at most one callable; the transport invokes exactly one
/// slot per event, sequentially on its event loop. Slots can be replaced
/// later through the [`Socket`] setters.
#[derive(Default)]
pub struct Slots {
    /// Open handler.
    pub open: Option<OnOpen>,
    /// Close handler.
    pub close: Option<OnClose>,
    /// Fail handler.
    pub fail: Option<OnFail>,
    /// Message handler.
    pub message: Option<OnMessage>
}

impl fmt::Debug for Slots {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Slots")
            .field("open", &self.open.is_some())
            .field("close", &self.close.is_some())
            .field("fail", &self.fail.is_some())
            .field("message", &self.message.is_some())
            .finish()
    }
}

// Transport traits ///////////////////////////////////////////////////////////////////////////////

/// One live websocket connection, owned by the transport.
pub trait Socket: Send + Sync {
    /// The current session state.
    fn state(&self) -> State;

    /// The `Sec-WebSocket-Extensions` value negotiated for this connection.
    fn extensions_header(&self) -> Option<String>;

    /// The close code received from the peer, once the connection closed.
    fn remote_close_code(&self) -> Option<CloseCode>;

    /// Enqueue a data frame.
    ///
    /// Non-blocking: the frame is queued with the transport or an error is
    /// returned. Fails unless the state is [`State::Open`].
    fn send(&self, data: Data) -> Result<(), SendError>;

    /// Start the closing handshake with the given code and reason.
    fn close(&self, code: CloseCode, reason: &str) -> Result<(), SendError>;

    /// Replace the open handler.
    fn set_open_handler(&self, f: OnOpen);

    /// Replace the close handler.
    fn set_close_handler(&self, f: OnClose);

    /// Replace the fail handler.
    fn set_fail_handler(&self, f: OnFail);

    /// Replace the message handler.
    fn set_message_handler(&self, f: OnMessage);
}

/// Non-owning reference to a connection.
pub type Handle = Weak<dyn Socket>;

/// Stable identity of the connection a handle refers to.
///
/// Usable as a map key (the splice registry of the proxy); staying valid
/// does not imply the connection is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

impl HandleId {
    /// The identity of the connection behind `handle`.
    pub fn of(handle: &Handle) -> Self {
        HandleId(handle.as_ptr() as *const () as usize)
    }
}

/// An endpoint able to originate websocket connections.
pub trait Endpoint: Send + Sync {
    /// Create and queue a connection to `uri`.
    ///
    /// If `extensions` is given it replaces the `Sec-WebSocket-Extensions`
    /// request header before the opening handshake runs. The returned
    /// handle starts out [`State::Connecting`]; progress is reported
    /// through the handler `slots`.
    fn connect(&self, uri: &Uri, extensions: Option<&str>, slots: Slots) -> Result<Handle, ConnectError>;

    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);

    /// Stop the endpoint's event loop.
    fn stop(&self);
}

// Helpers ////////////////////////////////////////////////////////////////////////////////////////

/// Upgrade a handle if the connection is still alive and open.
pub fn alive(handle: &Handle) -> Option<Arc<dyn Socket>> {
    let con = handle.upgrade()?;
    if con.state() == State::Open {
        Some(con)
    } else {
        None
    }
}

/// Close the connection behind `handle` unless it is already going down.
pub(crate) fn close_with(handle: &Handle, code: CloseCode, reason: &str) {
    if let Some(con) = handle.upgrade() {
        if !con.state().is_terminal() {
            if let Err(e) = con.close(code, reason) {
                debug!("close ({}) failed: {}", code, e)
            }
        }
    }
}

/// Send on the preferred link: the primary when it is open, the signaling
/// link otherwise. The decision is made here, at send time, so a close
/// event racing with a send cannot drop a message the other link could
/// still carry.
pub(crate) fn send_preferring(primary: Option<&Handle>, signaling: Option<&Handle>, data: Data) -> Result<(), SendError> {
    if let Some(con) = primary.and_then(|h| alive(h)) {
        match con.send(data.clone()) {
            Ok(()) => return Ok(()),
            Err(e) => debug!("send on primary link failed: {}", e)
        }
    }
    if let Some(con) = signaling.and_then(|h| alive(h)) {
        match con.send(data) {
            Ok(()) => return Ok(()),
            Err(e) => debug!("send on signaling link failed: {}", e)
        }
    }
    Err(SendError::LinksDown)
}

/// Lock a mutex, recovering the guard if it was poisoned.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner()
    }
}
