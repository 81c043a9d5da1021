// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Dual-link websocket sessions over the `mobile-signaling` extension.
//!
//! A mobile client keeps one logical websocket session alive over two
//! concurrent physical connections: the *primary* link, dialed directly to
//! the origin server, and the *signaling* link, dialed to the origin
//! through a coordinator/proxy. Either link can carry application
//! messages; the primary is preferred and the signaling link takes over
//! transparently when the primary degrades. Both handshakes of a session
//! present the same connection-id in the `Sec-WebSocket-Extensions`
//! header, e.g.
//!
//! ```text
//! Sec-WebSocket-Extensions: mobile-signaling; connection_id="AbCdEf==";
//!     primary; coordinator="ws://proxy:9000"; destination="ws://origin:9002"
//! ```
//!
//! so that server and proxy can pair the two links.
//!
//! The crate provides the four pieces of the runtime:
//!
//! - [`signaling::MobileSignaling`]: negotiation of the extension token on
//!   offers and responses.
//! - [`server::Registry`]: the server-side session registry pairing the
//!   links of each connection-id.
//! - [`client::Client`]: the client-side dispatcher opening both links and
//!   picking one per outbound message.
//! - [`proxy::Proxy`]: the coordinator splicing inbound signaling links
//!   onto outbound links to the declared destination.
//!
//! The websocket framing engine, the HTTP machinery and the I/O event loop
//! are not part of this crate; they are consumed through the traits in
//! [`connection`].

#![forbid(unsafe_code)]

pub mod client;
pub mod connection;
pub mod data;
pub mod extension;
pub mod proxy;
pub mod server;
pub mod signaling;


pub use crate::client::Client;
pub use crate::connection::{CloseCode, ConnectError, Endpoint, Handle, Role, SendError, Slots, Socket, State};
pub use crate::data::Data;
pub use crate::extension::Param;
pub use crate::proxy::Proxy;
pub use crate::server::Registry;
pub use crate::signaling::{Config, MobileSignaling, EXTENSION_NAME};
