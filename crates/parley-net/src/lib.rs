//! parley-net: asynchronous transport stack for the parley protocol.
//!
//! The crate splits along the two ends of a connection:
//!
//! - Client side: [`transport::Connector`] establishes a plain or TLS
//!   stream; [`client::Client`] owns it, correlates request ids to
//!   responses, and fans out pushes and lifecycle changes as
//!   [`client::ClientEvent`]s.
//! - Server side: [`controller::Controller`] supervises one listener per
//!   port; each accepted peer runs a session loop that feeds the
//!   [`router::Router`] and is registered in the
//!   [`manager::SessionManager`] for broadcasts and targeted pushes.
//!
//! All frames use the 5-byte-header wire format from `parley-protocol`.

pub mod client;
pub mod controller;
pub mod listener;
pub mod manager;
pub mod router;
pub mod session;
pub mod stream;
pub mod tls;
pub mod transport;
pub mod wire;

pub use client::{Client, ClientError, ClientEvent};
pub use controller::{Controller, ServerConfig, StartError};
pub use manager::{SessionHandle, SessionManager};
pub use router::{HandlerError, Router};
pub use transport::{ClientConfig, Connector, TransportError, TransportMode};
pub use wire::WireError;
