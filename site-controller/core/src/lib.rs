//! Router-facing data model for a site's bindings.
//!
//! Nothing in this crate talks to the cluster. It holds the pieces of state the binding adaptor
//! owns (the router port allocator and the set of exposed ports) and the two persisted router
//! configuration formats the controller reads and writes:
//!
//! - [`RouterConfig`] is the JSON entity list mounted into the router. Its `tcpListener` and
//!   `tcpConnector` entities form the [`BridgeConfig`].
//! - [`transport`] handles the text configuration carried in the router deployment's environment,
//!   in which every inter-router connector follows the `## Connectors: ##` marker.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod bridge;
mod error;
pub mod exposed;
pub mod ports;
pub mod router_config;
pub mod transport;

pub use self::{
    bridge::{BridgeConfig, TcpEndpoint},
    error::Error,
    exposed::{ExposedPortSet, ExposedPorts, Port, Protocol, Unexposed},
    ports::{PortMapping, PortRange},
    router_config::RouterConfig,
};

/// The address the router binds listeners to.
pub const WILDCARD_HOST: &str = "0.0.0.0";
