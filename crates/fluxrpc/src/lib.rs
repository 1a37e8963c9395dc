//! # fluxrpc
//!
//! Client-side invocation runtime. A [`Proxy`] stands in for a remote
//! interface: each method call is mapped onto fire-and-forget,
//! request-response, request-stream or request-channel traffic over a
//! [`Transport`], with composite metadata describing route and encoding.
//!
//! Single-response methods may be cached in a shared [`ResultCache`] that an
//! [`InvalidationListener`] keeps fresh from broker notifications.

pub mod builder;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod interface;
pub mod listener;
pub mod metadata;
#[cfg(any(test, feature = "test-util"))]
pub mod mock_transport;
pub mod proxy;
pub mod reply;
pub mod transport;
pub mod upstream;

pub use builder::ProxyBuilder;
pub use cache::ResultCache;
pub use context::CallContext;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
pub use interface::InterfaceDescriptor;
pub use interface::MethodDescriptor;
pub use listener::InvalidationListener;
pub use listener::Notification;
pub use metadata::InteractionPattern;
pub use metadata::ReplyShape;
pub use proxy::Proxy;
pub use reply::Args;
pub use reply::Reply;
pub use transport::Payload;
pub use transport::Transport;

#[cfg(test)]
mod tests;
