//! Resolving names and connecting to hosts.
//!
//! The central type of this module is the [`Dialer`][dialer::Dialer]
//! which establishes a TCP connection to a host given by name or address.
//! It relies on a [`Resolver`][resolver::Resolver] for turning names into
//! candidate addresses.

pub mod addr;
pub mod connectivity;
pub mod dialer;
pub mod resolver;
