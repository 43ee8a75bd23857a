//! QUIC transport layer for CSI messages.
//!
//! This module provides [`CsiClient`] and [`CsiServer`] that communicate
//! [`CsiMessage`](crate::message::CsiMessage) values over QUIC
//! bi-directional streams using `quinn`.  Each stream carries one
//! JSON-encoded request and one JSON-encoded response.

pub mod client;
pub mod server;

pub use client::CsiClient;
pub use server::CsiServer;
