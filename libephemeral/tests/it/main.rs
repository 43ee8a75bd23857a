mod common;
mod lifecycle;
mod quic;
