//! parcel-ctl — command-line client for parceld.
//!
//! The library half holds [`HttpTransport`], which lets a
//! [`ChunkProducer`](parcel_services::ChunkProducer) upload over HTTP.

pub mod cmd;

pub use cmd::http::HttpTransport;
