//! Client code for waystation.
//!
//! This crate provides the HTTP side of the engine: a reqwest-backed
//! implementation of the core `Network` trait and URL resolution against the
//! configured origin.

pub mod fetch;

pub use fetch::{FetchConfig, HttpNetwork, UrlError, canonicalize, resolve};
