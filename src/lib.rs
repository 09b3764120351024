//! Library crate for wyr-back: the two-player "Would You Rather" room backend.
//!
//! [`session`] holds the per-participant synchronisation core, [`dao`] the room stores it
//! commits to, and the remaining modules expose it over HTTP and SSE.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
