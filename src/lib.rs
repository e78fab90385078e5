//! Storefront checkout library
//!
//! Checkout orchestration and dynamic pricing for a storefront: free-shipping rules,
//! price breakdowns, shipping-zone resolution, coupon validation and a two-phase order
//! commit with compensating cancellation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod clients;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod services;
pub mod webhooks;

pub use errors::ServiceError;
