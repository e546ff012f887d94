//! Registry of IoT gateways and the peripheral devices attached to them.
//!
//! The [`service::GatewayService`] owns the business rules and talks to
//! storage through the traits in [`repository`]; [`rest`] maps the HTTP
//! surface onto it.

pub mod config;
pub mod db;
pub mod errors;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod repository;
pub mod rest;
pub mod service;
pub mod validate;
