//! fieldroute dispatch engine
//!
//! Assigns field-service work orders to technicians and sequences each
//! technician's stops, then keeps those routes sound as jobs are cancelled
//! and technicians drop out.

pub mod availability;
pub mod book;
pub mod budget;
pub mod candidates;
pub mod config;
pub mod controller;
pub mod distance;
pub mod error;
pub mod events;
pub mod haversine;
pub mod improve;
pub mod intake;
pub mod model;
pub mod optimizer;
pub mod osrm;
pub mod rebalancer;
pub mod sequencer;
pub mod skills;
pub mod traits;
