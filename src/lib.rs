//! TwinPortal - FIWARE device inventory backend
//!
//! Signs users in against Keyrock, reconciles IoT Agent service groups and
//! devices, and derives live device status from Orion activity.

pub mod activity;
pub mod config;
pub mod fiware;
pub mod inventory;
pub mod scheduler;
pub mod session;
pub mod web;

#[cfg(test)]
mod testing;
