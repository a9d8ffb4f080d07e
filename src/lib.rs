#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod backend;
pub mod configuration;
pub mod mapping;
pub mod vlan;

#[cfg(feature = "iproute2")]
pub mod traffic_control;
