// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Access the skprio to UP mapping of an interface
//!
//! Kernel drivers exposing `qos/skprio2up` in sysfs are handled by the
//! [`SysfsBackend`], all others via an `mqprio` qdisc set up with `tc`.
#![cfg_attr(not(feature = "iproute2"), doc = "```ignore")]
#![cfg_attr(feature = "iproute2", doc = "```no_run")]
//! use skprioctl::backend::select_backend;
//! use skprioctl::configuration::Settings;
//!
//! # tokio_test::block_on(async {
//! let backend = select_backend(&Settings::default(), "eth0")?;
//! let map = backend.load().await?;
//! backend.persist(&map).await?;
//! # Ok::<(), anyhow::Error>(())
//! # });
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::configuration::Settings;
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

mod sysfs;
pub use sysfs::SysfsBackend;

#[cfg(feature = "iproute2")]
mod mqprio;
#[cfg(feature = "iproute2")]
pub use mqprio::{parse_qdisc_show, MqprioBackend, QdiscShow, QueueRange};

/// Failures specific to reading and changing the mapping
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// A user priority is not an integer or out of range
    #[error("Bad user prio: {0} - should be in the range: 0-7")]
    BadUserPriority(String),

    /// More user priorities were given than there are skprio values
    #[error("Too many user priorities: {given} given, but at most {max} skprio values can be mapped")]
    TooManyValues {
        /// Number of values given
        given: usize,
        /// Maximum number of skprio values
        max: usize,
    },

    /// The backend has no way to write a mapping
    #[error("Setting skprio<=>up mapping is not implemented for this backend")]
    Unsupported,

    /// `tc qdisc show` did not print anything
    #[error("tc tool returned empty output")]
    EmptyToolOutput,

    /// Installing the `mqprio` qdisc failed
    #[error("QoS is not supported via mqprio")]
    MqprioUnsupported,
}

/// Defines how to read and write the raw skprio to UP list of an interface
///
/// The index into the list is the skprio, the value the UP.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MappingBackend {
    /// Load the current mapping
    ///
    /// # Errors
    ///
    /// Will return `Err` if the mapping could not be read or parsed.
    async fn load(&self) -> Result<Vec<u8>>;

    /// Write the given mapping through to the system
    ///
    /// # Errors
    ///
    /// Will return `Err` if the mapping could not be written.
    /// Backends without a write path return [`MappingError::Unsupported`].
    async fn persist(&self, _map: &[u8]) -> Result<()> {
        Err(MappingError::Unsupported.into())
    }
}

/// Select the backend for `interface`
///
/// Uses the sysfs file if the driver provides one, otherwise `tc`.
///
/// # Errors
///
/// Will return `Err` if the sysfs file does not exist and
/// the crate was built without `tc` support.
pub fn select_backend(
    settings: &Settings,
    interface: &str,
) -> Result<Box<dyn MappingBackend + Send + Sync>> {
    let path = settings.skprio2up_path(interface);
    if path.exists() {
        info!("Using sysfs mapping at {}", path.display());
        Ok(Box::new(SysfsBackend::new(path)))
    } else {
        info!("{} not found, falling back to tc", path.display());
        new_mqprio_backend(settings, interface)
    }
}

#[cfg(feature = "iproute2")]
fn new_mqprio_backend(
    settings: &Settings,
    interface: &str,
) -> Result<Box<dyn MappingBackend + Send + Sync>> {
    use crate::traffic_control::TcTool;

    Ok(Box::new(MqprioBackend::new(
        TcTool::new(settings.tc_binary.clone()),
        interface.to_owned(),
    )))
}

#[cfg(not(feature = "iproute2"))]
fn new_mqprio_backend(
    _settings: &Settings,
    interface: &str,
) -> Result<Box<dyn MappingBackend + Send + Sync>> {
    Err(anyhow::anyhow!(
        "No sysfs mapping found for {interface} and the iproute2 feature is not built in!"
    ))
}
