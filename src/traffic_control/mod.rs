// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Run the `tc` traffic control program
//!
//! ```no_run
//! use skprioctl::traffic_control::{TcTool, TrafficControl};
//!
//! # tokio_test::block_on(async {
//! let tc = TcTool::new("tc".into());
//! for line in tc.run(&["qdisc".to_owned(), "show".to_owned()]).await? {
//!     println!("{line}");
//! }
//! # Ok::<(), anyhow::Error>(())
//! # });
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use tokio::process::Command;

#[cfg(test)]
use mockall::automock;

/// Defines how to invoke the traffic control program
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TrafficControl {
    /// Run with the given arguments and return the lines printed to stdout
    ///
    /// # Errors
    ///
    /// Will return `Err` if the program could not be started
    /// or exited with a failure status.
    async fn run(&self, args: &[String]) -> Result<Vec<String>>;
}

/// Executes the `tc` binary
#[derive(Debug)]
pub struct TcTool {
    binary: PathBuf,
}

impl TcTool {
    /// Create new executor for the given `tc` binary
    #[must_use]
    pub const fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl TrafficControl for TcTool {
    async fn run(&self, args: &[String]) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);

        debug!("Executing {:?}", cmd.as_std());

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to execute command {:?}", cmd.as_std()))?;

        if !output.status.success() {
            let stderr = String::from_utf8(output.stderr).with_context(|| {
                format!(
                    "Invalid UTF-8 sequence returned when executing\n{:?}",
                    cmd.as_std()
                )
            })?;

            return Err(anyhow!(
                "Command\n{:?}\nfailed with status: {}, {}",
                cmd.as_std(),
                output.status,
                stderr.trim_end()
            ));
        }

        let stdout = String::from_utf8(output.stdout).with_context(|| {
            format!(
                "Invalid UTF-8 sequence returned when executing\n{:?}",
                cmd.as_std()
            )
        })?;

        Ok(stdout.lines().map(str::to_owned).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_collects_lines() -> Result<()> {
        let echo = TcTool::new(PathBuf::from("echo"));

        let lines = echo
            .run(&["qdisc mq 0: root".to_owned(), "\nqueues:(0:1)".to_owned()])
            .await?;

        assert_eq!(lines, vec!["qdisc mq 0: root ", "queues:(0:1)"]);
        Ok(())
    }

    #[tokio::test]
    #[should_panic(expected = "failed with status")]
    async fn test_run_failure_status() {
        let fail = TcTool::new(PathBuf::from("false"));
        fail.run(&[]).await.unwrap();
    }

    #[tokio::test]
    #[should_panic(expected = "Failed to execute command")]
    async fn test_run_missing_binary() {
        let missing = TcTool::new(PathBuf::from("/nonexistent/sbin/tc"));
        missing.run(&["qdisc".to_owned()]).await.unwrap();
    }
}
