// SPDX-FileCopyrightText: 2023 Linutronix GmbH
// SPDX-License-Identifier: GPL-3.0-or-later

//! Main executable of skprioctl
// we do not want to panic or exit, errors are returned from main()
#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::expect_used,
        clippy::exit,
        clippy::unwrap_used,
        clippy::indexing_slicing,
        clippy::modulo_arithmetic, // % 0 panics - use checked_rem
        clippy::integer_division,  // / 0 panics - use checked_div
        clippy::unreachable,
        clippy::unwrap_in_result,
    )
)]

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use env_logger::Env;
use std::fs::File;
use std::path::PathBuf;

use skprioctl::backend::select_backend;
use skprioctl::configuration::Settings;
use skprioctl::mapping::PriorityMapping;
use skprioctl::vlan::VlanAnnotator;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Interface name
    #[arg(short, long = "interface", value_name = "INTERFACE")]
    interface: Option<String>,

    /// Maps sk_prio to UP. LIST is <=16 comma separated UP.
    /// Index of element is sk_prio.
    #[arg(
        short = 'u',
        long = "skprio_up",
        value_name = "LIST",
        value_delimiter = ',',
        allow_hyphen_values = true
    )]
    skprio_up: Option<Vec<String>>,

    /// YAML file overriding the locations of sysfs, the VLAN reports and tc
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Main function of `skprioctl`
///
/// # Errors
/// Will return `Err` if no interface is given, the mapping could not be
/// read, the new mapping is invalid or could not be applied.
/// The error is printed by the runtime and the exit status is 1.
#[tokio::main(flavor = "current_thread")]
pub async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let interface = require_interface(cli.interface)?;

    let settings = match cli.config {
        Some(file) => Settings::read(
            File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?,
        )?,
        None => Settings::default(),
    };

    let backend = select_backend(&settings, &interface)?;
    let annotator = VlanAnnotator::new(settings.vlan_proc_path.clone());
    let mut mapping = PriorityMapping::load(backend, annotator, interface).await?;

    if let Some(skprio_up) = cli.skprio_up {
        mapping.apply(skprio_up.as_slice()).await?;
    }

    print!("{mapping}");

    Ok(())
}

/// Prints the usage if no interface was given
fn require_interface(interface: Option<String>) -> Result<String> {
    interface.ok_or_else(|| {
        eprintln!("{}", Cli::command().render_usage());
        anyhow!("Interface name is required")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_skprio_up_list() {
        let cli = Cli::parse_from(["skprioctl", "-i", "ib0", "-u", "0,1,2,7"]);

        assert_eq!(cli.interface.as_deref(), Some("ib0"));
        assert_eq!(
            cli.skprio_up,
            Some(vec![
                "0".to_owned(),
                "1".to_owned(),
                "2".to_owned(),
                "7".to_owned()
            ])
        );
    }

    #[test]
    fn test_parse_long_options() {
        let cli = Cli::parse_from([
            "skprioctl",
            "--interface",
            "eth3",
            "--skprio_up",
            "3",
            "--config",
            "/etc/skprioctl.yaml",
        ]);

        assert_eq!(cli.interface.as_deref(), Some("eth3"));
        assert_eq!(cli.skprio_up, Some(vec!["3".to_owned()]));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/skprioctl.yaml")));
    }

    #[test]
    fn test_parse_negative_user_priority() {
        let cli = Cli::try_parse_from(["skprioctl", "-i", "eth0", "-u", "-1,2"]).unwrap();
        assert_eq!(
            cli.skprio_up,
            Some(vec!["-1".to_owned(), "2".to_owned()])
        );

        let cli = Cli::try_parse_from(["skprioctl", "-u", "-1", "-i", "eth0"]).unwrap();
        assert_eq!(cli.skprio_up, Some(vec!["-1".to_owned()]));
        assert_eq!(cli.interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn test_require_interface() -> Result<()> {
        assert_eq!(require_interface(Some("eth0".to_owned()))?, "eth0");
        Ok(())
    }

    #[test]
    #[should_panic(expected = "Interface name is required")]
    fn test_require_interface_missing() {
        let cli = Cli::parse_from(["skprioctl", "-u", "1,2"]);
        require_interface(cli.interface).unwrap();
    }

    #[test]
    fn test_interface_is_optional_for_clap() {
        let cli = Cli::parse_from(["skprioctl"]);
        assert!(cli.interface.is_none());
        assert!(cli.skprio_up.is_none());
    }
}
