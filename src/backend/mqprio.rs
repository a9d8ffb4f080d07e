// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::backend::{MappingBackend, MappingError};
use crate::traffic_control::TrafficControl;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};

/// Number of skprio values covered by an mqprio priority map
const PRIORITY_MAP_LEN: usize = 16;

/// Number of traffic classes requested when installing mqprio
const NUM_TC: u8 = 8;

/// Mapping derived from and applied via an `mqprio` root qdisc
#[derive(Debug)]
pub struct MqprioBackend<T> {
    tc: T,
    interface: String,
}

/// Queues assigned to one traffic class, as printed by `tc`
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct QueueRange {
    /// First queue of the traffic class
    pub first: u16,

    /// Last queue of the traffic class
    pub last: u16,
}

impl QueueRange {
    /// Number of queues in this range
    #[must_use]
    pub const fn count(self) -> u16 {
        self.last.saturating_sub(self.first).saturating_add(1)
    }
}

/// Relevant content of `tc qdisc show dev <interface>`
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QdiscShow {
    /// Priority map, index is the skprio
    pub map: Vec<u8>,

    /// Queues per traffic class
    pub queues: Vec<QueueRange>,
}

/// Parse the output of `tc qdisc show dev <interface>`
///
/// A plain `mq` root qdisc has no priority map, so all 16 skprio
/// values are reported as UP 0.
///
/// ```
/// use skprioctl::backend::parse_qdisc_show;
///
/// let lines = [
///     "qdisc mqprio 8001: root  tc 8 map 0 1 2 3 4 5 6 7 0 0 0 0 0 0 0 0",
///     "             queues:(0:1) (2:3) (4:5) (6:7) (8:9) (10:11) (12:13) (14:15)",
/// ];
/// let show = parse_qdisc_show(&lines)?;
/// assert_eq!(show.map, [0, 1, 2, 3, 4, 5, 6, 7, 0, 0, 0, 0, 0, 0, 0, 0]);
/// assert_eq!(show.queues.len(), 8);
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Errors
///
/// Will return `Err` if no line was printed at all
/// or the priority map can not be parsed.
/// Queue ranges that can not be parsed are skipped.
pub fn parse_qdisc_show<S: AsRef<str>>(lines: &[S]) -> Result<QdiscShow> {
    let mut show = QdiscShow::default();
    let mut empty = true;

    for line in lines.iter().map(AsRef::as_ref).map(str::trim) {
        if line.is_empty() {
            continue;
        }
        empty = false;

        let Some((param, val)) = line.split_once(':') else {
            continue;
        };

        if param == "qdisc mq 0" {
            show.map = vec![0; PRIORITY_MAP_LEN];
            break;
        } else if param == "queues" {
            for item in val.split_whitespace() {
                match parse_queue_range(item) {
                    Ok(range) => show.queues.push(range),
                    Err(e) => warn!("Ignoring queues of traffic class: {e:#}"),
                }
            }
        } else if param.starts_with("qdisc mqprio") {
            if line.contains("Unknown qdisc") {
                warn!("tc does not know mqprio, make sure the latest tc tool is in the path");
            }

            if let Some(map) = parse_priority_map(val)? {
                show.map = map;
            }
        }
    }

    if empty {
        return Err(MappingError::EmptyToolOutput.into());
    }

    Ok(show)
}

fn parse_queue_range(item: &str) -> Result<QueueRange> {
    let (first, last) = item
        .trim_matches(|c| c == '(' || c == ')')
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid queue range {item}"))?;

    Ok(QueueRange {
        first: first
            .parse()
            .with_context(|| format!("Invalid queue range {item}"))?,
        last: last
            .parse()
            .with_context(|| format!("Invalid queue range {item}"))?,
    })
}

fn parse_priority_map(val: &str) -> Result<Option<Vec<u8>>> {
    let mut tokens = val.split_whitespace().skip_while(|token| *token != "map");

    if tokens.next().is_none() {
        return Ok(None);
    }

    let map = tokens
        .take_while(|token| token.bytes().all(|b| b.is_ascii_digit()))
        .take(PRIORITY_MAP_LEN)
        .map(|up| {
            up.parse::<u8>()
                .with_context(|| format!("Invalid user priority {up} in priority map"))
        })
        .collect::<Result<Vec<u8>>>()?;

    Ok(Some(map))
}

impl<T: TrafficControl> MqprioBackend<T> {
    /// Create new mqprio backend for `interface` using the given `tc`
    #[must_use]
    pub const fn new(tc: T, interface: String) -> Self {
        Self { tc, interface }
    }

    fn del_args(&self) -> Vec<String> {
        ["qdisc", "del", "dev", self.interface.as_str(), "root"]
            .iter()
            .map(|arg| (*arg).to_owned())
            .collect()
    }

    fn add_args(&self, map: &[u8]) -> Vec<String> {
        let mut args: Vec<String> = [
            "qdisc",
            "add",
            "dev",
            self.interface.as_str(),
            "root",
            "mqprio",
        ]
        .iter()
        .map(|arg| (*arg).to_owned())
        .collect();

        args.push("num_tc".to_owned());
        args.push(NUM_TC.to_string());
        args.push("map".to_owned());
        args.extend(map.iter().map(ToString::to_string));
        args.push("hw".to_owned());
        args.push("1".to_owned());
        args
    }
}

#[async_trait]
impl<T: TrafficControl + Send + Sync> MappingBackend for MqprioBackend<T> {
    async fn load(&self) -> Result<Vec<u8>> {
        let args: Vec<String> = ["qdisc", "show", "dev", self.interface.as_str()]
            .iter()
            .map(|arg| (*arg).to_owned())
            .collect();

        let lines = self.tc.run(&args).await?;
        let show = parse_qdisc_show(lines.as_slice())
            .with_context(|| format!("Parsing qdiscs of {}", self.interface))?;

        for (tc, range) in show.queues.iter().enumerate() {
            debug!(
                "{}: traffic class {tc} uses {} queue(s) starting at {}",
                self.interface,
                range.count(),
                range.first
            );
        }

        if show.map.is_empty() {
            warn!("No priority map found for {}", self.interface);
        }

        Ok(show.map)
    }

    async fn persist(&self, map: &[u8]) -> Result<()> {
        // fails if there was no root qdisc, which is fine
        if let Err(e) = self.tc.run(&self.del_args()).await {
            debug!("Removing root qdisc of {} failed: {e:#}", self.interface);
        }

        self.tc
            .run(&self.add_args(map))
            .await
            .context(MappingError::MqprioUnsupported)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic_control::MockTrafficControl;
    use mockall::predicate::eq;

    const MQPRIO_SHOW: [&str; 2] = [
        "qdisc mqprio 1: root  tc 8 map 0 1 2 3 4 5 6 7 0 0 0 0 0 0 0 0",
        "             queues:(0:0) (1:1) (2:2) (3:3) (4:4) (5:5) (6:6) (7:15)",
    ];

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| (*arg).to_owned()).collect()
    }

    fn tc_showing(lines: &'static [&'static str]) -> MockTrafficControl {
        let mut tc = MockTrafficControl::new();
        tc.expect_run()
            .with(eq(args(&["qdisc", "show", "dev", "eth2"])))
            .returning(move |_| Ok(lines.iter().map(|line| (*line).to_owned()).collect()));
        tc
    }

    #[test]
    fn test_parse_mqprio() -> Result<()> {
        let show = parse_qdisc_show(&MQPRIO_SHOW)?;

        assert_eq!(show.map, vec![0, 1, 2, 3, 4, 5, 6, 7, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(show.queues.len(), 8);
        assert_eq!(show.queues[7], QueueRange { first: 7, last: 15 });
        assert_eq!(show.queues[7].count(), 9);
        Ok(())
    }

    #[test]
    fn test_parse_mq_defaults_to_zeros() -> Result<()> {
        let show = parse_qdisc_show(&[
            "qdisc mq 0: root ",
            "qdisc mqprio 1: root  tc 8 map 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1",
        ])?;

        assert_eq!(show.map, vec![0; 16]);
        Ok(())
    }

    #[test]
    fn test_parse_unknown_qdisc_keeps_going() -> Result<()> {
        let show = parse_qdisc_show(&[
            "qdisc mqprio 8001: root Unknown qdisc \"mqprio\", hence option area is unparsable",
        ])?;

        assert_eq!(show, QdiscShow::default());
        Ok(())
    }

    #[test]
    fn test_parse_other_qdisc() -> Result<()> {
        let show = parse_qdisc_show(&[
            "qdisc pfifo_fast 0: root refcnt 2 bands 3 priomap  1 2 2 2 1 2 0 0 1 1 1 1 1 1 1 1",
        ])?;

        assert!(show.map.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_empty_output() {
        let lines: [&str; 0] = [];
        let error = parse_qdisc_show(&lines).unwrap_err();

        assert_eq!(
            error.downcast_ref::<MappingError>(),
            Some(&MappingError::EmptyToolOutput)
        );
    }

    #[test]
    #[should_panic(expected = "tc tool returned empty output")]
    fn test_parse_blank_output() {
        parse_qdisc_show(&["", "   "]).unwrap();
    }

    #[test]
    #[should_panic(expected = "Invalid queue range (0-1)")]
    fn test_parse_queue_range_invalid() {
        parse_queue_range("(0-1)").unwrap();
    }

    #[test]
    fn test_parse_skips_invalid_queue_range() -> Result<()> {
        let show = parse_qdisc_show(&[
            "qdisc mqprio 1: root  tc 2 map 0 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1",
            "             queues:(0-1) (2:x) (2:3)",
        ])?;

        assert_eq!(show.map, vec![0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1]);
        assert_eq!(show.queues, vec![QueueRange { first: 2, last: 3 }]);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_happy() -> Result<()> {
        let backend = MqprioBackend::new(tc_showing(&MQPRIO_SHOW), "eth2".to_owned());

        assert_eq!(
            backend.load().await?,
            vec![0, 1, 2, 3, 4, 5, 6, 7, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        Ok(())
    }

    #[tokio::test]
    #[should_panic(expected = "Parsing qdiscs of eth2")]
    async fn test_load_empty_output() {
        let backend = MqprioBackend::new(tc_showing(&[]), "eth2".to_owned());
        backend.load().await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_replaces_root_qdisc() -> Result<()> {
        let mut tc = MockTrafficControl::new();
        let mut seq = mockall::Sequence::new();
        tc.expect_run()
            .with(eq(args(&["qdisc", "del", "dev", "eth2", "root"])))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(anyhow!("Error: Cannot delete qdisc with handle of zero.")));
        tc.expect_run()
            .with(eq(args(&[
                "qdisc", "add", "dev", "eth2", "root", "mqprio", "num_tc", "8", "map", "3", "2",
                "1", "0", "hw", "1",
            ])))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));

        let backend = MqprioBackend::new(tc, "eth2".to_owned());
        backend.persist(&[3, 2, 1, 0]).await
    }

    #[tokio::test]
    async fn test_persist_add_failure() {
        let mut tc = MockTrafficControl::new();
        tc.expect_run()
            .with(eq(args(&["qdisc", "del", "dev", "eth2", "root"])))
            .returning(|_| Ok(vec![]));
        tc.expect_run()
            .withf(|args| args.get(1).is_some_and(|arg| arg == "add"))
            .returning(|_| Err(anyhow!("Failed to execute command")));

        let backend = MqprioBackend::new(tc, "eth2".to_owned());
        let error = backend.persist(&[0; 16]).await.unwrap_err();

        assert_eq!(
            error.downcast_ref::<MappingError>(),
            Some(&MappingError::MqprioUnsupported)
        );
        assert!(format!("{error:#}").contains("Failed to execute command"));
    }
}
