//! Timed experiment scenarios.
//!
//! A scenario is a text file with one command per line:
//!
//! ```text
//! # comment
//! @0:1 introduce_peers_dht
//! @0:2 store aabbccddeeff00112233445566778899aabbccdd hello {1}
//! @0:3.5 find aabbccddeeff00112233445566778899aabbccdd {2-4,6}
//! @1:0 do_dht_announce
//! ```
//!
//! The time is `[[hours:]minutes:]seconds` after the experiment start. An
//! optional trailing `{...}` restricts the line to the listed peer ids.

use std::{ops::RangeInclusive, path::Path, str::FromStr, time::Duration};

use futures::future::join_all;
use tracing::{error, info};

use crate::{
    commands::Commands,
    common::PeerId,
    module::DhtModule,
    overlay::Overlay,
    Error, Result,
};

/// Latest offset a scenario line may be scheduled at.
pub const MAX_OFFSET: Duration = Duration::from_secs(365 * 24 * 3600);

/// Set of peer ids a scenario line applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFilter(Vec<RangeInclusive<PeerId>>);

impl PeerFilter {
    pub fn matches(&self, id: PeerId) -> bool {
        self.0.iter().any(|range| range.contains(&id))
    }
}

impl FromStr for PeerFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let inner = s
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| format!("invalid peer filter {s:?}"))?;

        let parse_id = |id: &str| {
            id.trim()
                .parse::<PeerId>()
                .map_err(|_| format!("invalid peer id {id:?}"))
        };

        let ranges = inner
            .split(',')
            .map(|item| match item.split_once('-') {
                Some((first, last)) => {
                    let (first, last) = (parse_id(first)?, parse_id(last)?);
                    if first > last {
                        return Err(format!("empty peer range {item:?}"));
                    }
                    Ok(first..=last)
                }
                None => parse_id(item).map(|id| id..=id),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(PeerFilter(ranges))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioLine {
    /// 1-based line number in the scenario text.
    pub line: usize,
    /// Offset from the experiment start.
    pub at: Duration,
    pub command: String,
    pub args: Vec<String>,
    pub peers: Option<PeerFilter>,
}

impl ScenarioLine {
    pub fn applies_to(&self, id: PeerId) -> bool {
        self.peers.as_ref().map_or(true, |filter| filter.matches(id))
    }

    fn parse(line: usize, text: &str) -> Result<Self> {
        let invalid = |reason: String| Error::Scenario { line, reason };

        let mut tokens: Vec<&str> = text.split_whitespace().collect();

        let peers = match tokens.last() {
            Some(token) if token.starts_with('{') => {
                let filter = token.parse::<PeerFilter>().map_err(invalid)?;
                tokens.pop();
                Some(filter)
            }
            _ => None,
        };

        let mut tokens = tokens.into_iter();

        let at = tokens
            .next()
            .and_then(|token| token.strip_prefix('@'))
            .ok_or_else(|| invalid("expected @time".to_string()))?;
        let at = parse_offset(at).ok_or_else(|| invalid(format!("invalid time {at:?}")))?;
        if at > MAX_OFFSET {
            return Err(invalid(format!("time {at:?} is beyond {MAX_OFFSET:?}")));
        }

        let command = tokens
            .next()
            .ok_or_else(|| invalid("missing command".to_string()))?
            .to_string();

        Ok(ScenarioLine {
            line,
            at,
            command,
            args: tokens.map(str::to_string).collect(),
            peers,
        })
    }
}

/// Parse `[[hours:]minutes:]seconds`, seconds may be fractional.
fn parse_offset(text: &str) -> Option<Duration> {
    let mut parts = text.rsplit(':');

    let seconds: f64 = parts.next()?.parse().ok()?;
    let mut total = Duration::try_from_secs_f64(seconds).ok()?;

    for unit in [60, 3600] {
        if let Some(part) = parts.next() {
            let count: u64 = part.parse().ok()?;
            total += Duration::from_secs(count.checked_mul(unit)?);
        }
    }

    match parts.next() {
        Some(_) => None,
        None => Some(total),
    }
}

/// Outcome of [Scenario::run].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub executed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scenario {
    lines: Vec<ScenarioLine>,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::File {
            path: path.to_path_buf(),
            source,
        })?;

        content.parse()
    }

    pub fn lines(&self) -> &[ScenarioLine] {
        &self.lines
    }

    /// Lines applying to peer `id`, in file order.
    pub fn for_peer(&self, id: PeerId) -> impl Iterator<Item = &ScenarioLine> {
        self.lines.iter().filter(move |line| line.applies_to(id))
    }

    /// Check that every command of the scenario is known to `commands`.
    pub fn validate<O: Overlay + 'static>(&self, commands: &Commands<O>) -> Result<()> {
        match self.lines.iter().find(|line| !commands.contains(&line.command)) {
            Some(line) => Err(Error::Scenario {
                line: line.line,
                reason: format!("unknown command {:?}", line.command),
            }),
            None => Ok(()),
        }
    }

    /// Run this node's part of the scenario.
    ///
    /// Every line fires at its offset from the module's experiment clock. Lines
    /// run concurrently on the current task; a failing command is logged and
    /// counted without stopping the others.
    pub async fn run<O: Overlay + 'static>(
        &self,
        module: &DhtModule<O>,
        commands: &Commands<O>,
    ) -> Result<RunReport> {
        let (Some(clock), Some(my_id)) = (module.clock(), module.my_id()) else {
            return Err(Error::NotReady(module.state()));
        };

        self.validate(commands)?;

        let runs = self.for_peer(my_id).map(move |line| async move {
            let Some(deadline) = clock.started_at().checked_add(line.at) else {
                let error = Error::Scenario {
                    line: line.line,
                    reason: format!("time {:?} is out of range", line.at),
                };
                error!(line = line.line, command = %line.command, %error, "Command failed");
                return false;
            };
            tokio::time::sleep_until(deadline).await;

            match commands.dispatch(module, &line.command, &line.args).await {
                Ok(()) => true,
                Err(error) => {
                    error!(line = line.line, command = %line.command, %error, "Command failed");
                    false
                }
            }
        });

        let results = join_all(runs).await;

        let report = RunReport {
            executed: results.len(),
            failed: results.iter().filter(|ok| !**ok).count(),
        };

        info!(
            my_id,
            executed = report.executed,
            failed = report.failed,
            "Scenario finished"
        );

        Ok(report)
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lines = s
            .lines()
            .enumerate()
            .map(|(index, text)| (index + 1, text.trim()))
            .filter(|(_, text)| !text.is_empty() && !text.starts_with('#'))
            .map(|(line, text)| ScenarioLine::parse(line, text))
            .collect::<Result<Vec<_>>>()?;

        Ok(Scenario { lines })
    }
}
