//! # Command Sequencer
//!
//! Picks the next request to send and decides whether an incoming frame
//! answers the outstanding one.
//!
//! Queries are an ordered list of `(predicate, request)` pairs. Each call to
//! [`CommandSequencer::next_request`] resumes after the last query sent and
//! skips queries whose channels are all unconfigured, wrapping around at the
//! end of the list.

use std::fmt;

use super::decoder::Rejection;
use super::protocol::*;

/// One entry in the round-robin
#[derive(Clone, Copy)]
pub struct Query {
    pub name: &'static str,
    pub request: Request,
    pub enabled: fn(&ChannelSet) -> bool,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("name", &self.name)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

fn mc_enabled(channels: &ChannelSet) -> bool {
    channels.moisture_content.is_some()
}

fn emc_enabled(channels: &ChannelSet) -> bool {
    channels.equilibrium_moisture_content.is_some()
}

fn temperature_enabled(channels: &ChannelSet) -> bool {
    channels.temperature.is_some()
}

fn control_values_enabled(channels: &ChannelSet) -> bool {
    channels.control.any()
}

fn any_enabled(channels: &ChannelSet) -> bool {
    !channels.is_empty()
}

const CATEGORY_QUERIES: [Query; 4] = [
    Query {
        name: "mc",
        request: Request::read(SELECTOR_MC),
        enabled: mc_enabled,
    },
    Query {
        name: "emc",
        request: Request::read(SELECTOR_EMC),
        enabled: emc_enabled,
    },
    Query {
        name: "temperature",
        request: Request::read(SELECTOR_TEMPERATURE),
        enabled: temperature_enabled,
    },
    Query {
        name: "control_values",
        request: Request::read(SELECTOR_CONTROL_VALUES),
        enabled: control_values_enabled,
    },
];

const SUMMARY_QUERIES: [Query; 1] = [Query {
    name: "summary",
    request: Request::summary(),
    enabled: any_enabled,
}];

#[derive(Debug, Clone)]
pub struct CommandSequencer {
    queries: &'static [Query],
    cursor: usize,
}

impl CommandSequencer {
    pub fn new(repertoire: Repertoire) -> Self {
        let queries: &'static [Query] = match repertoire {
            Repertoire::Categories => &CATEGORY_QUERIES,
            Repertoire::Summary => &SUMMARY_QUERIES,
        };
        Self { queries, cursor: 0 }
    }

    /// Queries that would currently be sent
    pub fn active_count(&self, channels: &ChannelSet) -> usize {
        self.queries.iter().filter(|q| (q.enabled)(channels)).count()
    }

    /// Interval between two commands, or `None` if nothing is ever sent
    ///
    /// The base interval is shared between active queries so each channel is
    /// refreshed roughly once per base interval.
    pub fn command_interval_ms(&self, base_interval_ms: u64, channels: &ChannelSet) -> Option<u64> {
        match self.active_count(channels) as u64 {
            0 => None,
            active => Some((base_interval_ms / active).max(DTOUCH_MIN_COMMAND_INTERVAL_MS)),
        }
    }

    /// Next enabled request, advancing the cursor past it
    pub fn next_request(&mut self, channels: &ChannelSet) -> Option<Request> {
        for _ in 0..self.queries.len() {
            let query = &self.queries[self.cursor];
            self.cursor = (self.cursor + 1) % self.queries.len();
            if (query.enabled)(channels) {
                return Some(query.request);
            }
        }
        None
    }
}

/// Attribute a frame arriving at `now_ms` to the pending command
pub fn correlate(pending: Option<&PendingCommand>, now_ms: u64) -> Result<Request, Rejection> {
    let pending = pending.ok_or(Rejection::NoPendingCommand)?;
    if !pending.accepts(now_ms) {
        return Err(Rejection::Unsolicited {
            age_ms: now_ms.saturating_sub(pending.sent_at_ms),
        });
    }
    Ok(pending.request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_categories() -> ChannelSet {
        ChannelSet {
            temperature: Some(ProbeGroup::default()),
            moisture_content: Some(ProbeGroup::default()),
            equilibrium_moisture_content: Some(ProbeGroup::default()),
            control: ControlChannels {
                heating: true,
                ..Default::default()
            },
        }
    }

    fn selectors(sequencer: &mut CommandSequencer, channels: &ChannelSet, n: usize) -> Vec<Option<u8>> {
        (0..n)
            .map(|_| sequencer.next_request(channels).and_then(|r| r.selector))
            .collect()
    }

    #[test]
    fn test_round_robin_all_enabled() {
        let mut sequencer = CommandSequencer::new(Repertoire::Categories);
        let channels = all_categories();

        assert_eq!(
            selectors(&mut sequencer, &channels, 5),
            vec![
                Some(SELECTOR_MC),
                Some(SELECTOR_EMC),
                Some(SELECTOR_TEMPERATURE),
                Some(SELECTOR_CONTROL_VALUES),
                Some(SELECTOR_MC),
            ]
        );
    }

    #[test]
    fn test_round_robin_skips_disabled() {
        let mut sequencer = CommandSequencer::new(Repertoire::Categories);
        let channels = ChannelSet {
            equilibrium_moisture_content: Some(ProbeGroup::default()),
            temperature: Some(ProbeGroup { num_probes: 2 }),
            ..Default::default()
        };

        assert_eq!(
            selectors(&mut sequencer, &channels, 4),
            vec![
                Some(SELECTOR_EMC),
                Some(SELECTOR_TEMPERATURE),
                Some(SELECTOR_EMC),
                Some(SELECTOR_TEMPERATURE),
            ]
        );
    }

    #[test]
    fn test_resumes_where_it_left_off() {
        let mut sequencer = CommandSequencer::new(Repertoire::Categories);
        let mut channels = all_categories();

        assert_eq!(sequencer.next_request(&channels), Some(Request::read(SELECTOR_MC)));

        // EMC disappears; the next pick continues after MC
        channels.equilibrium_moisture_content = None;
        assert_eq!(sequencer.next_request(&channels), Some(Request::read(SELECTOR_TEMPERATURE)));
    }

    #[test]
    fn test_nothing_enabled() {
        let mut sequencer = CommandSequencer::new(Repertoire::Categories);
        let channels = ChannelSet::default();

        assert_eq!(sequencer.next_request(&channels), None);
        assert_eq!(sequencer.command_interval_ms(5_000, &channels), None);
    }

    #[test]
    fn test_summary_sends_while_anything_enabled() {
        let mut sequencer = CommandSequencer::new(Repertoire::Summary);
        assert_eq!(sequencer.next_request(&ChannelSet::default()), None);

        let channels = ChannelSet {
            control: ControlChannels {
                fans: true,
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(sequencer.next_request(&channels), Some(Request::summary()));
        assert_eq!(sequencer.next_request(&channels), Some(Request::summary()));
        assert_eq!(sequencer.command_interval_ms(200, &channels), Some(500));
        assert_eq!(sequencer.command_interval_ms(5_000, &channels), Some(5_000));
    }

    #[test]
    fn test_interval_shared_between_queries() {
        let sequencer = CommandSequencer::new(Repertoire::Categories);
        let channels = all_categories();

        assert_eq!(sequencer.active_count(&channels), 4);
        assert_eq!(sequencer.command_interval_ms(8_000, &channels), Some(2_000));
        assert_eq!(sequencer.command_interval_ms(1_000, &channels), Some(500));
    }

    #[test]
    fn test_correlate() {
        let pending = PendingCommand {
            request: Request::read(SELECTOR_EMC),
            sent_at_ms: 10_000,
        };

        assert_eq!(correlate(Some(&pending), 10_499), Ok(pending.request));
        assert_eq!(
            correlate(Some(&pending), 10_501),
            Err(Rejection::Unsolicited { age_ms: 501 })
        );
        assert_eq!(correlate(None, 10_000), Err(Rejection::NoPendingCommand));
    }
}
