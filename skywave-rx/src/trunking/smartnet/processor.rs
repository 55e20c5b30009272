//! SmartNet protocol processor.
//!
//! Consumes decoded outbound signaling words in order and reassembles the
//! multi-word transactions that matter for receive: group call grants,
//! control-channel broadcasts, and digital (Astro) grants. Everything else
//! is counted and forgotten.
//!
//! Words arrive one per frame but a transaction spans two or three of them,
//! so the processor keeps a small FIFO and only dispatches while at least
//! three words are buffered. Words that did not complete a pattern are
//! pushed back in their original order to wait for more input.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use skywave_common::freq::mhz;
use skywave_common::metrics::{MetricsSink, Point};
use skywave_common::Result;

use crate::trunking::{ChannelUpdate, OswPacket};

/// Voice channel number to frequency, 800 MHz rebanded plan.
///
/// Commands outside every range are not channel assignments.
pub fn channel_frequency(cmd: u16) -> Option<u64> {
    let c = cmd as i64;
    let freq = if c < 0x1B8 {
        851_012_500 + 25_000 * c
    } else if c <= 0x22F {
        851_025_000 + 25_000 * (c - 0x1B8)
    } else if c <= 0x2F7 {
        866_000_000 + 25_000 * (c - 0x2D0)
    } else if (0x32F..=0x33F).contains(&c) {
        867_000_000 + 25_000 * (c - 0x32F)
    } else if c == 0x3BE {
        868_975_000
    } else if (0x3C1..=0x3FE).contains(&c) {
        867_425_000 + 25_000 * (c - 0x3C1)
    } else {
        return None;
    };
    Some(freq as u64)
}

/// A word plus what its command says about channel assignment.
#[derive(Debug, Clone, Copy)]
struct ParsedWord {
    osw: OswPacket,
    frequency: Option<u64>,
}

impl ParsedWord {
    fn new(osw: OswPacket) -> Self {
        Self {
            osw,
            frequency: channel_frequency(osw.command),
        }
    }

    fn is_channel(&self) -> bool {
        self.frequency.is_some()
    }
}

pub struct SmartnetProcessor {
    system_id: u32,
    buffer: VecDeque<ParsedWord>,
    packets: mpsc::Receiver<OswPacket>,
    updates: mpsc::Sender<ChannelUpdate>,
    metrics: Arc<dyn MetricsSink>,
}

impl SmartnetProcessor {
    pub fn new(
        system_id: u32,
        packets: mpsc::Receiver<OswPacket>,
        updates: mpsc::Sender<ChannelUpdate>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            system_id,
            buffer: VecDeque::new(),
            packets,
            updates,
            metrics,
        }
    }

    /// Run until cancelled or the packet channel closes.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                packet = self.packets.recv() => {
                    let Some(packet) = packet else { return Ok(()) };

                    let mut point = Point::new("smartnet.packet.processed")
                        .tag("type", "smartnet");
                    let updates = self.ingest(packet, &mut point);
                    for update in updates {
                        tokio::select! {
                            _ = token.cancelled() => return Ok(()),
                            _ = self.updates.send(update) => {}
                        }
                    }
                    if !point.fields.is_empty() {
                        self.metrics.record(point);
                    }
                }
            }
        }
    }

    /// Queue one word and dispatch whatever transactions are now complete.
    ///
    /// Dispatch is keyed on the most recently queued word, so arrivals go to
    /// the head of the buffer: `osw2` is the newest word, `osw1` the one
    /// before it, `osw0` the one before that.
    fn ingest(&mut self, packet: OswPacket, metrics: &mut Point) -> Vec<ChannelUpdate> {
        self.buffer.push_front(ParsedWord::new(packet));
        self.dispatch(metrics)
    }

    fn dispatch(&mut self, metrics: &mut Point) -> Vec<ChannelUpdate> {
        let mut updates = Vec::new();

        while self.buffer.len() >= 3 {
            let osw2 = self.buffer.pop_front().expect("len checked");

            if osw2.osw.command == 0x308 || osw2.osw.command == 0x309 {
                let osw1 = self.buffer.pop_front().expect("len checked");

                if osw1.is_channel()
                    && osw1.osw.group
                    && osw1.osw.address != 0
                    && osw2.osw.address != 0
                {
                    // Group call grant: osw2 carries the source, osw1 the
                    // destination talk group and voice channel.
                    let update = ChannelUpdate {
                        tgid: osw1.osw.address & 0xFFF0,
                        source_id: osw2.osw.address,
                        frequency: osw1.frequency.expect("is_channel"),
                        system_id: self.system_id,
                    };
                    debug!(
                        source_id = update.source_id,
                        tgid = update.tgid,
                        freq = %mhz(update.frequency),
                        system = "smartnet",
                        "group grant"
                    );
                    metrics.increment("group_update");
                    updates.push(update);
                } else if osw1.is_channel()
                    && !osw1.osw.group
                    && osw1.osw.address & 0xFF00 == 0x1F00
                {
                    let frequency = osw1.frequency.expect("is_channel");
                    debug!(
                        system_id = osw2.osw.address,
                        control_channel = %mhz(frequency),
                        system = "smartnet",
                        "system id broadcast"
                    );
                    metrics.increment("sys_id_broadcast");
                    updates.push(ChannelUpdate {
                        tgid: 0,
                        source_id: 0,
                        frequency,
                        system_id: self.system_id,
                    });
                } else if osw1.osw.command == 0x30B {
                    let osw0 = self.buffer.pop_front().expect("len checked");

                    if osw0.is_channel()
                        && osw0.osw.address & 0xFF00 == 0x1F00
                        && osw1.osw.address & 0xFC00 == 0x2800
                        && osw1.osw.address & 0x3FF == osw0.osw.command
                    {
                        let frequency = osw0.frequency.expect("is_channel");
                        debug!(
                            system_id = osw2.osw.address,
                            control_channel = %mhz(frequency),
                            system = "smartnet",
                            "system id broadcast"
                        );
                        metrics.increment("sys_id_broadcast");
                        updates.push(ChannelUpdate {
                            tgid: 0,
                            source_id: 0,
                            frequency,
                            system_id: self.system_id,
                        });
                    } else {
                        self.buffer.push_front(osw0);
                        if osw1.osw.address & 0xFC00 == 0x2800 {
                            if let Some(frequency) = channel_frequency(osw1.osw.address & 0x3FF) {
                                debug!(
                                    system_id = osw2.osw.address,
                                    control_channel = %mhz(frequency),
                                    system = "smartnet",
                                    "system id broadcast"
                                );
                                metrics.increment("sys_id_broadcast");
                                updates.push(ChannelUpdate {
                                    tgid: 0,
                                    source_id: 0,
                                    frequency,
                                    system_id: self.system_id,
                                });
                            }
                        }
                    }
                } else if osw1.osw.command == 0x310 {
                    // Affiliation: a subscriber registering with a talk
                    // group. Counted only; no channel state changes.
                    debug!(
                        source_id = osw2.osw.address,
                        tgid = osw1.osw.address & 0xFFF0,
                        system = "smartnet",
                        "affiliation broadcast"
                    );
                    metrics.increment("affiliation_broadcast");
                } else if osw1.osw.command == 0x320 {
                    let osw0 = self.buffer.pop_front().expect("len checked");
                    if osw0.osw.command == 0x30B {
                        if osw0.osw.address & 0xFC00 == 0x6000 {
                            // Cell-site broadcast. Counted only.
                            debug!(
                                system_id = osw2.osw.address,
                                cell_id = (osw1.osw.address >> 10) & 0x3F,
                                band = (osw1.osw.address >> 7) & 0x7,
                                features = osw1.osw.address & 0x3F,
                                system = "smartnet",
                                "cellsite broadcast"
                            );
                            metrics.increment("cellsite_broadcast");
                        }
                    } else {
                        self.buffer.push_front(osw0);
                    }
                } else {
                    self.buffer.push_front(osw1);
                }
            } else if osw2.osw.command == 0x321 {
                let osw1 = self.buffer.pop_front().expect("len checked");
                if osw1.is_channel() && osw1.osw.group && osw1.osw.address > 0 {
                    // Astro (digital) grant
                    let update = ChannelUpdate {
                        tgid: osw1.osw.address & 0xFFF0,
                        source_id: osw2.osw.address,
                        frequency: osw1.frequency.expect("is_channel"),
                        system_id: self.system_id,
                    };
                    debug!(
                        source_id = update.source_id,
                        tgid = update.tgid,
                        frequency = %mhz(update.frequency),
                        system = "smartnet",
                        "astro grant"
                    );
                    metrics.increment("astro_grant");
                    updates.push(update);
                } else {
                    self.buffer.push_front(osw1);
                }
            } else if osw2.is_channel() && osw2.osw.group {
                // Single-word group update: a talk group already in
                // conversation moved or refreshed its voice channel.
                let update = ChannelUpdate {
                    tgid: osw2.osw.address & 0xFFF0,
                    source_id: 0,
                    frequency: osw2.frequency.expect("is_channel"),
                    system_id: self.system_id,
                };
                debug!(
                    tgid = update.tgid,
                    frequency = %mhz(update.frequency),
                    system = "smartnet",
                    "group update"
                );
                metrics.increment("group_update");
                updates.push(update);
            } else if osw2.is_channel() && !osw2.osw.group && osw2.osw.address & 0xFF00 == 0x1F00 {
                let frequency = osw2.frequency.expect("is_channel");
                debug!(
                    frequency = %mhz(frequency),
                    system = "smartnet",
                    "control channel broadcast"
                );
                metrics.increment("control_channel_broadcast");
                updates.push(ChannelUpdate {
                    tgid: 0,
                    source_id: 0,
                    frequency,
                    system_id: self.system_id,
                });
            } else {
                metrics.increment("unknown");
            }
        }

        updates
    }
}
