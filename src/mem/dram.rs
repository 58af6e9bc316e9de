use log::debug;
use serde::Deserialize;

use crate::arch::{lg2, Address, DynamicExtent, LOG2_BLOCK_SIZE};
use crate::base::behavior::{Cycle, Operable, OperableBase};
use crate::base::channel::ChannelRef;
use crate::base::packet::Packet;
use crate::sim::config::Config;
use crate::sim::stats::DramStats;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DramConfig {
    pub channels: usize,
    pub ranks: usize,
    pub banks: usize,
    pub columns: usize,
    pub t_rp: Cycle,
    pub t_rcd: Cycle,
    pub t_cas: Cycle,
    /// Controller cycles per core cycle.
    pub clock_scale: u64,
    pub rq_size: usize,
    pub wq_size: usize,
    pub wq_high_watermark: f64,
    pub wq_low_watermark: f64,
}

impl Config for DramConfig {}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            ranks: 1,
            banks: 8,
            columns: 128,
            t_rp: 11,
            t_rcd: 11,
            t_cas: 11,
            clock_scale: 1,
            rq_size: 48,
            wq_size: 48,
            wq_high_watermark: 0.875,
            wq_low_watermark: 0.5,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Bank {
    open_row: Option<u64>,
    busy_until: Cycle,
    /// `(is_write, queue_slot)` of the request occupying the bank.
    active: Option<(bool, usize)>,
}

/// One DRAM channel: slotted read/write queues plus per-bank row state.
#[derive(Debug)]
pub struct DramChannel {
    pub rq: Vec<Option<Packet>>,
    pub wq: Vec<Option<Packet>>,
    banks: Vec<Bank>,
    write_mode: bool,
}

impl DramChannel {
    fn new(cfg: &DramConfig) -> Self {
        Self {
            rq: (0..cfg.rq_size).map(|_| None).collect(),
            wq: (0..cfg.wq_size).map(|_| None).collect(),
            banks: vec![Bank::default(); cfg.ranks * cfg.banks],
            write_mode: false,
        }
    }

    fn wq_occupancy(&self) -> usize {
        self.wq.iter().filter(|slot| slot.is_some()).count()
    }

    fn rq_empty(&self) -> bool {
        self.rq.iter().all(|slot| slot.is_none())
    }
}

/// FR-FCFS memory controller.
///
/// Selection is oldest-arrival among requests whose bank is idle; the open
/// row rewards a row hit with a CAS-only latency, so row hits free their
/// bank sooner and are naturally served ahead. Rows stay open across
/// completions.
pub struct MemoryController {
    pub base: OperableBase,
    cfg: DramConfig,
    channel: ChannelRef,
    pub channels: Vec<DramChannel>,
    pub stats: DramStats,
}

impl MemoryController {
    pub fn new(cfg: DramConfig) -> Self {
        assert!(cfg.channels.is_power_of_two(), "channel count must be a power of two");
        assert!(cfg.ranks.is_power_of_two(), "rank count must be a power of two");
        assert!(cfg.banks.is_power_of_two(), "bank count must be a power of two");
        assert!(cfg.columns.is_power_of_two(), "column count must be a power of two");
        let channel = ChannelRef::new(cfg.rq_size, cfg.wq_size, cfg.rq_size);
        let channels = (0..cfg.channels).map(|_| DramChannel::new(&cfg)).collect();
        Self {
            base: OperableBase::with_clock_scale(cfg.clock_scale),
            channel,
            channels,
            stats: DramStats::default(),
            cfg,
        }
    }

    pub fn channel(&self) -> ChannelRef {
        self.channel.clone()
    }

    // Address layout, low bits first:
    // block offset | channel | bank | column | rank | row
    fn field(&self, addr: Address, lo: u32, width: u32) -> u64 {
        if width == 0 {
            return 0;
        }
        addr.slice(DynamicExtent::new(lo + width, lo)).raw()
    }

    fn channel_of(&self, addr: Address) -> usize {
        self.field(addr, LOG2_BLOCK_SIZE, lg2(self.cfg.channels as u64)) as usize
    }

    fn bank_of(&self, addr: Address) -> usize {
        let lo = LOG2_BLOCK_SIZE + lg2(self.cfg.channels as u64);
        self.field(addr, lo, lg2(self.cfg.banks as u64)) as usize
    }

    fn rank_of(&self, addr: Address) -> usize {
        let lo = LOG2_BLOCK_SIZE
            + lg2(self.cfg.channels as u64)
            + lg2(self.cfg.banks as u64)
            + lg2(self.cfg.columns as u64);
        self.field(addr, lo, lg2(self.cfg.ranks as u64)) as usize
    }

    fn row_of(&self, addr: Address) -> u64 {
        let lo = LOG2_BLOCK_SIZE
            + lg2(self.cfg.channels as u64)
            + lg2(self.cfg.banks as u64)
            + lg2(self.cfg.columns as u64)
            + lg2(self.cfg.ranks as u64);
        addr.slice_upper(lo).raw()
    }

    fn bank_index(&self, addr: Address) -> usize {
        self.rank_of(addr) * self.cfg.banks + self.bank_of(addr)
    }

    fn drain_input(&mut self) {
        let now = self.base.cycle;
        let channel = self.channel.clone();
        channel.with(|ch| {
            while let Some(front) = ch.rq.front() {
                let chan = self.channel_of(front.address);
                let Some(slot) = self.channels[chan].rq.iter().position(Option::is_none) else {
                    break;
                };
                let mut packet = ch.rq.pop().expect("front checked");
                packet.scheduled = false;
                packet.event_cycle = now;
                self.channels[chan].rq[slot] = Some(packet);
            }
            while let Some(front) = ch.wq.front() {
                let chan = self.channel_of(front.address);
                let Some(slot) = self.channels[chan].wq.iter().position(Option::is_none) else {
                    break;
                };
                let mut packet = ch.wq.pop().expect("front checked");
                packet.scheduled = false;
                packet.event_cycle = now;
                self.channels[chan].wq[slot] = Some(packet);
            }
        });
    }

    fn complete_requests(&mut self, chan: usize) {
        let now = self.base.cycle;
        for bank in 0..self.channels[chan].banks.len() {
            let Some((is_write, slot)) = self.channels[chan].banks[bank].active else {
                continue;
            };
            if self.channels[chan].banks[bank].busy_until > now {
                continue;
            }
            self.channels[chan].banks[bank].active = None;
            let queue = if is_write {
                &mut self.channels[chan].wq
            } else {
                &mut self.channels[chan].rq
            };
            let packet = queue[slot].take().expect("bank held a live slot");
            if is_write {
                self.stats.writes += 1;
            } else {
                self.stats.reads += 1;
                let mut response = packet.clone();
                response.event_cycle = now;
                for target in &packet.to_return {
                    target.push(response.clone());
                }
            }
        }
    }

    fn update_write_mode(&mut self, chan: usize) {
        let channel = &mut self.channels[chan];
        let occupancy = channel.wq_occupancy();
        let high = (self.cfg.wq_high_watermark * self.cfg.wq_size as f64) as usize;
        let low = (self.cfg.wq_low_watermark * self.cfg.wq_size as f64) as usize;
        if channel.write_mode {
            if occupancy <= low {
                channel.write_mode = false;
            }
        } else if occupancy >= high.max(1) || (channel.rq_empty() && occupancy > 0) {
            channel.write_mode = true;
            self.stats.write_drains += 1;
        }
    }

    /// Schedule at most one request on the channel: the oldest arrived,
    /// unscheduled request whose bank is free.
    fn schedule_packet(&mut self, chan: usize) {
        let now = self.base.cycle;
        let write_mode = self.channels[chan].write_mode;

        let mut best: Option<(Cycle, usize)> = None;
        {
            let channel = &self.channels[chan];
            let queue = if write_mode { &channel.wq } else { &channel.rq };
            for (index, slot) in queue.iter().enumerate() {
                let Some(packet) = slot else { continue };
                if packet.scheduled || packet.event_cycle > now {
                    continue;
                }
                let bank = &channel.banks[self.bank_index(packet.address)];
                if bank.active.is_some() || bank.busy_until > now {
                    continue;
                }
                if best.map(|(cycle, _)| packet.event_cycle < cycle).unwrap_or(true) {
                    best = Some((packet.event_cycle, index));
                }
            }
        }

        let Some((_, index)) = best else { return };
        let address = {
            let channel = &self.channels[chan];
            let queue = if write_mode { &channel.wq } else { &channel.rq };
            queue[index].as_ref().expect("candidate just found").address
        };
        let row = self.row_of(address);
        let bank_index = self.bank_index(address);

        let bank = &mut self.channels[chan].banks[bank_index];
        let row_hit = bank.open_row == Some(row);
        // Warmup fast-forwards the device: requests are serviced at unit
        // latency and row statistics are not recorded.
        let latency = if self.base.warmup {
            1
        } else if row_hit {
            self.stats.row_hits += 1;
            self.cfg.t_cas
        } else {
            self.stats.row_misses += 1;
            self.cfg.t_rp + self.cfg.t_rcd + self.cfg.t_cas
        };
        bank.open_row = Some(row);
        bank.busy_until = now + latency;
        bank.active = Some((write_mode, index));

        let queue = if write_mode {
            &mut self.channels[chan].wq
        } else {
            &mut self.channels[chan].rq
        };
        let packet = queue[index].as_mut().expect("candidate just found");
        packet.scheduled = true;
        packet.event_cycle = now + latency;
        debug!(
            "dram: chan {chan} bank {bank_index} row {row:#x} {} latency {latency}",
            if row_hit { "hit" } else { "miss" }
        );
    }
}

impl Operable for MemoryController {
    fn base(&mut self) -> &mut OperableBase {
        &mut self.base
    }

    fn base_ref(&self) -> &OperableBase {
        &self.base
    }

    fn operate(&mut self) {
        self.drain_input();
        for chan in 0..self.channels.len() {
            self.complete_requests(chan);
            self.update_write_mode(chan);
            self.schedule_packet(chan);
        }
    }
}
