use crate::arch::{lg2, Address, LOG2_BLOCK_SIZE};
use crate::base::behavior::Operable;
use crate::base::packet::{AccessType, Packet};
use crate::mem::dram::{DramConfig, MemoryController};

fn test_config() -> DramConfig {
    DramConfig {
        channels: 1,
        ranks: 1,
        banks: 8,
        columns: 128,
        t_rp: 10,
        t_rcd: 10,
        t_cas: 20,
        rq_size: 32,
        wq_size: 8,
        ..DramConfig::default()
    }
}

fn request_address(cfg: &DramConfig, bank: u64, column: u64, row: u64) -> Address {
    let bank_lo = LOG2_BLOCK_SIZE + lg2(cfg.channels as u64);
    let column_lo = bank_lo + lg2(cfg.banks as u64);
    let row_lo = column_lo + lg2(cfg.columns as u64) + lg2(cfg.ranks as u64);
    Address::new((row << row_lo) | (column << column_lo) | (bank << bank_lo))
}

/// A series of reads arrives at the memory controller and is reordered
/// according to FR-FCFS: bank accesses are long enough that requests reach
/// six other banks before the first bank finishes.
#[test]
fn reads_are_scheduled_fr_fcfs() {
    let cfg = test_config();
    let mut uut = MemoryController::new(cfg.clone());
    uut.base.warmup = false;

    let row_access: Vec<u64> = (0..21).map(|i| i % 2).collect();
    let col_access: Vec<u64> = (1..=21).collect();
    let bak_access: Vec<u64> = vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 5, 6, 6, 6];
    let arriv_time: Vec<u64> = vec![
        3, 4, 2, 0, 1, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 20, 18, 19,
    ];
    let expected_order: Vec<usize> = vec![
        3, 2, 6, 9, 12, 15, 19, 4, 0, 7, 10, 13, 16, 20, 1, 5, 8, 11, 14, 17, 18,
    ];

    for i in 0..row_access.len() {
        let packet = Packet {
            address: request_address(&cfg, bak_access[i], col_access[i], row_access[i]),
            kind: AccessType::Load,
            instr_id: i as u64,
            event_cycle: arriv_time[i],
            ..Packet::default()
        };
        uut.channels[0].rq[i] = Some(packet);
    }

    let total = row_access.len();
    let mut last_scheduled = vec![false; total];
    let mut observed_order = Vec::new();
    let mut guard = 0;
    while observed_order.len() < total {
        uut.operate_one();
        let next_scheduled: Vec<bool> = uut.channels[0]
            .rq
            .iter()
            .take(total)
            .map(|slot| slot.as_ref().map(|pkt| pkt.scheduled).unwrap_or(true))
            .collect();
        for (index, (&before, &after)) in
            last_scheduled.iter().zip(next_scheduled.iter()).enumerate()
        {
            if !before && after {
                observed_order.push(index);
            }
        }
        last_scheduled = next_scheduled;
        guard += 1;
        assert!(guard < 10_000, "scheduler made no progress");
    }

    assert_eq!(observed_order, expected_order);
}

#[test]
fn completed_reads_are_returned_and_counted() {
    let cfg = test_config();
    let mut uut = MemoryController::new(cfg.clone());
    uut.base.warmup = false;
    uut.channels[0].rq[0] = Some(Packet {
        address: request_address(&cfg, 0, 1, 0),
        kind: AccessType::Load,
        ..Packet::default()
    });
    for _ in 0..200 {
        uut.operate_one();
    }
    assert_eq!(uut.stats.reads, 1);
    assert_eq!(uut.stats.row_misses, 1);
    assert!(uut.channels[0].rq[0].is_none());
}

#[test]
fn writes_drain_when_the_read_queue_is_empty() {
    let cfg = test_config();
    let mut uut = MemoryController::new(cfg.clone());
    uut.base.warmup = false;
    for i in 0..2u64 {
        uut.channels[0].wq[i as usize] = Some(Packet {
            address: request_address(&cfg, i, 1, 0),
            kind: AccessType::Write,
            ..Packet::default()
        });
    }
    for _ in 0..500 {
        uut.operate_one();
    }
    assert_eq!(uut.stats.writes, 2);
    assert!(uut.stats.write_drains >= 1);
}

#[test]
fn row_hits_reuse_the_open_row() {
    let cfg = test_config();
    let mut uut = MemoryController::new(cfg.clone());
    uut.base.warmup = false;
    // Same bank, same row, different columns: second access is a row hit.
    uut.channels[0].rq[0] = Some(Packet {
        address: request_address(&cfg, 0, 1, 7),
        kind: AccessType::Load,
        ..Packet::default()
    });
    uut.channels[0].rq[1] = Some(Packet {
        address: request_address(&cfg, 0, 2, 7),
        kind: AccessType::Load,
        event_cycle: 1,
        ..Packet::default()
    });
    for _ in 0..500 {
        uut.operate_one();
    }
    assert_eq!(uut.stats.reads, 2);
    assert_eq!(uut.stats.row_misses, 1);
    assert_eq!(uut.stats.row_hits, 1);
}
