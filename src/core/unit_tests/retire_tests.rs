use crate::base::behavior::Operable;
use crate::base::channel::ChannelRef;
use crate::core::cpu::{CoreConfig, CorePorts, OooCpu};
use crate::core::instr::{OooInstr, Progress};

fn cpu_with_retire_width(retire_width: usize) -> OooCpu {
    let cfg = CoreConfig {
        retire_width,
        ..CoreConfig::default()
    };
    let ports = CorePorts {
        l1i: ChannelRef::new(8, 8, 8),
        l1d: ChannelRef::new(8, 8, 8),
        ptw: ChannelRef::new(8, 8, 8),
        l1i_hints: crate::modules::prefetch::branch_hint_queue(),
    };
    OooCpu::new(0, cfg, ports)
}

fn completed_instr(instr_id: u64) -> OooInstr {
    OooInstr {
        instr_id,
        executed: Progress::Completed,
        scheduled: true,
        decoded: true,
        ..OooInstr::default()
    }
}

#[test]
fn an_empty_rob_retires_nothing() {
    let mut uut = cpu_with_retire_width(1);
    uut.operate_one();
    assert_eq!(uut.rob.len(), 0);
    assert_eq!(uut.num_retired, 0);
}

#[test]
fn an_unexecuted_instruction_stays_in_the_rob() {
    let mut uut = cpu_with_retire_width(1);
    let mut instr = completed_instr(0);
    instr.executed = Progress::NotStarted;
    uut.rob.push_back(instr);

    uut.operate_one();
    assert_eq!(uut.rob.len(), 1);
    assert_eq!(uut.num_retired, 0);
}

#[test]
fn a_completed_instruction_retires() {
    let mut uut = cpu_with_retire_width(1);
    uut.rob.push_back(completed_instr(0));

    uut.operate_one();
    assert_eq!(uut.rob.len(), 0);
    assert_eq!(uut.num_retired, 1);
}

#[test]
fn retirement_is_in_order() {
    let mut uut = cpu_with_retire_width(2);
    let mut head = completed_instr(0);
    head.executed = Progress::NotStarted;
    uut.rob.push_back(head);
    uut.rob.push_back(completed_instr(1));

    uut.operate_one();
    assert_eq!(uut.rob.len(), 2, "a completed entry cannot pass the head");
    assert_eq!(uut.num_retired, 0);
}

#[test]
fn both_instructions_retire_together() {
    let mut uut = cpu_with_retire_width(2);
    uut.rob.push_back(completed_instr(0));
    uut.rob.push_back(completed_instr(1));

    uut.operate_one();
    assert_eq!(uut.rob.len(), 0);
    assert_eq!(uut.num_retired, 2);
}

#[test]
fn retirement_is_bandwidth_limited() {
    let mut uut = cpu_with_retire_width(1);
    uut.rob.push_back(completed_instr(0));
    uut.rob.push_back(completed_instr(1));

    uut.operate_one();
    assert_eq!(uut.rob.len(), 1);
    assert_eq!(uut.num_retired, 1);

    uut.operate_one();
    assert_eq!(uut.rob.len(), 0);
    assert_eq!(uut.num_retired, 2);
}

#[test]
fn the_whole_window_drains_at_retire_width_per_cycle() {
    let mut uut = cpu_with_retire_width(2);
    for id in 0..6 {
        uut.rob.push_back(completed_instr(id));
    }
    while uut.num_retired < 6 {
        let before = uut.num_retired;
        uut.operate_one();
        assert_eq!(uut.num_retired, before + 2, "retire width is the ceiling");
    }
    assert_eq!(uut.rob.len(), 0);
}
