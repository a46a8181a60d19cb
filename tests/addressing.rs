mod common;

use common::chain;
use discobus_proto::{AddressingState, AddressingStatus};

#[test]
fn closed_loop_with_mixed_polarity() {
    let mut c = chain(4, true, &[1, 3]);
    let (status, reported) = c.run_addressing(100);

    assert_eq!(status, AddressingStatus::Done);
    assert_eq!(c.master.node_count(), 4);
    assert_eq!(reported, vec![Some(1), Some(2), Some(3), Some(4)]);
    for (n, slave) in c.slaves.iter().enumerate() {
        assert_eq!(*slave.address(), n as u8 + 1);
        assert_eq!(slave.addressing_state(), AddressingState::Confirmed);
        assert!(slave.daisy().is_resolved());
    }
}

#[test]
fn open_chain_ends_on_timeout() {
    let mut c = chain(3, false, &[0]);
    let (status, reported) = c.run_addressing(50);

    assert_eq!(status, AddressingStatus::Done);
    assert_eq!(c.master.node_count(), 3);
    assert_eq!(reported, vec![Some(1), Some(2), Some(3)]);
    assert_eq!(c.master.check_for_addresses(1_000_000), AddressingStatus::Done);
}

#[test]
fn no_nodes_is_an_error() {
    let mut c = chain(0, false, &[]);
    let (status, _) = c.run_addressing(20);
    assert_eq!(status, AddressingStatus::Error);
    assert_eq!(c.master.node_count(), 0);
}

#[test]
fn claim_recovers_from_corruption() {
    let mut c = chain(2, false, &[]);
    // node ids start after the master's
    c.bus.borrow_mut().corrupt[1] = 4;
    let (status, reported) = c.run_addressing(50);

    assert_eq!(status, AddressingStatus::Done);
    assert_eq!(c.master.node_count(), 2);
    assert_eq!(reported, vec![Some(1), Some(2)]);

    // four garbled claims, then the good one
    assert_eq!(
        c.bus.borrow().written_by(1),
        vec![0x81, 0x81, 0x81, 0x81, 0x01]
    );
}

#[test]
fn claim_gives_up_after_too_many_errors() {
    let mut c = chain(2, false, &[]);
    c.bus.borrow_mut().corrupt[1] = 5;
    let (status, reported) = c.run_addressing(50);

    assert_eq!(status, AddressingStatus::Error);
    assert_eq!(reported[0], Some(0));
    assert!(c.slaves[0].address().is_broadcast());
    assert_eq!(c.slaves[0].addressing_state(), AddressingState::Error);
    assert!(c.slaves[1].address().is_broadcast());
}

#[test]
fn claim_survives_garbled_echoes() {
    let mut c = chain(2, false, &[]);
    c.master.start_addressing(0, 50);
    // the echo of the first claim and both bytes of the next three retries
    c.bus.borrow_mut().corrupt[0] = 7;
    let (status, reported) = c.finish_addressing();

    assert_eq!(status, AddressingStatus::Done);
    assert_eq!(c.master.node_count(), 2);
    assert_eq!(reported, vec![Some(1), Some(2)]);
    for (n, slave) in c.slaves.iter().enumerate() {
        assert_eq!(*slave.address(), n as u8 + 1);
        assert_eq!(slave.addressing_state(), AddressingState::Confirmed);
    }
    // the first node kept claiming the same address
    assert_eq!(c.bus.borrow().written_by(1), vec![1; 5]);
}

#[test]
fn too_many_garbled_echoes_pass_the_token_on() {
    let mut c = chain(2, false, &[]);
    c.master.start_addressing(0, 50);
    // the echo and all four retries
    c.bus.borrow_mut().corrupt[0] = 9;
    let (status, _) = c.finish_addressing();

    assert_eq!(status, AddressingStatus::Error);
    assert_eq!(c.slaves[0].addressing_state(), AddressingState::Error);
    assert!(c.slaves[0].address().is_broadcast());
    assert!(c.slaves[1].daisy().is_prev_active());
    assert!(c.slaves[1].address().is_broadcast());
}

#[test]
fn readdress_after_reset() {
    let mut c = chain(3, true, &[2]);
    let (status, _) = c.run_addressing(100);
    assert_eq!(status, AddressingStatus::Done);

    c.master.reset_all_nodes();
    c.settle();
    for slave in &c.slaves {
        assert!(slave.address().is_broadcast());
    }
    // every node let go of its daisy line
    assert!(!c.master.daisy().is_prev_active());

    let (status, reported) = c.run_addressing(100);
    assert_eq!(status, AddressingStatus::Done);
    assert_eq!(reported, vec![Some(1), Some(2), Some(3)]);
}
