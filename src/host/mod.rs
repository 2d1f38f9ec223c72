//! A reference [`HostBridge`] built on `parking_lot`'s mutex and condvar,
//! following the "standardize on the mutex variant" recommendation in
//! `SPEC_FULL.md` §9.
//!
//! Embedders with their own threading model implement [`HostBridge`]
//! directly; this type exists so tests and the benchmark have something
//! real to drive nodes through without pulling in a second threading
//! dependency.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::mask::NodeMask;
use crate::{HostBridge, NodeId, MAX_PARTICIPANTS};

struct NodeChannel {
    cycles: AtomicI32,
    parked: Mutex<bool>,
    condvar: Condvar,
    unloaded: AtomicBool,
}

impl NodeChannel {
    fn new() -> Self {
        Self {
            cycles: AtomicI32::new(0),
            parked: Mutex::new(false),
            condvar: Condvar::new(),
            unloaded: AtomicBool::new(false),
        }
    }
}

/// Parks each node's OS thread on its own `parking_lot::Condvar`. A
/// `wait(mask)` call blocks the calling thread on every channel named in
/// `mask`, one at a time; a `signal(mask)` call wakes whichever thread (if
/// any) is currently parked on each of those channels.
pub struct ParkingLotBridge {
    nodes: [NodeChannel; MAX_PARTICIPANTS],
}

impl Default for ParkingLotBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ParkingLotBridge {
    pub fn new() -> Self {
        Self {
            nodes: [
                NodeChannel::new(),
                NodeChannel::new(),
                NodeChannel::new(),
                NodeChannel::new(),
            ],
        }
    }
}

impl HostBridge for ParkingLotBridge {
    fn signal(&self, mask: NodeMask) -> bool {
        let mut woke_any = false;
        for id in mask.iter() {
            let node = &self.nodes[id as usize];
            let mut parked = node.parked.lock();
            if *parked {
                *parked = false;
                node.condvar.notify_one();
                woke_any = true;
            }
        }
        woke_any
    }

    fn wait(&self, mask: NodeMask) -> bool {
        let mut slept = false;
        for id in mask.iter() {
            let node = &self.nodes[id as usize];
            let mut parked = node.parked.lock();
            *parked = true;
            slept = true;
            while *parked {
                node.condvar.wait(&mut parked);
            }
        }
        slept
    }

    fn add_cycles(&self, id: NodeId, cycles: i32) {
        if id == 0 {
            for node in &self.nodes[1..] {
                node.cycles.fetch_add(cycles, Ordering::AcqRel);
            }
        } else {
            self.nodes[id as usize]
                .cycles
                .fetch_add(cycles, Ordering::AcqRel);
        }
    }

    fn use_cycles(&self, id: NodeId, cycles: i32) -> i32 {
        self.nodes[id as usize]
            .cycles
            .fetch_sub(cycles, Ordering::AcqRel)
            - cycles
    }

    fn unused_cycles(&self, id: NodeId) -> i32 {
        self.nodes[id as usize].cycles.load(Ordering::Acquire)
    }

    fn unload(&self, id: NodeId) {
        let node = &self.nodes[id as usize];
        node.unloaded.store(true, Ordering::Release);
        let mut parked = node.parked.lock();
        if *parked {
            *parked = false;
            node.condvar.notify_one();
        }
    }
}
