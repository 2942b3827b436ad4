//! Per-channel method lookup.
//!
//! # Responsibilities
//! - Map (host, path) to a registered method in O(probes)
//! - Fall back to host-less registrations for the same path
//! - Skip idempotent-only methods for non-idempotent calls
//!
//! # Design Decisions
//! - Open addressing with 2x slots keeps probe chains short
//! - Host-less entries hash with host 0, so both passes share one table

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::routing::method::{MethodHandle, MethodSpec};

#[derive(Debug, Clone)]
struct Slot {
    host: Option<String>,
    path: String,
    idempotent_only: bool,
    handle: MethodHandle,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    slots: Vec<Option<Slot>>,
    max_probes: usize,
}

fn hash_str(s: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish() as u32
}

fn kv_hash(k: u32, v: u32) -> u32 {
    k.rotate_left(2) ^ v
}

impl RoutingTable {
    /// Build a table for `methods`; handle `i` refers to `methods[i]`.
    pub fn new(methods: &[MethodSpec]) -> Self {
        let count = methods.len() * 2;
        let mut slots: Vec<Option<Slot>> = vec![None; count];
        let mut max_probes = 0;

        for (index, method) in methods.iter().enumerate() {
            let host_hash = method.host.as_deref().map(hash_str).unwrap_or(0);
            let hash = kv_hash(host_hash, hash_str(&method.name)) as usize;
            let mut probes = 0;
            while slots[(hash + probes) % count].is_some() {
                probes += 1;
            }
            max_probes = max_probes.max(probes);
            slots[(hash + probes) % count] = Some(Slot {
                host: method.host.clone(),
                path: method.name.clone(),
                idempotent_only: method.flags.is_idempotent_only(),
                handle: MethodHandle(index),
            });
        }

        Self { slots, max_probes }
    }

    pub fn max_probes(&self) -> usize {
        self.max_probes
    }

    /// Find the registered method serving `path` on `host`.
    pub fn lookup(&self, host: &str, path: &str, idempotent: bool) -> Option<MethodHandle> {
        if self.slots.is_empty() {
            return None;
        }
        let path_hash = hash_str(path);

        let exact = kv_hash(hash_str(host), path_hash) as usize;
        let found = self.probe(exact, |slot| {
            slot.host.as_deref() == Some(host)
                && slot.path == path
                && (idempotent || !slot.idempotent_only)
        });
        if found.is_some() {
            return found;
        }

        let wildcard = kv_hash(0, path_hash) as usize;
        self.probe(wildcard, |slot| {
            slot.host.is_none() && slot.path == path && (idempotent || !slot.idempotent_only)
        })
    }

    fn probe(&self, hash: usize, accept: impl Fn(&Slot) -> bool) -> Option<MethodHandle> {
        let count = self.slots.len();
        for i in 0..=self.max_probes {
            // An empty slot ends the chain.
            let slot = self.slots[(hash + i) % count].as_ref()?;
            if accept(slot) {
                return Some(slot.handle);
            }
        }
        None
    }
}
