// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Demand accounting shared by publishers.

use super::UNBOUNDED;
use std::sync::atomic::{AtomicU64, Ordering};

/// Adds `n` to the outstanding demand, saturating at [`UNBOUNDED`]. Returns the previous demand.
pub fn add_cap(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = current.saturating_add(n);
        match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(previous) => return previous,
            Err(actual) => current = actual,
        }
    }
}

/// Consumes one unit of demand. Returns false when there is none; unbounded demand never runs out.
pub fn take_one(requested: &AtomicU64) -> bool {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return true;
        }
        if current == 0 {
            return false;
        }
        match requested.compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
}
