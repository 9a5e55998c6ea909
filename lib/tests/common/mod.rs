// SPDX-License-Identifier: Apache-2.0 OR MIT

use gpiosim::{Bank, Sim};
use std::time::Duration;

// max time to allow state to propagate between the sim and cdev
const PROPAGATION_DELAY: Duration = Duration::from_millis(10);

pub fn wait_propagation_delay() {
    std::thread::sleep(PROPAGATION_DELAY);
}

// max time to wait for an event that is expected to arrive
pub const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Take a single-bank sim live.
///
/// Returns `None` where sims cannot be created, typically because the
/// gpio-sim kernel module is unavailable, in which case the caller should
/// skip the test.
pub fn sim(num_lines: u32, label: &str) -> Option<Sim> {
    match gpiosim::builder()
        .with_bank(&Bank::new(num_lines, label))
        .live()
    {
        Ok(sim) => Some(sim),
        Err(e) => {
            eprintln!("skipping test: no gpio-sim support: {e}");
            None
        }
    }
}

/// As [`sim`], but with the bank configured by the caller.
pub fn sim_with_bank(bank: &Bank) -> Option<Sim> {
    match gpiosim::builder().with_bank(bank).live() {
        Ok(sim) => Some(sim),
        Err(e) => {
            eprintln!("skipping test: no gpio-sim support: {e}");
            None
        }
    }
}
