use crate::prelude::*;

use crate::register::COUNTER_COUNT;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CounterPolicy {
    PassThrough,
    IgnoreZero,
}

impl CounterPolicy {
    pub fn new(ignore_zero_counter_values: bool) -> Self {
        if ignore_zero_counter_values {
            Self::IgnoreZero
        } else {
            Self::PassThrough
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CounterState {
    pub raw_value: u32,
    pub filtered_value: u32,
    pub last_nonzero_at: Option<DateTime<Utc>>,
    /// Set by an explicit reset or calibration. Lets a zero through, and
    /// holds until a zero is accepted or the filtered value moves, so a
    /// stale pre-reset reading does not use it up.
    pub reset_pending: bool,
}

/// Folds one raw reading into the previous state.
pub fn apply(previous: &CounterState, raw: u32, policy: CounterPolicy, now: DateTime<Utc>) -> CounterState {
    let last_nonzero_at = if raw != 0 {
        Some(now)
    } else {
        previous.last_nonzero_at
    };

    let filtered_value = match policy {
        CounterPolicy::PassThrough => raw,
        CounterPolicy::IgnoreZero => {
            if raw == 0 && previous.filtered_value != 0 && !previous.reset_pending {
                previous.filtered_value
            } else {
                raw
            }
        }
    };

    let reset_pending = previous.reset_pending && raw != 0 && filtered_value == previous.filtered_value;

    CounterState {
        raw_value: raw,
        filtered_value,
        last_nonzero_at,
        reset_pending,
    }
}

/// Per-counter filter state, one fixed entry per counter input.
#[derive(Debug)]
pub struct CounterFilter {
    policy: CounterPolicy,
    states: [CounterState; COUNTER_COUNT],
}

impl CounterFilter {
    pub fn new(policy: CounterPolicy) -> Self {
        Self {
            policy,
            states: [CounterState::default(); COUNTER_COUNT],
        }
    }

    pub fn state(&self, id: CounterId) -> &CounterState {
        &self.states[id.index()]
    }

    /// Runs every raw counter through the filter and returns the accepted
    /// values.
    pub fn apply_all(
        &mut self,
        raw: &BTreeMap<CounterId, u32>,
        now: DateTime<Utc>,
    ) -> BTreeMap<CounterId, u32> {
        raw.iter()
            .map(|(id, value)| {
                let state = &mut self.states[id.index()];
                let next = apply(state, *value, self.policy, now);
                if next.filtered_value != *value {
                    debug!("counter {}: ignoring reading {}, keeping {}", id, value, next.filtered_value);
                }
                *state = next;
                (*id, next.filtered_value)
            })
            .collect()
    }

    /// Marks counters as explicitly reset, so a following zero is accepted.
    pub fn reset(&mut self, ids: &[CounterId]) {
        for id in ids {
            self.states[id.index()].reset_pending = true;
        }
    }
}
