// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::World;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// A simulated date usable as an ordered map key.
#[derive(Clone, Copy, Debug)]
struct Date(f64);

impl PartialEq for Date {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Date {}

impl PartialOrd for Date {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Date {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct TimerId(u64);

pub(crate) type TimerCallback = Box<dyn FnOnce(&mut World)>;

/// Callbacks to run at given dates. Timers of the same date fire in the order
/// they were added.
#[derive(Default)]
pub(crate) struct TimerQueue {
    queue: BTreeMap<(Date, u64), TimerCallback>,
    dates: HashMap<TimerId, Date>,
    seq: u64,
}

impl TimerQueue {
    pub(crate) fn add(&mut self, date: f64, callback: TimerCallback) -> TimerId {
        let seq = self.seq;
        self.seq += 1;
        self.queue.insert((Date(date), seq), callback);
        self.dates.insert(TimerId(seq), Date(date));
        TimerId(seq)
    }

    /// Drop a timer. Cancelling a timer that already fired is harmless.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        if let Some(date) = self.dates.remove(&id) {
            self.queue.remove(&(date, id.0));
        }
    }

    pub(crate) fn next_date(&self) -> Option<f64> {
        self.queue.keys().next().map(|(date, _)| date.0)
    }

    /// The next callback due at or before `now`, removed from the queue.
    pub(crate) fn pop_due(&mut self, now: f64) -> Option<TimerCallback> {
        let key = *self.queue.keys().next()?;
        if key.0 .0 > now {
            return None;
        }
        self.dates.remove(&TimerId(key.1));
        self.queue.remove(&key)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
