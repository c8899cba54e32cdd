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

//! The simulated world and the operations the maestro performs on it.
//!
//! Everything an actor may observe or modify lives in [`World`]. Actors never
//! touch it directly: they issue simcalls (see `simcall.rs`) that the maestro
//! executes one after the other, which totally orders every mutation.

use crate::{ActorId, Error, HostId, Platform, Route, SimulationConfig};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

pub(crate) mod activity;
pub(crate) mod actor;
pub(crate) mod mailbox;
pub(crate) mod mutex;
pub(crate) mod simcall;
pub(crate) mod timer;

use activity::Activity;
use actor::{ActorRecord, ActorTemplate};
use mailbox::Mailbox;
use mutex::MutexImpl;
use timer::TimerQueue;

pub use activity::{ActivityKind, ActivityState, IoOp};
pub use actor::{ActorCode, ActorExit};
pub use simcall::{Resumer, SimcallKind, SimcallObserver};

/// One simcall resolution, as recorded by the maestro.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEntry {
    pub time: f64,
    pub actor: ActorId,
    pub kind: SimcallKind,
    pub call: String,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:.6}] {} {}", self.time, self.actor, self.call)
    }
}

/// The state of one simulation: platform, actors, activities, clock.
pub struct World {
    pub(crate) config: SimulationConfig,
    pub(crate) clock: f64,
    pub(crate) platform: Platform,
    pub(crate) actors: BTreeMap<ActorId, ActorRecord>,
    next_pid: usize,
    pub(crate) exits: BTreeMap<ActorId, ActorExit>,
    pub(crate) activities: BTreeMap<crate::ActivityId, Activity>,
    next_activity: usize,
    pub(crate) timers: TimerQueue,
    pub(crate) mailboxes: HashMap<String, Mailbox>,
    pub(crate) mutexes: Vec<MutexImpl>,
    /// Actors to run in the next scheduling round, in order.
    pub(crate) ready: VecDeque<ActorId>,
    /// Actors whose continuation must be dropped by the maestro.
    pub(crate) dead: Vec<ActorId>,
    /// Actors whose continuation must be created by the maestro.
    pub(crate) spawned: Vec<ActorId>,
    /// Actors to start again when their host is turned back on.
    pub(crate) boot_list: HashMap<HostId, Vec<ActorTemplate>>,
    pub(crate) trace: Vec<TraceEntry>,
    pub(crate) rates_dirty: bool,
}

impl World {
    pub(crate) fn new(config: SimulationConfig, platform: Platform) -> Self {
        Self {
            config,
            clock: 0.0,
            platform,
            actors: BTreeMap::new(),
            next_pid: 1,
            exits: BTreeMap::new(),
            activities: BTreeMap::new(),
            next_activity: 1,
            timers: TimerQueue::default(),
            mailboxes: HashMap::new(),
            mutexes: Vec::new(),
            ready: VecDeque::new(),
            dead: Vec::new(),
            spawned: Vec::new(),
            boot_list: HashMap::new(),
            trace: Vec::new(),
            rates_dirty: false,
        }
    }

    /// Current simulated date, in seconds.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub(crate) fn platform_mut(&mut self) -> &mut Platform {
        &mut self.platform
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn actor_exit(&self, pid: ActorId) -> Option<&ActorExit> {
        self.exits.get(&pid)
    }

    pub fn is_alive(&self, pid: ActorId) -> bool {
        self.actors.contains_key(&pid)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// The route between the netpoints of two hosts.
    pub fn host_route(&self, src: HostId, dst: HostId) -> Result<Route, Error> {
        let resources = self.platform.resources();
        let src = resources.host(src)?.netpoint();
        let dst = resources.host(dst)?.netpoint();
        self.platform.get_route(src, dst)
    }

    fn next_pid(&mut self) -> ActorId {
        let pid = ActorId(self.next_pid);
        self.next_pid += 1;
        pid
    }

    fn next_activity_id(&mut self) -> crate::ActivityId {
        let id = crate::ActivityId(self.next_activity);
        self.next_activity += 1;
        id
    }

    /// Put `pid` on the ready list, unless it is already there, dead, or
    /// suspended (in which case it runs once resumed).
    pub(crate) fn wake(&mut self, pid: ActorId) {
        let record = match self.actors.get_mut(&pid) {
            Some(r) => r,
            None => {
                log::trace!("Not waking dead actor {}", pid);
                return;
            }
        };
        record.waiting_on = None;
        if record.suspended {
            record.parked = true;
            return;
        }
        if !record.scheduled {
            record.scheduled = true;
            self.ready.push_back(pid);
        }
    }

    /// Hand a simcall to the maestro. Called from the actor side.
    pub(crate) fn issue(&mut self, pid: ActorId, simcall: simcall::Simcall) {
        match self.actors.get_mut(&pid) {
            Some(record) => record.simcall = Some(simcall),
            None => log::warn!("Dead actor {} issued {}", pid, simcall.observer.call),
        }
    }

    pub(crate) fn take_simcall(&mut self, pid: ActorId) -> Option<simcall::Simcall> {
        self.actors.get_mut(&pid).and_then(|r| r.simcall.take())
    }

    /// Execute a simcall on behalf of `pid`. This is the only place where
    /// actor requests mutate the world.
    pub(crate) fn handle_simcall(&mut self, pid: ActorId, simcall: simcall::Simcall) {
        log::trace!(
            "[{:.6}] {} handles {:?} {}",
            self.clock,
            pid,
            simcall.kind,
            simcall.observer.call
        );
        if simcall.observer.visible {
            self.trace.push(TraceEntry {
                time: self.clock,
                actor: pid,
                kind: simcall.kind,
                call: simcall.observer.call.clone(),
            });
        }
        (simcall.code)(self, pid);
    }

    /// Actors that are neither dead nor daemons.
    pub(crate) fn regular_actors(&self) -> Vec<ActorId> {
        self.actors
            .values()
            .filter(|a| !a.daemon)
            .map(|a| a.id)
            .collect()
    }

    /// Kill every daemon once no regular actor is left. Returns whether any
    /// actor was killed.
    pub(crate) fn kill_lonely_daemons(&mut self) -> bool {
        if self.actors.is_empty() || !self.regular_actors().is_empty() {
            return false;
        }
        let daemons = self.actors.keys().copied().collect::<Vec<_>>();
        log::debug!("Only daemons left, killing {} of them", daemons.len());
        for pid in daemons {
            let _ = self.kill_actor(pid);
        }
        true
    }

    /// Date of the next event (activity completion or timer), if any.
    pub(crate) fn next_event_date(&mut self) -> Option<f64> {
        self.refresh_rates();
        let completion = self.next_completion().map(|delta| self.clock + delta);
        match (completion, self.timers.next_date()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Move the clock to `date`, then fire the timers and terminate the
    /// activities that are due.
    pub(crate) fn advance_to(&mut self, date: f64) {
        let delta = (date - self.clock).max(0.0);
        self.progress(delta);
        self.clock = date.max(self.clock);
        while let Some(callback) = self.timers.pop_due(self.clock) {
            callback(self);
        }
        self.complete_due_activities();
    }

    pub(crate) fn describe_blocked(&self) -> Vec<String> {
        self.actors
            .values()
            .map(|a| match a.waiting_on {
                Some(act) => format!("{} ({}) waiting on {}", a.id, a.name, act),
                None => format!("{} ({})", a.id, a.name),
            })
            .collect()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("World")
            .field("clock", &self.clock)
            .field("actors", &self.actors.len())
            .field("activities", &self.activities.len())
            .finish()
    }
}

/// Convenience for the common "no such actor" lookup.
pub(crate) fn actor_error(pid: ActorId) -> Error {
    Error::InvalidActor(pid)
}
