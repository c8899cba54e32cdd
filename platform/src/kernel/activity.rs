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

//! Activities: the units of simulated work, their state machine, and the
//! way they progress on the resources they share.

use super::simcall::Resumer;
use super::World;
use crate::{ActivityId, ActorId, DiskId, Error, HostId, MutexId, ResourceId};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActivityState {
    /// Configured, no resources yet.
    Inited,
    /// Waiting for something before it can run (a comm waiting for its peer,
    /// a lock request waiting for the mutex).
    Starting,
    /// Consuming its resources.
    Started,
    Finished,
    Failed,
    Canceled,
}

impl ActivityState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Canceled)
    }

    fn can_become(&self, next: ActivityState) -> bool {
        use ActivityState::*;
        match (self, next) {
            (Inited, Starting) | (Starting, Started) => true,
            (Inited, Canceled) | (Starting, Canceled) | (Started, Canceled) => true,
            (Starting, Failed) | (Started, Failed) | (Started, Finished) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoOp {
    Read,
    Write,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ActivityKind {
    Comm {
        mailbox: String,
        sender: Option<ActorId>,
        receiver: Option<ActorId>,
        src_host: Option<HostId>,
        dst_host: Option<HostId>,
    },
    Exec {
        host: HostId,
    },
    Io {
        disk: DiskId,
        op: IoOp,
    },
    Sleep,
    /// A lock request on a kernel mutex.
    Synchro {
        mutex: MutexId,
    },
}

pub(crate) struct Activity {
    pub(crate) id: ActivityId,
    pub(crate) kind: ActivityKind,
    pub(crate) state: ActivityState,
    /// The actor that created the activity.
    pub(crate) owner: ActorId,
    /// Actors that may still use the handle. The activity is destroyed once
    /// the last one released it.
    pub(crate) holders: Vec<ActorId>,
    pub(crate) amount: f64,
    pub(crate) remaining: f64,
    /// Latency left to spend before the amount starts decreasing.
    pub(crate) latency: f64,
    pub(crate) rate: f64,
    pub(crate) bound: Option<f64>,
    pub(crate) resources: Vec<ResourceId>,
    pub(crate) suspended: bool,
    pub(crate) failure: Option<Error>,
    pub(crate) waiters: Vec<Resumer<()>>,
    pub(crate) payload: Option<Box<dyn Any>>,
    pub(crate) start_date: Option<f64>,
    pub(crate) finish_date: Option<f64>,
}

impl Activity {
    pub(crate) fn new(id: ActivityId, kind: ActivityKind, owner: ActorId, amount: f64) -> Self {
        Self {
            id,
            kind,
            state: ActivityState::Inited,
            owner,
            holders: vec![owner],
            amount,
            remaining: amount,
            latency: 0.0,
            rate: 0.0,
            bound: None,
            resources: Vec::new(),
            suspended: false,
            failure: None,
            waiters: Vec::new(),
            payload: None,
            start_date: None,
            finish_date: None,
        }
    }

    /// Whether the remaining amount decreases as time passes.
    fn is_progressing(&self) -> bool {
        self.state == ActivityState::Started
            && !self.suspended
            && !matches!(self.kind, ActivityKind::Synchro { .. })
    }

    /// Whether the activity currently draws on its resources.
    fn is_consuming(&self) -> bool {
        self.is_progressing() && self.latency <= 0.0
    }

    /// The result waiters get once the activity is terminal.
    pub(crate) fn outcome(&self) -> Result<(), Error> {
        match self.state {
            ActivityState::Finished => Ok(()),
            ActivityState::Failed => Err(self
                .failure
                .clone()
                .unwrap_or(Error::ResourceFailure(self.id))),
            ActivityState::Canceled => Err(Error::Canceled(self.id)),
            _ => Err(Error::InvalidActivity(self.id)),
        }
    }

    pub(crate) fn touches_host(&self, host: HostId) -> bool {
        match &self.kind {
            ActivityKind::Comm {
                src_host, dst_host, ..
            } => *src_host == Some(host) || *dst_host == Some(host),
            _ => false,
        }
    }

    pub fn remaining_ratio(&self) -> f64 {
        if self.amount <= 0.0 {
            return if self.state == ActivityState::Finished {
                0.0
            } else {
                1.0
            };
        }
        (self.remaining / self.amount).clamp(0.0, 1.0)
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("owner", &self.owner)
            .field("remaining", &self.remaining)
            .field("rate", &self.rate)
            .finish()
    }
}

impl World {
    pub(crate) fn activity(&self, id: ActivityId) -> Result<&Activity, Error> {
        self.activities.get(&id).ok_or(Error::InvalidActivity(id))
    }

    pub(crate) fn activity_mut(&mut self, id: ActivityId) -> Result<&mut Activity, Error> {
        self.activities
            .get_mut(&id)
            .ok_or(Error::InvalidActivity(id))
    }

    pub fn activity_state(&self, id: ActivityId) -> Result<ActivityState, Error> {
        Ok(self.activity(id)?.state)
    }

    /// Current rate of a started activity, in units of its amount per second.
    pub fn activity_rate(&mut self, id: ActivityId) -> Result<f64, Error> {
        self.refresh_rates();
        Ok(self.activity(id)?.rate)
    }

    pub fn remaining_ratio(&self, id: ActivityId) -> Result<f64, Error> {
        Ok(self.activity(id)?.remaining_ratio())
    }

    pub(crate) fn add_activity(&mut self, activity: Activity) -> ActivityId {
        let id = activity.id;
        log::trace!("[{:.6}] New {:?}", self.clock, activity);
        self.activities.insert(id, activity);
        id
    }

    pub(crate) fn new_activity(
        &mut self,
        kind: ActivityKind,
        owner: ActorId,
        amount: f64,
    ) -> ActivityId {
        let id = self.next_activity_id();
        self.add_activity(Activity::new(id, kind, owner, amount))
    }

    /// Move `id` to `next`. Transitions out of a terminal state are refused.
    pub(crate) fn set_state(&mut self, id: ActivityId, next: ActivityState) -> bool {
        let clock = self.clock;
        let activity = match self.activities.get_mut(&id) {
            Some(a) => a,
            None => return false,
        };
        if !activity.state.can_become(next) {
            log::warn!(
                "[{:.6}] Ignoring transition of {} from {:?} to {:?}",
                clock,
                id,
                activity.state,
                next
            );
            return false;
        }
        log::trace!("[{:.6}] {} {:?} -> {:?}", clock, id, activity.state, next);
        activity.state = next;
        match next {
            ActivityState::Started => activity.start_date = Some(clock),
            s if s.is_terminal() => activity.finish_date = Some(clock),
            _ => {}
        }
        self.rates_dirty = true;
        true
    }

    pub fn exec_init(&mut self, owner: ActorId, host: HostId, flops: f64) -> Result<ActivityId, Error> {
        let cpu = self.platform.resources().host(host)?.cpu();
        let id = self.new_activity(ActivityKind::Exec { host }, owner, flops.max(0.0));
        self.activity_mut(id)?.resources = vec![cpu];
        Ok(id)
    }

    pub fn io_init(
        &mut self,
        owner: ActorId,
        disk: DiskId,
        op: IoOp,
        bytes: f64,
    ) -> Result<ActivityId, Error> {
        let d = self
            .platform
            .resources()
            .disk(disk)
            .ok_or(Error::InvalidDisk(disk))?;
        let resource = match op {
            IoOp::Read => d.read(),
            IoOp::Write => d.write(),
        };
        let id = self.new_activity(ActivityKind::Io { disk, op }, owner, bytes.max(0.0));
        self.activity_mut(id)?.resources = vec![resource];
        Ok(id)
    }

    pub fn sleep_init(&mut self, owner: ActorId, duration: f64) -> ActivityId {
        self.new_activity(ActivityKind::Sleep, owner, duration.max(0.0))
    }

    /// Cap the rate of an activity, whatever its resources could grant.
    pub fn set_bound(&mut self, id: ActivityId, bound: f64) -> Result<(), Error> {
        self.activity_mut(id)?.bound = Some(bound);
        self.rates_dirty = true;
        Ok(())
    }

    /// Commit the resources of an inited exec, io or sleep. Starting an
    /// activity that already left `Inited` does nothing.
    pub fn start_activity(&mut self, id: ActivityId) -> Result<(), Error> {
        let activity = self.activity(id)?;
        if activity.state != ActivityState::Inited {
            return Ok(());
        }
        if matches!(
            activity.kind,
            ActivityKind::Comm { .. } | ActivityKind::Synchro { .. }
        ) {
            // started by their rendezvous
            return Ok(());
        }
        let resources = activity.resources.clone();
        self.set_state(id, ActivityState::Starting);
        self.set_state(id, ActivityState::Started);
        for resource in resources {
            if !self.platform.resources().get(resource)?.is_on() {
                self.fail_activity(id, Error::ResourceFailure(id));
                break;
            }
        }
        Ok(())
    }

    /// Terminate `id` and answer its waiters.
    fn terminate(&mut self, id: ActivityId, state: ActivityState, failure: Option<Error>) {
        if !self.set_state(id, state) {
            return;
        }
        let (waiters, result) = match self.activities.get_mut(&id) {
            Some(activity) => {
                activity.rate = 0.0;
                if failure.is_some() {
                    activity.failure = failure;
                }
                (std::mem::take(&mut activity.waiters), activity.outcome())
            }
            None => return,
        };
        self.unlink_pending(id);
        for waiter in waiters {
            waiter.resume(self, result.clone());
        }
    }

    pub(crate) fn finish_activity(&mut self, id: ActivityId) {
        self.terminate(id, ActivityState::Finished, None);
    }

    pub(crate) fn fail_activity(&mut self, id: ActivityId, error: Error) {
        self.terminate(id, ActivityState::Failed, Some(error));
    }

    /// Cancel a non-terminal activity. Cancelling a terminal one is a no-op.
    pub fn cancel_activity(&mut self, id: ActivityId) {
        match self.activities.get(&id) {
            Some(a) if !a.state.is_terminal() => self.terminate(id, ActivityState::Canceled, None),
            _ => {}
        }
    }

    /// Block `resumer` until `id` is terminal. An inited activity is started
    /// first.
    pub(crate) fn wait_activity(
        &mut self,
        pid: ActorId,
        id: ActivityId,
        resumer: Resumer<()>,
    ) -> Result<(), Error> {
        self.start_activity(id)?;
        let activity = self.activity_mut(id)?;
        if activity.state.is_terminal() {
            let outcome = activity.outcome();
            resumer.resume(self, outcome);
            return Ok(());
        }
        activity.waiters.push(resumer);
        if let Some(record) = self.actors.get_mut(&pid) {
            record.waiting_on = Some(id);
        }
        Ok(())
    }

    /// Like [`World::wait_activity`], but `resumer` gets `Timeout` if the
    /// activity is still running after `timeout` seconds. The activity itself
    /// keeps running.
    pub(crate) fn wait_activity_for(
        &mut self,
        pid: ActorId,
        id: ActivityId,
        timeout: f64,
        resumer: Resumer<()>,
    ) -> Result<(), Error> {
        self.start_activity(id)?;
        if !self.activity(id)?.state.is_terminal() && timeout <= 0.0 {
            resumer.resume(self, Err(Error::Timeout(id)));
            return Ok(());
        }
        self.wait_activity(pid, id, resumer.clone())?;
        if !resumer.is_pending() {
            return Ok(());
        }
        let expiring = resumer.clone();
        let timer = self.timers.add(
            self.clock + timeout,
            Box::new(move |world: &mut World| {
                log::debug!("[{:.6}] Wait on {} timed out", world.clock, id);
                expiring.resume(world, Err(Error::Timeout(id)));
                if let Some(activity) = world.activities.get_mut(&id) {
                    activity.waiters.retain(|w| w.is_pending());
                }
            }),
        );
        resumer.set_timer(timer);
        if let Some(record) = self.actors.get_mut(&pid) {
            record.pending_timer = Some(timer);
        }
        Ok(())
    }

    /// Whether `id` finished. Failed and canceled activities report their
    /// failure.
    pub fn test_activity(&mut self, id: ActivityId) -> Result<bool, Error> {
        self.start_activity(id)?;
        let activity = self.activity(id)?;
        if activity.state.is_terminal() {
            activity.outcome().map(|_| true)
        } else {
            Ok(false)
        }
    }

    /// `pid` gives up its handle on `id`. The owner releasing a running
    /// activity cancels it. The activity is destroyed with its last holder.
    pub fn release_activity(&mut self, pid: ActorId, id: ActivityId) -> Result<(), Error> {
        let activity = self.activity(id)?;
        if !activity.holders.contains(&pid) {
            return Err(Error::InvalidActivity(id));
        }
        if activity.owner == pid && !activity.state.is_terminal() {
            self.cancel_activity(id);
        }
        self.drop_holder(pid, id);
        Ok(())
    }

    pub(crate) fn drop_holder(&mut self, pid: ActorId, id: ActivityId) {
        let empty = match self.activities.get_mut(&id) {
            Some(activity) => {
                activity.holders.retain(|&h| h != pid);
                activity.holders.is_empty()
            }
            None => return,
        };
        if empty {
            self.unlink_pending(id);
            log::trace!("[{:.6}] Destroying {}", self.clock, id);
            self.activities.remove(&id);
            self.rates_dirty = true;
        }
    }

    /// Fail every running activity using `resource`.
    pub(crate) fn fail_resource(&mut self, resource: ResourceId) {
        let victims = self
            .activities
            .values()
            .filter(|a| a.state == ActivityState::Started && a.resources.contains(&resource))
            .map(|a| a.id)
            .collect::<Vec<_>>();
        for id in victims {
            log::debug!("[{:.6}] {} fails with {}", self.clock, id, resource);
            self.fail_activity(id, Error::ResourceFailure(id));
        }
        self.rates_dirty = true;
    }

    /// Number of activities currently drawing on `resource`.
    pub fn resource_load(&self, resource: ResourceId) -> usize {
        self.activities
            .values()
            .filter(|a| a.is_consuming() && a.resources.contains(&resource))
            .count()
    }

    /// Recompute the rate of every started activity if the set of consumers
    /// of any resource changed.
    pub(crate) fn refresh_rates(&mut self) {
        if !self.rates_dirty {
            return;
        }
        self.rates_dirty = false;
        let mut load: HashMap<ResourceId, usize> = HashMap::new();
        for activity in self.activities.values().filter(|a| a.is_consuming()) {
            for &resource in &activity.resources {
                *load.entry(resource).or_default() += 1;
            }
        }
        let resources = self.platform.resources();
        for activity in self.activities.values_mut() {
            if !activity.is_consuming() {
                activity.rate = 0.0;
                continue;
            }
            let mut rate = match activity.kind {
                ActivityKind::Sleep => 1.0,
                _ => f64::INFINITY,
            };
            for resource in &activity.resources {
                let share = resources
                    .get(*resource)
                    .map(|r| r.share(load.get(resource).copied().unwrap_or(0)))
                    .unwrap_or(0.0);
                rate = rate.min(share);
            }
            if let Some(bound) = activity.bound {
                rate = rate.min(bound);
            }
            activity.rate = rate;
        }
        log::debug!(
            "[{:.6}] Rates updated over {} loaded resources",
            self.clock,
            load.len()
        );
    }

    /// Delay until the next activity completes or ends its latency phase.
    pub(crate) fn next_completion(&self) -> Option<f64> {
        self.activities
            .values()
            .filter(|a| a.is_progressing())
            .filter_map(|a| {
                if a.latency > 0.0 {
                    Some(a.latency)
                } else if a.rate.is_infinite() {
                    Some(0.0)
                } else if a.rate > 0.0 {
                    Some(a.remaining / a.rate)
                } else {
                    None
                }
            })
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Let `delta` seconds of simulated time pass for every running activity.
    pub(crate) fn progress(&mut self, delta: f64) {
        let precision = self.config.precision;
        let mut dirty = false;
        for activity in self.activities.values_mut() {
            if !activity.is_progressing() {
                continue;
            }
            if activity.latency > 0.0 {
                activity.latency -= delta;
                if activity.latency <= precision {
                    activity.latency = 0.0;
                    dirty = true;
                }
            } else if activity.rate.is_infinite() {
                activity.remaining = 0.0;
            } else {
                activity.remaining = (activity.remaining - activity.rate * delta).max(0.0);
            }
        }
        self.rates_dirty |= dirty;
    }

    /// Finish every running activity whose remaining amount is exhausted.
    pub(crate) fn complete_due_activities(&mut self) {
        let precision = self.config.precision;
        let due = self
            .activities
            .values()
            .filter(|a| {
                a.is_consuming()
                    && (a.rate.is_infinite()
                        || a.remaining <= precision * a.amount.max(1.0))
            })
            .map(|a| a.id)
            .collect::<Vec<_>>();
        for id in due {
            log::trace!("[{:.6}] {} completes", self.clock, id);
            self.finish_activity(id);
        }
    }
}
