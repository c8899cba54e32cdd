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

//! Kernel mutexes with FIFO ownership handoff.

use super::activity::{ActivityKind, ActivityState};
use super::World;
use crate::{ActivityId, ActorId, Error, MutexId};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub(crate) struct MutexImpl {
    pub(crate) owner: Option<ActorId>,
    /// Lock requests of the actors waiting for the mutex, oldest first.
    pub(crate) queue: VecDeque<ActivityId>,
}

impl World {
    pub(crate) fn create_mutex(&mut self) -> MutexId {
        self.mutexes.push(MutexImpl::default());
        MutexId(self.mutexes.len() - 1)
    }

    fn mutex_mut(&mut self, mutex: MutexId) -> Result<&mut MutexImpl, Error> {
        self.mutexes
            .get_mut(mutex.index())
            .ok_or(Error::InvalidMutex(mutex))
    }

    pub fn mutex_owner(&self, mutex: MutexId) -> Result<Option<ActorId>, Error> {
        self.mutexes
            .get(mutex.index())
            .map(|m| m.owner)
            .ok_or(Error::InvalidMutex(mutex))
    }

    /// Request the mutex. The returned lock request finishes once `pid` owns
    /// the mutex, right away if it was free.
    pub(crate) fn lock_async(&mut self, pid: ActorId, mutex: MutexId) -> Result<ActivityId, Error> {
        let free = self.mutex_mut(mutex)?.owner.is_none();
        let id = self.new_activity(ActivityKind::Synchro { mutex }, pid, 0.0);
        self.set_state(id, ActivityState::Starting);
        self.set_state(id, ActivityState::Started);
        if free {
            self.mutex_mut(mutex)?.owner = Some(pid);
            self.finish_activity(id);
        } else {
            log::trace!("[{:.6}] {} queues on {}", self.clock, pid, mutex);
            self.mutex_mut(mutex)?.queue.push_back(id);
        }
        Ok(id)
    }

    pub(crate) fn try_lock(&mut self, pid: ActorId, mutex: MutexId) -> Result<bool, Error> {
        let m = self.mutex_mut(mutex)?;
        if m.owner.is_some() {
            return Ok(false);
        }
        m.owner = Some(pid);
        Ok(true)
    }

    pub(crate) fn unlock(&mut self, pid: ActorId, mutex: MutexId) -> Result<(), Error> {
        if self.mutex_mut(mutex)?.owner != Some(pid) {
            log::warn!("{} unlocks {} which it does not own", pid, mutex);
            return Err(Error::InvalidMutex(mutex));
        }
        self.hand_off_mutex(mutex);
        Ok(())
    }

    /// Give the mutex to the oldest pending lock request, if any.
    pub(crate) fn hand_off_mutex(&mut self, mutex: MutexId) {
        let m = match self.mutexes.get_mut(mutex.index()) {
            Some(m) => m,
            None => return,
        };
        m.owner = None;
        while let Some(id) = m.queue.pop_front() {
            let next = self
                .activities
                .get(&id)
                .filter(|a| a.state == ActivityState::Started)
                .map(|a| a.owner);
            if let Some(owner) = next {
                m.owner = Some(owner);
                log::trace!("[{:.6}] {} now owned by {}", self.clock, mutex, owner);
                self.finish_activity(id);
                return;
            }
        }
    }
}

#[cfg(test)]
mod mutex_tests {
    use super::*;
    use crate::{Platform, SimulationConfig};

    #[test]
    fn ownership_is_handed_over_in_request_order() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut world = World::new(SimulationConfig::default(), Platform::default());
        let a = world.insert_test_actor("a");
        let b = world.insert_test_actor("b");
        let c = world.insert_test_actor("c");
        let mutex = world.create_mutex();

        let la = world.lock_async(a, mutex).unwrap();
        assert_eq!(world.activity_state(la), Ok(ActivityState::Finished));
        assert_eq!(world.try_lock(b, mutex), Ok(false));
        let lb = world.lock_async(b, mutex).unwrap();
        let lc = world.lock_async(c, mutex).unwrap();
        assert_eq!(world.activity_state(lb), Ok(ActivityState::Started));

        assert_eq!(world.unlock(b, mutex), Err(Error::InvalidMutex(mutex)));
        world.unlock(a, mutex).unwrap();
        assert_eq!(world.mutex_owner(mutex), Ok(Some(b)));
        assert_eq!(world.activity_state(lb), Ok(ActivityState::Finished));
        assert_eq!(world.activity_state(lc), Ok(ActivityState::Started));
        // pending lock requests never complete on their own
        assert_eq!(world.next_event_date(), None);
    }

    #[test]
    fn canceled_requests_are_skipped() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut world = World::new(SimulationConfig::default(), Platform::default());
        let a = world.insert_test_actor("a");
        let b = world.insert_test_actor("b");
        let c = world.insert_test_actor("c");
        let mutex = world.create_mutex();
        assert_eq!(world.try_lock(a, mutex), Ok(true));
        let lb = world.lock_async(b, mutex).unwrap();
        world.lock_async(c, mutex).unwrap();
        world.cancel_activity(lb);
        world.unlock(a, mutex).unwrap();
        assert_eq!(world.mutex_owner(mutex), Ok(Some(c)));
    }
}
