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

//! Actor records and their lifecycle: creation, termination, kill,
//! suspension, and host failures.

use super::activity::ActivityKind;
use super::simcall::{Resumer, Simcall};
use super::timer::TimerId;
use super::{actor_error, World};
use crate::{ActivityId, ActorContext, ActorId, Error, HostId, LinkId, ResourceId};
use futures::future::LocalBoxFuture;
use std::collections::BTreeMap;
use std::rc::Rc;

/// The entry point of an actor. Called again with a fresh context each time
/// the actor is (re)started.
pub type ActorCode = Rc<dyn Fn(ActorContext) -> LocalBoxFuture<'static, Result<(), Error>>>;

/// How an actor left the simulation.
#[derive(Clone, Debug, PartialEq)]
pub enum ActorExit {
    Finished,
    Failed(Error),
    /// Killed by another actor, by its host being turned off, or because
    /// only daemons were left.
    Killed,
}

/// What is needed to start an actor, kept to restart it on host reboot.
#[derive(Clone)]
pub(crate) struct ActorTemplate {
    pub(crate) name: String,
    pub(crate) host: HostId,
    pub(crate) code: ActorCode,
    pub(crate) daemon: bool,
    pub(crate) auto_restart: bool,
    pub(crate) properties: BTreeMap<String, String>,
}

impl ActorTemplate {
    pub(crate) fn new(name: &str, host: HostId, code: ActorCode) -> Self {
        Self {
            name: name.to_string(),
            host,
            code,
            daemon: false,
            auto_restart: false,
            properties: BTreeMap::new(),
        }
    }
}

pub(crate) struct ActorRecord {
    pub(crate) id: ActorId,
    pub(crate) name: String,
    pub(crate) host: HostId,
    pub(crate) code: ActorCode,
    pub(crate) daemon: bool,
    pub(crate) auto_restart: bool,
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) suspended: bool,
    /// Woken up while suspended; goes back to the ready list on resume.
    pub(crate) parked: bool,
    /// Already on the ready list.
    pub(crate) scheduled: bool,
    pub(crate) waiting_on: Option<ActivityId>,
    pub(crate) simcall: Option<Simcall>,
    /// Set when the actor suspended itself.
    pub(crate) suspend_resumer: Option<Resumer<()>>,
    pub(crate) joiners: Vec<Resumer<()>>,
    pub(crate) pending_timer: Option<TimerId>,
}

impl ActorRecord {
    fn template(&self) -> ActorTemplate {
        ActorTemplate {
            name: self.name.clone(),
            host: self.host,
            code: self.code.clone(),
            daemon: self.daemon,
            auto_restart: self.auto_restart,
            properties: self.properties.clone(),
        }
    }
}

impl World {
    /// Register a new actor and put it on the ready list. Its continuation is
    /// created by the maestro before the next scheduling round.
    pub(crate) fn create_actor(&mut self, template: ActorTemplate) -> Result<ActorId, Error> {
        if !self.is_host_on(template.host)? {
            return Err(Error::InvalidHost(template.host));
        }
        let pid = self.next_pid();
        log::info!(
            "[{:.6}] Actor {} ({}) starts on {}",
            self.clock,
            pid,
            template.name,
            template.host
        );
        self.actors.insert(
            pid,
            ActorRecord {
                id: pid,
                name: template.name,
                host: template.host,
                code: template.code,
                daemon: template.daemon,
                auto_restart: template.auto_restart,
                properties: template.properties,
                suspended: false,
                parked: false,
                scheduled: true,
                waiting_on: None,
                simcall: None,
                suspend_resumer: None,
                joiners: Vec::new(),
                pending_timer: None,
            },
        );
        self.ready.push_back(pid);
        self.spawned.push(pid);
        Ok(pid)
    }

    pub(crate) fn record(&self, pid: ActorId) -> Result<&ActorRecord, Error> {
        self.actors.get(&pid).ok_or_else(|| actor_error(pid))
    }

    pub(crate) fn record_mut(&mut self, pid: ActorId) -> Result<&mut ActorRecord, Error> {
        self.actors.get_mut(&pid).ok_or_else(|| actor_error(pid))
    }

    pub fn actor_name(&self, pid: ActorId) -> Result<&str, Error> {
        Ok(&self.record(pid)?.name)
    }

    pub fn actor_host(&self, pid: ActorId) -> Result<HostId, Error> {
        Ok(self.record(pid)?.host)
    }

    pub fn actor_property(&self, pid: ActorId, key: &str) -> Result<Option<String>, Error> {
        Ok(self.record(pid)?.properties.get(key).cloned())
    }

    pub fn set_actor_property(&mut self, pid: ActorId, key: &str, value: &str) -> Result<(), Error> {
        self.record_mut(pid)?
            .properties
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn daemonize(&mut self, pid: ActorId) -> Result<(), Error> {
        self.record_mut(pid)?.daemon = true;
        Ok(())
    }

    pub fn set_auto_restart(&mut self, pid: ActorId, auto_restart: bool) -> Result<(), Error> {
        self.record_mut(pid)?.auto_restart = auto_restart;
        Ok(())
    }

    /// Called by the maestro when the continuation of `pid` completed.
    pub(crate) fn actor_ended(&mut self, pid: ActorId, result: &Result<(), Error>) {
        let exit = match result {
            Ok(()) => ActorExit::Finished,
            Err(e) => {
                if e.is_local() {
                    log::warn!("[{:.6}] Actor {} ends on {}", self.clock, pid, e);
                }
                ActorExit::Failed(e.clone())
            }
        };
        self.cleanup_actor(pid, exit);
    }

    pub(crate) fn kill_actor(&mut self, pid: ActorId) -> Result<(), Error> {
        if !self.actors.contains_key(&pid) {
            return Err(actor_error(pid));
        }
        self.cleanup_actor(pid, ActorExit::Killed);
        Ok(())
    }

    /// Tear down every trace of `pid` in the world. Its continuation is
    /// dropped by the maestro when it reaps `dead`.
    fn cleanup_actor(&mut self, pid: ActorId, exit: ActorExit) -> Option<ActorRecord> {
        let record = self.actors.remove(&pid)?;
        log::info!(
            "[{:.6}] Actor {} ({}) exits: {:?}",
            self.clock,
            pid,
            record.name,
            exit
        );
        self.ready.retain(|&p| p != pid);
        if let Some(timer) = record.pending_timer {
            self.timers.cancel(timer);
        }

        let involved = self
            .activities
            .values()
            .filter(|a| a.owner == pid || a.holders.contains(&pid))
            .map(|a| a.id)
            .collect::<Vec<_>>();
        for id in involved {
            self.abandon_activity(pid, id);
        }

        for mutex in 0..self.mutexes.len() {
            if self.mutexes[mutex].owner == Some(pid) {
                self.hand_off_mutex(crate::MutexId(mutex));
            }
        }
        for joiner in &record.joiners {
            joiner.resume(self, Ok(()));
        }
        self.exits.insert(pid, exit);
        self.dead.push(pid);
        Some(record)
    }

    /// `pid` is going away: stop what it was doing and drop its hold on
    /// activity `id`.
    fn abandon_activity(&mut self, pid: ActorId, id: ActivityId) {
        let (terminal, comm_peer) = match self.activities.get(&id) {
            Some(a) => {
                let peer = match &a.kind {
                    ActivityKind::Comm {
                        sender, receiver, ..
                    } => {
                        if *sender == Some(pid) {
                            *receiver
                        } else {
                            *sender
                        }
                    }
                    _ => None,
                };
                (a.state.is_terminal(), peer)
            }
            None => return,
        };
        if !terminal {
            match comm_peer {
                Some(_) => self.fail_activity(id, Error::Killed(pid)),
                None => self.cancel_activity(id),
            }
        }
        self.drop_holder(pid, id);
    }

    /// Kill every actor of `host` and turn its resources off. Auto-restart
    /// actors are started again by [`World::turn_on_host`].
    pub fn turn_off_host(&mut self, host: HostId) -> Result<(), Error> {
        let resources = self.host_resources(host)?;
        log::info!("[{:.6}] Turning {} off", self.clock, host);
        for &resource in &resources {
            self.platform.resources_mut().get_mut(resource)?.set_on(false);
            self.fail_resource(resource);
        }
        let comms = self
            .activities
            .values()
            .filter(|a| !a.state.is_terminal() && a.touches_host(host))
            .map(|a| a.id)
            .collect::<Vec<_>>();
        for id in comms {
            self.fail_activity(id, Error::ResourceFailure(id));
        }

        let victims = self
            .actors
            .values()
            .filter(|a| a.host == host)
            .map(|a| a.id)
            .collect::<Vec<_>>();
        for pid in victims {
            if let Some(record) = self.cleanup_actor(pid, ActorExit::Killed) {
                if record.auto_restart {
                    self.boot_list
                        .entry(host)
                        .or_default()
                        .push(record.template());
                }
            }
        }
        Ok(())
    }

    /// Turn the resources of `host` back on and restart its auto-restart
    /// actors, with new pids. Returns those pids.
    pub fn turn_on_host(&mut self, host: HostId) -> Result<Vec<ActorId>, Error> {
        let resources = self.host_resources(host)?;
        log::info!("[{:.6}] Turning {} on", self.clock, host);
        for resource in resources {
            self.platform.resources_mut().get_mut(resource)?.set_on(true);
        }
        self.rates_dirty = true;
        let mut restarted = Vec::new();
        for template in self.boot_list.remove(&host).unwrap_or_default() {
            restarted.push(self.create_actor(template)?);
        }
        Ok(restarted)
    }

    pub fn turn_off_link(&mut self, link: LinkId) -> Result<(), Error> {
        log::info!("[{:.6}] Turning {} off", self.clock, link);
        self.platform.resources_mut().get_mut(link)?.set_on(false);
        self.fail_resource(link);
        Ok(())
    }

    pub fn turn_on_link(&mut self, link: LinkId) -> Result<(), Error> {
        log::info!("[{:.6}] Turning {} on", self.clock, link);
        self.platform.resources_mut().get_mut(link)?.set_on(true);
        self.rates_dirty = true;
        Ok(())
    }

    pub fn is_host_on(&self, host: HostId) -> Result<bool, Error> {
        let cpu = self.platform.resources().host(host)?.cpu();
        Ok(self.platform.resources().get(cpu)?.is_on())
    }

    fn host_resources(&self, host: HostId) -> Result<Vec<ResourceId>, Error> {
        let resources = self.platform.resources();
        let h = resources.host(host)?;
        let mut ids = vec![h.cpu()];
        for &disk in h.disks() {
            if let Some(d) = resources.disk(disk) {
                ids.push(d.read());
                ids.push(d.write());
            }
        }
        Ok(ids)
    }

    /// Suspend `pid`. When an actor suspends itself, `resumer` is answered
    /// once another actor resumes it.
    pub(crate) fn suspend_actor(
        &mut self,
        pid: ActorId,
        resumer: Option<Resumer<()>>,
    ) -> Result<(), Error> {
        let record = self.record_mut(pid)?;
        if record.suspended {
            if let Some(r) = resumer {
                record.suspend_resumer = Some(r);
            }
            return Ok(());
        }
        record.suspended = true;
        record.suspend_resumer = resumer;
        log::debug!("[{:.6}] Suspending {}", self.clock, pid);
        self.set_activities_suspended(pid, true);
        Ok(())
    }

    pub(crate) fn resume_actor(&mut self, pid: ActorId) -> Result<(), Error> {
        let record = self.record_mut(pid)?;
        if !record.suspended {
            return Ok(());
        }
        record.suspended = false;
        let parked = std::mem::take(&mut record.parked);
        let resumer = record.suspend_resumer.take();
        log::debug!("[{:.6}] Resuming {}", self.clock, pid);
        self.set_activities_suspended(pid, false);
        if let Some(r) = resumer {
            r.resume(self, Ok(()));
        } else if parked {
            self.wake(pid);
        }
        Ok(())
    }

    fn set_activities_suspended(&mut self, pid: ActorId, suspended: bool) {
        for activity in self.activities.values_mut() {
            if activity.owner == pid && !activity.state.is_terminal() {
                activity.suspended = suspended;
            }
        }
        self.rates_dirty = true;
    }

    /// Answer `resumer` when `target` leaves the simulation.
    pub(crate) fn join_actor(&mut self, target: ActorId, resumer: Resumer<()>) {
        match self.actors.get_mut(&target) {
            Some(record) => record.joiners.push(resumer),
            None => {
                resumer.resume(self, Ok(()));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_test_actor(&mut self, name: &str) -> ActorId {
        let pid = self.next_pid();
        let code: ActorCode = Rc::new(|_| -> LocalBoxFuture<'static, Result<(), Error>> {
            Box::pin(async { Ok(()) })
        });
        self.actors.insert(
            pid,
            ActorRecord {
                id: pid,
                name: name.to_string(),
                host: HostId(0),
                code,
                daemon: false,
                auto_restart: false,
                properties: BTreeMap::new(),
                suspended: false,
                parked: false,
                scheduled: true,
                waiting_on: None,
                simcall: None,
                suspend_resumer: None,
                joiners: Vec::new(),
                pending_timer: None,
            },
        );
        self.ready.push_back(pid);
        pid
    }
}

#[cfg(test)]
mod actor_tests {
    use super::*;
    use crate::{Platform, SimulationConfig, ZoneKind};

    fn world() -> (World, HostId) {
        let mut platform = Platform::default();
        let zone = platform.create_zone("z", ZoneKind::Full, None).unwrap();
        let host = platform.add_host(zone, "h", 1e9).unwrap();
        platform.seal_all().unwrap();
        (World::new(SimulationConfig::default(), platform), host)
    }

    fn noop() -> ActorCode {
        Rc::new(|_| -> LocalBoxFuture<'static, Result<(), Error>> {
            Box::pin(async { Ok(()) })
        })
    }

    #[test]
    fn pids_are_never_reused() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut world, host) = world();
        let a = world.create_actor(ActorTemplate::new("a", host, noop())).unwrap();
        world.kill_actor(a).unwrap();
        let b = world.create_actor(ActorTemplate::new("b", host, noop())).unwrap();
        assert!(b > a);
        assert_eq!(world.actor_exit(a), Some(&ActorExit::Killed));
        assert_eq!(world.kill_actor(a), Err(Error::InvalidActor(a)));
        assert_eq!(world.dead, vec![a]);
    }

    #[test]
    fn auto_restart_actors_come_back_with_their_host() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut world, host) = world();
        let a = world.create_actor(ActorTemplate::new("a", host, noop())).unwrap();
        let b = world.create_actor(ActorTemplate::new("b", host, noop())).unwrap();
        world.set_auto_restart(a, true).unwrap();
        world.set_actor_property(a, "role", "server").unwrap();

        world.turn_off_host(host).unwrap();
        assert_eq!(world.actor_count(), 0);
        assert!(!world.is_host_on(host).unwrap());
        assert_eq!(
            world.create_actor(ActorTemplate::new("c", host, noop())),
            Err(Error::InvalidHost(host))
        );

        let restarted = world.turn_on_host(host).unwrap();
        assert_eq!(restarted.len(), 1);
        let a2 = restarted[0];
        assert!(a2 > b);
        assert_eq!(world.actor_name(a2).unwrap(), "a");
        assert_eq!(
            world.actor_property(a2, "role").unwrap(),
            Some("server".to_string())
        );
    }

    #[test]
    fn resume_reschedules_a_parked_actor() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut world, host) = world();
        let a = world.create_actor(ActorTemplate::new("a", host, noop())).unwrap();
        world.ready.clear();
        world.record_mut(a).unwrap().scheduled = false;

        world.suspend_actor(a, None).unwrap();
        world.wake(a);
        assert!(world.ready.is_empty());
        assert!(world.record(a).unwrap().parked);

        world.resume_actor(a).unwrap();
        assert_eq!(world.ready.iter().copied().collect::<Vec<_>>(), vec![a]);
    }
}
