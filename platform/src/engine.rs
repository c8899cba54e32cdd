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

//! The maestro: owns the world and the actor continuations, and drives the
//! simulation round after round.

use crate::kernel::actor::{ActorCode, ActorTemplate};
use crate::kernel::{ActorExit, SimcallKind, SimcallObserver, TraceEntry, World};
use crate::{ActorContext, ActorId, Error, HostId, MutexId, Platform, SimulationConfig};
use futures::future::LocalBoxFuture;
use futures::task::noop_waker;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

/// One simulation run.
///
/// Build the platform through [`Engine::platform_mut`], register the initial
/// actors with [`Engine::add_actor`], then call [`Engine::run`]. Engines share
/// nothing: several of them can live in the same process.
pub struct Engine {
    world: Rc<RefCell<World>>,
    tasks: BTreeMap<ActorId, LocalBoxFuture<'static, Result<(), Error>>>,
    rng: Xoshiro256StarStar,
}

impl Engine {
    pub fn new(config: SimulationConfig) -> Self {
        let platform = Platform::new(&config.loopback);
        Self::with_platform(config, platform)
    }

    pub fn with_platform(config: SimulationConfig, platform: Platform) -> Self {
        let rng = Xoshiro256StarStar::seed_from_u64(config.seed);
        Self {
            world: Rc::new(RefCell::new(World::new(config, platform))),
            tasks: BTreeMap::new(),
            rng,
        }
    }

    pub fn platform(&self) -> Ref<'_, Platform> {
        Ref::map(self.world.borrow(), |w| w.platform())
    }

    pub fn platform_mut(&self) -> RefMut<'_, Platform> {
        RefMut::map(self.world.borrow_mut(), |w| w.platform_mut())
    }

    pub fn world(&self) -> Ref<'_, World> {
        self.world.borrow()
    }

    pub fn clock(&self) -> f64 {
        self.world.borrow().clock()
    }

    pub fn trace(&self) -> Vec<TraceEntry> {
        self.world.borrow().trace().to_vec()
    }

    pub fn actor_exit(&self, pid: ActorId) -> Option<ActorExit> {
        self.world.borrow().actor_exit(pid).cloned()
    }

    /// Register an actor running `f` on `host`. It starts with the first
    /// scheduling round.
    pub fn add_actor<F, Fut>(&mut self, name: &str, host: HostId, f: F) -> Result<ActorId, Error>
    where
        F: Fn(ActorContext) -> Fut + 'static,
        Fut: Future<Output = Result<(), Error>> + 'static,
    {
        let code: ActorCode = Rc::new(move |ctx| -> LocalBoxFuture<'static, Result<(), Error>> {
            Box::pin(f(ctx))
        });
        let pid = self
            .world
            .borrow_mut()
            .create_actor(ActorTemplate::new(name, host, code))?;
        self.spawn_tasks();
        Ok(pid)
    }

    /// Run `code` against the world right away, from the maestro.
    pub fn run_answered<T, F>(&mut self, observer: SimcallObserver, code: F) -> Result<T, Error>
    where
        F: FnOnce(&mut World) -> Result<T, Error>,
    {
        let mut world = self.world.borrow_mut();
        if observer.visible {
            let time = world.clock();
            world.trace.push(TraceEntry {
                time,
                actor: ActorId::MAESTRO,
                kind: SimcallKind::Answered,
                call: observer.call,
            });
        }
        code(&mut *world)
    }

    /// Run `f` against the world at simulated date `date`.
    pub fn schedule<F>(&mut self, date: f64, f: F)
    where
        F: FnOnce(&mut World) + 'static,
    {
        self.world.borrow_mut().timers.add(date, Box::new(f));
    }

    pub fn create_mutex(&mut self) -> MutexId {
        self.world.borrow_mut().create_mutex()
    }

    /// Seal the platform and run until no actor is left. Returns the final
    /// simulated date.
    pub fn run(&mut self) -> Result<f64, Error> {
        self.world.borrow_mut().platform_mut().seal_all()?;
        log::info!(
            "Simulation starts with {} actors",
            self.world.borrow().actor_count()
        );
        let max_date = self.world.borrow().config().max_date;
        loop {
            while !self.world.borrow().ready.is_empty() {
                self.run_round()?;
            }
            if self.world.borrow_mut().kill_lonely_daemons() {
                self.reap();
                continue;
            }
            let next = self.world.borrow_mut().next_event_date();
            match next {
                Some(date) if max_date.map(|max| date > max).unwrap_or(false) => {
                    let max = max_date.unwrap_or(date);
                    log::info!("Reached the end date {:.6}", max);
                    self.world.borrow_mut().advance_to(max);
                    break;
                }
                Some(date) => {
                    self.world.borrow_mut().advance_to(date);
                    self.reap();
                    self.spawn_tasks();
                }
                None => {
                    let world = self.world.borrow();
                    let blocked = world.regular_actors();
                    if blocked.is_empty() {
                        break;
                    }
                    log::error!(
                        "[{:.6}] Deadlock, {} actors blocked:",
                        world.clock(),
                        blocked.len()
                    );
                    for line in world.describe_blocked() {
                        log::error!("  {}", line);
                    }
                    return Err(Error::Deadlock(blocked));
                }
            }
        }
        let clock = self.clock();
        log::info!("Simulation ends at {:.6}", clock);
        Ok(clock)
    }

    /// Poll every ready actor once, then handle the simcalls they issued, in
    /// the same order.
    fn run_round(&mut self) -> Result<(), Error> {
        let mut ready = self.world.borrow_mut().ready.drain(..).collect::<Vec<_>>();
        if self.world.borrow().config().randomize_schedule {
            ready.shuffle(&mut self.rng);
        }
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut blocked = Vec::with_capacity(ready.len());
        for pid in ready {
            {
                let mut world = self.world.borrow_mut();
                let record = match world.actors.get_mut(&pid) {
                    Some(r) => r,
                    None => continue,
                };
                record.scheduled = false;
                if record.suspended {
                    record.parked = true;
                    continue;
                }
            }
            let task = match self.tasks.get_mut(&pid) {
                Some(task) => task,
                None => continue,
            };
            match task.as_mut().poll(&mut cx) {
                Poll::Pending => blocked.push(pid),
                Poll::Ready(result) => {
                    self.tasks.remove(&pid);
                    self.world.borrow_mut().actor_ended(pid, &result);
                    if let Err(e) = result {
                        if !e.is_local() {
                            log::error!("Actor {} failed: {}", pid, e);
                            return Err(e);
                        }
                    }
                }
            }
        }
        for pid in blocked {
            let simcall = self.world.borrow_mut().take_simcall(pid);
            match simcall {
                Some(simcall) => self.world.borrow_mut().handle_simcall(pid, simcall),
                None => {
                    if self.world.borrow().is_alive(pid) {
                        log::warn!("Actor {} yielded without a simcall", pid);
                    }
                }
            }
        }
        self.reap();
        self.spawn_tasks();
        Ok(())
    }

    /// Drop the continuations of the actors that left the world.
    fn reap(&mut self) {
        let dead = std::mem::take(&mut self.world.borrow_mut().dead);
        for pid in dead {
            self.tasks.remove(&pid);
        }
    }

    /// Create the continuations of the actors created since the last call.
    fn spawn_tasks(&mut self) {
        let spawned = std::mem::take(&mut self.world.borrow_mut().spawned);
        for pid in spawned {
            let start = self
                .world
                .borrow()
                .actors
                .get(&pid)
                .map(|r| (r.code.clone(), r.host));
            if let Some((code, host)) = start {
                let ctx = ActorContext::new(self.world.clone(), pid, host);
                self.tasks.insert(pid, code(ctx));
            }
        }
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;
    use crate::{ActivityState, LinkConfiguration, LinkId, ZoneKind};
    use std::cell::Cell;

    /// Two hosts A and B of 1 Gflop/s joined by one link.
    fn two_hosts(
        config: SimulationConfig,
        link: LinkConfiguration,
    ) -> (Engine, HostId, HostId, LinkId) {
        let engine = Engine::new(config);
        let (a, b, l) = {
            let mut platform = engine.platform_mut();
            let zone = platform.create_zone("AS0", ZoneKind::Full, None).unwrap();
            let a = platform.add_host(zone, "A", 1e9).unwrap();
            let b = platform.add_host(zone, "B", 1e9).unwrap();
            let l = platform.add_link(zone, "L", &link).unwrap();
            let np_a = platform.resources().host(a).unwrap().netpoint();
            let np_b = platform.resources().host(b).unwrap().netpoint();
            platform
                .add_route(zone, np_a, np_b, None, None, &[l], true)
                .unwrap();
            (a, b, l)
        };
        (engine, a, b, l)
    }

    type Log = Rc<RefCell<Vec<(String, f64)>>>;

    #[test]
    fn concurrent_flows_share_a_link() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, b, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::new(100.0, 0.0));
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        for (mailbox, bytes) in [("small", 100.0), ("large", 200.0)] {
            engine
                .add_actor("sender", a, move |ctx| async move {
                    ctx.put(mailbox, bytes, bytes).await
                })
                .unwrap();
            let log = log.clone();
            engine
                .add_actor("receiver", b, move |ctx| {
                    let log = log.clone();
                    async move {
                        let id = ctx.get_async(mailbox).await?;
                        assert_eq!(ctx.activity_rate(id).await?, 50.0);
                        ctx.wait(id).await?;
                        let bytes: f64 = ctx.take_payload(id).await?;
                        ctx.release(id).await?;
                        log.borrow_mut().push((format!("{}", bytes), ctx.now()));
                        Ok(())
                    }
                })
                .unwrap();
        }
        assert_eq!(engine.run(), Ok(3.0));
        assert_eq!(
            *log.borrow(),
            vec![("100".to_string(), 2.0), ("200".to_string(), 3.0)]
        );
    }

    fn busy_world(seed: u64) -> (Vec<TraceEntry>, f64) {
        let config = SimulationConfig {
            seed,
            randomize_schedule: true,
            ..Default::default()
        };
        let (mut engine, a, b, _) = two_hosts(config, LinkConfiguration::new(1e6, 1e-3));
        for i in 0..4 {
            engine
                .add_actor(&format!("worker-{}", i), a, move |ctx| async move {
                    ctx.execute(1e8 * (i + 1) as f64).await?;
                    ctx.put("results", i, 1e4).await
                })
                .unwrap();
        }
        engine
            .add_actor("collector", b, |ctx| async move {
                for _ in 0..4 {
                    let _: i32 = ctx.get("results").await?;
                }
                Ok(())
            })
            .unwrap();
        let clock = engine.run().unwrap();
        (engine.trace(), clock)
    }

    #[test]
    fn runs_are_reproducible() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (trace1, clock1) = busy_world(7);
        let (trace2, clock2) = busy_world(7);
        assert!(!trace1.is_empty());
        assert_eq!(trace1, trace2);
        assert_eq!(clock1, clock2);
    }

    #[test]
    fn wait_for_expires_while_the_activity_goes_on() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, _, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::default());
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let seen = log.clone();
        engine
            .add_actor("waiter", a, move |ctx| {
                let log = seen.clone();
                async move {
                    let exec = ctx.exec_async(1e9).await?;
                    assert_eq!(ctx.wait_for(exec, 0.5).await, Err(Error::Timeout(exec)));
                    log.borrow_mut().push(("timeout".to_string(), ctx.now()));
                    assert_eq!(ctx.wait_for(exec, 0.0).await, Err(Error::Timeout(exec)));
                    assert_eq!(ctx.activity_state(exec).await?, ActivityState::Started);
                    ctx.wait(exec).await?;
                    log.borrow_mut().push(("done".to_string(), ctx.now()));
                    // a terminal activity is left untouched by cancel
                    ctx.cancel(exec).await?;
                    assert_eq!(ctx.test(exec).await, Ok(true));
                    ctx.release(exec).await
                }
            })
            .unwrap();
        assert_eq!(engine.run(), Ok(1.0));
        assert_eq!(
            *log.borrow(),
            vec![("timeout".to_string(), 0.5), ("done".to_string(), 1.0)]
        );
    }

    #[test]
    fn link_failure_fails_both_ends() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, b, link) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::new(100.0, 0.0));
        let failures = Rc::new(Cell::new(0));
        for (name, host) in [("sender", a), ("receiver", b)] {
            let failures = failures.clone();
            engine
                .add_actor(name, host, move |ctx| {
                    let failures = failures.clone();
                    async move {
                        let result = if ctx.host() == a {
                            ctx.put("box", (), 1000.0).await
                        } else {
                            ctx.get::<()>("box").await
                        };
                        assert!(matches!(result, Err(Error::ResourceFailure(_))));
                        failures.set(failures.get() + 1);
                        Ok(())
                    }
                })
                .unwrap();
        }
        engine
            .add_actor("chaos", a, move |ctx| async move {
                ctx.sleep_for(2.0).await?;
                ctx.turn_off_link(link).await
            })
            .unwrap();
        assert_eq!(engine.run(), Ok(2.0));
        assert_eq!(failures.get(), 2);
    }

    #[test]
    fn unrecovered_routing_failure_aborts_the_run() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut engine = Engine::new(SimulationConfig::default());
        let (a, b) = {
            let mut platform = engine.platform_mut();
            let zone = platform.create_zone("AS0", ZoneKind::Full, None).unwrap();
            let a = platform.add_host(zone, "A", 1e9).unwrap();
            let b = platform.add_host(zone, "B", 1e9).unwrap();
            (a, b)
        };
        engine
            .add_actor("sender", a, |ctx| async move { ctx.put("box", 1u8, 1.0).await })
            .unwrap();
        engine
            .add_actor("receiver", b, |ctx| async move {
                let _: u8 = ctx.get("box").await?;
                Ok(())
            })
            .unwrap();
        let (np_a, np_b) = {
            let platform = engine.platform();
            (
                platform.resources().host(a).unwrap().netpoint(),
                platform.resources().host(b).unwrap().netpoint(),
            )
        };
        assert_eq!(
            engine.run(),
            Err(Error::RoutingFailure {
                src: np_a,
                dst: np_b
            })
        );
    }

    #[test]
    fn lonely_receiver_is_a_deadlock() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, _, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::default());
        let pid = engine
            .add_actor("receiver", a, |ctx| async move {
                let _: u8 = ctx.get("nobody").await?;
                Ok(())
            })
            .unwrap();
        assert_eq!(engine.run(), Err(Error::Deadlock(vec![pid])));
    }

    #[test]
    fn daemons_die_with_the_last_regular_actor() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, _, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::default());
        let daemon = engine
            .add_actor("daemon", a, |ctx| async move {
                ctx.daemonize().await?;
                let mut result = Ok(());
                while result.is_ok() {
                    result = ctx.sleep_for(1.0).await;
                }
                result
            })
            .unwrap();
        let worker = engine
            .add_actor("worker", a, |ctx| async move { ctx.sleep_for(2.5).await })
            .unwrap();
        assert_eq!(engine.run(), Ok(2.5));
        assert_eq!(engine.actor_exit(worker), Some(ActorExit::Finished));
        assert_eq!(engine.actor_exit(daemon), Some(ActorExit::Killed));
    }

    #[test]
    fn suspended_actors_stop_their_activities() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, _, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::default());
        let woke = Rc::new(Cell::new(0.0));
        let seen = woke.clone();
        let sleeper = engine
            .add_actor("sleeper", a, move |ctx| {
                let seen = seen.clone();
                async move {
                    ctx.sleep_for(1.0).await?;
                    seen.set(ctx.now());
                    Ok(())
                }
            })
            .unwrap();
        engine
            .add_actor("controller", a, move |ctx| async move {
                ctx.suspend(sleeper).await?;
                ctx.sleep_for(2.0).await?;
                ctx.resume(sleeper).await
            })
            .unwrap();
        assert_eq!(engine.run(), Ok(3.0));
        assert_eq!(woke.get(), 3.0);
    }

    #[test]
    fn mutex_is_handed_over_in_order() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, _, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::default());
        let mutex = engine.create_mutex();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let log = log.clone();
            engine
                .add_actor(name, a, move |ctx| {
                    let log = log.clone();
                    async move {
                        ctx.lock(mutex).await?;
                        log.borrow_mut().push((name.to_string(), ctx.now()));
                        ctx.sleep_for(1.0).await?;
                        ctx.unlock(mutex).await
                    }
                })
                .unwrap();
        }
        assert_eq!(engine.run(), Ok(3.0));
        assert_eq!(
            *log.borrow(),
            vec![
                ("first".to_string(), 0.0),
                ("second".to_string(), 1.0),
                ("third".to_string(), 2.0)
            ]
        );
    }

    #[test]
    fn auto_restart_actors_survive_host_failures() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, b, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::default());
        let starts = Rc::new(Cell::new(0));
        let counter = starts.clone();
        let server = engine
            .add_actor("server", b, move |ctx| {
                let counter = counter.clone();
                async move {
                    counter.set(counter.get() + 1);
                    ctx.set_auto_restart(true).await?;
                    ctx.sleep_for(10.0).await
                }
            })
            .unwrap();
        engine
            .add_actor("operator", a, move |ctx| async move {
                ctx.sleep_for(1.0).await?;
                ctx.turn_off_host(b).await?;
                ctx.sleep_for(1.0).await?;
                let restarted = ctx.turn_on_host(b).await?;
                assert_eq!(restarted.len(), 1);
                assert!(restarted[0] > server);
                ctx.join(restarted[0]).await
            })
            .unwrap();
        assert_eq!(engine.run(), Ok(12.0));
        assert_eq!(starts.get(), 2);
        assert_eq!(engine.actor_exit(server), Some(ActorExit::Killed));
    }

    #[test]
    fn killed_actors_release_their_joiners() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, _, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::default());
        let victim = engine
            .add_actor("victim", a, |ctx| async move {
                let _: u8 = ctx.get("never").await?;
                Ok(())
            })
            .unwrap();
        engine
            .add_actor("killer", a, move |ctx| async move {
                ctx.sleep_for(1.0).await?;
                ctx.kill(victim).await?;
                ctx.join(victim).await?;
                assert_eq!(ctx.kill(victim).await, Err(Error::InvalidActor(victim)));
                Ok(())
            })
            .unwrap();
        assert_eq!(engine.run(), Ok(1.0));
        assert_eq!(engine.actor_exit(victim), Some(ActorExit::Killed));
        assert_eq!(engine.world().mailbox_len("never"), 0);
    }

    #[test]
    fn object_accesses_are_traced_only_when_marshalled() {
        let _logger = env_logger::builder().is_test(true).try_init();
        for model_checking in [false, true] {
            let config = SimulationConfig {
                model_checking,
                ..Default::default()
            };
            let (mut engine, a, _, _) = two_hosts(config, LinkConfiguration::default());
            engine
                .add_actor("a", a, |ctx| async move {
                    ctx.set_property("color", "blue").await?;
                    assert_eq!(ctx.property("color").await?, Some("blue".to_string()));
                    Ok(())
                })
                .unwrap();
            engine.run().unwrap();
            let traced = engine
                .trace()
                .iter()
                .filter(|t| t.call == "set_property")
                .count();
            assert_eq!(traced, model_checking as usize);
        }
    }

    #[test]
    fn bounded_execs_leave_their_share_unused() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, _, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::default());
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        for (name, bound) in [("bounded", Some(2.5e8)), ("free", None)] {
            let seen = log.clone();
            engine
                .add_actor(name, a, move |ctx| {
                    let log = seen.clone();
                    async move {
                        let exec = ctx.exec_async(1e9).await?;
                        if let Some(bound) = bound {
                            ctx.set_bound(exec, bound).await?;
                        }
                        ctx.wait(exec).await?;
                        ctx.release(exec).await?;
                        log.borrow_mut().push((name.to_string(), ctx.now()));
                        Ok(())
                    }
                })
                .unwrap();
        }
        // the free exec gets half of the cpu, the bounded one a quarter,
        // then the bounded one goes on alone at its bound
        assert_eq!(engine.run(), Ok(4.0));
        assert_eq!(
            *log.borrow(),
            vec![("free".to_string(), 2.0), ("bounded".to_string(), 4.0)]
        );
    }

    #[test]
    fn max_date_stops_the_run() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let config = SimulationConfig {
            max_date: Some(5.0),
            ..Default::default()
        };
        let (mut engine, a, _, _) = two_hosts(config, LinkConfiguration::default());
        engine
            .add_actor("long", a, |ctx| async move { ctx.sleep_for(100.0).await })
            .unwrap();
        assert_eq!(engine.run(), Ok(5.0));
    }

    #[test]
    fn maestro_simcalls_run_immediately() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut engine, a, b, _) =
            two_hosts(SimulationConfig::default(), LinkConfiguration::new(100.0, 1e-3));
        engine.platform_mut().seal_all().unwrap();
        let latency = engine
            .run_answered(SimcallObserver::new("latency"), |w| {
                Ok(w.host_route(a, b)?.latency)
            })
            .unwrap();
        assert_eq!(latency, 1e-3);
        assert_eq!(engine.trace()[0].actor, ActorId::MAESTRO);
    }
}
