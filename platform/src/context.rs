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

//! The handle through which actor code talks to the simulation.
//!
//! Every method that reads or mutates the world is a simcall: the actor
//! yields, the maestro runs the request, and the actor resumes with the
//! answer. Blocking operations (waiting on an activity, locking a mutex,
//! joining an actor) only resume once the awaited event happened.

use crate::kernel::actor::{ActorCode, ActorTemplate};
use crate::kernel::simcall::{Simcall, SimcallFuture, SimcallKind, SimcallObserver};
use crate::kernel::{ActivityState, IoOp, Resumer, World};
use crate::{ActivityId, ActorId, DiskId, Error, HostId, LinkId, MutexId, ResourceId, Route};
use futures::future::LocalBoxFuture;
use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

#[derive(Clone)]
pub struct ActorContext {
    world: Rc<RefCell<World>>,
    pid: ActorId,
    host: HostId,
}

impl ActorContext {
    pub(crate) fn new(world: Rc<RefCell<World>>, pid: ActorId, host: HostId) -> Self {
        Self { world, pid, host }
    }

    pub fn pid(&self) -> ActorId {
        self.pid
    }

    /// The host this actor runs on.
    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn now(&self) -> f64 {
        self.world.borrow().clock()
    }

    /// Run `code` in the maestro and resume with its result.
    pub fn run_answered<T, F>(
        &self,
        observer: SimcallObserver,
        code: F,
    ) -> impl Future<Output = Result<T, Error>>
    where
        T: 'static,
        F: FnOnce(&mut World) -> Result<T, Error> + 'static,
    {
        let (simcall, slot) = Simcall::answered(SimcallKind::Answered, observer, code);
        SimcallFuture::new(self.world.clone(), self.pid, simcall, slot)
    }

    /// Run `code` in the maestro and stay blocked until the [`Resumer`] it
    /// receives is called.
    pub fn run_blocking<T, F>(
        &self,
        observer: SimcallObserver,
        code: F,
    ) -> impl Future<Output = Result<T, Error>>
    where
        T: 'static,
        F: FnOnce(&mut World, Resumer<T>) -> Result<(), Error> + 'static,
    {
        let (simcall, slot) = Simcall::blocking(observer, code);
        SimcallFuture::new(self.world.clone(), self.pid, simcall, slot)
    }

    /// Read or update a simulation object. Only goes through the maestro when
    /// the configuration asks for full marshalling.
    pub async fn run_object_access<T, F>(&self, item: &str, code: F) -> Result<T, Error>
    where
        T: 'static,
        F: FnOnce(&mut World) -> Result<T, Error> + 'static,
    {
        let marshal = self.world.borrow().config().marshal_object_access();
        if !marshal {
            let mut world = self.world.borrow_mut();
            return code(&mut *world);
        }
        let (simcall, slot) = Simcall::answered(
            SimcallKind::ObjectAccess,
            SimcallObserver::new(item),
            code,
        );
        SimcallFuture::new(self.world.clone(), self.pid, simcall, slot).await
    }

    // Actors

    /// Start a new actor on `host`.
    pub async fn spawn<F, Fut>(&self, name: &str, host: HostId, f: F) -> Result<ActorId, Error>
    where
        F: Fn(ActorContext) -> Fut + 'static,
        Fut: Future<Output = Result<(), Error>> + 'static,
    {
        let code: ActorCode = Rc::new(move |ctx| -> LocalBoxFuture<'static, Result<(), Error>> {
            Box::pin(f(ctx))
        });
        let template = ActorTemplate::new(name, host, code);
        self.run_answered(SimcallObserver::new(format!("spawn({})", name)), move |w| {
            w.create_actor(template)
        })
        .await
    }

    /// Kill `pid`. Killing oneself never returns.
    pub async fn kill(&self, pid: ActorId) -> Result<(), Error> {
        self.run_answered(SimcallObserver::new(format!("kill({})", pid)), move |w| {
            w.kill_actor(pid)
        })
        .await
    }

    /// Suspend `pid`. An actor suspending itself blocks until resumed.
    pub async fn suspend(&self, pid: ActorId) -> Result<(), Error> {
        let observer = SimcallObserver::new(format!("suspend({})", pid));
        if pid == self.pid {
            self.run_blocking(observer, move |w, resumer| w.suspend_actor(pid, Some(resumer)))
                .await
        } else {
            self.run_answered(observer, move |w| w.suspend_actor(pid, None))
                .await
        }
    }

    pub async fn resume(&self, pid: ActorId) -> Result<(), Error> {
        self.run_answered(SimcallObserver::new(format!("resume({})", pid)), move |w| {
            w.resume_actor(pid)
        })
        .await
    }

    /// Block until `pid` left the simulation.
    pub async fn join(&self, pid: ActorId) -> Result<(), Error> {
        self.run_blocking(SimcallObserver::new(format!("join({})", pid)), move |w, r| {
            w.join_actor(pid, r);
            Ok(())
        })
        .await
    }

    /// Daemons are killed as soon as no regular actor is left.
    pub async fn daemonize(&self) -> Result<(), Error> {
        let pid = self.pid;
        self.run_answered(SimcallObserver::new("daemonize"), move |w| w.daemonize(pid))
            .await
    }

    /// Restart this actor from its entry point when its host is turned back
    /// on after a failure.
    pub async fn set_auto_restart(&self, auto_restart: bool) -> Result<(), Error> {
        let pid = self.pid;
        self.run_answered(SimcallObserver::hidden("set_auto_restart"), move |w| {
            w.set_auto_restart(pid, auto_restart)
        })
        .await
    }

    pub async fn set_property(&self, key: &str, value: &str) -> Result<(), Error> {
        let (pid, key, value) = (self.pid, key.to_string(), value.to_string());
        self.run_object_access("set_property", move |w| {
            w.set_actor_property(pid, &key, &value)
        })
        .await
    }

    pub async fn property(&self, key: &str) -> Result<Option<String>, Error> {
        let (pid, key) = (self.pid, key.to_string());
        self.run_object_access("property", move |w| w.actor_property(pid, &key))
            .await
    }

    // Activities

    /// Create an exec of `flops` on this actor's host, without starting it.
    pub async fn exec_init(&self, flops: f64) -> Result<ActivityId, Error> {
        let (pid, host) = (self.pid, self.host);
        self.run_answered(SimcallObserver::new(format!("exec_init({})", flops)), move |w| {
            w.exec_init(pid, host, flops)
        })
        .await
    }

    pub async fn exec_async(&self, flops: f64) -> Result<ActivityId, Error> {
        let (pid, host) = (self.pid, self.host);
        self.run_answered(SimcallObserver::new(format!("exec({})", flops)), move |w| {
            let id = w.exec_init(pid, host, flops)?;
            w.start_activity(id)?;
            Ok(id)
        })
        .await
    }

    /// Compute `flops` on this actor's host.
    pub async fn execute(&self, flops: f64) -> Result<(), Error> {
        let id = self.exec_async(flops).await?;
        self.wait_and_release(id).await
    }

    pub async fn io_async(&self, disk: DiskId, op: IoOp, bytes: f64) -> Result<ActivityId, Error> {
        let pid = self.pid;
        self.run_answered(
            SimcallObserver::new(format!("io({:?}, {}, {})", op, disk, bytes)),
            move |w| {
                let id = w.io_init(pid, disk, op, bytes)?;
                w.start_activity(id)?;
                Ok(id)
            },
        )
        .await
    }

    pub async fn io_read(&self, disk: DiskId, bytes: f64) -> Result<(), Error> {
        let id = self.io_async(disk, IoOp::Read, bytes).await?;
        self.wait_and_release(id).await
    }

    pub async fn io_write(&self, disk: DiskId, bytes: f64) -> Result<(), Error> {
        let id = self.io_async(disk, IoOp::Write, bytes).await?;
        self.wait_and_release(id).await
    }

    pub async fn sleep_async(&self, duration: f64) -> Result<ActivityId, Error> {
        let pid = self.pid;
        self.run_answered(SimcallObserver::new(format!("sleep({})", duration)), move |w| {
            let id = w.sleep_init(pid, duration);
            w.start_activity(id)?;
            Ok(id)
        })
        .await
    }

    pub async fn sleep_for(&self, duration: f64) -> Result<(), Error> {
        let id = self.sleep_async(duration).await?;
        self.wait_and_release(id).await
    }

    pub async fn start(&self, id: ActivityId) -> Result<(), Error> {
        self.run_answered(SimcallObserver::new(format!("start({})", id)), move |w| {
            w.start_activity(id)
        })
        .await
    }

    /// Block until `id` is terminal. Resumes with its failure, if any.
    pub async fn wait(&self, id: ActivityId) -> Result<(), Error> {
        let pid = self.pid;
        self.run_blocking(SimcallObserver::new(format!("wait({})", id)), move |w, r| {
            w.wait_activity(pid, id, r)
        })
        .await
    }

    /// Like [`ActorContext::wait`], giving up with `Timeout` after `timeout`
    /// seconds. The activity keeps running.
    pub async fn wait_for(&self, id: ActivityId, timeout: f64) -> Result<(), Error> {
        let pid = self.pid;
        self.run_blocking(
            SimcallObserver::new(format!("wait_for({}, {})", id, timeout)),
            move |w, r| w.wait_activity_for(pid, id, timeout, r),
        )
        .await
    }

    pub async fn test(&self, id: ActivityId) -> Result<bool, Error> {
        self.run_answered(SimcallObserver::new(format!("test({})", id)), move |w| {
            w.test_activity(id)
        })
        .await
    }

    pub async fn cancel(&self, id: ActivityId) -> Result<(), Error> {
        self.run_answered(SimcallObserver::new(format!("cancel({})", id)), move |w| {
            w.activity_state(id)?;
            w.cancel_activity(id);
            Ok(())
        })
        .await
    }

    /// Cap the rate of `id`, in units of its amount per second.
    pub async fn set_bound(&self, id: ActivityId, bound: f64) -> Result<(), Error> {
        self.run_answered(
            SimcallObserver::new(format!("set_bound({}, {})", id, bound)),
            move |w| w.set_bound(id, bound),
        )
        .await
    }

    pub async fn remaining_ratio(&self, id: ActivityId) -> Result<f64, Error> {
        self.run_answered(SimcallObserver::hidden("remaining_ratio"), move |w| {
            w.remaining_ratio(id)
        })
        .await
    }

    /// Give up this actor's handle on `id`.
    pub async fn release(&self, id: ActivityId) -> Result<(), Error> {
        let pid = self.pid;
        self.run_answered(SimcallObserver::hidden(format!("release({})", id)), move |w| {
            w.release_activity(pid, id)
        })
        .await
    }

    pub async fn activity_state(&self, id: ActivityId) -> Result<ActivityState, Error> {
        self.run_object_access("activity_state", move |w| w.activity_state(id))
            .await
    }

    pub async fn activity_rate(&self, id: ActivityId) -> Result<f64, Error> {
        self.run_object_access("activity_rate", move |w| w.activity_rate(id))
            .await
    }

    async fn wait_and_release(&self, id: ActivityId) -> Result<(), Error> {
        let result = self.wait(id).await;
        self.release(id).await?;
        result
    }

    // Mailboxes

    pub async fn put_async<T: Any>(
        &self,
        mailbox: &str,
        payload: T,
        bytes: f64,
    ) -> Result<ActivityId, Error> {
        let (pid, name) = (self.pid, mailbox.to_string());
        let payload: Box<dyn Any> = Box::new(payload);
        self.run_answered(
            SimcallObserver::new(format!("put({}, {})", mailbox, bytes)),
            move |w| w.put_async(pid, &name, payload, bytes),
        )
        .await
    }

    /// Send `payload`, accounted as `bytes` on the network, and block until
    /// it was received.
    pub async fn put<T: Any>(&self, mailbox: &str, payload: T, bytes: f64) -> Result<(), Error> {
        let id = self.put_async(mailbox, payload, bytes).await?;
        self.wait_and_release(id).await
    }

    pub async fn get_async(&self, mailbox: &str) -> Result<ActivityId, Error> {
        let (pid, name) = (self.pid, mailbox.to_string());
        self.run_answered(SimcallObserver::new(format!("get({})", mailbox)), move |w| {
            w.get_async(pid, &name)
        })
        .await
    }

    /// Block until a message arrives on `mailbox`. Fails with
    /// `InvalidPayload` if it does not hold a `T`.
    pub async fn get<T: Any>(&self, mailbox: &str) -> Result<T, Error> {
        let id = self.get_async(mailbox).await?;
        if let Err(e) = self.wait(id).await {
            self.release(id).await?;
            return Err(e);
        }
        let payload = self.take_payload::<T>(id).await;
        self.release(id).await?;
        payload
    }

    /// The payload of a finished receive.
    pub async fn take_payload<T: Any>(&self, id: ActivityId) -> Result<T, Error> {
        let pid = self.pid;
        let payload = self
            .run_answered(SimcallObserver::hidden("take_payload"), move |w| {
                w.take_payload(pid, id)
            })
            .await?;
        payload
            .downcast::<T>()
            .map(|p| *p)
            .map_err(|_| Error::InvalidPayload(id))
    }

    // Mutexes

    pub async fn lock(&self, mutex: MutexId) -> Result<(), Error> {
        let pid = self.pid;
        let id = self
            .run_answered(SimcallObserver::new(format!("lock({})", mutex)), move |w| {
                w.lock_async(pid, mutex)
            })
            .await?;
        self.wait_and_release(id).await
    }

    pub async fn try_lock(&self, mutex: MutexId) -> Result<bool, Error> {
        let pid = self.pid;
        self.run_answered(SimcallObserver::new(format!("try_lock({})", mutex)), move |w| {
            w.try_lock(pid, mutex)
        })
        .await
    }

    pub async fn unlock(&self, mutex: MutexId) -> Result<(), Error> {
        let pid = self.pid;
        self.run_answered(SimcallObserver::new(format!("unlock({})", mutex)), move |w| {
            w.unlock(pid, mutex)
        })
        .await
    }

    // Platform

    /// The route from the host of this actor to `dst`.
    pub async fn route_to(&self, dst: HostId) -> Result<Route, Error> {
        let src = self.host;
        self.run_object_access("route", move |w| w.host_route(src, dst))
            .await
    }

    pub async fn route_latency(&self, src: HostId, dst: HostId) -> Result<f64, Error> {
        self.run_object_access("route_latency", move |w| {
            Ok(w.host_route(src, dst)?.latency)
        })
        .await
    }

    pub async fn route_bandwidth(&self, src: HostId, dst: HostId) -> Result<f64, Error> {
        self.run_object_access("route_bandwidth", move |w| {
            let platform = w.platform();
            let src = platform.resources().host(src)?.netpoint();
            let dst = platform.resources().host(dst)?.netpoint();
            platform.get_route_bandwidth(src, dst)
        })
        .await
    }

    pub async fn resource_load(&self, resource: ResourceId) -> Result<usize, Error> {
        self.run_object_access("resource_load", move |w| Ok(w.resource_load(resource)))
            .await
    }

    pub async fn turn_off_host(&self, host: HostId) -> Result<(), Error> {
        self.run_answered(SimcallObserver::new(format!("turn_off({})", host)), move |w| {
            w.turn_off_host(host)
        })
        .await
    }

    /// Turn `host` back on. Returns the pids of the restarted actors.
    pub async fn turn_on_host(&self, host: HostId) -> Result<Vec<ActorId>, Error> {
        self.run_answered(SimcallObserver::new(format!("turn_on({})", host)), move |w| {
            w.turn_on_host(host)
        })
        .await
    }

    pub async fn turn_off_link(&self, link: LinkId) -> Result<(), Error> {
        self.run_answered(SimcallObserver::new(format!("turn_off({})", link)), move |w| {
            w.turn_off_link(link)
        })
        .await
    }

    pub async fn turn_on_link(&self, link: LinkId) -> Result<(), Error> {
        self.run_answered(SimcallObserver::new(format!("turn_on({})", link)), move |w| {
            w.turn_on_link(link)
        })
        .await
    }
}
