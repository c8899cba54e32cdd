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

//! Simcalls: requests marshalled from an actor to the maestro.
//!
//! An actor builds a [`Simcall`] (a closure plus an observer), parks it in its
//! actor record and yields. The maestro later runs the closure against the
//! [`World`]. The closure writes the outcome into an answer slot shared with
//! the actor's [`SimcallFuture`], and puts the actor back on the ready list,
//! either right away (answered simcalls) or when some later event calls
//! [`Resumer::resume`] (blocking simcalls).

use super::timer::TimerId;
use super::World;
use crate::{ActorId, Error};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// The outcome of a simcall, filled by the maestro and read by the actor.
pub(crate) type AnswerSlot<T> = Rc<RefCell<Option<Result<T, Error>>>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimcallKind {
    /// The actor resumes as soon as the code ran.
    Answered,
    /// The actor resumes when something calls its [`Resumer`].
    Blocking,
    /// A simple accessor, only marshalled under parallel execution or model
    /// checking.
    ObjectAccess,
}

/// Describes a simcall to whoever inspects the schedule (the simcall trace,
/// a model checker).
#[derive(Clone, Debug, PartialEq)]
pub struct SimcallObserver {
    pub call: String,
    /// Whether the simcall appears in the trace.
    pub visible: bool,
}

impl SimcallObserver {
    pub fn new(call: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            visible: true,
        }
    }

    pub fn hidden(call: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            visible: false,
        }
    }
}

pub(crate) struct Simcall {
    pub(crate) kind: SimcallKind,
    pub(crate) observer: SimcallObserver,
    pub(crate) code: Box<dyn FnOnce(&mut World, ActorId)>,
}

impl Simcall {
    /// A simcall whose actor resumes with the value returned by `code`.
    pub(crate) fn answered<T, F>(
        kind: SimcallKind,
        observer: SimcallObserver,
        code: F,
    ) -> (Self, AnswerSlot<T>)
    where
        T: 'static,
        F: FnOnce(&mut World) -> Result<T, Error> + 'static,
    {
        let slot: AnswerSlot<T> = Rc::new(RefCell::new(None));
        let answer = slot.clone();
        let simcall = Simcall {
            kind,
            observer,
            code: Box::new(move |world, pid| {
                let result = code(world);
                *answer.borrow_mut() = Some(result);
                world.wake(pid);
            }),
        };
        (simcall, slot)
    }

    /// A simcall whose actor resumes when the [`Resumer`] handed to `code`
    /// is called. An error returned by `code` resumes the actor at once.
    pub(crate) fn blocking<T, F>(observer: SimcallObserver, code: F) -> (Self, AnswerSlot<T>)
    where
        T: 'static,
        F: FnOnce(&mut World, Resumer<T>) -> Result<(), Error> + 'static,
    {
        let slot: AnswerSlot<T> = Rc::new(RefCell::new(None));
        let answer = slot.clone();
        let simcall = Simcall {
            kind: SimcallKind::Blocking,
            observer,
            code: Box::new(move |world, pid| {
                let resumer = Resumer::new(pid, answer);
                if let Err(e) = code(world, resumer.clone()) {
                    resumer.resume(world, Err(e));
                }
            }),
        };
        (simcall, slot)
    }
}

/// The completion handle of a blocking simcall.
///
/// Only the first call to [`Resumer::resume`] is effective; later ones (a
/// timeout firing after the activity completed, or the opposite) are
/// discarded.
pub struct Resumer<T> {
    actor: ActorId,
    slot: AnswerSlot<T>,
    answered: Rc<Cell<bool>>,
    timer: Rc<Cell<Option<TimerId>>>,
}

impl<T> Clone for Resumer<T> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor,
            slot: self.slot.clone(),
            answered: self.answered.clone(),
            timer: self.timer.clone(),
        }
    }
}

impl<T> Resumer<T> {
    pub(crate) fn new(actor: ActorId, slot: AnswerSlot<T>) -> Self {
        Self {
            actor,
            slot,
            answered: Rc::new(Cell::new(false)),
            timer: Rc::new(Cell::new(None)),
        }
    }

    /// The actor blocked on this simcall.
    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn is_pending(&self) -> bool {
        !self.answered.get()
    }

    /// A timer racing this simcall, cancelled when the simcall is answered.
    pub(crate) fn set_timer(&self, timer: TimerId) {
        self.timer.set(Some(timer));
    }

    /// Answer the simcall and reschedule its actor. Returns false when the
    /// simcall was already answered.
    pub fn resume(&self, world: &mut World, result: Result<T, Error>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.answered.set(true);
        *self.slot.borrow_mut() = Some(result);
        if let Some(timer) = self.timer.take() {
            world.timers.cancel(timer);
        }
        world.wake(self.actor);
        true
    }
}

/// The actor side of a simcall: yields once to let the maestro run the
/// simcall, then completes with the answer.
pub(crate) struct SimcallFuture<T> {
    world: Rc<RefCell<World>>,
    actor: ActorId,
    simcall: Option<Simcall>,
    slot: AnswerSlot<T>,
}

impl<T> SimcallFuture<T> {
    pub(crate) fn new(
        world: Rc<RefCell<World>>,
        actor: ActorId,
        simcall: Simcall,
        slot: AnswerSlot<T>,
    ) -> Self {
        Self {
            world,
            actor,
            simcall: Some(simcall),
            slot,
        }
    }
}

impl<T> Future for SimcallFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(simcall) = this.simcall.take() {
            this.world.borrow_mut().issue(this.actor, simcall);
            return Poll::Pending;
        }
        match this.slot.borrow_mut().take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}
