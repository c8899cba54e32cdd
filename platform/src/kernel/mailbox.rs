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

//! Rendezvous points of communications.
//!
//! A mailbox holds the comms posted by one side (senders or receivers) that
//! still wait for a peer, in posting order. A comm posted by the other side
//! is matched with the oldest of them, and starts flowing along the route
//! between the two hosts.

use super::activity::{ActivityKind, ActivityState};
use super::World;
use crate::{ActivityId, ActorId, Error};
use std::any::Any;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    pending: VecDeque<ActivityId>,
}

impl Mailbox {
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Side {
    Send,
    Recv,
}

impl World {
    /// Post a send of `bytes` carrying `payload`. Returns the comm, which is
    /// already started if a receiver was waiting.
    pub(crate) fn put_async(
        &mut self,
        pid: ActorId,
        mailbox: &str,
        payload: Box<dyn Any>,
        bytes: f64,
    ) -> Result<ActivityId, Error> {
        let host = self.actor_host(pid)?;
        if let Some(id) = self.take_match(mailbox, Side::Send) {
            let activity = self.activity_mut(id)?;
            if let ActivityKind::Comm {
                sender, src_host, ..
            } = &mut activity.kind
            {
                *sender = Some(pid);
                *src_host = Some(host);
            }
            activity.amount = bytes.max(0.0);
            activity.remaining = bytes.max(0.0);
            activity.payload = Some(payload);
            activity.holders.push(pid);
            if let Err(e) = self.start_comm(id) {
                // the matching actor never sees the comm
                self.drop_holder(pid, id);
                return Err(e);
            }
            return Ok(id);
        }
        let kind = ActivityKind::Comm {
            mailbox: mailbox.to_string(),
            sender: Some(pid),
            receiver: None,
            src_host: Some(host),
            dst_host: None,
        };
        let id = self.new_activity(kind, pid, bytes.max(0.0));
        self.activity_mut(id)?.payload = Some(payload);
        self.post(mailbox, id);
        Ok(id)
    }

    /// Post a receive. Returns the comm, which is already started if a sender
    /// was waiting.
    pub(crate) fn get_async(&mut self, pid: ActorId, mailbox: &str) -> Result<ActivityId, Error> {
        let host = self.actor_host(pid)?;
        if let Some(id) = self.take_match(mailbox, Side::Recv) {
            let activity = self.activity_mut(id)?;
            if let ActivityKind::Comm {
                receiver, dst_host, ..
            } = &mut activity.kind
            {
                *receiver = Some(pid);
                *dst_host = Some(host);
            }
            activity.holders.push(pid);
            if let Err(e) = self.start_comm(id) {
                // the matching actor never sees the comm
                self.drop_holder(pid, id);
                return Err(e);
            }
            return Ok(id);
        }
        let kind = ActivityKind::Comm {
            mailbox: mailbox.to_string(),
            sender: None,
            receiver: Some(pid),
            src_host: None,
            dst_host: Some(host),
        };
        let id = self.new_activity(kind, pid, 0.0);
        self.post(mailbox, id);
        Ok(id)
    }

    fn post(&mut self, mailbox: &str, id: ActivityId) {
        self.set_state(id, ActivityState::Starting);
        self.mailboxes
            .entry(mailbox.to_string())
            .or_default()
            .pending
            .push_back(id);
        log::trace!("[{:.6}] {} posted on '{}'", self.clock, id, mailbox);
    }

    /// The oldest pending comm of the opposite side, removed from the
    /// mailbox.
    fn take_match(&mut self, mailbox: &str, side: Side) -> Option<ActivityId> {
        let activities = &self.activities;
        let pending = &mut self.mailboxes.get_mut(mailbox)?.pending;
        let position = pending
            .iter()
            .position(|id| match activities.get(id).map(|a| &a.kind) {
                Some(ActivityKind::Comm {
                    sender, receiver, ..
                }) => match side {
                    Side::Send => sender.is_none(),
                    Side::Recv => receiver.is_none(),
                },
                _ => false,
            })?;
        pending.remove(position)
    }

    /// Both ends are known: resolve the route and let the data flow. A
    /// routing error fails the comm and is returned to the matching actor.
    fn start_comm(&mut self, id: ActivityId) -> Result<(), Error> {
        let (src, dst) = match &self.activity(id)?.kind {
            ActivityKind::Comm {
                src_host: Some(src),
                dst_host: Some(dst),
                ..
            } => (*src, *dst),
            _ => return Err(Error::InvalidActivity(id)),
        };
        let route = match self.host_route(src, dst) {
            Ok(route) => route,
            Err(e) => {
                self.fail_activity(id, e.clone());
                return Err(e);
            }
        };
        log::debug!(
            "[{:.6}] {} matched: {} -> {} over {} links",
            self.clock,
            id,
            src,
            dst,
            route.links.len()
        );
        let activity = self.activity_mut(id)?;
        activity.resources = route.links;
        activity.latency = route.latency;
        self.set_state(id, ActivityState::Started);
        let links = self.activity(id)?.resources.clone();
        for link in links {
            if !self.platform.resources().get(link)?.is_on() {
                self.fail_activity(id, Error::ResourceFailure(id));
                break;
            }
        }
        Ok(())
    }

    /// Hand the payload of a finished comm over to its receiver.
    pub(crate) fn take_payload(&mut self, pid: ActorId, id: ActivityId) -> Result<Box<dyn Any>, Error> {
        let activity = self.activity_mut(id)?;
        activity.outcome()?;
        match &activity.kind {
            ActivityKind::Comm { receiver, .. } if *receiver == Some(pid) => {}
            _ => return Err(Error::InvalidPayload(id)),
        }
        activity.payload.take().ok_or(Error::InvalidPayload(id))
    }

    /// Forget `id` in the mailbox or mutex queue it still waits in.
    pub(crate) fn unlink_pending(&mut self, id: ActivityId) {
        let kind = match self.activities.get(&id) {
            Some(a) => a.kind.clone(),
            None => return,
        };
        match kind {
            ActivityKind::Comm { mailbox, .. } => {
                if let Some(m) = self.mailboxes.get_mut(&mailbox) {
                    m.pending.retain(|&p| p != id);
                }
            }
            ActivityKind::Synchro { mutex } => {
                if let Some(m) = self.mutexes.get_mut(mutex.index()) {
                    m.queue.retain(|&p| p != id);
                }
            }
            _ => {}
        }
    }

    /// Number of comms waiting for a peer on `mailbox`.
    pub fn mailbox_len(&self, mailbox: &str) -> usize {
        self.mailboxes.get(mailbox).map(|m| m.len()).unwrap_or(0)
    }
}
