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

use std::fmt;

use crate::{ActivityId, ActorId, DiskId, HostId, MutexId, NetPointId, ResourceId, ZoneId};

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// No path between two netpoints.
    RoutingFailure { src: NetPointId, dst: NetPointId },
    /// A resource used by the activity was turned off while it was running.
    ResourceFailure(ActivityId),
    /// `wait_for` expired before the activity terminated.
    Timeout(ActivityId),
    Canceled(ActivityId),
    /// The peer of a communication was killed before it completed.
    Killed(ActorId),
    /// Attempt to modify a zone after it was sealed.
    SealViolation(ZoneId),
    ZoneNotSealed(ZoneId),
    DuplicateRoute { src: NetPointId, dst: NetPointId },
    DuplicateName(String),
    InvalidNetPoint(NetPointId),
    InvalidZone(ZoneId),
    InvalidGateway { zone: ZoneId, gateway: NetPointId },
    InvalidActor(ActorId),
    InvalidActivity(ActivityId),
    InvalidHost(HostId),
    InvalidDisk(DiskId),
    InvalidResource(ResourceId),
    InvalidMutex(MutexId),
    InvalidPayload(ActivityId),
    /// The simulation cannot progress but these actors are still blocked.
    Deadlock(Vec<ActorId>),
    InvalidConfig(String),
}

impl Error {
    /// Errors that are local to the actor that observes them. Everything else
    /// aborts the simulation when an actor does not recover from it.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ResourceFailure(_) | Self::Timeout(_) | Self::Canceled(_) | Self::Killed(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RoutingFailure { src, dst } => {
                write!(f, "ERROR: No route from {} to {}", src, dst)
            }
            Self::ResourceFailure(a) => {
                write!(f, "ERROR: Resource failure while running {}", a)
            }
            Self::Timeout(a) => write!(f, "ERROR: Timeout while waiting for {}", a),
            Self::SealViolation(z) => {
                write!(f, "ERROR: Cannot modify {} after it was sealed", z)
            }
            Self::ZoneNotSealed(z) => write!(f, "ERROR: {} is not sealed", z),
            Self::DuplicateRoute { src, dst } => write!(
                f,
                "ERROR: The route between {} and {} already exists",
                src, dst
            ),
            Self::InvalidGateway { zone, gateway } => {
                write!(f, "ERROR: {} is not a valid gateway of {}", gateway, zone)
            }
            Self::Deadlock(actors) => {
                write!(f, "ERROR: Deadlock, {} actors still blocked", actors.len())
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

// Empty impl so that binaries can lift our errors into `anyhow::Result`.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
