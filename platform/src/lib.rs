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

//! A discrete-event simulator of distributed platforms.
//!
//! A [`Platform`] describes hosts, links and disks grouped in nested
//! network zones, and resolves routes between any two of its netpoints. An
//! [`Engine`] runs simulated actors on top of it: actors are futures that
//! interact with the simulated world only through the simcalls of their
//! [`ActorContext`], and the engine advances the simulated clock from one
//! activity completion to the next.

mod config;
mod context;
mod engine;
mod error;
mod handles;
mod kernel;
mod platform;
mod resource;
mod routing;
pub mod topologies;

pub use crate::config::{
    DiskConfiguration, HostConfiguration, LinkConfiguration, Sharing, SimulationConfig,
};
pub use crate::context::ActorContext;
pub use crate::engine::Engine;
pub use crate::error::Error;
pub use crate::handles::{
    ActivityId, ActorId, DiskId, HostId, LinkId, MutexId, NetPointId, ResourceId, ZoneId,
};
pub use crate::kernel::{
    ActivityKind, ActivityState, ActorCode, ActorExit, IoOp, Resumer, SimcallKind,
    SimcallObserver, TraceEntry, World,
};
pub use crate::platform::Platform;
pub use crate::resource::{
    Disk, Host, Resource, ResourceKind, Resources, SharingFunction, SharingPolicy,
};
pub use crate::routing::{
    NetPoint, NetPointKind, NetZone, PathCost, Route, RouteEntry, RoutingStrategy, ZoneKind,
};

// re-exported so that actor code can name its return type
pub use futures::future::LocalBoxFuture;
