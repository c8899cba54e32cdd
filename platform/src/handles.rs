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

//! Stable handles into the simulation arenas.
//!
//! Everything that other objects need to point at (actors, activities,
//! netpoints, zones, resources) lives in an arena owned by the engine and is
//! referred to by one of these handles. Handles are plain indices: they are
//! `Copy`, hashable and ordered, so that iterating over a `BTreeMap` keyed by
//! handles gives a deterministic order.

use std::fmt;

macro_rules! define_handle {
    ($(#[$attr:meta])* $name:ident, $prefix:expr) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(&self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_handle!(
    /// The process id of a simulated actor. Never reused within a run.
    ActorId,
    "pid#"
);

impl ActorId {
    /// The pid simcalls run directly by the maestro are traced under.
    pub const MAESTRO: ActorId = ActorId(0);
}

define_handle!(ActivityId, "activity#");
define_handle!(
    /// A vertex of the routing graph.
    NetPointId,
    "netpoint#"
);
define_handle!(ZoneId, "zone#");
define_handle!(
    /// A capacity-bearing resource: a host cpu, a link, or one direction of a
    /// disk.
    ResourceId,
    "resource#"
);
define_handle!(HostId, "host#");
define_handle!(DiskId, "disk#");
define_handle!(MutexId, "mutex#");

/// Links are plain resources; the alias documents intent at route level.
pub type LinkId = ResourceId;

#[cfg(test)]
mod handle_tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn handles_order_by_index() {
        let set: BTreeSet<ActorId> = vec![ActorId(3), ActorId(1), ActorId(2)]
            .into_iter()
            .collect();
        assert_eq!(
            set.into_iter().map(|a| a.index()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(format!("{}", NetPointId(7)), "netpoint#7");
    }
}
