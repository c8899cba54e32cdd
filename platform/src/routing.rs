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

//! Hierarchical routing.
//!
//! A platform is a tree of [`NetZone`]s. Each zone holds a set of netpoints
//! (hosts, routers and the netpoints standing for its child zones) and routes
//! between them with one of three strategies:
//!
//! * `Full`: every route is listed explicitly, lookups are table accesses;
//! * `Floyd`: only one-hop routes are listed, all pairs shortest paths are
//!   computed when the zone is sealed;
//! * `Dijkstra`: only one-hop routes are listed, shortest paths are computed
//!   on demand, optionally memoized per source.
//!
//! Shortest paths minimize the total latency, then the number of hops. Among
//! equally good candidates the predecessor with the lowest netpoint id is
//! kept, so a given topology always yields the same routes.
//!
//! Routes crossing zones are stitched together by the
//! [`Platform`](crate::Platform), see `platform.rs`.

use crate::{Error, LinkId, NetPointId, ZoneId};
use std::collections::HashMap;

mod dijkstra;
mod floyd;
mod full;

pub use dijkstra::DijkstraRouting;
pub use floyd::FloydRouting;
pub use full::FullRouting;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetPointKind {
    Host,
    Router,
    /// The netpoint standing for a child zone in its parent.
    NetZone,
}

/// An addressable vertex of the routing graph.
#[derive(Clone, Debug)]
pub struct NetPoint {
    pub(crate) id: NetPointId,
    pub(crate) name: String,
    pub(crate) kind: NetPointKind,
    /// The zone containing this netpoint. `None` only for the root zone's own
    /// netpoint.
    pub(crate) zone: Option<ZoneId>,
}

impl NetPoint {
    pub fn id(&self) -> NetPointId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> NetPointKind {
        self.kind
    }
    pub fn zone(&self) -> Option<ZoneId> {
        self.zone
    }
    pub fn is_netzone(&self) -> bool {
        self.kind == NetPointKind::NetZone
    }
}

/// Cost of a path: total latency in picoseconds, then number of hops.
///
/// Latencies are quantized so that the comparison is a total order and equal
/// costs are detected exactly, whatever the order of the additions.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PathCost {
    latency: u64,
    hops: u32,
}

impl PathCost {
    pub fn new(latency: f64, hops: u32) -> Self {
        Self {
            latency: (latency.max(0.0) * 1e12).round() as u64,
            hops,
        }
    }

    pub fn add(&self, other: &PathCost) -> PathCost {
        PathCost {
            latency: self.latency.saturating_add(other.latency),
            hops: self.hops.saturating_add(other.hops),
        }
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }
}

/// A one-hop route as registered in a zone.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteEntry {
    pub links: Vec<LinkId>,
    pub gw_src: Option<NetPointId>,
    pub gw_dst: Option<NetPointId>,
    pub cost: PathCost,
}

impl RouteEntry {
    /// The entry for the opposite direction: links reversed, gateways swapped.
    pub fn reversed(&self) -> RouteEntry {
        RouteEntry {
            links: self.links.iter().rev().copied().collect(),
            gw_src: self.gw_dst,
            gw_dst: self.gw_src,
            cost: self.cost,
        }
    }
}

/// An ordered list of links with its accumulated latency.
///
/// The links are handles into the platform resources; a route never owns
/// them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Route {
    pub links: Vec<LinkId>,
    pub latency: f64,
    pub gw_src: Option<NetPointId>,
    pub gw_dst: Option<NetPointId>,
}

impl Route {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// The strategy a zone is created with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZoneKind {
    Full,
    Floyd,
    Dijkstra,
    /// Dijkstra with the shortest path tree of each source memoized.
    DijkstraCached,
}

/// Strategy-specific route storage, dispatched through [`Self::resolve`].
#[derive(Debug)]
pub enum RoutingStrategy {
    Full(FullRouting),
    Floyd(FloydRouting),
    Dijkstra(DijkstraRouting),
}

impl RoutingStrategy {
    pub fn new(kind: ZoneKind) -> Self {
        match kind {
            ZoneKind::Full => Self::Full(FullRouting::new()),
            ZoneKind::Floyd => Self::Floyd(FloydRouting::new()),
            ZoneKind::Dijkstra => Self::Dijkstra(DijkstraRouting::new(false)),
            ZoneKind::DijkstraCached => Self::Dijkstra(DijkstraRouting::new(true)),
        }
    }

    pub fn kind(&self) -> ZoneKind {
        match self {
            Self::Full(_) => ZoneKind::Full,
            Self::Floyd(_) => ZoneKind::Floyd,
            Self::Dijkstra(d) if d.is_cached() => ZoneKind::DijkstraCached,
            Self::Dijkstra(_) => ZoneKind::Dijkstra,
        }
    }

    fn has_route(&self, src: usize, dst: usize) -> bool {
        match self {
            Self::Full(r) => r.has_route(src, dst),
            Self::Floyd(r) => r.has_route(src, dst),
            Self::Dijkstra(r) => r.has_route(src, dst),
        }
    }

    fn store(&mut self, src: usize, dst: usize, entry: RouteEntry) {
        match self {
            Self::Full(r) => r.store(src, dst, entry),
            Self::Floyd(r) => r.store(src, dst, entry),
            Self::Dijkstra(r) => r.store(src, dst, entry),
        }
    }

    fn seal(&mut self, vertices: &[NetPointId]) {
        match self {
            Self::Full(r) => r.seal(vertices.len()),
            Self::Floyd(r) => r.seal(vertices),
            Self::Dijkstra(r) => r.seal(vertices.len()),
        }
    }

    /// The hops leading from `src` to `dst`, both local vertex indices.
    pub fn resolve(
        &self,
        src: usize,
        dst: usize,
        vertices: &[NetPointId],
    ) -> Option<Vec<(usize, &RouteEntry)>> {
        match self {
            Self::Full(r) => r.resolve(src, dst),
            Self::Floyd(r) => r.resolve(src, dst),
            Self::Dijkstra(r) => r.resolve(src, dst, vertices),
        }
    }

    /// Every registered one-hop route, as (src, dst, entry).
    pub fn entries(&self) -> Vec<(usize, usize, &RouteEntry)> {
        match self {
            Self::Full(r) => r.entries(),
            Self::Floyd(r) => r.entries(),
            Self::Dijkstra(r) => r.entries(),
        }
    }
}

/// A zone of the platform tree.
#[derive(Debug)]
pub struct NetZone {
    pub(crate) id: ZoneId,
    pub(crate) name: String,
    pub(crate) parent: Option<ZoneId>,
    pub(crate) netpoint: NetPointId,
    pub(crate) children: Vec<ZoneId>,
    pub(crate) gateway: Option<NetPointId>,
    vertices: Vec<NetPointId>,
    index: HashMap<NetPointId, usize>,
    strategy: RoutingStrategy,
    bypass: HashMap<(NetPointId, NetPointId), RouteEntry>,
    sealed: bool,
}

impl NetZone {
    pub(crate) fn new(
        id: ZoneId,
        name: &str,
        kind: ZoneKind,
        parent: Option<ZoneId>,
        netpoint: NetPointId,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent,
            netpoint,
            children: Vec::new(),
            gateway: None,
            vertices: Vec::new(),
            index: HashMap::new(),
            strategy: RoutingStrategy::new(kind),
            bypass: HashMap::new(),
            sealed: false,
        }
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn parent(&self) -> Option<ZoneId> {
        self.parent
    }
    pub fn netpoint(&self) -> NetPointId {
        self.netpoint
    }
    pub fn children(&self) -> &[ZoneId] {
        &self.children
    }
    pub fn gateway(&self) -> Option<NetPointId> {
        self.gateway
    }
    pub fn kind(&self) -> ZoneKind {
        self.strategy.kind()
    }
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
    pub fn vertices(&self) -> &[NetPointId] {
        &self.vertices
    }
    pub fn contains(&self, netpoint: NetPointId) -> bool {
        self.index.contains_key(&netpoint)
    }

    fn check_unsealed(&self) -> Result<(), Error> {
        if self.sealed {
            log::debug!("Zone {} is sealed", self.name);
            return Err(Error::SealViolation(self.id));
        }
        Ok(())
    }

    fn local_index(&self, netpoint: NetPointId) -> Result<usize, Error> {
        self.index
            .get(&netpoint)
            .copied()
            .ok_or(Error::InvalidNetPoint(netpoint))
    }

    pub(crate) fn add_vertex(&mut self, netpoint: NetPointId) -> Result<usize, Error> {
        self.check_unsealed()?;
        let idx = self.vertices.len();
        self.vertices.push(netpoint);
        self.index.insert(netpoint, idx);
        Ok(idx)
    }

    /// Register a one-hop route, and its reverse when `symmetrical`.
    pub(crate) fn add_route(
        &mut self,
        src: NetPointId,
        dst: NetPointId,
        entry: RouteEntry,
        symmetrical: bool,
    ) -> Result<(), Error> {
        self.check_unsealed()?;
        let s = self.local_index(src)?;
        let d = self.local_index(dst)?;
        if self.strategy.has_route(s, d) {
            return Err(Error::DuplicateRoute { src, dst });
        }
        log::trace!(
            "{}: route {} -> {} over {} links",
            self.name,
            src,
            dst,
            entry.links.len()
        );
        let reverse = entry.reversed();
        self.strategy.store(s, d, entry);
        if symmetrical && s != d {
            if self.strategy.has_route(d, s) {
                log::debug!(
                    "{}: reverse route {} -> {} already registered",
                    self.name,
                    dst,
                    src
                );
            } else {
                self.strategy.store(d, s, reverse);
            }
        }
        Ok(())
    }

    pub(crate) fn add_bypass_route(
        &mut self,
        src: NetPointId,
        dst: NetPointId,
        entry: RouteEntry,
        symmetrical: bool,
    ) -> Result<(), Error> {
        self.check_unsealed()?;
        if self.bypass.contains_key(&(src, dst)) {
            return Err(Error::DuplicateRoute { src, dst });
        }
        if symmetrical && src != dst && !self.bypass.contains_key(&(dst, src)) {
            self.bypass.insert((dst, src), entry.reversed());
        }
        self.bypass.insert((src, dst), entry);
        Ok(())
    }

    pub(crate) fn bypass_route(&self, src: NetPointId, dst: NetPointId) -> Option<&RouteEntry> {
        self.bypass.get(&(src, dst))
    }

    /// Freeze the zone. Every vertex for which `needs_loopback` holds (hosts
    /// and routers, not child zones) gets a self route if it has none.
    pub(crate) fn seal(
        &mut self,
        needs_loopback: impl Fn(NetPointId) -> bool,
        loopback: &RouteEntry,
    ) -> Result<(), Error> {
        self.check_unsealed()?;
        let missing = (0..self.vertices.len())
            .filter(|&i| needs_loopback(self.vertices[i]) && !self.strategy.has_route(i, i))
            .collect::<Vec<_>>();
        for i in missing {
            self.strategy.store(i, i, loopback.clone());
        }
        self.strategy.seal(&self.vertices);
        self.sealed = true;
        log::debug!(
            "Sealed zone {} ({:?}, {} vertices)",
            self.name,
            self.kind(),
            self.vertices.len()
        );
        Ok(())
    }

    /// The hops of the route between two vertices of this zone.
    pub fn local_hops(&self, src: NetPointId, dst: NetPointId) -> Result<Vec<&RouteEntry>, Error> {
        Ok(self
            .local_path(src, dst)?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    /// The hops of the route between two vertices of this zone, each with
    /// the vertex it leads to.
    pub fn local_path(
        &self,
        src: NetPointId,
        dst: NetPointId,
    ) -> Result<Vec<(NetPointId, &RouteEntry)>, Error> {
        if !self.sealed {
            return Err(Error::ZoneNotSealed(self.id));
        }
        let s = self.local_index(src)?;
        let d = self.local_index(dst)?;
        let hops = self
            .strategy
            .resolve(s, d, &self.vertices)
            .ok_or(Error::RoutingFailure { src, dst })?;
        Ok(hops
            .into_iter()
            .map(|(to, entry)| (self.vertices[to], entry))
            .collect())
    }

    /// Every registered one-hop route of this zone.
    pub fn routes(&self) -> impl Iterator<Item = (NetPointId, NetPointId, &RouteEntry)> + '_ {
        self.strategy
            .entries()
            .into_iter()
            .map(move |(s, d, e)| (self.vertices[s], self.vertices[d], e))
    }
}
