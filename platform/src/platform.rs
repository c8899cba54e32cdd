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

//! The simulated platform: the zone tree, its netpoints and its resources.
//!
//! A platform is built top-down (root zone first), then sealed. Routing
//! queries are only answered once every zone on the way is sealed.

use crate::config::{DiskConfiguration, LinkConfiguration};
use crate::resource::{Resource, ResourceKind, Resources, SharingPolicy};
use crate::routing::{NetPoint, NetPointKind, NetZone, PathCost, Route, RouteEntry, ZoneKind};
use crate::{DiskId, Error, HostId, LinkId, NetPointId, ZoneId};
use petgraph::graph::{Graph, NodeIndex};
use std::collections::HashMap;
use std::fmt;

pub struct Platform {
    netpoints: Vec<NetPoint>,
    zones: Vec<NetZone>,
    root: Option<ZoneId>,
    names: HashMap<String, NetPointId>,
    hosts_by_netpoint: HashMap<NetPointId, HostId>,
    resources: Resources,
    loopback: LinkId,
}

impl Platform {
    pub fn new(loopback: &LinkConfiguration) -> Self {
        let mut resources = Resources::default();
        let loopback = resources.add_resource(Resource::new(
            "__loopback__",
            ResourceKind::Link {
                latency: loopback.latency,
            },
            loopback.bandwidth,
            loopback.sharing.into(),
        ));
        Self {
            netpoints: Vec::new(),
            zones: Vec::new(),
            root: None,
            names: HashMap::new(),
            hosts_by_netpoint: HashMap::new(),
            resources,
            loopback,
        }
    }

    pub fn root(&self) -> Option<ZoneId> {
        self.root
    }

    pub fn loopback(&self) -> LinkId {
        self.loopback
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub(crate) fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    pub fn zone(&self, id: ZoneId) -> Result<&NetZone, Error> {
        self.zones.get(id.0).ok_or(Error::InvalidZone(id))
    }

    fn zone_mut(&mut self, id: ZoneId) -> Result<&mut NetZone, Error> {
        self.zones.get_mut(id.0).ok_or(Error::InvalidZone(id))
    }

    pub fn netpoint(&self, id: NetPointId) -> Result<&NetPoint, Error> {
        self.netpoints.get(id.0).ok_or(Error::InvalidNetPoint(id))
    }

    pub fn netpoint_by_name(&self, name: &str) -> Option<NetPointId> {
        self.names.get(name).copied()
    }

    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        self.resources.host_by_name(name)
    }

    pub fn host_of(&self, netpoint: NetPointId) -> Option<HostId> {
        self.hosts_by_netpoint.get(&netpoint).copied()
    }

    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        self.resources
            .resource_by_name(name)
            .filter(|&r| {
                matches!(
                    self.resources.get(r).map(|r| r.kind()),
                    Ok(ResourceKind::Link { .. })
                )
            })
    }

    pub fn iter_zones(&self) -> impl Iterator<Item = &NetZone> {
        self.zones.iter()
    }

    fn new_netpoint(
        &mut self,
        name: &str,
        kind: NetPointKind,
        zone: Option<ZoneId>,
    ) -> Result<NetPointId, Error> {
        if self.names.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        let id = NetPointId(self.netpoints.len());
        if let Some(z) = zone {
            self.zone_mut(z)?.add_vertex(id)?;
        }
        self.netpoints.push(NetPoint {
            id,
            name: name.to_string(),
            kind,
            zone,
        });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Create a zone. Without a parent, the zone becomes the root of the
    /// platform; there can be only one root.
    pub fn create_zone(
        &mut self,
        name: &str,
        kind: ZoneKind,
        parent: Option<ZoneId>,
    ) -> Result<ZoneId, Error> {
        match (parent, self.root) {
            (None, Some(root)) => return Err(Error::InvalidZone(root)),
            (Some(p), _) => {
                self.zone(p)?;
            }
            _ => {}
        }
        let id = ZoneId(self.zones.len());
        let netpoint = self.new_netpoint(name, NetPointKind::NetZone, parent)?;
        self.zones.push(NetZone::new(id, name, kind, parent, netpoint));
        match parent {
            Some(p) => self.zones[p.0].children.push(id),
            None => self.root = Some(id),
        }
        log::debug!("Created zone {} ({:?}) in {:?}", name, kind, parent);
        Ok(id)
    }

    pub fn add_host(&mut self, zone: ZoneId, name: &str, speed: f64) -> Result<HostId, Error> {
        let netpoint = self.new_netpoint(name, NetPointKind::Host, Some(zone))?;
        let host = self.resources.add_host(name, netpoint, speed);
        self.hosts_by_netpoint.insert(netpoint, host);
        Ok(host)
    }

    pub fn add_router(&mut self, zone: ZoneId, name: &str) -> Result<NetPointId, Error> {
        self.new_netpoint(name, NetPointKind::Router, Some(zone))
    }

    pub fn add_link(
        &mut self,
        zone: ZoneId,
        name: &str,
        config: &LinkConfiguration,
    ) -> Result<LinkId, Error> {
        if self.zone(zone)?.is_sealed() {
            return Err(Error::SealViolation(zone));
        }
        if self.resources.resource_by_name(name).is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(self.resources.add_resource(Resource::new(
            name,
            ResourceKind::Link {
                latency: config.latency,
            },
            config.bandwidth,
            config.sharing.into(),
        )))
    }

    /// Replace the sharing policy of a link. Only legal while `zone` is open.
    pub fn set_sharing_policy(
        &mut self,
        zone: ZoneId,
        link: LinkId,
        policy: SharingPolicy,
    ) -> Result<(), Error> {
        if self.zone(zone)?.is_sealed() {
            return Err(Error::SealViolation(zone));
        }
        self.resources.get_mut(link)?.set_policy(policy);
        Ok(())
    }

    pub fn add_disk(
        &mut self,
        host: HostId,
        name: &str,
        config: &DiskConfiguration,
    ) -> Result<DiskId, Error> {
        self.resources
            .add_disk(host, name, config.read_bandwidth, config.write_bandwidth)
    }

    /// Whether `netpoint` is `zone`'s own netpoint or lies somewhere below it.
    pub fn is_within(&self, netpoint: NetPointId, zone: ZoneId) -> bool {
        let mut current = match self.netpoint(netpoint) {
            Ok(np) if np.is_netzone() => self.zone_of_netpoint(netpoint),
            Ok(np) => np.zone,
            Err(_) => None,
        };
        while let Some(z) = current {
            if z == zone {
                return true;
            }
            current = self.zones[z.0].parent;
        }
        false
    }

    /// The zone a netzone-kind netpoint stands for.
    fn zone_of_netpoint(&self, netpoint: NetPointId) -> Option<ZoneId> {
        self.zones
            .iter()
            .find(|z| z.netpoint == netpoint)
            .map(|z| z.id)
    }

    fn route_entry(
        &self,
        zone: ZoneId,
        src: NetPointId,
        dst: NetPointId,
        gw_src: Option<NetPointId>,
        gw_dst: Option<NetPointId>,
        links: &[LinkId],
    ) -> Result<RouteEntry, Error> {
        for (endpoint, gateway) in [(src, gw_src), (dst, gw_dst)] {
            let np = self.netpoint(endpoint)?;
            if let Some(gw) = gateway {
                self.netpoint(gw)?;
                let child = self.zone_of_netpoint(endpoint);
                let valid = np.is_netzone()
                    && child.map_or(false, |c| self.is_within(gw, c) && gw != endpoint);
                if !valid {
                    return Err(Error::InvalidGateway { zone, gateway: gw });
                }
            }
        }
        let mut latency = 0.0;
        for &link in links {
            latency += self.resources.get(link)?.latency();
        }
        Ok(RouteEntry {
            links: links.to_vec(),
            gw_src,
            gw_dst,
            cost: PathCost::new(latency, 1),
        })
    }

    /// Register a one-hop route in `zone`.
    ///
    /// When an endpoint is a child zone, the gateway inside that zone must be
    /// given unless the child zone has a default gateway.
    pub fn add_route(
        &mut self,
        zone: ZoneId,
        src: NetPointId,
        dst: NetPointId,
        gw_src: Option<NetPointId>,
        gw_dst: Option<NetPointId>,
        links: &[LinkId],
        symmetrical: bool,
    ) -> Result<(), Error> {
        if self.zone(zone)?.is_sealed() {
            return Err(Error::SealViolation(zone));
        }
        let entry = self.route_entry(zone, src, dst, gw_src, gw_dst, links)?;
        self.zone_mut(zone)?.add_route(src, dst, entry, symmetrical)
    }

    /// Register a route that overrides whatever `get_route` would compose
    /// between `src` and `dst` below `zone`.
    pub fn add_bypass_route(
        &mut self,
        zone: ZoneId,
        src: NetPointId,
        dst: NetPointId,
        gw_src: Option<NetPointId>,
        gw_dst: Option<NetPointId>,
        links: &[LinkId],
        symmetrical: bool,
    ) -> Result<(), Error> {
        if self.zone(zone)?.is_sealed() {
            return Err(Error::SealViolation(zone));
        }
        for np in [src, dst] {
            if !self.is_within(np, zone) {
                return Err(Error::InvalidNetPoint(np));
            }
        }
        let entry = self.route_entry(zone, src, dst, gw_src, gw_dst, links)?;
        self.zone_mut(zone)?
            .add_bypass_route(src, dst, entry, symmetrical)
    }

    pub fn set_gateway(&mut self, zone: ZoneId, gateway: NetPointId) -> Result<(), Error> {
        if self.zone(zone)?.is_sealed() {
            return Err(Error::SealViolation(zone));
        }
        if !self.is_within(gateway, zone) || self.netpoint(gateway)?.is_netzone() {
            return Err(Error::InvalidGateway { zone, gateway });
        }
        self.zone_mut(zone)?.gateway = Some(gateway);
        Ok(())
    }

    /// Seal `zone` and all the zones below it.
    pub fn seal(&mut self, zone: ZoneId) -> Result<(), Error> {
        let children = self.zone(zone)?.children.clone();
        for child in children {
            if !self.zones[child.0].is_sealed() {
                self.seal(child)?;
            }
        }
        // a zone with a single host uses it as default gateway
        let hosts = self
            .zone(zone)?
            .vertices()
            .iter()
            .filter(|np| self.netpoints[np.0].kind == NetPointKind::Host)
            .copied()
            .collect::<Vec<_>>();
        let loopback = RouteEntry {
            links: vec![self.loopback],
            gw_src: None,
            gw_dst: None,
            cost: PathCost::new(self.resources.get(self.loopback)?.latency(), 1),
        };
        let netpoints = &self.netpoints;
        let z = &mut self.zones[zone.0];
        if z.gateway.is_none() && hosts.len() == 1 {
            z.gateway = Some(hosts[0]);
        }
        z.seal(|np| !netpoints[np.0].is_netzone(), &loopback)
    }

    /// Seal the whole platform.
    pub fn seal_all(&mut self) -> Result<(), Error> {
        match self.root {
            Some(root) if !self.zones[root.0].is_sealed() => self.seal(root),
            _ => Ok(()),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.zones.iter().all(|z| z.is_sealed())
    }

    fn to_route(&self, links: Vec<LinkId>, gw_src: Option<NetPointId>, gw_dst: Option<NetPointId>) -> Route {
        let latency = links
            .iter()
            .filter_map(|&l| self.resources.get(l).ok())
            .map(|r| r.latency())
            .sum();
        Route {
            links,
            latency,
            gw_src,
            gw_dst,
        }
    }

    /// The route between two vertices of `zone`, without descending into the
    /// child zones it crosses.
    pub fn get_local_route(
        &self,
        zone: ZoneId,
        src: NetPointId,
        dst: NetPointId,
    ) -> Result<Route, Error> {
        let hops = self.zone(zone)?.local_hops(src, dst)?;
        let links = hops
            .iter()
            .flat_map(|h| h.links.iter().copied())
            .collect::<Vec<_>>();
        let gw_src = hops.first().and_then(|h| h.gw_src);
        let gw_dst = hops.last().and_then(|h| h.gw_dst);
        Ok(self.to_route(links, gw_src, gw_dst))
    }

    /// The route between any two netpoints of the platform.
    pub fn get_route(&self, src: NetPointId, dst: NetPointId) -> Result<Route, Error> {
        let mut links = Vec::new();
        let gateways = self
            .global_route(src, dst, &mut links)
            .map_err(|e| match e {
                Error::RoutingFailure { .. } => Error::RoutingFailure { src, dst },
                e => e,
            })?;
        log::debug!(
            "Route {} -> {}: {} links",
            self.netpoints[src.0].name,
            self.netpoints[dst.0].name,
            links.len()
        );
        Ok(self.to_route(links, gateways.0, gateways.1))
    }

    pub fn get_route_latency(&self, src: NetPointId, dst: NetPointId) -> Result<f64, Error> {
        Ok(self.get_route(src, dst)?.latency)
    }

    /// The bandwidth of the narrowest link of the route.
    pub fn get_route_bandwidth(&self, src: NetPointId, dst: NetPointId) -> Result<f64, Error> {
        let route = self.get_route(src, dst)?;
        let mut bandwidth = f64::INFINITY;
        for link in route.links {
            bandwidth = bandwidth.min(self.resources.get(link)?.capacity());
        }
        Ok(bandwidth)
    }

    /// The zones from the root down to the one holding `netpoint`.
    fn ancestry(&self, netpoint: NetPointId) -> Result<Vec<ZoneId>, Error> {
        let mut chain = Vec::new();
        let mut current = self.netpoint(netpoint)?.zone;
        while let Some(z) = current {
            chain.push(z);
            current = self.zones[z.0].parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// The lowest common ancestor of two netpoints, and the child of it
    /// containing each of them (the ancestor itself when the netpoint sits
    /// directly in it).
    fn common_ancestors(
        &self,
        src: NetPointId,
        dst: NetPointId,
    ) -> Result<(ZoneId, ZoneId, ZoneId), Error> {
        let src_chain = self.ancestry(src)?;
        let dst_chain = self.ancestry(dst)?;
        let depth = src_chain
            .iter()
            .zip(dst_chain.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if depth == 0 {
            return Err(Error::RoutingFailure { src, dst });
        }
        let common = src_chain[depth - 1];
        let src_anc = src_chain.get(depth).copied().unwrap_or(common);
        let dst_anc = dst_chain.get(depth).copied().unwrap_or(common);
        Ok((common, src_anc, dst_anc))
    }

    /// The gateway to use when entering or leaving `netpoint`, a child zone.
    fn gateway_of(
        &self,
        netpoint: NetPointId,
        given: Option<NetPointId>,
        src: NetPointId,
        dst: NetPointId,
    ) -> Result<NetPointId, Error> {
        given
            .or_else(|| {
                self.zone_of_netpoint(netpoint)
                    .and_then(|z| self.zones[z.0].gateway)
            })
            .ok_or(Error::RoutingFailure { src, dst })
    }

    /// `netpoint` followed by the netpoints of the zones enclosing it below
    /// `common`, innermost first.
    fn enclosing_netpoints(
        &self,
        netpoint: NetPointId,
        common: ZoneId,
    ) -> Result<Vec<NetPointId>, Error> {
        let mut points = vec![netpoint];
        let mut current = self.netpoint(netpoint)?.zone;
        while let Some(z) = current {
            if z == common {
                break;
            }
            points.push(self.zones[z.0].netpoint);
            current = self.zones[z.0].parent;
        }
        Ok(points)
    }

    /// The bypass route of `common` for the closest pair of netpoints
    /// enclosing `src` and `dst`, the endpoints themselves first.
    fn find_bypass(
        &self,
        common: ZoneId,
        src: NetPointId,
        dst: NetPointId,
    ) -> Result<Option<(NetPointId, NetPointId, &RouteEntry)>, Error> {
        let zone = &self.zones[common.0];
        let src_side = self.enclosing_netpoints(src, common)?;
        let dst_side = self.enclosing_netpoints(dst, common)?;
        for level in 0..src_side.len().max(dst_side.len()) {
            let mut pairs = Vec::new();
            for i in 0..level {
                pairs.push((i, level));
                pairs.push((level, i));
            }
            pairs.push((level, level));
            for (i, j) in pairs {
                if let (Some(&s), Some(&d)) = (src_side.get(i), dst_side.get(j)) {
                    if let Some(entry) = zone.bypass_route(s, d) {
                        return Ok(Some((s, d, entry)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Append the links from `src` to `dst` to `links`, returning the gateways
    /// used at the level of the common ancestor.
    fn global_route(
        &self,
        src: NetPointId,
        dst: NetPointId,
        links: &mut Vec<LinkId>,
    ) -> Result<(Option<NetPointId>, Option<NetPointId>), Error> {
        let (common, src_anc, dst_anc) = self.common_ancestors(src, dst)?;
        let zone = &self.zones[common.0];
        let s = if src_anc == common {
            src
        } else {
            self.zones[src_anc.0].netpoint
        };
        let d = if dst_anc == common {
            dst
        } else {
            self.zones[dst_anc.0].netpoint
        };
        log::trace!("Routing {} -> {} through zone {}", src, dst, zone.name);

        let (s, d, hops) = match self.find_bypass(common, src, dst)? {
            Some((bs, bd, entry)) => {
                log::trace!("Bypass route {} -> {} in zone {}", bs, bd, zone.name);
                (bs, bd, vec![(bd, entry)])
            }
            None => (s, d, zone.local_path(s, d)?),
        };
        let (first, last) = match (hops.first(), hops.last()) {
            (Some(f), Some(l)) => (f.1, l.1),
            _ => return Err(Error::RoutingFailure { src, dst }),
        };

        let mut gw_src = first.gw_src;
        if s != src {
            let gw = self.gateway_of(s, first.gw_src, src, dst)?;
            gw_src = Some(gw);
            if gw != src {
                self.global_route(src, gw, links)?;
            }
        }

        for (i, (_, hop)) in hops.iter().enumerate() {
            if i > 0 {
                // the previous hop ended on a child zone: cross it
                let (via, previous) = hops[i - 1];
                if self.netpoint(via)?.is_netzone() {
                    let entry = self.gateway_of(via, previous.gw_dst, src, dst)?;
                    let exit = self.gateway_of(via, hop.gw_src, src, dst)?;
                    if entry != exit {
                        self.global_route(entry, exit, links)?;
                    }
                }
            }
            links.extend(hop.links.iter().copied());
        }

        let mut gw_dst = last.gw_dst;
        if d != dst {
            let gw = self.gateway_of(d, last.gw_dst, src, dst)?;
            gw_dst = Some(gw);
            if gw != dst {
                self.global_route(gw, dst, links)?;
            }
        }
        Ok((gw_src, gw_dst))
    }

    /// The netpoints and one-hop routes of the platform, in dot format.
    pub fn to_graphviz(&self) -> String {
        use petgraph::dot::{Config, Dot};

        let mut graph: Graph<String, String> = Graph::new();
        let nodes: Vec<NodeIndex> = self
            .netpoints
            .iter()
            .map(|np| graph.add_node(format!("{} ({:?})", np.name, np.kind)))
            .collect();
        for zone in self.zones.iter() {
            for (s, d, entry) in zone.routes() {
                if s == d {
                    continue;
                }
                let names = entry
                    .links
                    .iter()
                    .filter_map(|&l| self.resources.get(l).ok())
                    .map(|r| r.name().to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                graph.add_edge(nodes[s.0], nodes[d.0], names);
            }
        }
        let generator = Dot::with_attr_getters(
            &graph,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &|_, edge| format!("label=\"{}\"", edge.weight()),
            &|_, node| format!("label=\"{}\"", node.1),
        );
        format!("{:?}", generator)
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Platform")
            .field("netpoints", &self.netpoints.len())
            .field("zones", &self.zones.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_graphviz())
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(&crate::SimulationConfig::default().loopback)
    }
}
