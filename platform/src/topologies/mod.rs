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

//! Builders that populate an open zone with a regular topology.
//!
//! Hosts are named `{prefix}-{n}` and links `{prefix}-link-{n}`, so several
//! topologies can live in the same platform. All the routes registered are
//! symmetrical one-hop routes: `line` and `mesh` need a zone that computes
//! multi-hop paths (Floyd or Dijkstra), `star` and `full` work in any zone.

use crate::{Error, HostConfiguration, HostId, LinkConfiguration, LinkId, NetPointId, Platform};
use crate::ZoneId;

mod full;
mod line;
mod mesh;
mod star;

pub use full::full;
pub use line::line;
pub use mesh::{mesh, torus};
pub use star::star;

/// Names and allocates links for one builder invocation.
struct Builder<'a> {
    platform: &'a mut Platform,
    zone: ZoneId,
    prefix: &'a str,
    link_config: &'a LinkConfiguration,
    next_link: usize,
}

impl<'a> Builder<'a> {
    fn new(
        platform: &'a mut Platform,
        zone: ZoneId,
        prefix: &'a str,
        link_config: &'a LinkConfiguration,
    ) -> Self {
        Self {
            platform,
            zone,
            prefix,
            link_config,
            next_link: 0,
        }
    }

    /// Add `count` hosts, returning their ids and netpoints.
    fn hosts(
        &mut self,
        count: usize,
        config: &HostConfiguration,
    ) -> Result<(Vec<HostId>, Vec<NetPointId>), Error> {
        let mut hosts = Vec::with_capacity(count);
        let mut netpoints = Vec::with_capacity(count);
        for n in 0..count {
            let host = self.platform.add_host(
                self.zone,
                &format!("{}-{}", self.prefix, n),
                config.speed,
            )?;
            netpoints.push(self.platform.resources().host(host)?.netpoint());
            hosts.push(host);
        }
        Ok((hosts, netpoints))
    }

    fn link(&mut self) -> Result<LinkId, Error> {
        let name = format!("{}-link-{}", self.prefix, self.next_link);
        self.next_link += 1;
        self.platform.add_link(self.zone, &name, self.link_config)
    }

    /// Join `a` and `b` with a fresh link, in both directions.
    fn connect(&mut self, a: NetPointId, b: NetPointId) -> Result<LinkId, Error> {
        let link = self.link()?;
        self.platform
            .add_route(self.zone, a, b, None, None, &[link], true)?;
        Ok(link)
    }
}

/// Return the linear index of the element in a multi-dimensional grid.
/// The element is represented as a vector of coordinates in `dims`, the
/// first coordinate varying fastest.
fn linearize_index(elem: &[usize], dims: &[usize]) -> usize {
    let mut index: usize = 0;
    for (d, c) in elem.iter().enumerate() {
        index += c * dims[0..d].iter().product::<usize>();
    }
    index
}

/// Given the linear index of an element, return its coordinates in a
/// multi-dimensional grid of `dims` dimensions.
fn delinearize_index(index: usize, dims: &[usize]) -> Vec<usize> {
    let mut idx = index;
    let mut elem = vec![0; dims.len()];
    for (d, m) in dims.iter().enumerate().rev() {
        if d == 0 {
            elem[d] = idx % m;
        } else {
            let stride = dims[0..d].iter().product::<usize>();
            elem[d] = idx / stride;
            idx -= elem[d] * stride;
        }
    }
    elem
}

#[cfg(test)]
mod topology_tests {
    use super::*;
    use crate::ZoneKind;
    use itertools::Itertools;

    pub(super) fn open_zone(kind: ZoneKind) -> (Platform, ZoneId) {
        let mut platform = Platform::default();
        let zone = platform.create_zone("grid", kind, None).unwrap();
        (platform, zone)
    }

    pub(super) fn netpoint(platform: &Platform, host: HostId) -> NetPointId {
        platform.resources().host(host).unwrap().netpoint()
    }

    #[test]
    fn test_linearize() {
        assert_eq!(linearize_index(&[1, 1], &[4, 4]), 5);
        assert_eq!(linearize_index(&[1, 1], &[5, 5]), 6);
        assert_eq!(linearize_index(&[3, 3], &[4, 4]), 15);
    }

    #[test]
    fn test_delinearize() {
        assert_eq!(delinearize_index(6, &[4, 4]), vec![2, 1]);
        assert_eq!(delinearize_index(6, &[5, 5]), vec![1, 1]);
        assert_eq!(delinearize_index(15, &[4, 4]), vec![3, 3]);
    }

    #[test]
    fn test_lindelin() {
        let dims = vec![3, 4, 5, 6];
        for e in dims.iter().map(|&d| 0..d).multi_cartesian_product() {
            assert_eq!(delinearize_index(linearize_index(&e, &dims), &dims), e);
        }
    }

    #[test]
    fn two_topologies_share_a_platform() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut platform, zone) = open_zone(ZoneKind::Floyd);
        let config = HostConfiguration::default();
        let link = LinkConfiguration::default();
        let left = line(&mut platform, zone, "left", 3, &config, &link).unwrap();
        let right = star(&mut platform, zone, "right", 3, &config, &link).unwrap();
        assert_eq!(
            line(&mut platform, zone, "left", 1, &config, &link).unwrap_err(),
            Error::DuplicateName("left-0".to_string())
        );
        assert_eq!(platform.host_by_name("left-2"), Some(left[2]));
        assert_eq!(platform.host_by_name("right-0"), Some(right[0]));
        platform.seal_all().unwrap();
        // nothing joins the two halves
        let src = netpoint(&platform, left[0]);
        let dst = netpoint(&platform, right[0]);
        assert_eq!(
            platform.get_route(src, dst).unwrap_err(),
            Error::RoutingFailure { src, dst }
        );
    }
}
