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

use super::{linearize_index, Builder};
use crate::{Error, HostConfiguration, HostId, LinkConfiguration, Platform, ZoneId};
use itertools::Itertools;

/// A grid of `dims` hosts. Each host is linked to its neighbours along every
/// dimension; hosts on the border have fewer links.
///
/// Host `n` sits at the coordinates `delinearize_index(n, dims)`, the first
/// coordinate varying fastest.
pub fn mesh(
    platform: &mut Platform,
    zone: ZoneId,
    prefix: &str,
    dims: &[usize],
    host_config: &HostConfiguration,
    link_config: &LinkConfiguration,
) -> Result<Vec<HostId>, Error> {
    grid(platform, zone, prefix, dims, false, host_config, link_config)
}

/// A mesh whose borders wrap around, so every host has two neighbours in
/// each dimension of size three or more.
pub fn torus(
    platform: &mut Platform,
    zone: ZoneId,
    prefix: &str,
    dims: &[usize],
    host_config: &HostConfiguration,
    link_config: &LinkConfiguration,
) -> Result<Vec<HostId>, Error> {
    grid(platform, zone, prefix, dims, true, host_config, link_config)
}

fn grid(
    platform: &mut Platform,
    zone: ZoneId,
    prefix: &str,
    dims: &[usize],
    wrap: bool,
    host_config: &HostConfiguration,
    link_config: &LinkConfiguration,
) -> Result<Vec<HostId>, Error> {
    let mut builder = Builder::new(platform, zone, prefix, link_config);
    let (hosts, netpoints) = builder.hosts(dims.iter().product(), host_config)?;

    // link each host to its "higher" neighbour in every dimension
    for e in dims.iter().map(|&ub| 0..ub).multi_cartesian_product() {
        for (d, &m) in dims.iter().enumerate() {
            let higher = if e[d] + 1 < m {
                e[d] + 1
            } else if wrap && m > 2 {
                0
            } else {
                continue;
            };
            let mut n = e.clone();
            n[d] = higher;
            builder.connect(
                netpoints[linearize_index(&e, dims)],
                netpoints[linearize_index(&n, dims)],
            )?;
        }
    }
    log::debug!(
        "Built a {} of {:?} hosts in {}",
        if wrap { "torus" } else { "mesh" },
        dims,
        zone
    );
    Ok(hosts)
}

#[cfg(test)]
mod mesh_tests {
    use super::super::delinearize_index;
    use super::super::topology_tests::{netpoint, open_zone};
    use super::*;
    use crate::ZoneKind;

    fn hops(platform: &Platform, hosts: &[HostId], a: usize, b: usize) -> usize {
        platform
            .get_route(netpoint(platform, hosts[a]), netpoint(platform, hosts[b]))
            .unwrap()
            .links
            .len()
    }

    #[test]
    fn routes_follow_the_manhattan_distance() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let dims = [3, 3];
        let (mut platform, zone) = open_zone(ZoneKind::Dijkstra);
        let hosts = mesh(
            &mut platform,
            zone,
            "m",
            &dims,
            &HostConfiguration::default(),
            &LinkConfiguration::default(),
        )
        .unwrap();
        assert_eq!(hosts.len(), 9);
        // 2 * 3 links per dimension
        assert!(platform.link_by_name("m-link-11").is_some());
        assert!(platform.link_by_name("m-link-12").is_none());
        platform.seal_all().unwrap();

        for a in 0..hosts.len() {
            for b in 0..hosts.len() {
                if a == b {
                    continue;
                }
                let (ea, eb) = (delinearize_index(a, &dims), delinearize_index(b, &dims));
                let distance: usize = ea
                    .iter()
                    .zip(eb.iter())
                    .map(|(x, y)| if x > y { x - y } else { y - x })
                    .sum();
                assert_eq!(hops(&platform, &hosts, a, b), distance, "{} -> {}", a, b);
            }
        }
    }

    #[test]
    fn torus_wraps_around() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut platform, zone) = open_zone(ZoneKind::Floyd);
        let hosts = torus(
            &mut platform,
            zone,
            "t",
            &[5],
            &HostConfiguration::default(),
            &LinkConfiguration::default(),
        )
        .unwrap();
        platform.seal_all().unwrap();
        assert_eq!(hops(&platform, &hosts, 0, 4), 1);
        assert_eq!(hops(&platform, &hosts, 0, 3), 2);
        assert_eq!(hops(&platform, &hosts, 1, 3), 2);
    }

    #[test]
    fn short_dimensions_do_not_wrap() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut platform, zone) = open_zone(ZoneKind::Floyd);
        // wrapping a dimension of two would duplicate the only link
        let hosts = torus(
            &mut platform,
            zone,
            "t",
            &[2, 2],
            &HostConfiguration::default(),
            &LinkConfiguration::default(),
        )
        .unwrap();
        assert!(platform.link_by_name("t-link-3").is_some());
        assert!(platform.link_by_name("t-link-4").is_none());
        platform.seal_all().unwrap();
        assert_eq!(hops(&platform, &hosts, 0, 3), 2);
    }
}
