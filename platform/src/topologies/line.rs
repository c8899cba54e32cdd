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

use super::Builder;
use crate::{Error, HostConfiguration, HostId, LinkConfiguration, Platform, ZoneId};

/// A chain of `num_hosts` hosts, each linked to the next one.
pub fn line(
    platform: &mut Platform,
    zone: ZoneId,
    prefix: &str,
    num_hosts: usize,
    host_config: &HostConfiguration,
    link_config: &LinkConfiguration,
) -> Result<Vec<HostId>, Error> {
    let mut builder = Builder::new(platform, zone, prefix, link_config);
    let (hosts, netpoints) = builder.hosts(num_hosts, host_config)?;
    for pair in netpoints.windows(2) {
        builder.connect(pair[0], pair[1])?;
    }
    log::debug!("Built a line of {} hosts in {}", num_hosts, zone);
    Ok(hosts)
}

#[cfg(test)]
mod line_tests {
    use super::super::topology_tests::{netpoint, open_zone};
    use super::*;
    use crate::ZoneKind;

    #[test]
    fn end_to_end_route_crosses_every_link() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut platform, zone) = open_zone(ZoneKind::Floyd);
        let hosts = line(
            &mut platform,
            zone,
            "node",
            5,
            &HostConfiguration::default(),
            &LinkConfiguration::new(1e6, 1e-3),
        )
        .unwrap();
        platform.seal_all().unwrap();

        let first = netpoint(&platform, hosts[0]);
        let last = netpoint(&platform, hosts[4]);
        let route = platform.get_route(first, last).unwrap();
        let names: Vec<_> = route
            .links
            .iter()
            .map(|&l| platform.resources().get(l).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["node-link-0", "node-link-1", "node-link-2", "node-link-3"]
        );
        assert!((route.latency - 4e-3).abs() < 1e-12);
        let back = platform.get_route(last, first).unwrap();
        assert_eq!(back.links.len(), 4);
        assert_eq!(back.links[0], route.links[3]);
    }

    #[test]
    fn single_host_line_has_no_links() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut platform, zone) = open_zone(ZoneKind::Full);
        let hosts = line(
            &mut platform,
            zone,
            "solo",
            1,
            &HostConfiguration::default(),
            &LinkConfiguration::default(),
        )
        .unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(platform.link_by_name("solo-link-0"), None);
    }
}
