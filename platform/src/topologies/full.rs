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

/// A fully connected topology of `num_hosts` hosts: every pair of hosts has
/// its own link.
pub fn full(
    platform: &mut Platform,
    zone: ZoneId,
    prefix: &str,
    num_hosts: usize,
    host_config: &HostConfiguration,
    link_config: &LinkConfiguration,
) -> Result<Vec<HostId>, Error> {
    let mut builder = Builder::new(platform, zone, prefix, link_config);
    let (hosts, netpoints) = builder.hosts(num_hosts, host_config)?;
    for n in 0..num_hosts {
        for peer in 0..n {
            builder.connect(netpoints[peer], netpoints[n])?;
        }
    }
    log::debug!("Built a full graph of {} hosts in {}", num_hosts, zone);
    Ok(hosts)
}

#[cfg(test)]
mod full_tests {
    use super::super::topology_tests::{netpoint, open_zone};
    use super::*;
    use crate::ZoneKind;

    #[test]
    fn every_pair_is_one_hop_apart() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut platform, zone) = open_zone(ZoneKind::Full);
        let hosts = full(
            &mut platform,
            zone,
            "f",
            4,
            &HostConfiguration::default(),
            &LinkConfiguration::default(),
        )
        .unwrap();
        // n * (n - 1) / 2 links
        assert!(platform.link_by_name("f-link-5").is_some());
        assert!(platform.link_by_name("f-link-6").is_none());
        platform.seal_all().unwrap();
        for &a in &hosts {
            for &b in &hosts {
                let route = platform
                    .get_route(netpoint(&platform, a), netpoint(&platform, b))
                    .unwrap();
                assert_eq!(route.links.len(), 1);
                if a == b {
                    assert_eq!(route.links[0], platform.loopback());
                }
            }
        }
    }
}
