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

/// `num_hosts` hosts around a central router named `{prefix}-hub`, each
/// with a private link to it.
///
/// Host-to-host routes through the hub are registered as well, so the
/// star routes in a `Full` zone too.
pub fn star(
    platform: &mut Platform,
    zone: ZoneId,
    prefix: &str,
    num_hosts: usize,
    host_config: &HostConfiguration,
    link_config: &LinkConfiguration,
) -> Result<Vec<HostId>, Error> {
    let mut builder = Builder::new(platform, zone, prefix, link_config);
    let hub = builder
        .platform
        .add_router(zone, &format!("{}-hub", prefix))?;
    let (hosts, netpoints) = builder.hosts(num_hosts, host_config)?;
    let mut spokes = Vec::with_capacity(num_hosts);
    for &np in &netpoints {
        spokes.push(builder.connect(np, hub)?);
    }
    for i in 0..num_hosts {
        for j in (i + 1)..num_hosts {
            builder.platform.add_route(
                zone,
                netpoints[i],
                netpoints[j],
                None,
                None,
                &[spokes[i], spokes[j]],
                true,
            )?;
        }
    }
    log::debug!("Built a star of {} hosts in {}", num_hosts, zone);
    Ok(hosts)
}

#[cfg(test)]
mod star_tests {
    use super::super::topology_tests::{netpoint, open_zone};
    use super::*;
    use crate::ZoneKind;

    #[test]
    fn hosts_talk_through_their_two_spokes() {
        let _logger = env_logger::builder().is_test(true).try_init();
        for kind in [ZoneKind::Full, ZoneKind::Floyd, ZoneKind::Dijkstra] {
            let (mut platform, zone) = open_zone(kind);
            let hosts = star(
                &mut platform,
                zone,
                "leaf",
                4,
                &HostConfiguration::default(),
                &LinkConfiguration::new(1e6, 1e-3),
            )
            .unwrap();
            platform.seal_all().unwrap();
            let src = netpoint(&platform, hosts[1]);
            let dst = netpoint(&platform, hosts[3]);
            let route = platform.get_route(src, dst).unwrap();
            assert_eq!(
                route.links,
                vec![
                    platform.link_by_name("leaf-link-1").unwrap(),
                    platform.link_by_name("leaf-link-3").unwrap()
                ],
                "{:?}",
                kind
            );
            assert!((platform.get_route_latency(src, dst).unwrap() - 2e-3).abs() < 1e-12);
        }
    }

    #[test]
    fn hub_is_a_router() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut platform, zone) = open_zone(ZoneKind::Full);
        star(
            &mut platform,
            zone,
            "s",
            2,
            &HostConfiguration::default(),
            &LinkConfiguration::default(),
        )
        .unwrap();
        let hub = platform.netpoint_by_name("s-hub").unwrap();
        assert_eq!(platform.host_of(hub), None);
        assert_eq!(
            platform.netpoint(hub).unwrap().kind(),
            crate::NetPointKind::Router
        );
    }
}
