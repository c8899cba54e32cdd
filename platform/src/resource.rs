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

//! Capacity-bearing resources and the way they are shared.

use crate::{DiskId, Error, HostId, NetPointId, ResourceId};
use std::fmt;
use std::rc::Rc;

/// Degradation function of a non-linear resource: given the nominal capacity
/// and the number of concurrent consumers, returns the rate each consumer
/// gets.
pub type SharingFunction = Rc<dyn Fn(f64, usize) -> f64>;

/// How a resource divides its capacity among its concurrent consumers.
#[derive(Clone)]
pub enum SharingPolicy {
    /// Capacity divided evenly among the consumers.
    Shared,
    /// Every consumer gets the full capacity (backbones, loopback).
    FatPipe,
    NonLinear(SharingFunction),
}

impl SharingPolicy {
    /// The per-consumer rate for `concurrency` consumers.
    pub fn share(&self, capacity: f64, concurrency: usize) -> f64 {
        if concurrency == 0 {
            return capacity;
        }
        match self {
            Self::Shared => capacity / concurrency as f64,
            Self::FatPipe => capacity,
            Self::NonLinear(f) => f(capacity, concurrency).max(0.0),
        }
    }
}

impl fmt::Debug for SharingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "Shared"),
            Self::FatPipe => write!(f, "FatPipe"),
            Self::NonLinear(_) => write!(f, "NonLinear(..)"),
        }
    }
}

impl Default for SharingPolicy {
    fn default() -> Self {
        Self::Shared
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResourceKind {
    Cpu(HostId),
    /// Latency in seconds.
    Link { latency: f64 },
    DiskRead(DiskId),
    DiskWrite(DiskId),
}

#[derive(Clone, Debug)]
pub struct Resource {
    name: String,
    kind: ResourceKind,
    capacity: f64,
    policy: SharingPolicy,
    on: bool,
}

impl Resource {
    pub fn new(name: &str, kind: ResourceKind, capacity: f64, policy: SharingPolicy) -> Self {
        Self {
            name: name.to_string(),
            kind,
            capacity,
            policy,
            on: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
    pub fn policy(&self) -> &SharingPolicy {
        &self.policy
    }
    pub fn is_on(&self) -> bool {
        self.on
    }
    pub(crate) fn set_policy(&mut self, policy: SharingPolicy) {
        self.policy = policy;
    }
    pub(crate) fn set_on(&mut self, on: bool) {
        self.on = on;
    }

    /// Link latency, zero for any other kind of resource.
    pub fn latency(&self) -> f64 {
        match self.kind {
            ResourceKind::Link { latency } => latency,
            _ => 0.0,
        }
    }

    /// Rate granted to each of `concurrency` consumers.
    pub fn share(&self, concurrency: usize) -> f64 {
        if !self.on {
            return 0.0;
        }
        self.policy.share(self.capacity, concurrency)
    }
}

#[derive(Clone, Debug)]
pub struct Host {
    pub(crate) name: String,
    pub(crate) netpoint: NetPointId,
    pub(crate) cpu: ResourceId,
    pub(crate) disks: Vec<DiskId>,
}

impl Host {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn netpoint(&self) -> NetPointId {
        self.netpoint
    }
    pub fn cpu(&self) -> ResourceId {
        self.cpu
    }
    pub fn disks(&self) -> &[DiskId] {
        &self.disks
    }
}

#[derive(Clone, Debug)]
pub struct Disk {
    pub(crate) name: String,
    pub(crate) host: HostId,
    pub(crate) read: ResourceId,
    pub(crate) write: ResourceId,
}

impl Disk {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn host(&self) -> HostId {
        self.host
    }
    pub fn read(&self) -> ResourceId {
        self.read
    }
    pub fn write(&self) -> ResourceId {
        self.write
    }
}

/// Arena of every resource, host and disk of a platform.
#[derive(Debug, Default)]
pub struct Resources {
    resources: Vec<Resource>,
    hosts: Vec<Host>,
    disks: Vec<Disk>,
}

impl Resources {
    pub(crate) fn add_resource(&mut self, resource: Resource) -> ResourceId {
        self.resources.push(resource);
        ResourceId(self.resources.len() - 1)
    }

    pub(crate) fn add_host(&mut self, name: &str, netpoint: NetPointId, speed: f64) -> HostId {
        let id = HostId(self.hosts.len());
        let cpu = self.add_resource(Resource::new(
            name,
            ResourceKind::Cpu(id),
            speed,
            SharingPolicy::Shared,
        ));
        self.hosts.push(Host {
            name: name.to_string(),
            netpoint,
            cpu,
            disks: Vec::new(),
        });
        id
    }

    pub(crate) fn add_disk(
        &mut self,
        host: HostId,
        name: &str,
        read_bandwidth: f64,
        write_bandwidth: f64,
    ) -> Result<DiskId, Error> {
        if host.0 >= self.hosts.len() {
            return Err(Error::InvalidHost(host));
        }
        let id = DiskId(self.disks.len());
        let read = self.add_resource(Resource::new(
            &format!("{}-read", name),
            ResourceKind::DiskRead(id),
            read_bandwidth,
            SharingPolicy::Shared,
        ));
        let write = self.add_resource(Resource::new(
            &format!("{}-write", name),
            ResourceKind::DiskWrite(id),
            write_bandwidth,
            SharingPolicy::Shared,
        ));
        self.disks.push(Disk {
            name: name.to_string(),
            host,
            read,
            write,
        });
        self.hosts[host.0].disks.push(id);
        Ok(id)
    }

    pub fn get(&self, id: ResourceId) -> Result<&Resource, Error> {
        self.resources.get(id.0).ok_or(Error::InvalidResource(id))
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> Result<&mut Resource, Error> {
        self.resources.get_mut(id.0).ok_or(Error::InvalidResource(id))
    }

    pub fn host(&self, id: HostId) -> Result<&Host, Error> {
        self.hosts.get(id.0).ok_or(Error::InvalidHost(id))
    }

    pub fn disk(&self, id: DiskId) -> Option<&Disk> {
        self.disks.get(id.0)
    }

    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        self.hosts.iter().position(|h| h.name == name).map(HostId)
    }

    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|r| r.name == name)
            .map(ResourceId)
    }

    pub fn iter_hosts(&self) -> impl Iterator<Item = (HostId, &Host)> {
        self.hosts.iter().enumerate().map(|(i, h)| (HostId(i), h))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod resource_tests {
    use super::*;

    #[test]
    fn linear_sharing_divides_capacity() {
        let policy = SharingPolicy::Shared;
        assert_eq!(policy.share(100.0, 1), 100.0);
        assert_eq!(policy.share(100.0, 2), 50.0);
        assert_eq!(policy.share(100.0, 4), 25.0);
        assert_eq!(SharingPolicy::FatPipe.share(100.0, 4), 100.0);
    }

    #[test]
    fn non_linear_sharing_uses_the_degradation_function() {
        // every extra consumer costs 10% of the aggregated capacity
        let policy = SharingPolicy::NonLinear(Rc::new(|capacity, n| {
            capacity * (1.0 - 0.1 * (n - 1) as f64) / n as f64
        }));
        assert_eq!(policy.share(100.0, 1), 100.0);
        assert!((policy.share(100.0, 2) - 45.0).abs() < 1e-9);
        assert_eq!(policy.share(100.0, 20), 0.0);
    }

    #[test]
    fn turned_off_resource_grants_nothing() {
        let mut resources = Resources::default();
        let link = resources.add_resource(Resource::new(
            "l0",
            ResourceKind::Link { latency: 1e-3 },
            100.0,
            SharingPolicy::Shared,
        ));
        assert_eq!(resources.get(link).unwrap().latency(), 1e-3);
        resources.get_mut(link).unwrap().set_on(false);
        assert_eq!(resources.get(link).unwrap().share(1), 0.0);
        assert_eq!(
            resources.get(ResourceId(10)).unwrap_err(),
            Error::InvalidResource(ResourceId(10))
        );
    }

    #[test]
    fn disks_are_attached_to_hosts() {
        let mut resources = Resources::default();
        let host = resources.add_host("h0", NetPointId(0), 1e9);
        let disk = resources.add_disk(host, "d0", 100.0, 50.0).unwrap();
        assert_eq!(resources.host(host).unwrap().disks(), &[disk]);
        let d = resources.disk(disk).unwrap();
        assert_eq!(resources.get(d.write()).unwrap().capacity(), 50.0);
        assert_eq!(resources.host_by_name("h0"), Some(host));
        assert!(resources.add_disk(HostId(3), "d1", 1.0, 1.0).is_err());
    }
}
