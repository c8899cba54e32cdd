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

use crate::resource::SharingPolicy;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

/// Default loopback bandwidth, in bytes per second.
pub const LOOPBACK_BANDWIDTH: f64 = 10e9;

/// Completion threshold, relative to the amount of work of an activity.
pub const PRECISION: f64 = 1e-9;

/// The seed used by the scheduler when the configuration does not set one.
pub const DEFAULT_SEED: u64 = 0x87654321FEDCBA09u64;

/// Serializable counterpart of [`SharingPolicy`]. User supplied degradation
/// functions can only be installed programmatically.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum Sharing {
    Shared,
    FatPipe,
}

impl From<Sharing> for SharingPolicy {
    fn from(sharing: Sharing) -> Self {
        match sharing {
            Sharing::Shared => SharingPolicy::Shared,
            Sharing::FatPipe => SharingPolicy::FatPipe,
        }
    }
}

/// Parameters of a network link. Bandwidth in bytes/s, latency in seconds.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct LinkConfiguration {
    pub bandwidth: f64,
    pub latency: f64,
    pub sharing: Sharing,
}

impl LinkConfiguration {
    pub fn new(bandwidth: f64, latency: f64) -> Self {
        Self {
            bandwidth,
            latency,
            sharing: Sharing::Shared,
        }
    }
}

impl Default for LinkConfiguration {
    fn default() -> Self {
        Self::new(125e6, 1e-4)
    }
}

/// Parameters of a host: its speed in flop/s.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct HostConfiguration {
    pub speed: f64,
}

impl Default for HostConfiguration {
    fn default() -> Self {
        Self { speed: 1e9 }
    }
}

/// Read and write bandwidths of a disk, in bytes/s.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DiskConfiguration {
    pub read_bandwidth: f64,
    pub write_bandwidth: f64,
}

impl Default for DiskConfiguration {
    fn default() -> Self {
        Self {
            read_bandwidth: 100e6,
            write_bandwidth: 80e6,
        }
    }
}

/// Knobs of one simulation run.
///
/// Constructed programmatically or read from a yaml file. Every field has a
/// default so a configuration file only lists what it changes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of the scheduling RNG.
    pub seed: u64,
    /// Shuffle the ready actors of every scheduling round with the seeded RNG
    /// instead of running them in FIFO order.
    pub randomize_schedule: bool,
    /// Parallel execution of actors. Only forces full marshalling of object
    /// accesses; observable ordering is unchanged.
    pub parallel: bool,
    /// Model-checking instrumentation. Forces full marshalling of object
    /// accesses so that every mutation shows up in the simcall trace.
    pub model_checking: bool,
    pub loopback: LinkConfiguration,
    pub precision: f64,
    /// Stop the simulation at this date, if set.
    pub max_date: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            randomize_schedule: false,
            parallel: false,
            model_checking: false,
            loopback: LinkConfiguration {
                bandwidth: LOOPBACK_BANDWIDTH,
                latency: 0.0,
                sharing: Sharing::FatPipe,
            },
            precision: PRECISION,
            max_date: None,
        }
    }
}

impl FromStr for SimulationConfig {
    type Err = Error;

    fn from_str(config: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(config).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

impl SimulationConfig {
    pub fn from_file(file_name: &str) -> Result<Self, Error> {
        let file = File::open(Path::new(file_name))
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", file_name, e)))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Whether object accesses have to go through the maestro.
    pub(crate) fn marshal_object_access(&self) -> bool {
        self.parallel || self.model_checking
    }
}
