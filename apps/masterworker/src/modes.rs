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

use std::str::FromStr;

/// The way hosts are interconnected.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Topology {
    /// Every host has a link to a central router.
    Star,
    /// Every pair of hosts has a private link.
    Full,
    /// Hosts form a chain, the master at one end.
    Line,
}

impl FromStr for Topology {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Star" => Ok(Topology::Star),
            "Full" => Ok(Topology::Full),
            "Line" => Ok(Topology::Line),
            _ => Err(Self::Err::new(
                std::io::ErrorKind::Other,
                format!("Invalid topology: {}", s),
            )),
        }
    }
}
