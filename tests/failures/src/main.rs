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

use crate::host_crash::simulate_host_crash;
use crate::link_failure::simulate_link_failure;

mod host_crash;
mod link_failure;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let crash = simulate_host_crash(5, 2.5, 4.0)?;
    log::info!("Host crash: {:?}", crash);

    let failure = simulate_link_failure(10, 3.5, 5.0)?;
    log::info!("Link failure: {:?}", failure);
    Ok(())
}
