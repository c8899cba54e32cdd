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

use env_logger::Target;
use gridsim::SimulationConfig;
use masterworker::{Deployment, Topology};
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "masterworker", about = "A master dispatching tasks to workers")]
struct Arguments {
    /// supported topologies: Star, Full, Line
    #[structopt(short, long, default_value = "Star")]
    topology: Topology,
    #[structopt(short, long, default_value = "4")]
    workers: usize,
    #[structopt(long, default_value = "20")]
    tasks: usize,
    /// computation cost of a task, in flop
    #[structopt(long, default_value = "50e6")]
    flops: f64,
    /// network cost of a task, in bytes
    #[structopt(long, default_value = "1e6")]
    bytes: f64,
    /// YAML simulation configuration
    #[structopt(short, long)]
    config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Arguments::from_args();

    let _logger = env_logger::builder()
        .filter(Some("masterworker"), log::LevelFilter::Info)
        .target(Target::Stderr)
        .init();

    let config = match &args.config {
        Some(file) => SimulationConfig::from_file(file)?,
        None => SimulationConfig::default(),
    };
    let deployment = Deployment {
        topology: args.topology,
        workers: args.workers,
        tasks: args.tasks,
        flops: args.flops,
        bytes: args.bytes,
        ..Default::default()
    };
    let report = masterworker::simulate(&deployment, config)?;
    println!("end date: {:.6}", report.end_date);
    for (worker, count) in report.executed.iter().enumerate() {
        println!("worker-{}: {} tasks", worker, count);
    }
    Ok(())
}
