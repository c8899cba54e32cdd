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

//! A master dispatching compute tasks to a pool of workers.
//!
//! The master sends `tasks` tasks round-robin to the workers, each task
//! costing `bytes` on the network and `flops` of computation, then tells
//! every worker to stop. Workers receive on their own mailbox and execute
//! whatever they get until told to stop.
//!
//! The master runs on the first host of the topology and worker `i` on host
//! `i + 1`.

use gridsim::topologies;
use gridsim::{
    ActorContext, Engine, Error, HostConfiguration, HostId, LinkConfiguration, SimulationConfig,
    ZoneKind,
};
use std::cell::RefCell;
use std::rc::Rc;

mod modes;

pub use modes::Topology;

#[derive(Clone, Debug)]
pub struct Deployment {
    pub topology: Topology,
    pub workers: usize,
    pub tasks: usize,
    /// Computation cost of a task, in flop.
    pub flops: f64,
    /// Network cost of a task, in bytes.
    pub bytes: f64,
    pub host: HostConfiguration,
    pub link: LinkConfiguration,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            topology: Topology::Star,
            workers: 4,
            tasks: 20,
            flops: 50e6,
            bytes: 1e6,
            host: HostConfiguration::default(),
            link: LinkConfiguration::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub end_date: f64,
    /// Number of tasks executed by each worker.
    pub executed: Vec<usize>,
}

#[derive(Debug)]
enum Message {
    Task { flops: f64 },
    Finalize,
}

fn mailbox(worker: usize) -> String {
    format!("worker-{}", worker)
}

async fn master(ctx: ActorContext, deployment: Deployment) -> Result<(), Error> {
    for task in 0..deployment.tasks {
        let worker = task % deployment.workers;
        log::debug!("[{:.6}] Sending task {} to worker {}", ctx.now(), task, worker);
        ctx.put(
            &mailbox(worker),
            Message::Task {
                flops: deployment.flops,
            },
            deployment.bytes,
        )
        .await?;
    }
    log::info!("[{:.6}] All tasks dispatched", ctx.now());
    for worker in 0..deployment.workers {
        ctx.put(&mailbox(worker), Message::Finalize, 0.0).await?;
    }
    Ok(())
}

async fn worker(
    ctx: ActorContext,
    id: usize,
    executed: Rc<RefCell<Vec<usize>>>,
) -> Result<(), Error> {
    loop {
        match ctx.get::<Message>(&mailbox(id)).await? {
            Message::Task { flops } => {
                ctx.execute(flops).await?;
                executed.borrow_mut()[id] += 1;
            }
            Message::Finalize => break,
        }
    }
    log::info!("[{:.6}] Worker {} exiting", ctx.now(), id);
    Ok(())
}

/// Populate the platform of `engine` with `deployment.workers + 1` hosts.
fn build_platform(engine: &Engine, deployment: &Deployment) -> Result<Vec<HostId>, Error> {
    let mut platform = engine.platform_mut();
    let num_hosts = deployment.workers + 1;
    match deployment.topology {
        Topology::Star => {
            let zone = platform.create_zone("cluster", ZoneKind::Full, None)?;
            topologies::star(
                &mut platform,
                zone,
                "host",
                num_hosts,
                &deployment.host,
                &deployment.link,
            )
        }
        Topology::Full => {
            let zone = platform.create_zone("cluster", ZoneKind::Full, None)?;
            topologies::full(
                &mut platform,
                zone,
                "host",
                num_hosts,
                &deployment.host,
                &deployment.link,
            )
        }
        Topology::Line => {
            let zone = platform.create_zone("cluster", ZoneKind::Floyd, None)?;
            topologies::line(
                &mut platform,
                zone,
                "host",
                num_hosts,
                &deployment.host,
                &deployment.link,
            )
        }
    }
}

pub fn simulate(deployment: &Deployment, config: SimulationConfig) -> Result<Report, Error> {
    if deployment.workers == 0 {
        return Err(Error::InvalidConfig("at least one worker is needed".into()));
    }
    let mut engine = Engine::new(config);
    let hosts = build_platform(&engine, deployment)?;
    let executed = Rc::new(RefCell::new(vec![0; deployment.workers]));

    let master_deployment = deployment.clone();
    engine.add_actor("master", hosts[0], move |ctx| {
        master(ctx, master_deployment.clone())
    })?;
    for (id, &host) in hosts[1..].iter().enumerate() {
        let executed = executed.clone();
        engine.add_actor(&format!("worker-{}", id), host, move |ctx| {
            worker(ctx, id, executed.clone())
        })?;
    }

    let end_date = engine.run()?;
    let executed = executed.borrow().clone();
    log::info!("Simulation ended at {:.6}: {:?}", end_date, executed);
    Ok(Report { end_date, executed })
}
