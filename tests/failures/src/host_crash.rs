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

//! A client querying a server whose host crashes and comes back.
//!
//! The server is an auto-restarting daemon: it is killed with its host and
//! started again once the host is back on. The client gives up on a request
//! when it gets no answer within a timeout, and moves on to the next one.

use gridsim::{ActorContext, Engine, Error, LinkConfiguration, SimulationConfig, ZoneKind};
use std::cell::RefCell;
use std::rc::Rc;

const TIMEOUT: f64 = 3.0;
const REQUEST_BYTES: f64 = 1e3;
const REQUEST_FLOPS: f64 = 1e9;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrashReport {
    pub end_date: f64,
    pub answered: usize,
    pub timed_out: usize,
    /// Number of times the server started.
    pub server_starts: usize,
}

async fn server(ctx: ActorContext, starts: Rc<RefCell<usize>>) -> Result<(), Error> {
    ctx.daemonize().await?;
    ctx.set_auto_restart(true).await?;
    *starts.borrow_mut() += 1;
    log::info!("[{:.6}] Server up on {}", ctx.now(), ctx.host());
    loop {
        let request = ctx.get::<usize>("requests").await?;
        ctx.execute(REQUEST_FLOPS).await?;
        ctx.put("replies", request, REQUEST_BYTES).await?;
    }
}

/// Wait for `id` at most `TIMEOUT` seconds, giving it up on expiry.
async fn bounded_wait(ctx: &ActorContext, id: gridsim::ActivityId) -> Result<bool, Error> {
    match ctx.wait_for(id, TIMEOUT).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_local() => {
            log::warn!("[{:.6}] {} failed: {}", ctx.now(), id, e);
            ctx.cancel(id).await?;
            ctx.release(id).await?;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn client(
    ctx: ActorContext,
    requests: usize,
    report: Rc<RefCell<CrashReport>>,
) -> Result<(), Error> {
    for request in 0..requests {
        let put = ctx.put_async("requests", request, REQUEST_BYTES).await?;
        if !bounded_wait(&ctx, put).await? {
            report.borrow_mut().timed_out += 1;
            continue;
        }
        ctx.release(put).await?;
        let get = ctx.get_async("replies").await?;
        if !bounded_wait(&ctx, get).await? {
            report.borrow_mut().timed_out += 1;
            continue;
        }
        let reply = ctx.take_payload::<usize>(get).await?;
        ctx.release(get).await?;
        log::info!("[{:.6}] Request {} answered", ctx.now(), reply);
        report.borrow_mut().answered += 1;
    }
    Ok(())
}

/// Run `requests` requests against a server whose host is off between
/// `crash` and `recovery`.
pub fn simulate_host_crash(
    requests: usize,
    crash: f64,
    recovery: f64,
) -> Result<CrashReport, Error> {
    let mut engine = Engine::new(SimulationConfig::default());
    let (client_host, server_host) = {
        let mut platform = engine.platform_mut();
        let zone = platform.create_zone("site", ZoneKind::Full, None)?;
        let client_host = platform.add_host(zone, "client", 1e9)?;
        let server_host = platform.add_host(zone, "server", 1e9)?;
        let link = platform.add_link(zone, "wire", &LinkConfiguration::new(1e6, 0.0))?;
        let src = platform.resources().host(client_host)?.netpoint();
        let dst = platform.resources().host(server_host)?.netpoint();
        platform.add_route(zone, src, dst, None, None, &[link], true)?;
        (client_host, server_host)
    };

    let report = Rc::new(RefCell::new(CrashReport::default()));
    let starts = Rc::new(RefCell::new(0));
    {
        let starts = starts.clone();
        engine.add_actor("server", server_host, move |ctx| {
            server(ctx, starts.clone())
        })?;
    }
    {
        let report = report.clone();
        engine.add_actor("client", client_host, move |ctx| {
            client(ctx, requests, report.clone())
        })?;
    }
    engine.schedule(crash, move |world| {
        if let Err(e) = world.turn_off_host(server_host) {
            log::error!("Cannot turn the server off: {}", e);
        }
    });
    engine.schedule(recovery, move |world| {
        if let Err(e) = world.turn_on_host(server_host) {
            log::error!("Cannot turn the server on: {}", e);
        }
    });

    let end_date = engine.run()?;
    let mut report = report.borrow().clone();
    report.end_date = end_date;
    report.server_starts = *starts.borrow();
    Ok(report)
}

#[cfg(test)]
mod host_crash_tests {
    use super::*;

    #[test]
    fn the_request_in_flight_is_lost() {
        let _logger = env_logger::builder().is_test(true).try_init();
        // requests take 2 ms of transfers and 1 s of computation; request 2
        // is being computed when the server crashes at 2.5, its reply times
        // out at 5.005, after the server came back at 4.0
        let report = simulate_host_crash(5, 2.5, 4.0).unwrap();
        assert_eq!(report.answered, 4);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.server_starts, 2);
        assert!((report.end_date - 7.009).abs() < 1e-6, "{}", report.end_date);
    }

    #[test]
    fn a_crash_between_requests_goes_unnoticed() {
        let _logger = env_logger::builder().is_test(true).try_init();
        // the request is answered at 1.002, well before the crash; the run
        // still lasts until the last scheduled event
        let report = simulate_host_crash(1, 1.5, 1.6).unwrap();
        assert_eq!(report.answered, 1);
        assert_eq!(report.timed_out, 0);
        assert_eq!(report.server_starts, 1);
        assert!((report.end_date - 1.6).abs() < 1e-9, "{}", report.end_date);
    }
}
