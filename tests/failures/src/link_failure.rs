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

//! A sender streaming messages over a link that goes down for a while.
//!
//! Comms crossing the link when it is turned off fail on both ends, and so
//! does every comm started while it is off. The sender drops the failed
//! message and backs off before sending the next one.

use gridsim::{ActorContext, Engine, Error, LinkConfiguration, SimulationConfig, ZoneKind};
use std::cell::RefCell;
use std::rc::Rc;

const MESSAGE_BYTES: f64 = 1e6;
const BACKOFF: f64 = 1.0;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FailureReport {
    pub end_date: f64,
    pub delivered: Vec<usize>,
    pub lost: Vec<usize>,
}

async fn sender(
    ctx: ActorContext,
    messages: usize,
    report: Rc<RefCell<FailureReport>>,
) -> Result<(), Error> {
    for message in 0..messages {
        match ctx.put("stream", message, MESSAGE_BYTES).await {
            Ok(()) => {}
            Err(e) if e.is_local() => {
                log::warn!("[{:.6}] Message {} lost: {}", ctx.now(), message, e);
                report.borrow_mut().lost.push(message);
                ctx.sleep_for(BACKOFF).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn receiver(ctx: ActorContext, report: Rc<RefCell<FailureReport>>) -> Result<(), Error> {
    ctx.daemonize().await?;
    loop {
        match ctx.get::<usize>("stream").await {
            Ok(message) => report.borrow_mut().delivered.push(message),
            Err(e) if e.is_local() => log::debug!("[{:.6}] Receive failed: {}", ctx.now(), e),
            Err(e) => return Err(e),
        }
    }
}

/// Stream `messages` messages of one second each over a link that is off
/// between `failure` and `repair`.
pub fn simulate_link_failure(
    messages: usize,
    failure: f64,
    repair: f64,
) -> Result<FailureReport, Error> {
    let mut engine = Engine::new(SimulationConfig::default());
    let (src, dst, link) = {
        let mut platform = engine.platform_mut();
        let zone = platform.create_zone("site", ZoneKind::Floyd, None)?;
        let src = platform.add_host(zone, "producer", 1e9)?;
        let dst = platform.add_host(zone, "consumer", 1e9)?;
        let link = platform.add_link(zone, "wire", &LinkConfiguration::new(MESSAGE_BYTES, 0.0))?;
        let np_src = platform.resources().host(src)?.netpoint();
        let np_dst = platform.resources().host(dst)?.netpoint();
        platform.add_route(zone, np_src, np_dst, None, None, &[link], true)?;
        (src, dst, link)
    };

    let report = Rc::new(RefCell::new(FailureReport::default()));
    {
        let report = report.clone();
        engine.add_actor("sender", src, move |ctx| {
            sender(ctx, messages, report.clone())
        })?;
    }
    {
        let report = report.clone();
        engine.add_actor("receiver", dst, move |ctx| receiver(ctx, report.clone()))?;
    }
    engine.schedule(failure, move |world| {
        if let Err(e) = world.turn_off_link(link) {
            log::error!("Cannot turn the link off: {}", e);
        }
    });
    engine.schedule(repair, move |world| {
        if let Err(e) = world.turn_on_link(link) {
            log::error!("Cannot turn the link on: {}", e);
        }
    });

    let end_date = engine.run()?;
    let mut report = report.borrow().clone();
    report.end_date = end_date;
    Ok(report)
}

#[cfg(test)]
mod link_failure_tests {
    use super::*;

    #[test]
    fn messages_sent_while_the_link_is_down_are_lost() {
        let _logger = env_logger::builder().is_test(true).try_init();
        // message 3 is cut at 3.5; message 4 is sent at 4.5, before the
        // repair, and fails right away; message 5 leaves at 5.5
        let report = simulate_link_failure(10, 3.5, 5.0).unwrap();
        assert_eq!(report.lost, vec![3, 4]);
        assert_eq!(report.delivered, vec![0, 1, 2, 5, 6, 7, 8, 9]);
        assert!((report.end_date - 10.5).abs() < 1e-9, "{}", report.end_date);
    }

    #[test]
    fn a_repaired_link_carries_on() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let report = simulate_link_failure(3, 1.5, 1.75).unwrap();
        assert_eq!(report.lost, vec![1]);
        assert_eq!(report.delivered, vec![0, 2]);
        // message 2 leaves after the backoff, at 2.5
        assert!((report.end_date - 3.5).abs() < 1e-9, "{}", report.end_date);
    }
}
