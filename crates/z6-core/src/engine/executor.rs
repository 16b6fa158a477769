//! The driver loop.
//!
//! `run_scenario` owns every moving part of a run: the scheduler, one
//! protocol engine, the event log, and per-VU contexts. One iteration =
//! one logical tick: advance the clock, spawn due VUs, step woken VUs,
//! poll the engine once, then apply completions. Nothing here consults
//! wall-clock time, so a scenario + seed always produces the same log.

use crate::error::Z6Error;
use crate::event::record::{AssertionPayload, Event, EventType};
use crate::event::EventLog;
use crate::http::engine::{Completion, ProtocolEngine};
use crate::http::request::Target;
use crate::http1::engine::Http1Engine;
use crate::http2::engine::Http2Engine;
use crate::metrics::{self, evaluate_assertions, AssertionOutcome, Metrics};
use crate::scenario::model::{HttpVersion, Scenario, ScheduleKind};
use crate::scenario::validation::validate;
use crate::sched::{Scheduler, VuState};
use crate::transport::Connector;

use super::virtual_user::{build_request, select_request, think_time_ticks, VuContext};

/// Logical ticks per second of scenario time.
pub const TICKS_PER_SECOND: u64 = 100;

/// Ticks past the configured duration before the run is force-cancelled.
pub const SHUTDOWN_GRACE_TICKS: u64 = 1000;

/// Everything a finished run produces.
pub struct RunOutcome {
    pub log: EventLog,
    pub seed: u64,
    pub scenario_hash: [u8; 32],
    pub metrics: Metrics,
    pub assertions: Vec<AssertionOutcome>,
}

/// Execute `scenario` against `connector` to completion.
pub fn run_scenario(
    scenario: &Scenario,
    connector: Box<dyn Connector>,
) -> Result<RunOutcome, Z6Error> {
    if let Some(error) = validate(scenario).into_iter().next() {
        return Err(error);
    }

    let seed = scenario.runtime.prng_seed.unwrap_or(0);
    let duration_ticks = scenario.runtime.duration_seconds * TICKS_PER_SECOND;
    let vus = scenario.runtime.vus;
    let think_ticks = think_time_ticks(scenario);
    let total_weight = scenario.total_weight();
    let target = Target {
        host: scenario.target.host.clone(),
        port: scenario.target.port,
    };

    let mut scheduler = Scheduler::new(seed, vus);
    let mut log = EventLog::new();
    let mut engine: Box<dyn ProtocolEngine> = match scenario.target.http_version {
        HttpVersion::H1_1 => Box::new(Http1Engine::new(connector)),
        HttpVersion::H2 => Box::new(Http2Engine::new(connector)),
    };
    let mut contexts: Vec<VuContext> = vec![VuContext::default(); vus as usize];
    let spawn_ticks: Vec<u64> = (0..vus)
        .map(|i| spawn_tick(scenario.schedule.kind, i, vus, duration_ticks))
        .collect();
    let mut next_spawn = 0usize;
    let mut completions: Vec<Completion> = Vec::new();

    tracing::debug!(
        vus,
        duration_ticks,
        seed,
        "starting run against {}",
        target
    );

    loop {
        let tick = scheduler.advance_tick(&mut log)?;

        while next_spawn < spawn_ticks.len() && spawn_ticks[next_spawn] <= tick {
            scheduler.spawn_vu(&mut log)?;
            next_spawn += 1;
        }

        for vu_id in scheduler.take_due_wakeups() {
            step_vu(
                vu_id,
                tick,
                duration_ticks,
                think_ticks,
                scenario,
                total_weight,
                &target,
                &mut scheduler,
                engine.as_mut(),
                &mut contexts,
                &mut log,
            )?;
        }

        completions.clear();
        engine.poll(tick, &mut log, &mut completions);

        for completion in completions.drain(..) {
            apply_completion(
                &completion,
                tick,
                duration_ticks,
                think_ticks,
                &mut scheduler,
                &mut contexts,
                &mut log,
            )?;
        }

        if next_spawn >= spawn_ticks.len() && scheduler.all_complete() {
            break;
        }
        if tick >= duration_ticks + SHUTDOWN_GRACE_TICKS {
            tracing::warn!(tick, "grace period exceeded, cancelling run");
            break;
        }
    }

    // Cancel stragglers and tear the engine down.
    if !scheduler.all_complete() {
        scheduler.cancel_all(&mut log);
    }
    let mut drained = Vec::new();
    engine.shutdown(scheduler.tick(), &mut log, &mut drained);

    let metrics = metrics::reduce(&log)?;
    let assertions = evaluate_assertions(&metrics, &scenario.assertions);
    let final_tick = scheduler.tick();
    for outcome in &assertions {
        let event_type = if outcome.passed {
            EventType::AssertionPassed
        } else {
            EventType::AssertionFailed
        };
        let payload = AssertionPayload {
            kind: outcome.kind,
            measured: outcome.measured,
            threshold: outcome.threshold,
        };
        log.append(Event::new(final_tick, 0, event_type, payload.encode()))?;
    }

    Ok(RunOutcome {
        log,
        seed,
        scenario_hash: scenario.hash(),
        metrics,
        assertions,
    })
}

/// When VU `index` (of `total`) enters the run, in ticks.
fn spawn_tick(kind: ScheduleKind, index: u32, total: u32, duration_ticks: u64) -> u64 {
    let index = index as u64;
    let total = total as u64;
    match kind {
        ScheduleKind::Constant => 1,
        // Evenly over the first half of the run.
        ScheduleKind::Ramp => 1 + index * (duration_ticks / 2) / total,
        // Half up front, the rest at the midpoint.
        ScheduleKind::Spike => {
            if index < total / 2 {
                1
            } else {
                1 + duration_ticks / 2
            }
        }
        // Four equal batches at 0, 1/4, 1/2, 3/4 of the run.
        ScheduleKind::Steps => 1 + (index * 4 / total) * (duration_ticks / 4),
    }
}

#[allow(clippy::too_many_arguments)]
fn step_vu(
    vu_id: u32,
    tick: u64,
    duration_ticks: u64,
    think_ticks: u64,
    scenario: &Scenario,
    total_weight: f64,
    target: &Target,
    scheduler: &mut Scheduler,
    engine: &mut dyn ProtocolEngine,
    contexts: &mut [VuContext],
    log: &mut EventLog,
) -> Result<(), Z6Error> {
    let Some(vu) = scheduler.vu(vu_id) else {
        return Ok(());
    };
    match vu.state {
        VuState::Spawned => {
            if let Some(vu) = scheduler.vu_mut(vu_id) {
                vu.transition(VuState::Ready, tick)?;
            }
            log.append(Event::empty(tick, vu_id, EventType::VuReady))?;
            dispatch_request(
                vu_id,
                tick,
                think_ticks,
                scenario,
                total_weight,
                target,
                scheduler,
                engine,
                contexts,
                log,
            )
        }
        VuState::Ready => {
            if tick >= duration_ticks {
                if let Some(vu) = scheduler.vu_mut(vu_id) {
                    vu.transition(VuState::Complete, tick)?;
                }
                log.append(Event::empty(tick, vu_id, EventType::VuComplete))?;
                Ok(())
            } else {
                dispatch_request(
                    vu_id,
                    tick,
                    think_ticks,
                    scenario,
                    total_weight,
                    target,
                    scheduler,
                    engine,
                    contexts,
                    log,
                )
            }
        }
        // A wakeup can arrive for a VU that completed or went back to
        // waiting in the meantime; it is simply stale.
        VuState::Executing | VuState::Waiting | VuState::Complete => Ok(()),
    }
}

/// Select a request, hand it to the protocol engine, and move the VU to
/// `Waiting`. Failures leave the VU in `Ready` with a think-time backoff;
/// retry policy stays with the scheduler's wakeups, never the engine.
#[allow(clippy::too_many_arguments)]
fn dispatch_request(
    vu_id: u32,
    tick: u64,
    think_ticks: u64,
    scenario: &Scenario,
    total_weight: f64,
    target: &Target,
    scheduler: &mut Scheduler,
    engine: &mut dyn ProtocolEngine,
    contexts: &mut [VuContext],
    log: &mut EventLog,
) -> Result<(), Z6Error> {
    let index = select_request(scheduler.rng_mut(), &scenario.requests, total_weight);
    let spec = &scenario.requests[index];
    let request = build_request(spec, vu_id);

    let sent = engine
        .connect(target, tick, log)
        .and_then(|conn| engine.send(conn, request, tick, log));

    let ctx = &mut contexts[(vu_id - 1) as usize];
    match sent {
        Ok(request_id) => {
            if let Some(vu) = scheduler.vu_mut(vu_id) {
                vu.transition(VuState::Executing, tick)?;
                vu.transition(VuState::Waiting, tick)?;
                vu.pending_request_id = Some(request_id);
            }
            ctx.request_count += 1;
            ctx.last_request_tick = tick;
            ctx.current_request_index = Some(index);
            Ok(())
        }
        Err(error) => {
            let class = error.class();
            log.append(Event::new(
                tick,
                vu_id,
                EventType::for_error_class(class),
                crate::event::record::ErrorPayload {
                    request_id: 0,
                    connection_id: 0,
                    detail: 0,
                }
                .encode(),
            ))?;
            ctx.last_request_tick = tick;
            scheduler.schedule_wakeup(tick + think_ticks, vu_id);
            Ok(())
        }
    }
}

fn apply_completion(
    completion: &Completion,
    tick: u64,
    duration_ticks: u64,
    think_ticks: u64,
    scheduler: &mut Scheduler,
    contexts: &mut [VuContext],
    log: &mut EventLog,
) -> Result<(), Z6Error> {
    let vu_id = completion.vu_id;
    let Some(vu) = scheduler.vu_mut(vu_id) else {
        return Ok(());
    };
    if vu.is_complete() {
        return Ok(());
    }
    vu.pending_request_id = None;
    if let Some(ctx) = contexts.get_mut((vu_id - 1) as usize) {
        ctx.current_request_index = None;
    }

    if tick >= duration_ticks {
        vu.transition(VuState::Complete, tick)?;
        log.append(Event::empty(tick, vu_id, EventType::VuComplete))?;
    } else {
        vu.transition(VuState::Ready, tick)?;
        scheduler.schedule_wakeup(tick + think_ticks, vu_id);
    }
    Ok(())
}
