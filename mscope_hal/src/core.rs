//! Stage Core struct and tick loop management.
//!
//! The `StageCore` struct is the main entry point for the stage driver. It
//! owns the producer side of the command ring, brings the bus up, and runs
//! the dequeue scheduler on a fixed tick in a dedicated thread.
//!
//! # Lifecycle
//!
//! 1. `StageCore::new(config)` - validate config, create the ring
//! 2. `init()` - open the transport, send motor enable and motion defaults,
//!    start the tick thread
//! 3. `wake_up()` / `go_idle()` - gate the scheduler; enqueue works either way
//! 4. `reset()` - only while idle; discards queued commands
//! 5. `shutdown()` - stop the tick thread and close the bus

use mscope_common::config::ConfigLoader;
use mscope_common::stage::bus::{BusError, BusTransport, TransportDiagnostics};
use mscope_common::stage::config::{NegotiationMode, StageConfig};
use mscope_common::stage::protocol::StageRequest;
use mscope_common::stage::types::{Axis, PendingCommand};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::negotiator::AxisNegotiator;
use crate::queue::{CommandQueue, QueueConsumer, QueueProducer};
use crate::scheduler::{DequeueScheduler, TickOutcome};
use crate::session::DeviceSession;
use crate::transport_registry::TransportRegistry;
use crate::watchdog::{SchedulerHealth, StallMonitor};

/// Delay between `open()` attempts during bring-up.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

type SharedScheduler = Arc<Mutex<DequeueScheduler>>;

/// Stage Core manages the bus, the command ring and the tick loop.
pub struct StageCore {
    /// Stage configuration
    config: StageConfig,
    /// Last completed id and command counter
    session: Arc<DeviceSession>,
    /// Producer side of the ring; serializes `queue_stage_cmd` callers
    producer: Mutex<QueueProducer>,
    /// Read-only view of the ring
    queue: Arc<CommandQueue>,
    /// Consumer side, held until `init` hands it to the scheduler
    consumer: Option<QueueConsumer>,
    /// Scheduler, present after `init`
    scheduler: Option<SharedScheduler>,
    /// Outstanding readiness query, for stall detection
    monitor: Arc<StallMonitor>,
    /// Scheduler gate
    awake: Arc<AtomicBool>,
    /// Tick thread stop flag; also aborts blocking readiness waits
    shutdown: Arc<AtomicBool>,
    /// Tick timing statistics
    stats: Arc<Mutex<TimingStats>>,
    /// Tick thread
    ticker: Option<JoinHandle<()>>,
}

/// Timing statistics for tick loop monitoring.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TimingStats {
    /// Number of ticks executed
    pub cycle_count: u64,
    /// Number of timing violations (tick exceeded `tick_us`)
    pub timing_violations: u64,
    /// Maximum observed tick time
    pub max_cycle_time_us: u64,
    /// Sum of tick times for average calculation
    pub total_cycle_time_us: u64,
}

impl TimingStats {
    /// Mean tick time, 0 before the first tick.
    pub fn avg_cycle_time_us(&self) -> u64 {
        self.total_cycle_time_us
            .checked_div(self.cycle_count)
            .unwrap_or(0)
    }

    fn record(&mut self, elapsed_us: u64, budget_us: u64) {
        self.cycle_count += 1;
        self.total_cycle_time_us += elapsed_us;
        self.max_cycle_time_us = self.max_cycle_time_us.max(elapsed_us);

        if elapsed_us > budget_us {
            self.timing_violations += 1;
            if self.timing_violations <= 10 || self.timing_violations % 1000 == 0 {
                warn!(
                    "Timing violation #{}: tick took {}us (target {}us)",
                    self.timing_violations, elapsed_us, budget_us
                );
            }
        }
    }
}

impl StageCore {
    /// Create a new StageCore with the given configuration.
    ///
    /// # Errors
    /// Returns error if configuration validation fails.
    pub fn new(config: StageConfig) -> Result<Self, StageError> {
        config.validate()?;

        let (producer, consumer) = CommandQueue::channel();
        let queue = producer.watch();

        info!(
            "StageCore created: tick={}us, id_mode={:?}, negotiation={:?}, transport={}",
            config.stage.tick_us,
            config.stage.id_mode,
            config.stage.negotiation,
            config.stage.transport
        );

        Ok(Self {
            session: Arc::new(DeviceSession::new(config.stage.id_mode)),
            config,
            producer: Mutex::new(producer),
            queue,
            consumer: Some(consumer),
            scheduler: None,
            monitor: Arc::new(StallMonitor::new()),
            awake: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(TimingStats::default())),
            ticker: None,
        })
    }

    /// Load and validate a stage configuration file.
    pub fn load_config(path: &Path) -> Result<StageConfig, StageError> {
        info!("Loading configuration from {:?}", path);
        let config = StageConfig::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Create the configured transport from `registry` and initialize.
    ///
    /// # Errors
    /// `TransportNotFound` for an unknown transport name, otherwise as
    /// [`init_with_transport`](Self::init_with_transport).
    pub fn init(&mut self, registry: &TransportRegistry) -> Result<(), StageError> {
        let bus = registry.create(&self.config.stage.transport, &self.config)?;
        self.init_with_transport(bus)
    }

    /// Bring up `bus`, send the init frames and start the tick thread.
    ///
    /// The scheduler starts halted; call [`wake_up`](Self::wake_up).
    pub fn init_with_transport(&mut self, mut bus: Box<dyn BusTransport>) -> Result<(), StageError> {
        if self.scheduler.is_some() {
            return Err(StageError::AlreadyRunning);
        }
        let consumer = self.consumer.take().ok_or(StageError::AlreadyRunning)?;
        info!("Initializing StageCore with transport '{}'...", bus.name());

        if let Err(e) = open_with_retry(bus.as_mut(), self.config.stage.open_retries) {
            self.consumer = Some(consumer);
            return Err(e.into());
        }

        let mut negotiator = AxisNegotiator::new(
            bus,
            self.config.bus,
            Arc::clone(&self.monitor),
            Arc::clone(&self.shutdown),
        );
        if let Err(e) = self.send_init_frames(&mut negotiator) {
            self.consumer = Some(consumer);
            return Err(e.into());
        }

        let scheduler = Arc::new(Mutex::new(DequeueScheduler::new(
            consumer,
            negotiator,
            Arc::clone(&self.session),
            self.config.stage.negotiation,
        )));
        self.ticker = Some(self.spawn_ticker(Arc::clone(&scheduler)));
        self.scheduler = Some(scheduler);

        info!("StageCore initialized successfully");
        Ok(())
    }

    /// Queue a motion command; blocks while the ring is full.
    ///
    /// Targets are truncated toward zero; `-1` leaves an axis alone.
    /// Returns the id assigned to the command.
    pub fn queue_stage_cmd(
        &self,
        target: [f64; 3],
        feed_rate: f64,
        invert_feed_rate: bool,
        line_number: Option<i32>,
    ) -> i32 {
        let mut producer = self.producer.lock();
        let cmd = PendingCommand {
            id: self.session.next_id(line_number),
            ..PendingCommand::from_planner(target, feed_rate, invert_feed_rate)
        };

        if !self.is_awake() && producer.queue().is_full() {
            warn!(
                id = cmd.id,
                "command ring full while scheduler is idle; enqueue blocks until wake_up"
            );
        }
        if producer.enqueue(cmd) {
            debug!(id = cmd.id, "enqueue waited for space");
        }
        cmd.id
    }

    /// Id of the most recently completed command.
    pub fn get_current_line_number(&self) -> i32 {
        self.session.last_completed_id()
    }

    /// Let the tick thread run the scheduler.
    pub fn wake_up(&self) {
        if !self.awake.swap(true, Ordering::AcqRel) {
            info!("Stage scheduler awake");
        }
    }

    /// Stop scheduling new ticks.
    ///
    /// Waits up to the stall threshold for a tick already in progress. A
    /// blocking readiness wait inside that tick is not interrupted.
    pub fn go_idle(&self) {
        if self.awake.swap(false, Ordering::AcqRel) {
            info!("Stage scheduler idle");
        }
        if let Some(scheduler) = &self.scheduler {
            if scheduler
                .try_lock_for(self.config.stage.stall_threshold())
                .is_none()
            {
                warn!("Tick still in progress after go_idle; readiness answer outstanding");
            }
        }
    }

    /// Discard all queued commands and restart id numbering.
    ///
    /// `last_completed_id` is kept. Waits up to the stall threshold for a
    /// tick already in progress.
    ///
    /// # Errors
    /// `NotIdle` while awake, `NotInitialized` before `init`,
    /// `TickInProgress` if a blocking readiness wait still holds the
    /// scheduler after the stall threshold.
    pub fn reset(&self) -> Result<usize, StageError> {
        if self.is_awake() {
            return Err(StageError::NotIdle);
        }
        let scheduler = self.scheduler.as_ref().ok_or(StageError::NotInitialized)?;
        let Some(mut guard) = scheduler.try_lock_for(self.config.stage.stall_threshold()) else {
            warn!("Reset refused: tick still waiting for a readiness answer");
            return Err(StageError::TickInProgress);
        };
        let discarded = guard.reset_progress();
        drop(guard);
        self.session.reset();
        info!(discarded, "Stage queue reset");
        Ok(discarded)
    }

    /// Run one tick on the caller's thread if the scheduler is awake.
    ///
    /// Serialized with the tick thread.
    pub fn tick_now(&self) -> Option<TickOutcome> {
        let scheduler = self.scheduler.as_ref()?;
        let mut guard = scheduler.lock();
        self.is_awake().then(|| guard.tick())
    }

    /// Stall classification of the outstanding readiness query.
    ///
    /// A halted deferred scheduler is always healthy: its outstanding query
    /// blocks nothing and is resumed on the next wake.
    pub fn health(&self) -> SchedulerHealth {
        if !self.is_awake() && self.config.stage.negotiation == NegotiationMode::Deferred {
            return SchedulerHealth::Healthy;
        }
        self.monitor.health(self.config.stage.stall_threshold())
    }

    /// Scheduler gate state.
    pub fn is_awake(&self) -> bool {
        self.awake.load(Ordering::Acquire)
    }

    /// Commands resident in the ring.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Commands the ring holds before `queue_stage_cmd` blocks.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Session counters.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Stage configuration.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Get timing statistics.
    pub fn stats(&self) -> TimingStats {
        *self.stats.lock()
    }

    /// Transport counters, if the scheduler lock is free.
    pub fn transport_diagnostics(&self) -> Option<TransportDiagnostics> {
        let scheduler = self.scheduler.as_ref()?;
        let guard = scheduler.try_lock()?;
        guard.negotiator().bus().diagnostics()
    }

    /// Stop the tick thread and close the bus.
    pub fn shutdown(&mut self) -> Result<(), StageError> {
        info!("Shutdown requested");
        self.awake.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);

        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                warn!("Tick thread panicked");
            }
        }

        if let Some(scheduler) = self.scheduler.take() {
            let mut guard = scheduler.lock();
            guard.negotiator_mut().abandon();
            guard.negotiator_mut().bus_mut().close()?;
        }

        let stats = self.stats();
        info!(
            "StageCore stopped after {} ticks (violations: {}), {} commands retired",
            stats.cycle_count,
            stats.timing_violations,
            self.session.retired_total()
        );
        Ok(())
    }

    /// Get the shutdown flag for signal handlers.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn send_init_frames<B: BusTransport>(
        &self,
        negotiator: &mut AxisNegotiator<B>,
    ) -> Result<(), BusError> {
        negotiator.send(StageRequest::Motor { axis: Axis::X, on: true })?;
        negotiator.send(StageRequest::Motor { axis: Axis::Y, on: true })?;

        let motion = self.config.motion;
        for axis in Axis::ALL {
            if let Some(value) = motion.acceleration {
                negotiator.send(StageRequest::Acceleration { axis, value })?;
            }
            if let Some(value) = motion.velocity {
                negotiator.send(StageRequest::Velocity { axis, value })?;
            }
        }
        debug!(?motion, "Init frames sent");
        Ok(())
    }

    fn spawn_ticker(&self, scheduler: SharedScheduler) -> JoinHandle<()> {
        let awake = Arc::clone(&self.awake);
        let shutdown = Arc::clone(&self.shutdown);
        let stats = Arc::clone(&self.stats);
        let period = self.config.stage.tick();
        let budget_us = self.config.stage.tick_us;

        thread::spawn(move || {
            if detect_rt_mode() {
                info!("Tick thread running in real-time mode");
            } else {
                info!("Tick thread running in standard (non-RT) mode");
            }

            while !shutdown.load(Ordering::Acquire) {
                let start = Instant::now();
                {
                    let mut guard = scheduler.lock();
                    if awake.load(Ordering::Acquire) {
                        if let TickOutcome::Aborted = guard.tick() {
                            debug!("Tick aborted by shutdown");
                        }
                    }
                }
                let elapsed = start.elapsed();

                let mut stats = stats.lock();
                stats.record(elapsed.as_micros() as u64, budget_us);
                if stats.cycle_count % 10_000 == 0 {
                    debug!(
                        "Tick loop: {} ticks, avg={}us, max={}us, violations={}",
                        stats.cycle_count,
                        stats.avg_cycle_time_us(),
                        stats.max_cycle_time_us,
                        stats.timing_violations
                    );
                }
                drop(stats);

                if elapsed < period {
                    thread::sleep(period - elapsed);
                }
            }
            debug!("Tick thread exiting");
        })
    }
}

impl Drop for StageCore {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

/// Call `open()` until it succeeds, at most `attempts` times.
fn open_with_retry(bus: &mut dyn BusTransport, attempts: u32) -> Result<(), BusError> {
    let mut last = None;
    for attempt in 1..=attempts {
        match bus.open() {
            Ok(()) => {
                if attempt > 1 {
                    info!("Transport '{}' up after {} attempts", bus.name(), attempt);
                }
                return Ok(());
            }
            Err(e) => {
                debug!("open attempt {}/{} failed: {}", attempt, attempts, e);
                last = Some(e);
                if attempt < attempts {
                    thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
    }
    Err(BusError::InitFailed(format!(
        "transport '{}' did not come up after {} attempts: {}",
        bus.name(),
        attempts,
        last.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Detect if running in real-time mode by checking scheduler policy.
fn detect_rt_mode() -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{sched_getscheduler, SCHED_FIFO, SCHED_RR};
        // SAFETY: sched_getscheduler(0) only queries the calling thread's policy.
        unsafe {
            let policy = sched_getscheduler(0);
            policy == SCHED_FIFO || policy == SCHED_RR
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
