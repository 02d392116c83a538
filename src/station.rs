//! # Station Control Loop
//!
//! One cooperative loop drives the whole appliance. Each pass:
//!
//! 1. samples the buttons and drains console commands
//! 2. checks available memory on its interval (critical memory restarts)
//! 3. reads at most one inbound chat message from the radio link
//! 4. runs a fetch cycle when one is due
//! 5. advances the display (next alert, idle screen, or keep current)
//!
//! A fetch cycle walks the configured sources strictly in order with a fixed
//! pause between them, queues whatever the tracker accepts, and flushes the
//! staged relay lines once at the end. Nothing here runs concurrently with
//! the loop, so the tracker is mutated from one place only.
//!
//! The loop ends on Ctrl-C (pending registry marks are offered to the store
//! first) or with a [`RestartReason`] the binary turns into an exit code.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{seconds, Config};
use crate::controls::{Button, ButtonEvent, ButtonInput, ButtonTracker, ConsoleCommand, NoButtons};
use crate::display::{render, Display, LogDisplay, Screen};
use crate::feeds::{configured_sources, normalize_batch, FeedClient, Source};
use crate::logutil::escape_log;
use crate::mesh::relay::{sanitize_for_radio, RelayFramer};
use crate::mesh::MeshLink;
use crate::metrics;
use crate::storage::guard::{Refusal, SaveOutcome, StoreGuard};
use crate::storage::ByteStore;
use crate::system::{Heartbeat, MemoryGuard, MemoryStatus, ProcMeminfo, SharedClock, Watchdog};
use crate::tracker::queue::DisplayQueue;
use crate::tracker::registry::SeenRegistry;
use crate::tracker::EventTracker;

/// How long the emergency-clear notice stays up before the restart.
const EMERGENCY_NOTICE: Duration = Duration::from_secs(3);

/// Why the station asks to be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    CriticalMemory,
    EmergencyClear,
}

impl RestartReason {
    /// Process exit code for the supervisor.
    pub fn exit_code(self) -> i32 {
        match self {
            RestartReason::CriticalMemory => 3,
            RestartReason::EmergencyClear => 4,
        }
    }
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::CriticalMemory => write!(f, "critical memory"),
            RestartReason::EmergencyClear => write!(f, "emergency clear"),
        }
    }
}

/// Outcome of one fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub new_events: usize,
    pub relayed: usize,
    /// Memory was low; nothing was fetched (or the cycle stopped early).
    pub skipped_low_memory: bool,
}

/// Build the tracker from configuration over an opened byte store.
pub fn build_tracker(
    config: &Config,
    store: Box<dyn ByteStore>,
    clock: SharedClock,
) -> anyhow::Result<EventTracker> {
    let layout = config.storage.layout()?;
    let guard = StoreGuard::open(store, layout, config.storage.guard_policy(), clock);
    let registry = SeenRegistry::load(guard, config.storage.persist_every);
    if !registry.persistence_valid() {
        warn!("[STATION] seen registry could not be read; dedup history starts empty");
    }
    Ok(EventTracker::new(
        registry,
        DisplayQueue::new(config.display.effective_capacity()),
        RelayFramer::new(config.relay.relay_config()),
    ))
}

/// Loop timing, derived once from `[station]`, `[feeds]` and `[memory]`.
#[derive(Debug, Clone)]
struct Timing {
    fetch_interval: ChronoDuration,
    display_duration: ChronoDuration,
    idle_refresh: ChronoDuration,
    chat_display: ChronoDuration,
    memory_check: ChronoDuration,
    loop_tick: Duration,
    source_pause: Duration,
    max_records: usize,
}

impl Timing {
    fn from_config(config: &Config) -> Self {
        Self {
            fetch_interval: seconds(config.station.fetch_interval_secs),
            display_duration: seconds(config.station.display_duration_secs),
            idle_refresh: seconds(config.station.idle_refresh_secs),
            chat_display: seconds(config.station.chat_display_secs),
            memory_check: seconds(config.memory.check_interval_secs),
            loop_tick: Duration::from_millis(config.station.loop_tick_ms.max(1)),
            source_pause: Duration::from_millis(config.feeds.source_pause_ms),
            max_records: config.feeds.max_records_per_source,
        }
    }
}

pub struct Station<F: FeedClient> {
    name: String,
    announce: bool,
    timing: Timing,
    tracker: EventTracker,
    link: MeshLink,
    feeds: F,
    sources: Vec<Box<dyn Source>>,
    display: Box<dyn Display>,
    buttons: Box<dyn ButtonInput>,
    primary: ButtonTracker,
    secondary: ButtonTracker,
    console: Option<mpsc::Receiver<ConsoleCommand>>,
    memory: MemoryGuard,
    clock: SharedClock,
    watchdog: Heartbeat,
    last_fetch: Option<DateTime<Utc>>,
    last_memory_check: Option<DateTime<Utc>>,
    screen: Screen,
    screen_since: DateTime<Utc>,
    screen_hold: ChronoDuration,
}

impl<F: FeedClient> Station<F> {
    /// A station with the configured sources, a logging display, no buttons
    /// and the host memory probe. Use the `with_*` methods to swap parts.
    pub fn new(
        config: &Config,
        tracker: EventTracker,
        link: MeshLink,
        feeds: F,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        Self {
            name: config.station.name.clone(),
            announce: config.station.announce,
            timing: Timing::from_config(config),
            tracker,
            link,
            feeds,
            sources: configured_sources(&config.feeds),
            display: Box::new(LogDisplay::new()),
            buttons: Box::new(NoButtons),
            primary: ButtonTracker::default(),
            secondary: ButtonTracker::default(),
            console: None,
            memory: MemoryGuard::new(
                Box::new(ProcMeminfo),
                config.memory.low_bytes,
                config.memory.critical_bytes,
            ),
            clock,
            watchdog: Heartbeat::new(),
            last_fetch: None,
            last_memory_check: None,
            screen: Screen::Startup,
            screen_since: now,
            screen_hold: ChronoDuration::zero(),
        }
    }

    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = display;
        self
    }

    pub fn with_buttons(mut self, buttons: Box<dyn ButtonInput>) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn with_console(mut self, console: mpsc::Receiver<ConsoleCommand>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_memory(mut self, memory: MemoryGuard) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_sources(mut self, sources: Vec<Box<dyn Source>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn tracker(&self) -> &EventTracker {
        &self.tracker
    }

    pub fn link(&self) -> &MeshLink {
        &self.link
    }

    pub fn feeds(&self) -> &F {
        &self.feeds
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn watchdog(&self) -> &Heartbeat {
        &self.watchdog
    }

    /// Run until Ctrl-C (returns `None`) or until a restart is required.
    pub async fn run(&mut self) -> Option<RestartReason> {
        self.startup();

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut ctrl_c_live = true;

        loop {
            tokio::select! {
                res = &mut shutdown, if ctrl_c_live => {
                    ctrl_c_live = false;
                    match res {
                        Ok(()) => {
                            info!("[STATION] shutdown requested");
                            self.shutdown();
                            return None;
                        }
                        Err(e) => warn!("[STATION] Ctrl-C handler unavailable: {}", e),
                    }
                }
                _ = tokio::time::sleep(self.timing.loop_tick) => {
                    if let Some(reason) = self.tick().await {
                        error!("[STATION] restart required: {}", reason);
                        return Some(reason);
                    }
                }
            }
        }
    }

    /// Startup screen and the optional "online" announcement.
    pub fn startup(&mut self) {
        info!(
            "[STATION] {} starting; {} sources, seen {}/{}",
            self.name,
            self.sources.len(),
            self.tracker.seen_count(),
            self.tracker.registry().capacity()
        );
        self.show(Screen::Startup, ChronoDuration::zero());
        if self.announce {
            let line = format!("{} v{} online", self.name, env!("CARGO_PKG_VERSION"));
            self.link.send_line(&sanitize_for_radio(&line));
        }
    }

    /// Graceful stop: offer unsaved registry marks to the store.
    pub fn shutdown(&mut self) {
        match self.tracker.flush_registry() {
            Some(SaveOutcome::Saved { lifetime_writes }) => {
                info!("[STATION] registry saved on shutdown (lifetime writes {})", lifetime_writes)
            }
            Some(SaveOutcome::Refused(reason)) => {
                warn!("[STATION] registry not saved on shutdown: {}", reason)
            }
            Some(SaveOutcome::Failed(e)) => warn!("[STATION] registry save failed: {}", e),
            None => debug!("[STATION] registry clean on shutdown"),
        }
        info!("[STATION] counters: {}", metrics::snapshot().summary());
    }

    /// One pass of the control loop.
    pub async fn tick(&mut self) -> Option<RestartReason> {
        self.watchdog.feed();
        let now = self.clock.now();

        if let Some(reason) = self.poll_buttons(now).await {
            return Some(reason);
        }
        self.poll_console().await;

        let memory_due = self
            .last_memory_check
            .map_or(true, |at| now - at >= self.timing.memory_check);
        if memory_due {
            self.last_memory_check = Some(now);
            if self.memory.status() == MemoryStatus::Critical {
                return Some(RestartReason::CriticalMemory);
            }
        }

        if let Some(chat) = self.link.poll() {
            let hold = self.timing.chat_display;
            self.show(Screen::Chat(chat), hold);
        }

        let fetch_due = self
            .last_fetch
            .map_or(true, |at| now - at >= self.timing.fetch_interval);
        if fetch_due {
            let report = self.fetch_cycle().await;
            info!(
                "[FETCH] cycle done: {} new, {} ok, {} failed, {} relayed",
                report.new_events, report.sources_ok, report.sources_failed, report.relayed
            );
        }

        self.refresh_display();
        None
    }

    /// Fetch every enabled source in order, queue new events and flush the
    /// staged relay lines.
    pub async fn fetch_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        self.last_fetch = Some(self.clock.now());

        if self.memory.status() != MemoryStatus::Healthy {
            warn!("[FETCH] memory low, skipping fetch cycle");
            report.skipped_low_memory = true;
            return report;
        }

        self.show(Screen::Fetching, ChronoDuration::zero());
        self.tracker.begin_cycle();

        for index in 0..self.sources.len() {
            if index > 0 {
                tokio::time::sleep(self.timing.source_pause).await;
                if self.memory.status() != MemoryStatus::Healthy {
                    warn!("[FETCH] memory low, abandoning remaining sources");
                    report.skipped_low_memory = true;
                    break;
                }
            }
            self.watchdog.feed();

            let source = &self.sources[index];
            let tag = source.tag().to_uppercase();
            debug!("[{}] fetching {}", tag, source.url());
            let doc = match self.feeds.fetch_json(source.url()).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("[{}] fetch failed: {}", tag, e);
                    metrics::inc_fetch_failed();
                    report.sources_failed += 1;
                    continue;
                }
            };
            metrics::inc_fetch_ok();
            report.sources_ok += 1;

            let events = normalize_batch(
                source.as_ref(),
                &doc,
                self.timing.max_records,
                &self.watchdog,
            );
            let mut accepted = 0;
            for event in events {
                self.watchdog.feed();
                if self.tracker.enqueue(event) {
                    accepted += 1;
                }
            }
            info!("[{}] {} new events", tag, accepted);
            report.new_events += accepted;
        }

        report.relayed = self.tracker.flush_relay(&mut self.link, &self.watchdog).await;

        if report.sources_ok == 0 && report.sources_failed > 0 {
            let hold = self.timing.display_duration;
            self.show(Screen::Error("FEED FAIL".to_string()), hold);
        }
        report
    }

    /// Clear dedup history and fetch again right away.
    pub async fn clear_and_refetch(&mut self) -> CycleReport {
        match self.tracker.clear_history() {
            SaveOutcome::Saved { .. } => info!("[STATION] dedup history cleared"),
            SaveOutcome::Refused(reason) => {
                warn!("[STATION] history cleared in memory only: {}", reason)
            }
            SaveOutcome::Failed(e) => warn!("[STATION] history cleared in memory only: {}", e),
        }
        self.fetch_cycle().await
    }

    /// Send the radio test line immediately.
    pub fn send_test_line(&mut self) -> bool {
        let line = sanitize_for_radio(&format!("TEST {}", self.name));
        self.link.send_line(&line)
    }

    /// Clear history, show the notice and ask for a restart.
    ///
    /// The restart only happens once the empty history is on the store;
    /// otherwise the old history would load again on boot. A save refused
    /// for the minimum interval is retried after waiting it out. Any other
    /// refusal or failure shows an error and keeps the station running.
    pub async fn emergency_clear(&mut self) -> Option<RestartReason> {
        warn!("[STATION] emergency clear requested");
        self.show(Screen::EmergencyClear, ChronoDuration::zero());

        let mut outcome = self.tracker.clear_history();
        if let SaveOutcome::Refused(Refusal::RateLimited { wait }) = outcome {
            info!(
                "[STATION] emergency clear waits {}s for the store",
                wait.num_seconds().max(1)
            );
            let wait = wait.to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            self.watchdog.feed();
            outcome = self.tracker.clear_history();
        }

        match outcome {
            SaveOutcome::Saved { .. } => {
                info!("[STATION] emergency clear persisted");
                tokio::time::sleep(EMERGENCY_NOTICE).await;
                Some(RestartReason::EmergencyClear)
            }
            SaveOutcome::Refused(reason) => {
                error!("[STATION] emergency clear not persisted, not restarting: {}", reason);
                let hold = self.timing.display_duration;
                self.show(Screen::Error("CLEAR FAIL".to_string()), hold);
                None
            }
            SaveOutcome::Failed(e) => {
                error!("[STATION] emergency clear write failed, not restarting: {}", e);
                let hold = self.timing.display_duration;
                self.show(Screen::Error("CLEAR FAIL".to_string()), hold);
                None
            }
        }
    }

    async fn poll_buttons(&mut self, now: DateTime<Utc>) -> Option<RestartReason> {
        let primary = self.buttons.is_pressed(Button::Primary);
        let secondary = self.buttons.is_pressed(Button::Secondary);
        let events = [
            (Button::Primary, self.primary.update(primary, now)),
            (Button::Secondary, self.secondary.update(secondary, now)),
        ];
        for (button, event) in events {
            match (button, event) {
                (_, Some(ButtonEvent::LongHold)) => {
                    if let Some(reason) = self.emergency_clear().await {
                        return Some(reason);
                    }
                }
                (Button::Primary, Some(ButtonEvent::ShortPress)) => {
                    debug!("[CONTROLS] primary short press");
                    self.send_test_line();
                }
                (Button::Secondary, Some(ButtonEvent::ShortPress)) => {
                    debug!("[CONTROLS] secondary short press");
                    self.clear_and_refetch().await;
                }
                (_, None) => {}
            }
        }
        None
    }

    async fn poll_console(&mut self) {
        let mut commands = Vec::new();
        if let Some(rx) = self.console.as_mut() {
            while let Ok(cmd) = rx.try_recv() {
                commands.push(cmd);
            }
        }
        for cmd in commands {
            self.handle_command(cmd).await;
        }
    }

    pub async fn handle_command(&mut self, cmd: ConsoleCommand) {
        debug!("[CONSOLE] {:?}", cmd);
        match cmd {
            ConsoleCommand::Clear => {
                self.clear_and_refetch().await;
            }
            ConsoleCommand::Test => {
                self.send_test_line();
            }
            ConsoleCommand::Memory => {
                info!("[MEMORY] {}", self.memory.report());
                info!("[MEMORY] counters: {}", metrics::snapshot().summary());
            }
            ConsoleCommand::WriteCount => info!("[STORE] {}", self.tracker.write_report()),
            ConsoleCommand::Reset => self.link.reset(),
        }
    }

    /// Show the next alert when the current screen may be replaced, otherwise
    /// fall back to the idle screen once the current one has expired.
    fn refresh_display(&mut self) {
        let now = self.clock.now();
        let expired = now - self.screen_since >= self.screen_hold;
        let interruptible = matches!(
            self.screen,
            Screen::Startup | Screen::Fetching | Screen::Idle { .. }
        );

        if !self.tracker.queue().is_empty() {
            if expired || interruptible {
                if let Some(event) = self.tracker.dequeue() {
                    info!(
                        "[DISPLAY] alert {} {}",
                        event.kind_name(),
                        escape_log(&event.title)
                    );
                    let hold = self.timing.display_duration;
                    self.show(Screen::Alert(event), hold);
                }
            }
        } else if expired {
            let seen = self.tracker.seen_count();
            let hold = self.timing.idle_refresh;
            self.show(Screen::Idle { seen }, hold);
        }
    }

    fn show(&mut self, screen: Screen, hold: ChronoDuration) {
        render(self.display.as_mut(), &screen);
        self.screen = screen;
        self.screen_since = self.clock.now();
        self.screen_hold = hold;
    }
}
