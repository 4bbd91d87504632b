//! Page-side state machine.
//!
//! ```text
//! Idle -> Loading -> ReactDetected -> CheckingHydration -> HydrationComplete
//!                \-> NoReactDetected
//! ```
//!
//! The probe is fed two narrow signal streams: page lifecycle
//! ([`PageSignal`]) and runtime hook results ([`HookSignal`]). Every transition
//! is reported to the relay through a [`StatusSink`]. `NoReactDetected` and
//! `HydrationComplete` are terminal until the next navigation.

use crate::compare::{hydration_diff, HydrationComparison};
use crate::config::HydrascopeConfig;
use crate::connection::{Connector, PersistentConnection};
use crate::diff::render_hydration_diff;
use crate::dom::strip_fragment_comments;
use crate::format::HtmlFormatter;
use crate::scheduler::{lock, Scheduler, TimerHandle};
use hydrascope_relay_protocol::{HydrationReport, PageStatus, ProbeMessage, REPORT_BUDGET_BYTES};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const UNKNOWN_URL: &str = "about:blank";

/// Page lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    NavigationStart { url: String },
    DomContentLoaded { html: String },
}

/// Results reported by the runtime's devtools hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookSignal {
    Detected,
    /// `root` identifies the committed fiber root; `html` is the live document.
    Committed { root: u64, html: String },
}

/// One JSON line of host input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum HostSignal {
    NavigationStart { url: String },
    DomContentLoaded { html: String },
    RuntimeDetected,
    Commit { root: u64, html: String },
}

impl HostSignal {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// Where the probe reports status.
pub trait StatusSink: Send + Sync {
    fn send_status(&self, message: ProbeMessage);
}

impl<C> StatusSink for PersistentConnection<C>
where
    C: Connector<Outgoing = ProbeMessage>,
{
    fn send_status(&self, message: ProbeMessage) {
        self.send(message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub mount_id: String,
    pub detection_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self::from(&HydrascopeConfig::default())
    }
}

impl From<&HydrascopeConfig> for ProbeOptions {
    fn from(config: &HydrascopeConfig) -> Self {
        Self {
            mount_id: config.mount_id.clone(),
            detection_timeout: config.detection_timeout(),
        }
    }
}

#[derive(Default)]
struct ProbeState {
    status: PageStatus,
    /// Bumped on every navigation so a watchdog from an earlier page is inert.
    page: u64,
    url: Option<String>,
    initial_html: Option<String>,
    seen_roots: HashSet<u64>,
    watchdog: Option<TimerHandle>,
}

struct ProbeInner {
    sink: Arc<dyn StatusSink>,
    scheduler: Arc<dyn Scheduler>,
    formatter: Arc<dyn HtmlFormatter>,
    options: ProbeOptions,
    state: Mutex<ProbeState>,
}

#[derive(Clone)]
pub struct PageProbe {
    inner: Arc<ProbeInner>,
}

impl PageProbe {
    pub fn new(
        sink: Arc<dyn StatusSink>,
        scheduler: Arc<dyn Scheduler>,
        formatter: Arc<dyn HtmlFormatter>,
        options: ProbeOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                sink,
                scheduler,
                formatter,
                options,
                state: Mutex::new(ProbeState::default()),
            }),
        }
    }

    pub fn status(&self) -> PageStatus {
        lock(&self.inner.state).status
    }

    pub fn handle_host(&self, signal: HostSignal) {
        match signal {
            HostSignal::NavigationStart { url } => {
                self.handle_page(PageSignal::NavigationStart { url })
            }
            HostSignal::DomContentLoaded { html } => {
                self.handle_page(PageSignal::DomContentLoaded { html })
            }
            HostSignal::RuntimeDetected => self.handle_hook(HookSignal::Detected),
            HostSignal::Commit { root, html } => {
                self.handle_hook(HookSignal::Committed { root, html })
            }
        }
    }

    pub fn handle_page(&self, signal: PageSignal) {
        match signal {
            PageSignal::NavigationStart { url } => self.navigation_start(url),
            PageSignal::DomContentLoaded { html } => {
                let mut state = lock(&self.inner.state);
                if state.status.is_terminal() {
                    tracing::debug!(status = %state.status, "Ignoring DOMContentLoaded after terminal status");
                    return;
                }
                tracing::debug!(bytes = html.len(), "Captured initial document");
                state.initial_html = Some(html);
            }
        }
    }

    pub fn handle_hook(&self, signal: HookSignal) {
        match signal {
            HookSignal::Detected => self.runtime_detected(),
            HookSignal::Committed { root, html } => self.committed(root, html),
        }
    }

    fn navigation_start(&self, url: String) {
        let mut state = lock(&self.inner.state);
        if let Some(watchdog) = state.watchdog.take() {
            watchdog.cancel();
        }

        let page = state.page + 1;
        *state = ProbeState {
            status: PageStatus::Loading,
            page,
            url: Some(url),
            ..ProbeState::default()
        };
        tracing::info!(url = state.url.as_deref().unwrap_or(UNKNOWN_URL), "Page loading");
        self.inner.sink.send_status(ProbeMessage::PageLoading);

        let weak = Arc::downgrade(&self.inner);
        let timer = self.inner.scheduler.schedule(
            self.inner.options.detection_timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    PageProbe { inner }.detection_timed_out(page);
                }
            }),
        );
        state.watchdog = Some(timer);
    }

    fn detection_timed_out(&self, page: u64) {
        let mut state = lock(&self.inner.state);
        if state.page != page || state.status != PageStatus::Loading {
            return;
        }
        state.watchdog = None;
        state.status = PageStatus::NoReactDetected;
        tracing::info!(
            timeout_ms = self.inner.options.detection_timeout.as_millis() as u64,
            "No runtime detected"
        );
        self.inner.sink.send_status(ProbeMessage::NoReactDetected);
    }

    fn runtime_detected(&self) {
        let mut state = lock(&self.inner.state);
        if let Some(watchdog) = state.watchdog.take() {
            watchdog.cancel();
        }
        match state.status {
            PageStatus::Idle | PageStatus::Loading => {
                state.status = PageStatus::ReactDetected;
                tracing::info!("Runtime detected");
                self.inner.sink.send_status(ProbeMessage::ReactDetected);
            }
            status => {
                tracing::debug!(status = %status, "Ignoring repeated runtime detection");
            }
        }
    }

    fn committed(&self, root: u64, html: String) {
        let mut state = lock(&self.inner.state);
        if state.status.is_terminal() {
            tracing::debug!(root, status = %state.status, "Ignoring commit after terminal status");
            return;
        }
        if !state.seen_roots.insert(root) {
            tracing::debug!(root, "Ignoring commit for seen root");
            return;
        }
        if let Some(watchdog) = state.watchdog.take() {
            watchdog.cancel();
        }

        state.status = PageStatus::CheckingHydration;
        self.inner.sink.send_status(ProbeMessage::CheckingHydration);

        let initial_html = state.initial_html.clone().unwrap_or_default();
        let url = state.url.clone().unwrap_or_else(|| UNKNOWN_URL.to_string());
        let report = self.build_report(url, initial_html, html);

        state.status = PageStatus::HydrationComplete;
        tracing::info!(root, is_equal = report.is_equal, "Hydration check finished");
        self.inner
            .sink
            .send_status(ProbeMessage::ReactHydrationFinished { data: report });
    }

    fn build_report(&self, url: String, initial_html: String, post_hydration_html: String) -> HydrationReport {
        let comparison = hydration_diff(
            &initial_html,
            &post_hydration_html,
            &self.inner.options.mount_id,
        );
        let (initial_root_html, hydrated_root_html) = match comparison {
            Some(HydrationComparison::Mismatch {
                initial_root_html,
                hydrated_root_html,
            }) => (initial_root_html, hydrated_root_html),
            Some(HydrationComparison::Equal) | None => return HydrationReport::equal(),
        };

        let (initial_root, hydrated_root, diff) = match render_hydration_diff(
            &initial_root_html,
            &hydrated_root_html,
            self.inner.formatter.as_ref(),
        ) {
            Ok(rendered) => (
                rendered.initial_root,
                rendered.hydrated_root,
                Some(rendered.line_diff),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to render hydration diff");
                (
                    strip_fragment_comments(&initial_root_html),
                    strip_fragment_comments(&hydrated_root_html),
                    None,
                )
            }
        };

        let mut report = HydrationReport {
            id: Some(uuid::Uuid::new_v4().to_string()),
            url: Some(url),
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
            initial_html: Some(initial_html),
            post_hydration_html: Some(post_hydration_html),
            initial_root: Some(initial_root),
            hydrated_root: Some(hydrated_root),
            diff,
            is_equal: false,
        };
        if report.fit_within(REPORT_BUDGET_BYTES) {
            tracing::warn!(
                bytes = report.encoded_len(),
                "Hydration report exceeded the frame budget; sending a reduced report"
            );
        }
        report
    }
}
