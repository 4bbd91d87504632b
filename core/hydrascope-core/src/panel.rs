//! Panel-side view of one inspected tab.
//!
//! A [`PanelSession`] subscribes to the relay for a tab, mirrors the status it
//! receives, and turns every reported mismatch into a persisted
//! [`HydrationErrorRecord`]. The subscription is re-announced after every
//! reconnect, so a relay restart only costs the status updates sent while it
//! was down.

use crate::connection::{Connector, PersistentConnection, Subscription};
use crate::diff::render_hydration_diff;
use crate::error::{HydraError, Result};
use crate::format::HtmlFormatter;
use crate::scheduler::lock;
use crate::storage::HydrationErrorStore;
use crate::types::{brief_of, DiffResult, HydrationErrorRecord};
use hydrascope_relay_protocol::{
    HydrationReport, PageStatus, PanelMessage, RelayMessage, StatusUpdate, TabId,
};
use std::sync::{Arc, Mutex};

/// What the panel currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelView {
    pub status: PageStatus,
    pub current_error: Option<HydrationErrorRecord>,
    pub active_error_id: Option<String>,
}

type Observer = Arc<dyn Fn(&PanelView) + Send + Sync>;

struct PanelInner {
    formatter: Arc<dyn HtmlFormatter>,
    store: Mutex<HydrationErrorStore>,
    view: Mutex<PanelView>,
    observer: Mutex<Option<Observer>>,
}

pub struct PanelSession<C>
where
    C: Connector<Outgoing = PanelMessage, Incoming = RelayMessage>,
{
    tab_id: TabId,
    connection: PersistentConnection<C>,
    inner: Arc<PanelInner>,
    subscription: Mutex<Option<Subscription>>,
}

impl<C> PanelSession<C>
where
    C: Connector<Outgoing = PanelMessage, Incoming = RelayMessage>,
{
    pub fn new(
        tab_id: TabId,
        connection: PersistentConnection<C>,
        store: HydrationErrorStore,
        formatter: Arc<dyn HtmlFormatter>,
    ) -> Self {
        let inner = Arc::new(PanelInner {
            formatter,
            store: Mutex::new(store),
            view: Mutex::new(PanelView::default()),
            observer: Mutex::new(None),
        });

        connection.on_connect(move |connection| {
            tracing::debug!(tab_id, "Announcing panel to relay");
            connection.send(PanelMessage::DevtoolsReady { tab_id });
        });

        let listener_inner = Arc::clone(&inner);
        let subscription = connection.add_listener(move |message: &RelayMessage| {
            let RelayMessage::DevtoolsStatusUpdate { data } = message;
            listener_inner.apply(data);
        });

        Self {
            tab_id,
            connection,
            inner,
            subscription: Mutex::new(Some(subscription)),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn connection(&self) -> &PersistentConnection<C> {
        &self.connection
    }

    /// Connects; `devtools-ready` follows every successful open.
    pub fn start(&self) {
        self.connection.connect();
    }

    pub fn stop(&self) {
        if let Some(subscription) = lock(&self.subscription).take() {
            subscription.unsubscribe();
        }
        self.connection.disconnect();
    }

    pub fn view(&self) -> PanelView {
        lock(&self.inner.view).clone()
    }

    /// Called with the new view after every status update.
    pub fn on_update(&self, observer: impl Fn(&PanelView) + Send + Sync + 'static) {
        *lock(&self.inner.observer) = Some(Arc::new(observer));
    }

    /// Applies a status update as if it had arrived from the relay.
    pub fn apply(&self, update: &StatusUpdate) {
        self.inner.apply(update);
    }
}

impl PanelInner {
    fn apply(&self, update: &StatusUpdate) {
        let snapshot = {
            let mut view = lock(&self.view);
            view.status = update.status;

            match update.status {
                PageStatus::Loading => {
                    view.current_error = None;
                    view.active_error_id = None;
                }
                PageStatus::HydrationComplete => match update.current_error.as_ref() {
                    Some(report) if !report.is_equal => {
                        match record_from_report(report, self.formatter.as_ref()) {
                            Ok(record) => {
                                view.current_error = Some(record.clone());
                                self.persist(&record);
                                view.active_error_id = Some(record.id);
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "Discarding malformed mismatch report");
                                view.current_error = None;
                            }
                        }
                    }
                    _ => view.current_error = None,
                },
                _ => {}
            }

            tracing::debug!(status = %view.status, has_error = view.current_error.is_some(), "Panel updated");
            view.clone()
        };

        let observer = lock(&self.observer).clone();
        if let Some(observer) = observer {
            observer(&snapshot);
        }
    }

    /// Storage failures are logged; the record stays on screen regardless.
    fn persist(&self, record: &HydrationErrorRecord) {
        let mut store = lock(&self.store);
        if store.origin() != Some(record.origin.as_str()) {
            if let Err(err) = store.init(&record.origin) {
                tracing::warn!(error = %err, origin = %record.origin, "Failed to open error store");
                return;
            }
        }
        if let Err(err) = store.add_error(record) {
            tracing::warn!(error = %err, id = %record.id, "Failed to persist hydration error");
        }
    }
}

/// Builds the stored record for a mismatch report.
///
/// The line diff is taken from the report when present and rendered locally
/// otherwise.
pub fn record_from_report(
    report: &HydrationReport,
    formatter: &dyn HtmlFormatter,
) -> Result<HydrationErrorRecord> {
    report
        .validate()
        .map_err(|err| HydraError::InvalidReport(err.to_string()))?;

    let url = report.url.clone().unwrap_or_default();
    let initial_root = report.initial_root.clone().unwrap_or_default();
    let hydrated_root = report.hydrated_root.clone().unwrap_or_default();

    let line_diff = match &report.diff {
        Some(diff) => diff.clone(),
        None => render_hydration_diff(&initial_root, &hydrated_root, formatter)?.line_diff,
    };

    Ok(HydrationErrorRecord {
        id: report.id.clone().unwrap_or_default(),
        origin: origin_of(&url)?,
        url,
        timestamp: report.timestamp.unwrap_or_default(),
        brief: brief_of(&initial_root),
        initial_html_full: report.initial_html.clone().unwrap_or_default(),
        post_hydration_html_full: report.post_hydration_html.clone().unwrap_or_default(),
        diff_result: DiffResult {
            initial_root_html: initial_root,
            hydrated_root_html: hydrated_root,
            line_diff,
        },
    })
}

/// `scheme://host[:port]` of `url`.
pub fn origin_of(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url).map_err(|err| HydraError::InvalidUrl {
        url: url.to_string(),
        details: err.to_string(),
    })?;
    Ok(parsed.origin().ascii_serialization())
}
