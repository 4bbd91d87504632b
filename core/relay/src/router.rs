//! Per-tab routing between page probes and panels.
//!
//! The router is the relay's only state. It is rebuilt from scratch on every
//! start: probes re-register when they reconnect and panels re-announce with
//! `devtools-ready`. Forwarding is push-only; a panel that registers late gets
//! the current status, never the history.

use hydrascope_relay_protocol::{
    MismatchPayload, PageStatus, PanelMessage, ProbeMessage, RelayMessage, TabId,
};
use std::collections::HashMap;

pub type ChannelId = u64;

/// Outbound half of one client connection.
pub trait Channel {
    fn id(&self) -> ChannelId;
    fn post(&self, message: &RelayMessage) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabEntry {
    pub probe_channel: ChannelId,
    pub status: PageStatus,
    pub last_error: Option<MismatchPayload>,
}

pub struct Router<C: Channel> {
    tabs: HashMap<TabId, TabEntry>,
    panels: HashMap<TabId, C>,
}

impl<C: Channel> Default for Router<C> {
    fn default() -> Self {
        Self {
            tabs: HashMap::new(),
            panels: HashMap::new(),
        }
    }
}

impl<C: Channel> Router<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tab(&self, tab_id: TabId) -> Option<&TabEntry> {
        self.tabs.get(&tab_id)
    }

    pub fn has_panel(&self, tab_id: TabId) -> bool {
        self.panels.contains_key(&tab_id)
    }

    /// Registers (or replaces) the probe for `tab_id` with a fresh `Idle` entry.
    ///
    /// A panel already watching the tab is told about the reset, so it never
    /// keeps showing a status or error from the previous connection.
    pub fn probe_connected(&mut self, tab_id: TabId, channel: ChannelId) {
        let replaced = self
            .tabs
            .insert(
                tab_id,
                TabEntry {
                    probe_channel: channel,
                    status: PageStatus::Idle,
                    last_error: None,
                },
            )
            .is_some();
        tracing::info!(tab_id, channel, replaced, "Probe registered");
        self.forward(tab_id, &RelayMessage::status_update(PageStatus::Idle, None));
    }

    pub fn probe_message(&mut self, tab_id: TabId, message: ProbeMessage) {
        let Some(entry) = self.tabs.get_mut(&tab_id) else {
            tracing::debug!(tab_id, "Ignoring message for unregistered tab");
            return;
        };

        entry.status = message.status();
        entry.last_error = match message {
            ProbeMessage::ReactHydrationFinished { data } if !data.is_equal => Some(data),
            _ => None,
        };
        tracing::debug!(
            tab_id,
            status = %entry.status,
            has_error = entry.last_error.is_some(),
            "Tab status updated"
        );

        let update = RelayMessage::status_update(entry.status, entry.last_error.clone());
        self.forward(tab_id, &update);
    }

    /// Drops the tab entry, but only if `channel` still owns it.
    pub fn probe_disconnected(&mut self, tab_id: TabId, channel: ChannelId) {
        match self.tabs.get(&tab_id) {
            Some(entry) if entry.probe_channel == channel => {
                self.tabs.remove(&tab_id);
                tracing::info!(tab_id, channel, "Probe disconnected");
            }
            Some(entry) => {
                tracing::debug!(
                    tab_id,
                    channel,
                    owner = entry.probe_channel,
                    "Ignoring close from superseded probe"
                );
            }
            None => {}
        }
    }

    pub fn panel_message(&mut self, channel: C, message: PanelMessage) {
        match message {
            PanelMessage::DevtoolsReady { tab_id } => {
                let channel_id = channel.id();
                let replaced = self.panels.insert(tab_id, channel).is_some();
                tracing::info!(tab_id, channel = channel_id, replaced, "Panel registered");

                if let Some(entry) = self.tabs.get(&tab_id) {
                    let snapshot = RelayMessage::status_update(entry.status, entry.last_error.clone());
                    self.forward(tab_id, &snapshot);
                }
            }
        }
    }

    /// Removes every panel registration held by `channel`.
    pub fn panel_disconnected(&mut self, channel: ChannelId) {
        let before = self.panels.len();
        self.panels.retain(|_, panel| panel.id() != channel);
        let removed = before - self.panels.len();
        if removed > 0 {
            tracing::info!(channel, removed, "Panel disconnected");
        }
    }

    fn forward(&self, tab_id: TabId, message: &RelayMessage) {
        let Some(panel) = self.panels.get(&tab_id) else {
            return;
        };
        if let Err(err) = panel.post(message) {
            tracing::warn!(tab_id, channel = panel.id(), error = %err, "Failed to forward status");
        }
    }
}
