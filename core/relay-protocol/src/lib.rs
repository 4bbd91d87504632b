//! Wire protocol types and validation for the hydrascope relay.
//!
//! This crate is shared by the relay and by both of its clients (page probe and
//! panel) so the three processes cannot drift apart on the frame schema. Every
//! frame is a single JSON object terminated by `\n`. The first frame a client
//! writes on a fresh connection is a [`Hello`]; everything after it is a
//! [`ProbeMessage`], a [`PanelMessage`] or, relay to panel, a [`RelayMessage`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024; // 8MB, reports carry two full documents

/// Largest encoded [`HydrationReport`] a probe sends. The rest of the frame
/// budget covers the message envelope, including the relay's re-wrapping.
pub const REPORT_BUDGET_BYTES: usize = MAX_FRAME_BYTES - 64 * 1024;

/// Browser-assigned tab identifier.
pub type TabId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Page status
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of one inspected page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageStatus {
    #[default]
    Idle,
    Loading,
    ReactDetected,
    CheckingHydration,
    NoReactDetected,
    HydrationComplete,
}

impl PageStatus {
    /// No further transitions happen until the next navigation.
    pub fn is_terminal(self) -> bool {
        matches!(self, PageStatus::NoReactDetected | PageStatus::HydrationComplete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageStatus::Idle => "idle",
            PageStatus::Loading => "loading",
            PageStatus::ReactDetected => "react-detected",
            PageStatus::CheckingHydration => "checking-hydration",
            PageStatus::NoReactDetected => "no-react-detected",
            PageStatus::HydrationComplete => "hydration-complete",
        }
    }
}

impl std::fmt::Display for PageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Line diff segments
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Unchanged,
}

impl DiffKind {
    /// Gutter prefix used when a segment is printed line by line.
    pub fn prefix(self) -> &'static str {
        match self {
            DiffKind::Added => "+ ",
            DiffKind::Removed => "- ",
            DiffKind::Unchanged => "  ",
        }
    }
}

/// One contiguous run of lines sharing a [`DiffKind`].
///
/// `text` holds the lines joined by `\n`, without a trailing newline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSegment {
    pub kind: DiffKind,
    pub text: String,
}

impl DiffSegment {
    pub fn new(kind: DiffKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split('\n')
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Hydration report
// ═══════════════════════════════════════════════════════════════════════════════

/// Payload of `react-hydration-finished`.
///
/// On success only `isEqual: true` is sent. On mismatch every field is
/// populated; [`HydrationReport::validate`] enforces that at the relay boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_hydration_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hydrated_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Vec<DiffSegment>>,
    pub is_equal: bool,
}

/// The relay forwards the full mismatch report as the panel's current error.
pub type MismatchPayload = HydrationReport;

impl HydrationReport {
    pub fn equal() -> Self {
        Self {
            is_equal: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.is_equal {
            return Ok(());
        }

        require_string(&self.id, "id")?;
        require_string(&self.url, "url")?;
        require_string(&self.initial_root, "initialRoot")?;
        require_string(&self.hydrated_root, "hydratedRoot")?;
        require_present(&self.initial_html, "initialHtml")?;
        require_present(&self.post_hydration_html, "postHydrationHtml")?;
        match self.timestamp {
            Some(ts) if ts > 0 => Ok(()),
            _ => Err(ErrorInfo::new(
                "missing_field",
                "timestamp is required for a mismatch",
            )),
        }
    }

    /// Size of the report as JSON, in bytes.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX)
    }

    /// Shrinks the report until it encodes within `max_bytes`.
    ///
    /// The full documents are emptied first, then the line diff is dropped
    /// (receivers re-render it from the roots), and only then are the roots
    /// cut down. Returns `true` if anything was removed.
    pub fn fit_within(&mut self, max_bytes: usize) -> bool {
        if self.encoded_len() <= max_bytes {
            return false;
        }

        for document in [&mut self.initial_html, &mut self.post_hydration_html]
            .into_iter()
            .flatten()
        {
            document.clear();
        }
        if self.encoded_len() <= max_bytes {
            return true;
        }

        self.diff = None;
        let mut root_limit = max_bytes / 2;
        while self.encoded_len() > max_bytes && root_limit > 0 {
            for root in [&mut self.initial_root, &mut self.hydrated_root]
                .into_iter()
                .flatten()
            {
                truncate_to_char_boundary(root, root_limit);
            }
            root_limit /= 2;
        }
        true
    }
}

fn truncate_to_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Frames
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortName {
    Probe,
    Panel,
}

/// First frame on every connection.
///
/// A probe's connection is scoped to its tab, so the tab id travels with the
/// handshake. Panels are not tab-scoped and announce their tab later through
/// [`PanelMessage::DevtoolsReady`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Hello {
    pub protocol_version: u32,
    pub port: PortName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

/// Validated handshake role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Probe { tab_id: TabId },
    Panel,
}

impl Hello {
    pub fn probe(tab_id: TabId) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            port: PortName::Probe,
            tab_id: Some(tab_id),
        }
    }

    pub fn panel() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            port: PortName::Panel,
            tab_id: None,
        }
    }

    pub fn role(&self) -> Result<PortRole, ErrorInfo> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ErrorInfo::new(
                "protocol_mismatch",
                format!("unsupported protocol version {}", self.protocol_version),
            ));
        }
        match self.port {
            PortName::Probe => Ok(PortRole::Probe {
                tab_id: require_tab_id(self.tab_id)?,
            }),
            PortName::Panel => Ok(PortRole::Panel),
        }
    }
}

/// Probe to relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProbeMessage {
    PageLoading,
    ReactDetected,
    CheckingHydration,
    NoReactDetected,
    ReactHydrationFinished { data: HydrationReport },
}

impl ProbeMessage {
    /// Status the relay records for this message.
    pub fn status(&self) -> PageStatus {
        match self {
            ProbeMessage::PageLoading => PageStatus::Loading,
            ProbeMessage::ReactDetected => PageStatus::ReactDetected,
            ProbeMessage::CheckingHydration => PageStatus::CheckingHydration,
            ProbeMessage::NoReactDetected => PageStatus::NoReactDetected,
            ProbeMessage::ReactHydrationFinished { .. } => PageStatus::HydrationComplete,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            ProbeMessage::ReactHydrationFinished { data } => data.validate(),
            _ => Ok(()),
        }
    }
}

/// Panel to relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PanelMessage {
    DevtoolsReady {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
}

impl PanelMessage {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            PanelMessage::DevtoolsReady { tab_id } => require_tab_id(Some(*tab_id)).map(|_| ()),
        }
    }
}

/// Consolidated status pushed to a panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: PageStatus,
    pub current_error: Option<MismatchPayload>,
}

/// Relay to panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    DevtoolsStatusUpdate { data: StatusUpdate },
}

impl RelayMessage {
    pub fn status_update(status: PageStatus, current_error: Option<MismatchPayload>) -> Self {
        RelayMessage::DevtoolsStatusUpdate {
            data: StatusUpdate {
                status,
                current_error,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Framing
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializes a frame, newline included.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, ErrorInfo> {
    let mut payload = serde_json::to_vec(frame).map_err(|err| {
        ErrorInfo::new(
            "serialization_error",
            format!("failed to serialize frame: {}", err),
        )
    })?;
    if payload.len() >= MAX_FRAME_BYTES {
        return Err(ErrorInfo::new(
            "frame_too_large",
            "frame exceeded maximum size",
        ));
    }
    payload.push(b'\n');
    Ok(payload)
}

/// Parses one frame. Trailing `\r\n` or `\n` is tolerated.
pub fn decode_frame<T: DeserializeOwned>(line: &[u8]) -> Result<T, ErrorInfo> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(ErrorInfo::new(
            "frame_too_large",
            "frame exceeded maximum size",
        ));
    }
    let trimmed = trim_line_end(line);
    if trimmed.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_frame", "frame body was empty"));
    }
    serde_json::from_slice(trimmed).map_err(|err| {
        ErrorInfo::new("invalid_json", format!("frame was not valid JSON: {}", err))
    })
}

pub fn parse_hello(line: &[u8]) -> Result<(Hello, PortRole), ErrorInfo> {
    let hello: Hello = decode_frame(line).map_err(|err| {
        if err.code == "invalid_json" {
            ErrorInfo::new("invalid_handshake", err.message)
        } else {
            err
        }
    })?;
    let role = hello.role()?;
    Ok((hello, role))
}

pub fn parse_probe_message(line: &[u8]) -> Result<ProbeMessage, ErrorInfo> {
    let message: ProbeMessage = decode_frame(line)?;
    message.validate()?;
    Ok(message)
}

pub fn parse_panel_message(line: &[u8]) -> Result<PanelMessage, ErrorInfo> {
    let message: PanelMessage = decode_frame(line)?;
    message.validate()?;
    Ok(message)
}

pub fn parse_relay_message(line: &[u8]) -> Result<RelayMessage, ErrorInfo> {
    decode_frame(line)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

fn require_tab_id(tab_id: Option<TabId>) -> Result<TabId, ErrorInfo> {
    match tab_id {
        Some(0) | None => Err(ErrorInfo::new("invalid_tab_id", "tabId is required")),
        Some(tab_id) => Ok(tab_id),
    }
}

fn require_string(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

fn require_present(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    match value {
        Some(_) => Ok(()),
        None => Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        )),
    }
}
