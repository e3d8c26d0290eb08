//! In-memory working state for an active EPC
//!
//! A `TagRef` wraps the persistent [`Tag`] projection with the state-machine
//! fields the engine needs: per-antenna RSSI windows, the exit-read counter,
//! and timestamps. TagRefs hold the owning sensor's device_id inside the
//! antenna alias rather than a sensor handle, so there are no ownership
//! cycles between the tag table and the sensor registry.

use crate::domain::tag::{
    LocationHistory, Tag, EPC_STATE_DEPARTED, EPC_STATE_PRESENT, SOURCE_FIXED,
};
use crate::services::rssi::RssiWindow;
use rustc_hash::FxHashMap;

/// Per-tag state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// Never seen by a sensor
    Unknown,
    /// At some location
    Present,
    /// Seen repeatedly by an Exit-personality sensor
    Exiting,
    /// Aged out while Present
    Departed,
    /// Departed specifically via an Exit sensor
    DepartedExit,
}

impl TagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagState::Unknown => "unknown",
            TagState::Present => "present",
            TagState::Exiting => "exiting",
            TagState::Departed => "departed",
            TagState::DepartedExit => "departed_exit",
        }
    }

    pub fn is_departed(&self) -> bool {
        matches!(self, TagState::Departed | TagState::DepartedExit)
    }
}

/// Working record for one active EPC
#[derive(Debug)]
pub struct TagRef {
    /// Persistent projection, upserted to the store when `dirty`
    pub tag: Tag,
    pub state: TagState,
    /// Current antenna alias, empty while Unknown
    pub location: String,
    /// Facility of the current location
    pub facility_id: String,
    /// Consecutive reads seen from Exit-personality sensors
    pub exit_reads: u32,
    /// Epoch ms of the newest read
    pub last_read: u64,
    /// Epoch ms of the last state transition
    pub last_state_change: u64,
    /// Pending persistence
    pub dirty: bool,
    windows: FxHashMap<String, RssiWindow>,
    window_size: usize,
}

impl TagRef {
    pub fn new(epc: &str, window_size: usize) -> Self {
        Self {
            tag: Tag::new(epc),
            state: TagState::Unknown,
            location: String::new(),
            facility_id: String::new(),
            exit_reads: 0,
            last_read: 0,
            last_state_change: 0,
            dirty: false,
            windows: FxHashMap::default(),
            window_size,
        }
    }

    /// Rebuild a ref from a stored tag so a later read can emit `returned`
    /// rather than a fresh arrival
    pub fn rehydrate(tag: Tag, window_size: usize) -> Self {
        let state = match tag.epc_state.as_str() {
            EPC_STATE_PRESENT => TagState::Present,
            EPC_STATE_DEPARTED => TagState::Departed,
            _ => TagState::Unknown,
        };
        let location = tag.current_location().unwrap_or_default().to_string();
        let facility_id = tag.facility_id.clone();
        let last_read = tag.last_read;

        Self {
            tag,
            state,
            location,
            facility_id,
            exit_reads: 0,
            last_read,
            last_state_change: last_read,
            dirty: false,
            windows: FxHashMap::default(),
            window_size,
        }
    }

    pub fn epc(&self) -> &str {
        &self.tag.epc
    }

    /// Record one RSSI sample (dBm x10) against an antenna alias
    pub fn record_rssi(&mut self, alias: &str, rssi_dbm10x: i64) {
        let window_size = self.window_size;
        let window = self
            .windows
            .entry(alias.to_string())
            .or_insert_with(|| RssiWindow::new(window_size));
        window.add(rssi_dbm10x as f64);
    }

    /// Mean RSSI for an alias; None when the alias has no samples yet
    pub fn mean(&self, alias: &str) -> Option<f64> {
        self.windows.get(alias).filter(|w| w.count() > 0).map(|w| w.mean())
    }

    /// Pick the location the tag should be at, given the hysteresis margin.
    ///
    /// The strongest challenger (ties broken toward the lexicographically
    /// smaller alias) displaces the incumbent only when its mean exceeds the
    /// incumbent's by more than `margin`. With no incumbent the strongest
    /// alias wins outright.
    pub fn arbitrate_location(&self, margin: f64) -> Option<String> {
        let incumbent = (!self.location.is_empty()).then_some(self.location.as_str());
        let incumbent_mean = incumbent.and_then(|alias| self.mean(alias));

        let mut aliases: Vec<&str> = self
            .windows
            .iter()
            .filter(|(alias, w)| w.count() > 0 && Some(alias.as_str()) != incumbent)
            .map(|(alias, _)| alias.as_str())
            .collect();
        aliases.sort_unstable();

        let mut challenger: Option<(&str, f64)> = None;
        for alias in aliases {
            let mean = self.windows[alias].mean();
            // strict comparison keeps the earlier (smaller) alias on ties
            if challenger.map_or(true, |(_, best)| mean > best) {
                challenger = Some((alias, mean));
            }
        }

        match (incumbent, challenger) {
            (None, Some((alias, _))) => Some(alias.to_string()),
            (None, None) => None,
            (Some(current), Some((alias, mean))) => {
                let current_mean = incumbent_mean.unwrap_or(f64::MIN);
                if mean > current_mean + margin {
                    Some(alias.to_string())
                } else {
                    Some(current.to_string())
                }
            }
            (Some(current), None) => Some(current.to_string()),
        }
    }

    /// Append a location to the head of the persisted history and update the
    /// working location
    pub fn set_location(&mut self, alias: &str, facility_id: &str, timestamp: u64) {
        self.location = alias.to_string();
        self.facility_id = facility_id.to_string();
        self.tag.facility_id = facility_id.to_string();
        self.tag.location_history.insert(
            0,
            LocationHistory {
                location: alias.to_string(),
                timestamp,
                source: SOURCE_FIXED.to_string(),
            },
        );
        self.dirty = true;
    }

    pub fn transition(&mut self, state: TagState, timestamp: u64) {
        self.state = state;
        self.last_state_change = timestamp;
        self.tag.epc_state = if state.is_departed() {
            EPC_STATE_DEPARTED.to_string()
        } else if state == TagState::Present || state == TagState::Exiting {
            EPC_STATE_PRESENT.to_string()
        } else {
            String::new()
        };
        self.dirty = true;
    }
}
