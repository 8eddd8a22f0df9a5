/// Event sinks for part notifications.
///
/// The tracker reports through a [`PartEventSink`] supplied at construction.
/// Sinks receive `Copy` snapshots, so nothing they keep aliases tracker state.
use heapless::Vec;

use crate::part::PartInfo;

/// Tracker-wide counters reported on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerStatus {
    /// Slots bound to a part, identified or not
    pub active: u8,
    pub identified: u8,
    /// Parts holding a live pair link
    pub paired: u8,
    pub selected_rx_id: u32,
}

/// Receiver of tracker notifications.
pub trait PartEventSink {
    /// A reported part appeared or changed.
    fn on_updated(&mut self, info: &PartInfo);

    /// A reported part was evicted, went stale, or was cleared.
    fn on_lost(&mut self, info: &PartInfo);

    /// Answer to a status request.
    fn on_status(&mut self, _status: &TrackerStatus) {}
}

impl<S: PartEventSink + ?Sized> PartEventSink for &mut S {
    fn on_updated(&mut self, info: &PartInfo) {
        (**self).on_updated(info)
    }

    fn on_lost(&mut self, info: &PartInfo) {
        (**self).on_lost(info)
    }

    fn on_status(&mut self, status: &TrackerStatus) {
        (**self).on_status(status)
    }
}

/// Discards every event.
impl PartEventSink for () {
    fn on_updated(&mut self, _info: &PartInfo) {}
    fn on_lost(&mut self, _info: &PartInfo) {}
}

/// A notification as recorded by [`EventLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartEvent {
    Updated(PartInfo),
    Lost(PartInfo),
}

impl PartEvent {
    pub fn info(&self) -> &PartInfo {
        match self {
            PartEvent::Updated(info) | PartEvent::Lost(info) => info,
        }
    }
}

/// Bounded in-memory sink; drops events once full.
#[derive(Debug, Default)]
pub struct EventLog<const N: usize> {
    events: Vec<PartEvent, N>,
    status: Option<TrackerStatus>,
}

impl<const N: usize> EventLog<N> {
    pub const fn new() -> Self {
        Self {
            events: Vec::new(),
            status: None,
        }
    }

    pub fn events(&self) -> &[PartEvent] {
        &self.events
    }

    /// Last status received, if any.
    pub fn status(&self) -> Option<&TrackerStatus> {
        self.status.as_ref()
    }

    pub fn updated(&self) -> impl Iterator<Item = &PartInfo> {
        self.events.iter().filter_map(|e| match e {
            PartEvent::Updated(info) => Some(info),
            PartEvent::Lost(_) => None,
        })
    }

    pub fn lost(&self) -> impl Iterator<Item = &PartInfo> {
        self.events.iter().filter_map(|e| match e {
            PartEvent::Lost(info) => Some(info),
            PartEvent::Updated(_) => None,
        })
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.status = None;
    }
}

impl<const N: usize> PartEventSink for EventLog<N> {
    fn on_updated(&mut self, info: &PartInfo) {
        let _ = self.events.push(PartEvent::Updated(*info));
    }

    fn on_lost(&mut self, info: &PartInfo) {
        let _ = self.events.push(PartEvent::Lost(*info));
    }

    fn on_status(&mut self, status: &TrackerStatus) {
        self.status = Some(*status);
    }
}
