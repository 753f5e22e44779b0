use crate::navpath::path_with_tab_id;
use crate::tabs::TabSetSnapshot;
use std::collections::HashSet;
use tracing::{debug, info};

/// Creates and tears down the surfaces that host tab content.
pub trait FrameHost {
    type Frame;

    fn create_frame(&mut self, tab_id: &str, address: &str) -> Self::Frame;
    fn destroy_frame(&mut self, tab_id: &str, frame: Self::Frame);
    fn set_visible(&mut self, frame: &mut Self::Frame, visible: bool);
    fn focus(&mut self, frame: &mut Self::Frame);
}

pub struct FrameRecord<F> {
    pub tab_id: String,
    /// The address the frame was created with. Never changes afterwards.
    pub initial_address: String,
    pub visible: bool,
    pub frame: F,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub destroyed: Vec<String>,
    /// Set when the visible frame changed and received focus.
    pub focused: Option<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.destroyed.is_empty() && self.focused.is_none()
    }
}

/// Keeps exactly one frame per open tab, in tab order, with only the
/// current tab's frame visible.
pub struct FrameManager<F> {
    records: Vec<FrameRecord<F>>,
    visible: Option<String>,
}

impl<F> Default for FrameManager<F> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            visible: None,
        }
    }
}

impl<F> FrameManager<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile<H>(&mut self, snapshot: &TabSetSnapshot, host: &mut H) -> ReconcileReport
    where
        H: FrameHost<Frame = F>,
    {
        let mut report = ReconcileReport::default();
        let wanted = snapshot
            .tabs
            .iter()
            .map(|tab| tab.id.as_str())
            .collect::<HashSet<_>>();

        let mut kept = Vec::with_capacity(snapshot.tabs.len());
        for record in self.records.drain(..) {
            if wanted.contains(record.tab_id.as_str()) {
                kept.push(record);
            } else {
                debug!(tab_id = %record.tab_id, "destroying frame");
                report.destroyed.push(record.tab_id.clone());
                host.destroy_frame(&record.tab_id, record.frame);
            }
        }

        for tab in &snapshot.tabs {
            if kept.iter().any(|record| record.tab_id == tab.id) {
                continue;
            }
            let address = path_with_tab_id(&tab.path, &tab.id);
            debug!(tab_id = %tab.id, %address, "creating frame");
            let frame = host.create_frame(&tab.id, &address);
            report.created.push(tab.id.clone());
            kept.push(FrameRecord {
                tab_id: tab.id.clone(),
                initial_address: address,
                visible: false,
                frame,
            });
        }

        kept.sort_by_key(|record| {
            snapshot
                .tabs
                .iter()
                .position(|tab| tab.id == record.tab_id)
                .unwrap_or(usize::MAX)
        });
        self.records = kept;

        let current = snapshot.current.as_deref();
        for record in &mut self.records {
            let visible = Some(record.tab_id.as_str()) == current;
            if record.visible != visible {
                record.visible = visible;
                host.set_visible(&mut record.frame, visible);
            }
        }

        let now_visible = current
            .filter(|id| self.records.iter().any(|record| record.tab_id == *id))
            .map(str::to_string);
        if now_visible != self.visible {
            if let Some(id) = &now_visible
                && let Some(record) = self.records.iter_mut().find(|record| record.tab_id == *id)
            {
                host.focus(&mut record.frame);
                report.focused = Some(id.clone());
            }
            info!(from = ?self.visible, to = ?now_visible, "visible frame changed");
            self.visible = now_visible;
        }

        report
    }

    pub fn visible_id(&self) -> Option<&str> {
        self.visible.as_deref()
    }

    pub fn visible(&self) -> Option<&F> {
        let id = self.visible.as_deref()?;
        self.get(id)
    }

    pub fn visible_mut(&mut self) -> Option<&mut F> {
        let id = self.visible.clone()?;
        self.get_mut(&id)
    }

    pub fn get(&self, tab_id: &str) -> Option<&F> {
        self.records
            .iter()
            .find(|record| record.tab_id == tab_id)
            .map(|record| &record.frame)
    }

    pub fn get_mut(&mut self, tab_id: &str) -> Option<&mut F> {
        self.records
            .iter_mut()
            .find(|record| record.tab_id == tab_id)
            .map(|record| &mut record.frame)
    }

    pub fn records(&self) -> &[FrameRecord<F>] {
        &self.records
    }

    pub fn frames_mut(&mut self) -> impl Iterator<Item = &mut F> {
        self.records.iter_mut().map(|record| &mut record.frame)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameHost, FrameManager};
    use crate::tabs::{Tab, TabSetSnapshot};

    #[derive(Debug, Clone, Eq, PartialEq)]
    enum HostEvent {
        Created(String, String),
        Destroyed(String),
        Visible(String, bool),
        Focused(String),
    }

    #[derive(Default)]
    struct RecordingHost {
        events: Vec<HostEvent>,
        next_serial: usize,
    }

    #[derive(Debug)]
    struct TestFrame {
        tab_id: String,
        serial: usize,
        address: String,
    }

    impl FrameHost for RecordingHost {
        type Frame = TestFrame;

        fn create_frame(&mut self, tab_id: &str, address: &str) -> TestFrame {
            self.events
                .push(HostEvent::Created(tab_id.to_string(), address.to_string()));
            self.next_serial += 1;
            TestFrame {
                tab_id: tab_id.to_string(),
                serial: self.next_serial,
                address: address.to_string(),
            }
        }

        fn destroy_frame(&mut self, tab_id: &str, _frame: TestFrame) {
            self.events.push(HostEvent::Destroyed(tab_id.to_string()));
        }

        fn set_visible(&mut self, frame: &mut TestFrame, visible: bool) {
            self.events
                .push(HostEvent::Visible(frame.tab_id.clone(), visible));
        }

        fn focus(&mut self, frame: &mut TestFrame) {
            self.events.push(HostEvent::Focused(frame.tab_id.clone()));
        }
    }

    fn tab(id: &str, path: &str) -> Tab {
        Tab {
            id: id.to_string(),
            path: path.to_string(),
            ..Tab::default()
        }
    }

    fn snapshot(tabs: Vec<Tab>, current: Option<&str>) -> TabSetSnapshot {
        TabSetSnapshot {
            tabs,
            current: current.map(str::to_string),
        }
    }

    #[test]
    fn new_tabs_get_frames_addressed_with_their_id() {
        let mut host = RecordingHost::default();
        let mut frames = FrameManager::new();
        let report = frames.reconcile(
            &snapshot(
                vec![tab("a", ""), tab("b", "/namespaces?k8sCtx=kind&tabId=a")],
                Some("b"),
            ),
            &mut host,
        );

        assert_eq!(report.created, vec!["a", "b"]);
        assert_eq!(report.focused.as_deref(), Some("b"));
        assert_eq!(frames.get("a").unwrap().address, "?tabId=a");
        assert_eq!(
            frames.get("b").unwrap().address,
            "/namespaces?k8sCtx=kind&tabId=b"
        );
        assert_eq!(frames.visible_id(), Some("b"));
        assert_eq!(
            host.events,
            vec![
                HostEvent::Created("a".to_string(), "?tabId=a".to_string()),
                HostEvent::Created(
                    "b".to_string(),
                    "/namespaces?k8sCtx=kind&tabId=b".to_string()
                ),
                HostEvent::Visible("b".to_string(), true),
                HostEvent::Focused("b".to_string()),
            ]
        );
    }

    #[test]
    fn persisting_tab_keeps_its_frame_and_only_visibility_changes() {
        let mut host = RecordingHost::default();
        let mut frames = FrameManager::new();
        frames.reconcile(
            &snapshot(vec![tab("a", "/"), tab("b", "/")], Some("a")),
            &mut host,
        );
        let serial_a = frames.get("a").unwrap().serial;
        host.events.clear();

        // The stored path moved on, the frame must not follow it.
        let report = frames.reconcile(
            &snapshot(
                vec![tab("a", "/resources?query=pods"), tab("b", "/")],
                Some("b"),
            ),
            &mut host,
        );

        assert!(report.created.is_empty());
        assert!(report.destroyed.is_empty());
        assert_eq!(frames.get("a").unwrap().serial, serial_a);
        assert_eq!(frames.records()[0].initial_address, "/?tabId=a");
        assert_eq!(
            host.events,
            vec![
                HostEvent::Visible("a".to_string(), false),
                HostEvent::Visible("b".to_string(), true),
                HostEvent::Focused("b".to_string()),
            ]
        );
    }

    #[test]
    fn closed_tabs_lose_their_frames() {
        let mut host = RecordingHost::default();
        let mut frames = FrameManager::new();
        frames.reconcile(
            &snapshot(vec![tab("a", "/"), tab("b", "/")], Some("b")),
            &mut host,
        );

        let report = frames.reconcile(&snapshot(vec![tab("a", "/")], Some("a")), &mut host);
        assert_eq!(report.destroyed, vec!["b"]);
        assert_eq!(report.focused.as_deref(), Some("a"));
        assert_eq!(frames.len(), 1);
        assert!(host.events.contains(&HostEvent::Destroyed("b".to_string())));

        let report = frames.reconcile(&TabSetSnapshot::default(), &mut host);
        assert_eq!(report.destroyed, vec!["a"]);
        assert_eq!(report.focused, None);
        assert!(frames.is_empty());
        assert_eq!(frames.visible_id(), None);
    }

    #[test]
    fn unchanged_snapshot_is_a_noop() {
        let mut host = RecordingHost::default();
        let mut frames = FrameManager::new();
        let state = snapshot(vec![tab("a", "/"), tab("b", "/")], Some("a"));
        frames.reconcile(&state, &mut host);
        host.events.clear();

        let report = frames.reconcile(&state, &mut host);
        assert!(report.is_noop());
        assert!(host.events.is_empty());
    }

    #[test]
    fn frames_follow_tab_order() {
        let mut host = RecordingHost::default();
        let mut frames = FrameManager::new();
        frames.reconcile(&snapshot(vec![tab("b", "/")], Some("b")), &mut host);
        frames.reconcile(
            &snapshot(vec![tab("a", "/"), tab("b", "/")], Some("b")),
            &mut host,
        );

        let order = frames
            .records()
            .iter()
            .map(|record| record.tab_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["a", "b"]);
    }
}
