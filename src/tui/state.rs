use crate::model::{
    LaunchEvent, LaunchOutcome, LaunchPhase, LaunchRecord, ScriptKind, Sentinel,
};
use std::time::Instant;

/// Message log length kept on screen.
const MAX_LOG: usize = 200;

pub struct UiState {
    pub tab: usize,
    pub phase: LaunchPhase,
    /// Furthest ladder step reached in the current cycle; kept when the cycle fails.
    pub furthest: Option<LaunchPhase>,
    pub info: String,
    pub log: Vec<String>,

    pub cycle_start: Instant,
    pub waiting_for: Option<Sentinel>,
    pub waited_ms: u64,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub base_dir: Option<String>,
    pub start_script: Option<String>,
    pub stop_script: Option<String>,
    pub url_reachable: Option<bool>,
    pub server_running: bool,

    pub last_record: Option<LaunchRecord>,
    pub history: Vec<LaunchRecord>,
    pub history_selected: usize, // Index of selected history item (0 = most recent)
    pub history_scroll_offset: usize,
    pub history_load_size: usize,
    pub auto_save: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            phase: LaunchPhase::Idle,
            furthest: None,
            info: String::new(),
            log: Vec::new(),
            cycle_start: Instant::now(),
            waiting_for: None,
            waited_ms: 0,
            port: None,
            url: None,
            base_dir: None,
            start_script: None,
            stop_script: None,
            url_reachable: None,
            server_running: false,
            last_record: None,
            history: Vec::new(),
            history_selected: 0,
            history_scroll_offset: 0,
            history_load_size: 50,
            auto_save: true,
        }
    }
}

impl UiState {
    pub fn push_log(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        let stamp = self.cycle_start.elapsed().as_secs_f64();
        self.log.push(format!("[{stamp:>6.1}s] {msg}"));
        if self.log.len() > MAX_LOG {
            let _ = self.log.drain(0..(self.log.len() - MAX_LOG));
        }
        self.info = msg;
    }

    /// Forget the previous cycle's progress before a restart.
    pub fn reset_cycle(&mut self) {
        self.phase = LaunchPhase::Idle;
        self.furthest = None;
        self.cycle_start = Instant::now();
        self.waiting_for = None;
        self.waited_ms = 0;
        self.port = None;
        self.url = None;
        self.start_script = None;
        self.url_reachable = None;
        self.last_record = None;
        self.log.clear();
    }

    pub fn apply_event(&mut self, ev: LaunchEvent) {
        match ev {
            LaunchEvent::PhaseChanged { phase } => {
                self.phase = phase;
                if phase.ladder_index().is_some() {
                    self.furthest = Some(phase);
                }
                if phase != LaunchPhase::SelectorLaunched && phase != LaunchPhase::ServerStarting {
                    self.waiting_for = None;
                }
                if phase == LaunchPhase::ServerStarting {
                    self.server_running = true;
                }
                self.push_log(format!("Phase: {}", phase.label()));
            }
            LaunchEvent::Waiting {
                sentinel,
                elapsed_ms,
            } => {
                self.waiting_for = Some(sentinel);
                self.waited_ms = elapsed_ms;
            }
            LaunchEvent::PortDiscovered { port } => {
                self.port = Some(port);
                self.waiting_for = None;
                self.push_log(format!("Port {port} read from {}", Sentinel::Port.file_name()));
            }
            LaunchEvent::UrlDiscovered { url } => {
                self.waiting_for = None;
                self.push_log(format!("URL {url}"));
                self.url = Some(url);
            }
            LaunchEvent::ScriptFinished { kind, outcome } => {
                let text = outcome.describe();
                match kind {
                    ScriptKind::Start => self.start_script = Some(text.clone()),
                    ScriptKind::Stop => {
                        self.stop_script = Some(text.clone());
                        if outcome.success {
                            self.server_running = false;
                        }
                    }
                    ScriptKind::Selector => {}
                }
                self.push_log(format!("{} script {text}", kind.label()));
            }
            LaunchEvent::Info(info) => {
                if let crate::model::InfoEvent::BasePath { path } = &info {
                    self.base_dir = Some(path.display().to_string());
                }
                if let crate::model::InfoEvent::ProbeResult { reachable, .. } = &info {
                    self.url_reachable = Some(*reachable);
                }
                self.push_log(info.to_message());
            }
            LaunchEvent::CycleCompleted { record } => {
                self.waiting_for = None;
                self.push_log(match &record.outcome {
                    LaunchOutcome::Ready => "Workspace ready".to_string(),
                    LaunchOutcome::Failed { reason } => format!("Launch failed: {reason}"),
                    LaunchOutcome::Cancelled => "Launch cancelled".to_string(),
                });
                self.last_record = Some(*record);
            }
        }
    }

    pub fn select_prev(&mut self) {
        if self.history_selected > 0 {
            self.history_selected -= 1;
            if self.history_selected < self.history_scroll_offset {
                self.history_scroll_offset = self.history_selected;
            }
        }
    }

    pub fn select_next(&mut self, visible: usize) {
        if self.history_selected + 1 < self.history.len() {
            self.history_selected += 1;
            let visible = visible.max(1);
            if self.history_selected >= self.history_scroll_offset + visible {
                self.history_scroll_offset = self.history_selected + 1 - visible;
            }
        }
    }

    /// Keep the selection inside the list after it shrank.
    pub fn clamp_selection(&mut self) {
        if self.history.is_empty() {
            self.history_selected = 0;
            self.history_scroll_offset = 0;
            return;
        }
        if self.history_selected >= self.history.len() {
            self.history_selected = self.history.len() - 1;
        }
        if self.history_scroll_offset > self.history_selected {
            self.history_scroll_offset = self.history_selected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InfoEvent, ScriptOutcome};
    use std::path::PathBuf;

    fn record(id: &str) -> LaunchRecord {
        LaunchRecord {
            timestamp_utc: String::new(),
            launch_id: id.into(),
            base_dir: PathBuf::from("/opt/ide"),
            outcome: LaunchOutcome::Cancelled,
            endpoint: None,
            port: None,
            port_wait_ms: None,
            url_wait_ms: None,
            start_script: None,
            url_reachable: None,
            server_started: false,
        }
    }

    #[test]
    fn failed_cycle_keeps_furthest_step() {
        let mut s = UiState::default();
        s.apply_event(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::SelectorLaunched,
        });
        s.apply_event(LaunchEvent::Waiting {
            sentinel: Sentinel::Port,
            elapsed_ms: 4000,
        });
        assert_eq!(s.waiting_for, Some(Sentinel::Port));

        s.apply_event(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::Failed,
        });
        assert_eq!(s.phase, LaunchPhase::Failed);
        assert_eq!(s.furthest, Some(LaunchPhase::SelectorLaunched));
        assert_eq!(s.waiting_for, None);
    }

    #[test]
    fn discovery_events_fill_endpoint() {
        let mut s = UiState::default();
        s.apply_event(LaunchEvent::Info(InfoEvent::BasePath {
            path: PathBuf::from("/opt/ide"),
        }));
        s.apply_event(LaunchEvent::PortDiscovered { port: 8080 });
        s.apply_event(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::ServerStarting,
        });
        s.apply_event(LaunchEvent::UrlDiscovered {
            url: "http://localhost:8080/ws".into(),
        });

        assert_eq!(s.base_dir.as_deref(), Some("/opt/ide"));
        assert_eq!(s.port, Some(8080));
        assert_eq!(s.url.as_deref(), Some("http://localhost:8080/ws"));
        assert!(s.server_running);
        assert!(s.info.contains("http://localhost:8080/ws"));
    }

    #[test]
    fn successful_stop_clears_running_flag() {
        let mut s = UiState {
            server_running: true,
            ..Default::default()
        };
        s.apply_event(LaunchEvent::ScriptFinished {
            kind: ScriptKind::Stop,
            outcome: ScriptOutcome {
                success: true,
                exit_code: Some(0),
                timed_out: false,
            },
        });
        assert!(!s.server_running);
        assert_eq!(s.stop_script.as_deref(), Some("succeeded"));
    }

    #[test]
    fn log_is_bounded() {
        let mut s = UiState::default();
        for i in 0..(MAX_LOG + 25) {
            s.push_log(format!("line {i}"));
        }
        assert_eq!(s.log.len(), MAX_LOG);
        assert!(s.log.last().unwrap().ends_with(&format!("line {}", MAX_LOG + 24)));
    }

    #[test]
    fn history_navigation_scrolls() {
        let mut s = UiState {
            history: (0..10).map(|i| record(&i.to_string())).collect(),
            ..Default::default()
        };
        for _ in 0..5 {
            s.select_next(3);
        }
        assert_eq!(s.history_selected, 5);
        assert_eq!(s.history_scroll_offset, 3);

        for _ in 0..5 {
            s.select_prev();
        }
        assert_eq!(s.history_selected, 0);
        assert_eq!(s.history_scroll_offset, 0);

        s.history_selected = 9;
        s.history.truncate(4);
        s.clamp_selection();
        assert_eq!(s.history_selected, 3);
    }
}
