//! Monitoring dashboard: fetch and advice state machines, periodic refresh
//! and a plain-text rendering of the current view.
//!
//! Every refresh and advice request is issued a sequence number. A response
//! is applied only when its number is still the latest one issued, so a slow
//! response overtaken by a newer refresh is dropped instead of overwriting
//! fresher data.

use crate::advice::advise_from_rows;
use crate::agent::AgentRegistry;
use crate::errors::{Error, Result};
use crate::measurements::fetch_raw;
use crate::metrics::STALE_RESPONSES_TOTAL;
use crate::model::{AdviceResult, MeasurementsResult};
use crate::normalize::{to_measurement_rows, LatestValues, MeasurementRow};
use crate::query::{MeasureName, TimeWindow};
use crate::store::TimeSeriesStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub const DEFAULT_LIMIT: u32 = 20;
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchPhase {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvicePhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSettings {
    pub window: TimeWindow,
    pub measure_name: Option<MeasureName>,
    pub limit: u32,
    pub show_table: bool,
    pub show_advisor: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            window: TimeWindow::default(),
            measure_name: None,
            limit: DEFAULT_LIMIT,
            show_table: true,
            show_advisor: true,
        }
    }
}

/// Partial settings change; an empty `measure_name` clears the filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub window: Option<TimeWindow>,
    pub measure_name: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTicket {
    pub seq: u64,
    pub window: TimeWindow,
    pub measure_name: Option<MeasureName>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdviceTicket {
    pub seq: u64,
    pub rows: Vec<MeasurementRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Current,
    Stale,
}

#[derive(Debug, Default)]
pub struct Dashboard {
    phase: FetchPhase,
    advice_phase: AdvicePhase,
    data: Vec<MeasurementRow>,
    error: Option<String>,
    last_updated: Option<DateTime<Utc>>,
    advice: Option<AdviceResult>,
    settings: DashboardSettings,
    refresh_seq: u64,
    advice_seq: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub phase: FetchPhase,
    pub advice_phase: AdvicePhase,
    pub settings: DashboardSettings,
    pub latest: LatestValues,
    pub data: Vec<MeasurementRow>,
    pub row_count: usize,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub advice: Option<AdviceResult>,
}

impl Dashboard {
    pub fn new(settings: DashboardSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> FetchPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn advice_phase(&self) -> AdvicePhase {
        self.advice_phase
    }

    #[cfg(test)]
    pub fn data(&self) -> &[MeasurementRow] {
        &self.data
    }

    #[cfg(test)]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[cfg(test)]
    pub fn settings(&self) -> &DashboardSettings {
        &self.settings
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.refresh_seq += 1;
        self.phase = FetchPhase::Loading;
        self.error = None;

        RefreshTicket {
            seq: self.refresh_seq,
            window: self.settings.window,
            measure_name: self.settings.measure_name.clone(),
            limit: self.settings.limit,
        }
    }

    /// Applies a fetch outcome. On failure the previous rows stay in place
    /// next to the error. Returns an advice ticket when the new rows should be
    /// analysed.
    pub fn complete_refresh(
        &mut self,
        ticket: &RefreshTicket,
        result: MeasurementsResult,
    ) -> (Applied, Option<AdviceTicket>) {
        if ticket.seq != self.refresh_seq {
            STALE_RESPONSES_TOTAL.inc();
            debug!(
                "Discarding refresh #{} (latest is #{})",
                ticket.seq, self.refresh_seq
            );
            return (Applied::Stale, None);
        }

        if !result.success {
            self.phase = FetchPhase::Error;
            self.error = Some(
                result
                    .error
                    .unwrap_or_else(|| "Failed to fetch measurements".to_string()),
            );
            return (Applied::Current, None);
        }

        self.data = to_measurement_rows(&result.data.unwrap_or_default());
        self.last_updated = Some(result.query_time);
        self.phase = FetchPhase::Loaded;

        let advice = (!self.data.is_empty() && self.settings.show_advisor)
            .then(|| self.begin_advice());
        (Applied::Current, advice)
    }

    pub fn begin_advice(&mut self) -> AdviceTicket {
        self.advice_seq += 1;
        self.advice_phase = AdvicePhase::Loading;

        AdviceTicket {
            seq: self.advice_seq,
            rows: self.data.clone(),
        }
    }

    pub fn complete_advice(&mut self, ticket: &AdviceTicket, result: AdviceResult) -> Applied {
        if ticket.seq != self.advice_seq {
            STALE_RESPONSES_TOTAL.inc();
            debug!(
                "Discarding advice #{} (latest is #{})",
                ticket.seq, self.advice_seq
            );
            return Applied::Stale;
        }

        self.advice_phase = if result.success {
            AdvicePhase::Ready
        } else {
            AdvicePhase::Error
        };
        self.advice = Some(result);
        Applied::Current
    }

    pub fn toggle_table(&mut self) -> bool {
        self.settings.show_table = !self.settings.show_table;
        self.settings.show_table
    }

    pub fn toggle_advisor(&mut self) -> bool {
        self.settings.show_advisor = !self.settings.show_advisor;
        self.settings.show_advisor
    }

    pub fn apply_settings(&mut self, update: SettingsUpdate) -> Result<()> {
        if update.limit == Some(0) {
            return Err(Error::Validation("Limit must be a positive integer".to_string()));
        }
        let measure_name = match update.measure_name.as_deref() {
            Some(raw) => Some(MeasureName::parse_optional(Some(raw))?),
            None => None,
        };

        if let Some(window) = update.window {
            self.settings.window = window;
        }
        if let Some(name) = measure_name {
            self.settings.measure_name = name;
        }
        if let Some(limit) = update.limit {
            self.settings.limit = limit;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            phase: self.phase,
            advice_phase: self.advice_phase,
            settings: self.settings.clone(),
            latest: LatestValues::from_rows(&self.data),
            data: self.data.clone(),
            row_count: self.data.len(),
            error: self.error.clone(),
            last_updated: self.last_updated,
            advice: self.advice.clone(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let latest = LatestValues::from_rows(&self.data);

        let _ = writeln!(out, "Tomato Growing Monitor");
        let _ = writeln!(out, "======================");
        let _ = writeln!(out, "Temperature:  {} °C", latest.temperature);
        let _ = writeln!(out, "Humidity:     {} %", latest.humidity);
        let _ = writeln!(out, "Measured at:  {}", latest.time);
        let _ = writeln!(
            out,
            "Window: {}  Measure: {}  Limit: {}",
            self.settings.window,
            self.settings
                .measure_name
                .as_ref()
                .map(MeasureName::as_str)
                .unwrap_or("all"),
            self.settings.limit
        );

        if let Some(error) = &self.error {
            let _ = writeln!(out, "\n[ERROR] {}", error);
        }

        if self.settings.show_advisor {
            let _ = writeln!(out, "\n-- Advisor --");
            match (&self.advice, self.advice_phase) {
                (_, AdvicePhase::Loading) => {
                    let _ = writeln!(out, "Analysing...");
                }
                (Some(advice), _) if advice.success => {
                    let _ = writeln!(out, "{}", advice.advice.as_deref().unwrap_or_default());
                }
                (Some(advice), _) => {
                    let _ = writeln!(
                        out,
                        "{}",
                        advice.error.as_deref().unwrap_or("Advice unavailable")
                    );
                }
                (None, _) => {
                    let _ = writeln!(out, "Advice appears after the next refresh");
                }
            }
        }

        if self.phase == FetchPhase::Loading && self.data.is_empty() {
            let _ = writeln!(out, "\nLoading...");
        } else if self.settings.show_table {
            let _ = writeln!(out, "\n-- Measurements --");
            if self.data.is_empty() {
                let _ = writeln!(out, "No matching data");
            } else {
                let _ = writeln!(
                    out,
                    "{:<16} {:<24} {:<14} {:>10}",
                    "Device", "Time", "Measure", "Value"
                );
                for row in &self.data {
                    let value = format!("{} {}", row.display_value(), row.unit());
                    let _ = writeln!(
                        out,
                        "{:<16} {:<24} {:<14} {:>10}",
                        row.device_id.as_deref().unwrap_or("-"),
                        row.display_time(),
                        row.measure_name.as_deref().unwrap_or("-"),
                        value.trim_end()
                    );
                }
            }
        }

        let _ = write!(out, "\nRows: {}", self.data.len());
        if let Some(updated) = self.last_updated {
            let _ = write!(out, "  Last updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        out.push('\n');
        out
    }
}

/// Dashboard state plus the store and agents a refresh needs
pub struct DashboardService {
    state: Mutex<Dashboard>,
    store: Arc<dyn TimeSeriesStore>,
    agents: Arc<AgentRegistry>,
}

impl DashboardService {
    pub fn new(
        settings: DashboardSettings,
        store: Arc<dyn TimeSeriesStore>,
        agents: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            state: Mutex::new(Dashboard::new(settings)),
            store,
            agents,
        }
    }

    /// One fetch cycle, followed by advice when the fresh rows call for it.
    /// The lock is never held across I/O.
    pub async fn refresh(&self) -> Applied {
        let ticket = self.state.lock().await.begin_refresh();
        let result = fetch_raw(
            self.store.as_ref(),
            ticket.window,
            ticket.measure_name.clone(),
            ticket.limit,
        )
        .await;

        let (applied, advice_ticket) = self.state.lock().await.complete_refresh(&ticket, result);

        if let Some(advice_ticket) = advice_ticket {
            let advice = advise_from_rows(&self.agents, &advice_ticket.rows).await;
            self.state.lock().await.complete_advice(&advice_ticket, advice);
        }
        applied
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn render_text(&self) -> String {
        self.state.lock().await.render_text()
    }

    pub async fn toggle_table(&self) -> bool {
        self.state.lock().await.toggle_table()
    }

    pub async fn toggle_advisor(&self) -> bool {
        self.state.lock().await.toggle_advisor()
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<Applied> {
        self.state.lock().await.apply_settings(update)?;
        Ok(self.refresh().await)
    }
}

/// Refreshes immediately, then every `period`. Ticks missed while a refresh
/// is still running are skipped, so refreshes never overlap here.
pub async fn run_poller(service: Arc<DashboardService>, period: Duration) {
    info!("Starting dashboard poller every {:?}", period);

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        service.refresh().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FARM_AGENT;
    use crate::testing::{raw_response, MockAgent, MockStore};
    use chrono::TimeZone;

    fn loaded_result(count: usize) -> MeasurementsResult {
        let newest = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let rows = crate::normalize::normalize(&raw_response(count, newest)).unwrap();
        MeasurementsResult::ok(rows, Some(TimeWindow::FifteenMinutes))
    }

    #[test]
    fn test_failed_refresh_keeps_previous_data() {
        let mut dashboard = Dashboard::new(DashboardSettings::default());
        let first = dashboard.begin_refresh();
        dashboard.complete_refresh(&first, loaded_result(4));

        let second = dashboard.begin_refresh();
        let (applied, advice) =
            dashboard.complete_refresh(&second, MeasurementsResult::failed("timeout", None));

        assert_eq!(applied, Applied::Current);
        assert!(advice.is_none());
        assert_eq!(dashboard.phase(), FetchPhase::Error);
        assert_eq!(dashboard.data().len(), 4);
        assert_eq!(dashboard.error(), Some("timeout"));

        let text = dashboard.render_text();
        assert!(text.contains("[ERROR] timeout"));
        assert!(text.contains("temperature"));
        assert!(text.contains("Rows: 4"));
    }

    #[test]
    fn test_stale_refresh_is_discarded() {
        let mut dashboard = Dashboard::new(DashboardSettings::default());
        let slow = dashboard.begin_refresh();
        let fast = dashboard.begin_refresh();

        assert_eq!(dashboard.complete_refresh(&fast, loaded_result(2)).0, Applied::Current);
        assert_eq!(dashboard.complete_refresh(&slow, loaded_result(6)).0, Applied::Stale);
        assert_eq!(dashboard.data().len(), 2);
        assert_eq!(dashboard.phase(), FetchPhase::Loaded);
    }

    #[test]
    fn test_advice_ticket_only_for_non_empty_data_with_advisor() {
        let mut dashboard = Dashboard::new(DashboardSettings::default());

        let ticket = dashboard.begin_refresh();
        let (_, advice) = dashboard.complete_refresh(&ticket, loaded_result(0));
        assert!(advice.is_none());
        assert_eq!(dashboard.advice_phase(), AdvicePhase::Idle);

        let ticket = dashboard.begin_refresh();
        let (_, advice) = dashboard.complete_refresh(&ticket, loaded_result(2));
        assert_eq!(advice.unwrap().rows.len(), 2);
        assert_eq!(dashboard.advice_phase(), AdvicePhase::Loading);

        dashboard.toggle_advisor();
        let ticket = dashboard.begin_refresh();
        let (_, advice) = dashboard.complete_refresh(&ticket, loaded_result(2));
        assert!(advice.is_none());
    }

    #[test]
    fn test_stale_advice_is_discarded() {
        let mut dashboard = Dashboard::new(DashboardSettings::default());
        let ticket = dashboard.begin_refresh();
        dashboard.complete_refresh(&ticket, loaded_result(2));
        let old = dashboard.begin_advice();
        let new = dashboard.begin_advice();

        assert_eq!(
            dashboard.complete_advice(&old, AdviceResult::failed("late")),
            Applied::Stale
        );
        assert_eq!(dashboard.advice_phase(), AdvicePhase::Loading);
        assert_eq!(
            dashboard.complete_advice(&new, AdviceResult::failed("no data")),
            Applied::Current
        );
        assert_eq!(dashboard.advice_phase(), AdvicePhase::Error);
    }

    #[test]
    fn test_hidden_table_and_advisor() {
        let mut dashboard = Dashboard::new(DashboardSettings::default());
        let ticket = dashboard.begin_refresh();
        dashboard.complete_refresh(&ticket, loaded_result(2));

        assert!(!dashboard.toggle_table());
        assert!(!dashboard.toggle_advisor());
        let text = dashboard.render_text();

        assert!(!text.contains("-- Measurements --"));
        assert!(!text.contains("-- Advisor --"));
        assert!(text.contains("Temperature:  24.3 °C"));
    }

    #[test]
    fn test_apply_settings() {
        let mut dashboard = Dashboard::new(DashboardSettings::default());

        dashboard
            .apply_settings(SettingsUpdate {
                window: Some(TimeWindow::OneHour),
                measure_name: Some("humidity".to_string()),
                limit: Some(50),
            })
            .unwrap();
        assert_eq!(dashboard.settings().window, TimeWindow::OneHour);
        assert_eq!(dashboard.settings().limit, 50);
        assert_eq!(
            dashboard.settings().measure_name.as_ref().map(MeasureName::as_str),
            Some("humidity")
        );

        dashboard
            .apply_settings(SettingsUpdate {
                measure_name: Some(String::new()),
                ..Default::default()
            })
            .unwrap();
        assert!(dashboard.settings().measure_name.is_none());

        assert!(dashboard
            .apply_settings(SettingsUpdate {
                measure_name: Some("x' OR 1=1".to_string()),
                ..Default::default()
            })
            .is_err());
        assert!(dashboard
            .apply_settings(SettingsUpdate {
                limit: Some(0),
                ..Default::default()
            })
            .is_err());
        assert_eq!(dashboard.settings().limit, 50);
    }

    fn service(store: Arc<MockStore>, agent: Arc<MockAgent>) -> DashboardService {
        DashboardService::new(
            DashboardSettings::default(),
            store,
            Arc::new(AgentRegistry::new().with_agent(agent)),
        )
    }

    #[tokio::test]
    async fn test_service_refresh_loads_data_and_advice() {
        let store = Arc::new(MockStore::returning(raw_response(6, Utc::now())));
        let agent = Arc::new(MockAgent::replying(FARM_AGENT, "Looks healthy."));
        let service = service(store.clone(), agent.clone());

        assert_eq!(service.refresh().await, Applied::Current);

        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.phase, FetchPhase::Loaded);
        assert_eq!(snapshot.advice_phase, AdvicePhase::Ready);
        assert_eq!(snapshot.row_count, 6);
        assert_eq!(snapshot.latest.temperature, "24.3");
        assert_eq!(snapshot.advice.unwrap().advice.as_deref(), Some("Looks healthy."));
        assert_eq!(agent.call_count(), 1);
        assert!(store.last_query().unwrap().sql.contains("LIMIT 20"));
    }

    #[tokio::test]
    async fn test_service_failed_refresh_keeps_rows() {
        let store = Arc::new(MockStore::returning(raw_response(4, Utc::now())));
        store.push_err("throttled");
        let agent = Arc::new(MockAgent::replying(FARM_AGENT, "ok"));
        let service = service(store.clone(), agent.clone());

        service.refresh().await;
        service.refresh().await;

        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.phase, FetchPhase::Error);
        assert_eq!(snapshot.row_count, 4);
        assert!(snapshot.error.unwrap().contains("throttled"));
        assert_eq!(agent.call_count(), 1);
    }

    #[tokio::test]
    async fn test_toggles_do_no_io() {
        let store = Arc::new(MockStore::new());
        let agent = Arc::new(MockAgent::replying(FARM_AGENT, "ok"));
        let service = service(store.clone(), agent.clone());

        assert!(!service.toggle_table().await);
        assert!(!service.toggle_advisor().await);
        assert!(service.toggle_advisor().await);

        assert_eq!(store.call_count(), 0);
        assert_eq!(agent.call_count(), 0);
    }

    #[tokio::test]
    async fn test_settings_update_triggers_refresh() {
        let store = Arc::new(MockStore::new());
        let agent = Arc::new(MockAgent::replying(FARM_AGENT, "ok"));
        let service = service(store.clone(), agent);

        service
            .update_settings(SettingsUpdate {
                window: Some(TimeWindow::SixHours),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.call_count(), 1);
        assert!(store.last_query().unwrap().sql.contains("ago('6h')"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_refreshes_on_start_and_on_each_tick() {
        let store = Arc::new(MockStore::new());
        let agent = Arc::new(MockAgent::replying(FARM_AGENT, "ok"));
        let service = Arc::new(service(store.clone(), agent));

        // ticks at 0ms, 20ms and 40ms
        let handle = tokio::spawn(run_poller(service, Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(store.call_count(), 3);
    }
}
