//! Interactive session: explicit state plus the controller that drives it.
//!
//! [`SessionState`] is created once per session, mutated only through
//! [`Controller`], and handed back by [`Controller::end`]. Nothing here is
//! global.

use crate::catalog::SchemaChoice;
use crate::config::CrowdConfig;
use crate::detail::{DetailPanel, build_detail};
use crate::error::CrowdError;
use crate::gateway::{QueryGateway, SqlApiGateway, fetch_snapshot};
use crate::ident::{Identifier, QualifiedName};
use crate::presign::PresignResolver;
use crate::settle::{SettleOutcome, SettlePolicy, settle};
use crate::snapshot::Snapshot;
use crate::stage::{
    FileOutcome, StageBacking, StageLocation, StageManager, UploadFile, build_object_store,
};
use diagnostics::*;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoData,
    DataLoaded,
    UploadInProgress,
    RowSelected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NoData => "no data",
            Phase::DataLoaded => "data loaded",
            Phase::UploadInProgress => "upload in progress",
            Phase::RowSelected => "row selected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    phase: Phase,
    snapshot: Option<Snapshot>,
    selection: Option<usize>,
    uploaded: HashSet<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::NoData,
            snapshot: None,
            selection: None,
            uploaded: HashSet::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn selection(&self) -> Option<usize> {
        self.selection
    }

    /// Names already uploaded in this session
    pub fn uploaded(&self) -> &HashSet<String> {
        &self.uploaded
    }

    /// Swap in a fresh snapshot, dropping a selection it no longer covers
    pub fn replace_snapshot(&mut self, snapshot: Snapshot) {
        if let Some(index) = self.selection {
            if !snapshot.contains(index) {
                let len = snapshot.len();
                warn!("Dropping selection of row {index}: snapshot now has {len} rows",
                    index: index, len: len);
                self.selection = None;
            }
        }
        self.snapshot = Some(snapshot);
        self.settle_phase();
    }

    /// Derive the resting phase from what is held
    pub fn settle_phase(&mut self) {
        self.phase = match (&self.snapshot, self.selection) {
            (None, _) => Phase::NoData,
            (Some(_), Some(_)) => Phase::RowSelected,
            (Some(_), None) => Phase::DataLoaded,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Skipped,
    Failed(String),
}

impl StepStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Done)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Done => f.write_str("done"),
            StepStatus::Skipped => f.write_str("skipped"),
            StepStatus::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Stage refresh, settle, and reload of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub refresh: StepStatus,
    pub settle: Option<SettleOutcome>,
    pub reload: StepStatus,
}

impl RefreshReport {
    fn skipped() -> Self {
        Self {
            refresh: StepStatus::Skipped,
            settle: None,
            reload: StepStatus::Skipped,
        }
    }

    pub fn is_success(&self) -> bool {
        self.refresh.is_done() && self.reload.is_done()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub outcomes: Vec<FileOutcome>,
    /// Picked again but skipped because the name was uploaded before
    pub already_uploaded: Vec<String>,
    pub refresh: RefreshReport,
}

impl UploadReport {
    pub fn successes(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Every file uploaded and the stage refresh went through
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none() && self.refresh.refresh.is_done()
    }
}

pub struct Controller {
    gateway: Arc<dyn QueryGateway>,
    stage: StageManager,
    resolver: PresignResolver,
    location: StageLocation,
    table: QualifiedName,
    settle: SettlePolicy,
    state: SessionState,
}

impl Controller {
    pub fn new(
        stage: StageManager,
        location: StageLocation,
        table: QualifiedName,
        settle: SettlePolicy,
        presign_ttl_secs: u64,
    ) -> Self {
        let gateway = stage.gateway().clone();
        Self {
            resolver: PresignResolver::new(gateway.clone(), presign_ttl_secs),
            gateway,
            stage,
            location,
            table,
            settle,
            state: SessionState::new(),
        }
    }

    /// Wire the SQL API gateway and the stage storage from configuration
    ///
    /// The stage lives in `database`.`schema`; the configured database is only
    /// the default the caller picks from.
    pub fn from_config(
        config: &CrowdConfig,
        database: &Identifier,
        schema: &SchemaChoice,
    ) -> Result<Self, CrowdError> {
        let gateway: Arc<dyn QueryGateway> = Arc::new(SqlApiGateway::new(config)?);
        let store = build_object_store(&config.storage)?;
        let backing = StageBacking::from_config(&config.storage)?;
        let location = StageLocation::new(database.as_str(), schema.name().as_str(), &config.stage)?;
        let table = QualifiedName::parse(&config.table)?;
        Ok(Self::new(
            StageManager::new(gateway, store, backing),
            location,
            table,
            SettlePolicy::from(&config.settle),
            config.presign_ttl_secs,
        ))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn location(&self) -> &StageLocation {
        &self.location
    }

    pub fn gateway(&self) -> &Arc<dyn QueryGateway> {
        &self.gateway
    }

    /// Tear the session down, returning its final state
    pub fn end(self) -> SessionState {
        self.state
    }

    pub async fn ensure_stage(&self) -> Result<(), CrowdError> {
        self.stage.ensure_stage(&self.location).await
    }

    /// Fetch the table; on failure the prior snapshot stays in place
    pub async fn load(&mut self) -> Result<Phase, CrowdError> {
        match fetch_snapshot(self.gateway.as_ref(), &self.table).await {
            Ok(snapshot) => {
                self.state.replace_snapshot(snapshot);
                Ok(self.state.phase)
            }
            Err(e) => {
                let error_msg = e.to_string();
                error!("Error loading data: {error_msg}", error_msg: error_msg);
                self.state.settle_phase();
                Err(e)
            }
        }
    }

    /// Files whose names were not uploaded yet, first occurrence of each
    pub fn new_files<'a>(&self, files: &'a [UploadFile]) -> Vec<&'a UploadFile> {
        let mut seen = HashSet::new();
        files
            .iter()
            .filter(|f| !self.state.uploaded.contains(&f.name) && seen.insert(f.name.as_str()))
            .collect()
    }

    /// Run one upload cycle for the not-yet-uploaded files
    ///
    /// Returns `None` when every picked name was already uploaded, so
    /// re-submitting an unchanged selection is a no-op.
    pub async fn submit_files(&mut self, files: &[UploadFile]) -> Option<UploadReport> {
        let fresh: Vec<UploadFile> = self.new_files(files).into_iter().cloned().collect();
        if fresh.is_empty() {
            debug!("No new files to upload");
            return None;
        }
        let already_uploaded = files
            .iter()
            .filter(|f| self.state.uploaded.contains(&f.name))
            .map(|f| f.name.clone())
            .collect();

        self.state.phase = Phase::UploadInProgress;
        let count = fresh.len();
        info!("Uploading {count} new file(s)", count: count);

        let outcomes = self.stage.upload_batch(&self.location, &fresh).await;
        let succeeded: Vec<String> = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.name.clone())
            .collect();
        self.state.uploaded.extend(succeeded.iter().cloned());

        let refresh = if succeeded.is_empty() {
            warn!("No file in the batch was uploaded; skipping stage refresh");
            RefreshReport::skipped()
        } else {
            self.refresh_cycle(&succeeded).await
        };
        self.state.settle_phase();

        Some(UploadReport {
            outcomes,
            already_uploaded,
            refresh,
        })
    }

    /// Refresh the stage and reload without uploading anything
    pub async fn manual_refresh(&mut self) -> RefreshReport {
        self.state.phase = Phase::UploadInProgress;
        let report = self.refresh_cycle(&[]).await;
        self.state.settle_phase();
        report
    }

    async fn refresh_cycle(&mut self, expected: &[String]) -> RefreshReport {
        if let Err(e) = self.stage.refresh_stage(&self.location).await {
            let message = format!("Error refreshing stage: {e}");
            error!("{message}", message: message);
            return RefreshReport {
                refresh: StepStatus::Failed(message),
                settle: None,
                reload: StepStatus::Skipped,
            };
        }

        let outcome = settle(&self.stage, &self.location, expected, &self.settle).await;
        let reload = match self.load().await {
            Ok(_) => StepStatus::Done,
            Err(e) => StepStatus::Failed(format!("Error refreshing data: {e}")),
        };
        RefreshReport {
            refresh: StepStatus::Done,
            settle: Some(outcome),
            reload,
        }
    }

    /// Apply a row-selection event
    ///
    /// `None` clears the selection. Selecting the selected row again clears
    /// it too. An index outside the snapshot is rejected and leaves no
    /// selection behind.
    pub fn select(&mut self, index: Option<usize>) -> Result<Phase, CrowdError> {
        let Some(snapshot) = &self.state.snapshot else {
            return Err(CrowdError::NoData);
        };
        match index {
            None => self.state.selection = None,
            Some(i) if self.state.selection == Some(i) => self.state.selection = None,
            Some(i) if snapshot.contains(i) => self.state.selection = Some(i),
            Some(i) => {
                let len = snapshot.len();
                self.state.selection = None;
                self.state.settle_phase();
                return Err(CrowdError::InvalidSelection { index: i, len });
            }
        }
        self.state.settle_phase();
        Ok(self.state.phase)
    }

    /// Detail panel of the selected row, `None` without a selection
    pub async fn detail(&self) -> Result<Option<DetailPanel>, CrowdError> {
        let (Some(snapshot), Some(index)) = (&self.state.snapshot, self.state.selection) else {
            return Ok(None);
        };
        build_detail(snapshot, index, &self.resolver).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ResultSet;
    use crate::snapshot::tests::{crowd_columns, crowd_row};
    use crate::testing::{ScriptedGateway, single_column};
    use object_store::memory::InMemory;
    use std::time::Duration;

    fn rows(n: usize) -> ResultSet {
        ResultSet::new(
            crowd_columns(),
            (0..n)
                .map(|i| crowd_row(10 + i as u64, 2, Some(20.0), &format!("{i}.jpg")))
                .collect(),
        )
    }

    fn controller(gateway: Arc<ScriptedGateway>) -> Controller {
        Controller::new(
            StageManager::new(
                gateway,
                Arc::new(InMemory::new()),
                StageBacking::s3("conference-snaps", "").expect("backing"),
            ),
            StageLocation::new("KAMESH_DEMOS", "CONFERENCES", "snaps").expect("valid"),
            QualifiedName::parse("kamesh_demos.conferences.smart_crowd_counter").expect("valid"),
            SettlePolicy::Fixed(Duration::from_millis(1)),
            60,
        )
    }

    #[tokio::test]
    async fn test_load_moves_to_data_loaded() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("smart_crowd_counter", rows(2));
        let mut controller = controller(gateway.clone());
        assert_eq!(controller.state().phase(), Phase::NoData);

        assert_eq!(controller.load().await.expect("load"), Phase::DataLoaded);
        assert_eq!(controller.state().snapshot().map(Snapshot::len), Some(2));
        assert_eq!(
            gateway.statements()[0].sql,
            "SELECT * FROM kamesh_demos.conferences.smart_crowd_counter"
        );
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_prior_snapshot() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on_sequence(
            "smart_crowd_counter",
            vec![Ok(rows(3)), Err("warehouse suspended".to_string())],
        );
        let mut controller = controller(gateway);
        controller.load().await.expect("first load");

        assert!(controller.load().await.is_err());
        assert_eq!(controller.state().snapshot().map(Snapshot::len), Some(3));
        assert_eq!(controller.state().phase(), Phase::DataLoaded);
    }

    #[tokio::test]
    async fn test_select_toggle_and_clear() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("smart_crowd_counter", rows(3));
        let mut controller = controller(gateway);

        assert!(matches!(controller.select(Some(0)), Err(CrowdError::NoData)));
        controller.load().await.expect("load");

        assert_eq!(controller.select(Some(1)).expect("select"), Phase::RowSelected);
        assert_eq!(controller.state().selection(), Some(1));
        assert_eq!(controller.select(Some(1)).expect("toggle"), Phase::DataLoaded);
        assert_eq!(controller.select(Some(2)).expect("select"), Phase::RowSelected);
        assert_eq!(controller.select(None).expect("clear"), Phase::DataLoaded);

        assert!(matches!(
            controller.select(Some(9)),
            Err(CrowdError::InvalidSelection { index: 9, len: 3 })
        ));
        assert_eq!(controller.state().selection(), None);
    }

    #[tokio::test]
    async fn test_shrinking_snapshot_drops_stale_selection() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on_sequence("smart_crowd_counter", vec![Ok(rows(5)), Ok(rows(2))]);
        let mut controller = controller(gateway);
        controller.load().await.expect("load");
        controller.select(Some(4)).expect("select");

        assert_eq!(controller.load().await.expect("reload"), Phase::DataLoaded);
        assert_eq!(controller.state().selection(), None);
        assert!(controller.detail().await.expect("detail").is_none());
    }

    #[tokio::test]
    async fn test_selection_within_bounds_survives_reload() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on_sequence("smart_crowd_counter", vec![Ok(rows(2)), Ok(rows(4))]);
        let mut controller = controller(gateway);
        controller.load().await.expect("load");
        controller.select(Some(1)).expect("select");

        assert_eq!(controller.load().await.expect("reload"), Phase::RowSelected);
        assert_eq!(controller.state().selection(), Some(1));
    }

    #[tokio::test]
    async fn test_manual_refresh() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("smart_crowd_counter", rows(1));
        let mut controller = controller(gateway.clone());

        let report = controller.manual_refresh().await;
        assert!(report.is_success());
        assert_eq!(controller.state().phase(), Phase::DataLoaded);
        assert_eq!(gateway.count("ALTER STAGE"), 1);
    }

    #[tokio::test]
    async fn test_manual_refresh_failure_keeps_state() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("smart_crowd_counter", rows(2));
        gateway.fail("ALTER STAGE", "insufficient privileges");
        let mut controller = controller(gateway.clone());
        controller.load().await.expect("load");

        let report = controller.manual_refresh().await;
        assert!(matches!(report.refresh, StepStatus::Failed(_)));
        assert_eq!(report.reload, StepStatus::Skipped);
        assert_eq!(controller.state().phase(), Phase::DataLoaded);
        assert_eq!(gateway.count("smart_crowd_counter"), 1);
    }

    #[tokio::test]
    async fn test_detail_for_selection() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("smart_crowd_counter", rows(2));
        gateway.on("GET_PRESIGNED_URL", single_column("URL", &["https://example.com/1.jpg"]));
        let mut controller = controller(gateway);
        controller.load().await.expect("load");
        assert!(controller.detail().await.expect("detail").is_none());

        controller.select(Some(1)).expect("select");
        let panel = controller.detail().await.expect("detail").expect("panel");
        assert_eq!(panel.index, 1);
        assert!(panel.analytics.is_ok());
    }

    #[tokio::test]
    async fn test_end_returns_state() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("smart_crowd_counter", rows(1));
        let mut controller = controller(gateway);
        controller
            .submit_files(&[UploadFile::new("a.jpg", vec![1])])
            .await
            .expect("report");

        let state = controller.end();
        assert!(state.uploaded().contains("a.jpg"));
        assert_eq!(state.phase(), Phase::DataLoaded);
    }
}
