//! In-process `RunStore`

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    NewRun, NewScreenshot, Page, RunQuery, RunStatistics, RunStore, ScreenshotId,
    ScreenshotRecord,
};
use crate::error::{AutomationError, Result};
use crate::workflow::{LogLevel, RunId, RunState, StepRecord, WorkflowRun};

#[derive(Debug, Default)]
struct Inner {
    runs: BTreeMap<RunId, WorkflowRun>,
    logs: BTreeMap<RunId, Vec<StepRecord>>,
    screenshots: Vec<ScreenshotRecord>,
    next_run_id: RunId,
    next_screenshot_id: ScreenshotId,
}

/// Keeps everything in memory; contents are lost when dropped
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn mark_running(run: &mut WorkflowRun) {
    let now = Utc::now();
    run.state = RunState::Running;
    run.started_at = Some(now);
    run.finished_at = None;
    run.error = None;
    run.updated_at = now;
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: NewRun) -> Result<RunId> {
        let mut inner = self.inner.lock().await;
        inner.next_run_id += 1;
        let id = inner.next_run_id;
        let now = Utc::now();
        inner.runs.insert(
            id,
            WorkflowRun {
                id,
                name: run.name,
                kind: run.kind,
                state: RunState::Pending,
                owner: run.owner,
                target: run.target,
                started_at: None,
                finished_at: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<WorkflowRun>> {
        Ok(self.inner.lock().await.runs.get(&id).cloned())
    }

    async fn try_start(&self, id: RunId, force_restart: bool) -> Result<Vec<RunId>> {
        let mut inner = self.inner.lock().await;
        let run = inner.runs.get(&id).ok_or(AutomationError::RunNotFound(id))?;
        if run.state.is_terminal() {
            return Err(AutomationError::RunFinished {
                run_id: id,
                state: run.state,
            });
        }

        let state = run.state;
        let running: Vec<RunId> = inner
            .runs
            .values()
            .filter(|r| {
                r.state == RunState::Running && r.kind == run.kind && r.target == run.target
            })
            .map(|r| r.id)
            .collect();

        if !force_restart {
            if state == RunState::Running {
                return Err(AutomationError::AlreadyRunning { run_id: id });
            }
            if let Some(other) = running.first() {
                return Err(AutomationError::AlreadyRunning { run_id: *other });
            }
        }

        if let Some(run) = inner.runs.get_mut(&id) {
            mark_running(run);
        }
        Ok(running)
    }

    async fn update_run_state(
        &self,
        id: RunId,
        state: RunState,
        error: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .runs
            .get_mut(&id)
            .ok_or(AutomationError::RunNotFound(id))?;

        if state == RunState::Running {
            mark_running(run);
        } else {
            let now = Utc::now();
            run.state = state;
            run.updated_at = now;
            if state.is_terminal() {
                run.finished_at = Some(now);
            }
        }
        if error.is_some() {
            run.error = error;
        }
        Ok(())
    }

    async fn append_log(&self, id: RunId, record: &StepRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.runs.contains_key(&id) {
            return Err(AutomationError::RunNotFound(id));
        }
        inner.logs.entry(id).or_default().push(record.clone());
        Ok(())
    }

    async fn create_screenshot_record(
        &self,
        id: RunId,
        screenshot: NewScreenshot,
    ) -> Result<ScreenshotRecord> {
        let mut inner = self.inner.lock().await;
        if !inner.runs.contains_key(&id) {
            return Err(AutomationError::RunNotFound(id));
        }
        inner.next_screenshot_id += 1;
        let record =
            ScreenshotRecord::from_new(inner.next_screenshot_id, id, screenshot, Utc::now());
        inner.screenshots.push(record.clone());
        Ok(record)
    }

    async fn list_logs(&self, id: RunId, level: Option<LogLevel>) -> Result<Vec<StepRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .logs
            .get(&id)
            .map(|logs| {
                logs.iter()
                    .filter(|r| level.map_or(true, |l| r.level == l))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_screenshots(&self, id: RunId) -> Result<Vec<ScreenshotRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .screenshots
            .iter()
            .filter(|s| s.run_id == id)
            .cloned()
            .collect())
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Page<WorkflowRun>> {
        let query = query.normalized();
        let inner = self.inner.lock().await;

        let matching: Vec<&WorkflowRun> =
            inner.runs.values().rev().filter(|r| query.matches(r)).collect();
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .cloned()
            .collect();

        Ok(Page::new(items, total, &query))
    }

    async fn statistics(&self, owner: Option<i64>) -> Result<RunStatistics> {
        let inner = self.inner.lock().await;
        Ok(RunStatistics::from_runs(
            inner
                .runs
                .values()
                .filter(|r| owner.map_or(true, |o| r.owner == o)),
        ))
    }
}
