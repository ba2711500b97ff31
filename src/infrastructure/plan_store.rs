use crate::domain::models::{parse_date, parse_hhmm, SessionPlan};
use crate::infrastructure::error::InfraError;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Read side of the external plan store, plus the insert used to seed it.
pub trait PlanStore: Send + Sync {
    fn get_plan(&self, owner_id: &str, plan_id: &str) -> Result<Option<SessionPlan>, InfraError>;
    fn list_plans(&self, owner_id: &str, date: NaiveDate) -> Result<Vec<SessionPlan>, InfraError>;
    fn upsert_plan(&self, plan: &SessionPlan) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqlitePlanStore {
    db_path: PathBuf,
}

impl SqlitePlanStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

type PlanRow = (String, String, String, String, String, String, String);

fn read_plan_row(row: &Row<'_>) -> rusqlite::Result<PlanRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn plan_from_row(row: PlanRow) -> Result<SessionPlan, InfraError> {
    let (id, owner_id, date, start_time, end_time, section, tasks_text) = row;
    let date = parse_date(&date, "study_plan.date").map_err(InfraError::InvalidConfig)?;
    let start_time = parse_hhmm(&start_time).ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid study_plan.start_time '{start_time}'"))
    })?;
    let end_time = parse_hhmm(&end_time).ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid study_plan.end_time '{end_time}'"))
    })?;
    Ok(SessionPlan {
        id,
        owner_id,
        date,
        start_time,
        end_time,
        section,
        tasks_text,
    })
}

const SELECT_PLAN_COLUMNS: &str =
    "SELECT id, owner_id, date, start_time, end_time, section, tasks_text FROM study_plan";

impl PlanStore for SqlitePlanStore {
    fn get_plan(&self, owner_id: &str, plan_id: &str) -> Result<Option<SessionPlan>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!("{SELECT_PLAN_COLUMNS} WHERE owner_id = ?1 AND id = ?2"),
                params![owner_id.trim(), plan_id.trim()],
                read_plan_row,
            )
            .optional()?;
        row.map(plan_from_row).transpose()
    }

    fn list_plans(&self, owner_id: &str, date: NaiveDate) -> Result<Vec<SessionPlan>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "{SELECT_PLAN_COLUMNS} WHERE owner_id = ?1 AND date = ?2 ORDER BY start_time ASC"
        ))?;
        let rows = statement
            .query_map(params![owner_id.trim(), date.to_string()], read_plan_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(plan_from_row).collect()
    }

    fn upsert_plan(&self, plan: &SessionPlan) -> Result<(), InfraError> {
        plan.validate().map_err(InfraError::InvalidInput)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO study_plan (id, owner_id, date, start_time, end_time, section, tasks_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
               owner_id = excluded.owner_id,
               date = excluded.date,
               start_time = excluded.start_time,
               end_time = excluded.end_time,
               section = excluded.section,
               tasks_text = excluded.tasks_text",
            params![
                plan.id,
                plan.owner_id,
                plan.date.to_string(),
                plan.start_time.format("%H:%M").to_string(),
                plan.end_time.format("%H:%M").to_string(),
                plan.section,
                plan.tasks_text
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    plans: Mutex<HashMap<String, SessionPlan>>,
}

impl InMemoryPlanStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SessionPlan>>, InfraError> {
        self.plans
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("plan store lock poisoned: {error}")))
    }
}

impl PlanStore for InMemoryPlanStore {
    fn get_plan(&self, owner_id: &str, plan_id: &str) -> Result<Option<SessionPlan>, InfraError> {
        let plans = self.lock()?;
        Ok(plans
            .get(plan_id.trim())
            .filter(|plan| plan.owner_id == owner_id.trim())
            .cloned())
    }

    fn list_plans(&self, owner_id: &str, date: NaiveDate) -> Result<Vec<SessionPlan>, InfraError> {
        let plans = self.lock()?;
        let mut listed = plans
            .values()
            .filter(|plan| plan.owner_id == owner_id.trim() && plan.date == date)
            .cloned()
            .collect::<Vec<_>>();
        listed.sort_by(|left, right| left.start_time.cmp(&right.start_time));
        Ok(listed)
    }

    fn upsert_plan(&self, plan: &SessionPlan) -> Result<(), InfraError> {
        plan.validate().map_err(InfraError::InvalidInput)?;
        let mut plans = self.lock()?;
        plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;

    fn plan(id: &str, start: &str, end: &str) -> SessionPlan {
        SessionPlan {
            id: id.to_string(),
            owner_id: "local".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
            start_time: parse_hhmm(start).expect("valid time"),
            end_time: parse_hhmm(end).expect("valid time"),
            section: "biology".to_string(),
            tasks_text: "Read chapter 4".to_string(),
        }
    }

    #[test]
    fn sqlite_plan_store_lists_by_start_time() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("studyroom.sqlite");
        initialize_database(&path).expect("init database");
        let store = SqlitePlanStore::new(&path);

        store.upsert_plan(&plan("late", "15:00", "16:00")).expect("insert");
        store.upsert_plan(&plan("early", "08:30", "09:30")).expect("insert");

        let listed = store
            .list_plans("local", NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"))
            .expect("list");
        let ids = listed.iter().map(|plan| plan.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["early", "late"]);

        let fetched = store.get_plan("local", "early").expect("get").expect("plan");
        assert_eq!(fetched, plan("early", "08:30", "09:30"));
        assert_eq!(store.get_plan("someone-else", "early").expect("get"), None);
    }

    #[test]
    fn invalid_plans_are_rejected() {
        let store = InMemoryPlanStore::default();
        let result = store.upsert_plan(&plan("bad", "10:00", "09:00"));
        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
    }
}
