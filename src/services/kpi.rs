use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::errors::AppError;
use crate::hierarchy;
use crate::models::kpi::{KpiRecord, KpiSubject, SubjectKind, UnitKpiSummary};
use crate::models::user::User;
use crate::services::admin::require_admin_scope;
use crate::store::Entities;

#[derive(Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct KpiInput {
    pub subject: KpiSubject,
    #[validate(length(min = 1, max = 128))]
    pub metric: String,
    pub target: f64,
    pub actual: f64,
}

#[derive(Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct KpiBatch {
    pub period: String,
    #[validate]
    pub records: Vec<KpiInput>,
}

pub fn parse_period(period: &str) -> Result<String, AppError> {
    let period = period.trim();
    let valid = period.len() == 7
        && NaiveDate::parse_from_str(&format!("{}-01", period), "%Y-%m-%d").is_ok();
    if valid {
        Ok(period.to_string())
    } else {
        Err(AppError::BadRequest(format!("Period '{}' must look like YYYY-MM", period)))
    }
}

struct Scope {
    units: HashSet<String>,
    users: HashSet<String>,
}

impl Scope {
    fn of(entities: &Entities, actor: &User) -> Result<Self, AppError> {
        if !actor.has_admin_scope() {
            return Ok(Scope {
                units: HashSet::new(),
                users: HashSet::from([actor.id.clone()]),
            });
        }
        let units = hierarchy::visible_unit_ids(&entities.units, actor)?;
        let users = entities
            .users
            .iter()
            .filter(|user| units.contains(&user.unit_id))
            .map(|user| user.id.clone())
            .collect();
        Ok(Scope { units, users })
    }

    fn covers(&self, subject: &KpiSubject) -> bool {
        match subject.kind {
            SubjectKind::User => self.users.contains(&subject.id),
            SubjectKind::Unit => self.units.contains(&subject.id),
        }
    }
}

/// Inserts or replaces records keyed by `(period, subject, metric)`. All-or-nothing.
pub fn upsert_kpis(entities: &mut Entities, actor: &User, batch: KpiBatch) -> Result<Vec<KpiRecord>, AppError> {
    require_admin_scope(actor)?;
    let period = parse_period(&batch.period)?;
    let scope = Scope::of(entities, actor)?;

    for input in &batch.records {
        if !scope.covers(&input.subject) {
            return Err(AppError::Forbidden(format!(
                "KPI subject {} is outside your scope",
                input.subject.id
            )));
        }
        let valid = |value: f64| value.is_finite() && value >= 0.0;
        if !valid(input.target) || !valid(input.actual) {
            return Err(AppError::BadRequest(format!(
                "KPI values for {} must be non-negative numbers",
                input.metric
            )));
        }
    }

    let mut saved = Vec::with_capacity(batch.records.len());
    for input in batch.records {
        let mut record = KpiRecord {
            id: Uuid::new_v4().to_string(),
            period: period.clone(),
            subject: input.subject,
            metric: input.metric.trim().to_string(),
            target: input.target,
            actual: input.actual,
        };
        match entities.kpis.iter_mut().find(|existing| existing.same_identity(&record)) {
            Some(existing) => {
                record.id = existing.id.clone();
                *existing = record.clone();
            }
            None => entities.kpis.push(record.clone()),
        }
        saved.push(record);
    }
    log::info!("{} saved {} KPI records for {}", actor.username, saved.len(), period);
    Ok(saved)
}

pub fn list_kpis<'a>(entities: &'a Entities, actor: &User, period: &str) -> Result<Vec<&'a KpiRecord>, AppError> {
    let period = parse_period(period)?;
    let scope = Scope::of(entities, actor)?;
    Ok(entities
        .kpis
        .iter()
        .filter(|record| record.period == period && scope.covers(&record.subject))
        .collect())
}

/// Totals per visible unit, counting the unit's own records and those of its
/// staff. Only records [`list_kpis`] would return are counted, so a non-admin's
/// unit row holds just their own figures.
pub fn summarize(entities: &Entities, actor: &User, period: &str) -> Result<Vec<UnitKpiSummary>, AppError> {
    let period = parse_period(period)?;
    let scope = Scope::of(entities, actor)?;
    let units = if actor.has_admin_scope() {
        hierarchy::visible_units(&entities.units, actor)?
    } else {
        entities.unit(&actor.unit_id).into_iter().collect()
    };

    let summaries = units
        .into_iter()
        .map(|unit| {
            let records: Vec<&KpiRecord> = entities
                .kpis
                .iter()
                .filter(|record| record.period == period && scope.covers(&record.subject))
                .filter(|record| match record.subject.kind {
                    SubjectKind::Unit => record.subject.id == unit.id,
                    SubjectKind::User => entities
                        .user(&record.subject.id)
                        .is_some_and(|user| user.unit_id == unit.id),
                })
                .collect();
            let total_target: f64 = records.iter().map(|record| record.target).sum();
            let total_actual: f64 = records.iter().map(|record| record.actual).sum();
            UnitKpiSummary {
                unit_id: unit.id.clone(),
                unit_name: unit.name.clone(),
                period: period.clone(),
                record_count: records.len(),
                total_target,
                total_actual,
                completion_ratio: (total_target > 0.0).then(|| total_actual / total_target),
            }
        })
        .collect();
    Ok(summaries)
}
