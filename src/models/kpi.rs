use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Unit,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct KpiSubject {
    pub kind: SubjectKind,
    pub id: String,
}

/// Monthly target/actual pair for one metric of one employee or unit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KpiRecord {
    pub id: String,
    /// `YYYY-MM`
    pub period: String,
    pub subject: KpiSubject,
    pub metric: String,
    pub target: f64,
    pub actual: f64,
}

impl KpiRecord {
    pub fn same_identity(&self, other: &KpiRecord) -> bool {
        self.period == other.period && self.subject == other.subject && self.metric == other.metric
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitKpiSummary {
    pub unit_id: String,
    pub unit_name: String,
    pub period: String,
    pub record_count: usize,
    pub total_target: f64,
    pub total_actual: f64,
    pub completion_ratio: Option<f64>,
}
