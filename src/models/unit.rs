use serde::{Deserialize, Serialize};

/// Organizational node. `id` is the generated unit code (e.g. `DV004213`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub manager_ids: Vec<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub level: u32,
}

impl Unit {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A unit together with its visible subtree, as rendered by the admin console.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnitNode {
    #[serde(flatten)]
    pub unit: Unit,
    pub staff_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UnitNode>,
}
