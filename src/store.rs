use std::collections::HashSet;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::db::{Collection, PersistenceClient};
use crate::errors::AppError;
use crate::hierarchy;
use crate::models::kpi::KpiRecord;
use crate::models::task::Task;
use crate::models::unit::Unit;
use crate::models::user::User;

#[derive(Debug, Clone, Default)]
pub struct Entities {
    pub units: Vec<Unit>,
    pub users: Vec<User>,
    pub tasks: Vec<Task>,
    pub kpis: Vec<KpiRecord>,
}

impl Entities {
    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|unit| unit.id == id)
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id == id)
    }

    pub fn user_mut(&mut self, id: &str) -> Option<&mut User> {
        self.users.iter_mut().find(|user| user.id == id)
    }

    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        let username = username.trim();
        self.users
            .iter()
            .find(|user| user.username.eq_ignore_ascii_case(username))
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

/// Holds the entity arrays behind one lock. Writers hold the write guard while
/// they validate, mutate and persist, so mutations never interleave.
pub struct EntityStore {
    entities: RwLock<Entities>,
    client: PersistenceClient,
    from_cache: HashSet<Collection>,
}

impl EntityStore {
    pub async fn load(client: PersistenceClient) -> Self {
        let mut from_cache = HashSet::new();
        let units = client.load(Collection::Units).await;
        let users = client.load(Collection::Users).await;
        let tasks = client.load(Collection::Tasks).await;
        let kpis = client.load(Collection::Kpis).await;
        for (collection, cached) in [
            (Collection::Units, units.from_cache),
            (Collection::Users, users.from_cache),
            (Collection::Tasks, tasks.from_cache),
            (Collection::Kpis, kpis.from_cache),
        ] {
            if cached {
                from_cache.insert(collection);
            }
        }
        let entities = Entities {
            units: units.records,
            users: users.records,
            tasks: tasks.records,
            kpis: kpis.records,
        };

        if let Err(err) = hierarchy::validate_forest(&entities.units) {
            log::error!("Loaded unit hierarchy is inconsistent: {}", err);
        }
        log::info!(
            "Loaded {} units, {} users, {} tasks, {} KPI records from {}",
            entities.units.len(),
            entities.users.len(),
            entities.tasks.len(),
            entities.kpis.len(),
            client.backend_name()
        );

        Self {
            entities: RwLock::new(entities),
            client,
            from_cache,
        }
    }

    /// True when the backend could not be read at startup and `collection`
    /// holds only what the local cache had.
    pub fn loaded_from_cache(&self, collection: Collection) -> bool {
        self.from_cache.contains(&collection)
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Entities> {
        self.entities.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Entities> {
        self.entities.write().await
    }

    pub fn client(&self) -> &PersistenceClient {
        &self.client
    }

    pub async fn save_unit(&self, unit: &Unit) -> Result<(), AppError> {
        self.client.upsert(Collection::Units, &unit.id, unit).await
    }

    pub async fn save_units(&self, units: &[Unit]) -> Result<(), AppError> {
        let records: Vec<(String, &Unit)> = units.iter().map(|unit| (unit.id.clone(), unit)).collect();
        self.client.upsert_many(Collection::Units, &records).await
    }

    pub async fn save_user(&self, user: &User) -> Result<(), AppError> {
        self.client.upsert(Collection::Users, &user.id, user).await
    }

    pub async fn save_users(&self, users: &[User]) -> Result<(), AppError> {
        let records: Vec<(String, &User)> = users.iter().map(|user| (user.id.clone(), user)).collect();
        self.client.upsert_many(Collection::Users, &records).await
    }

    pub async fn save_task(&self, task: &Task) -> Result<(), AppError> {
        self.client.upsert(Collection::Tasks, &task.id, task).await
    }

    pub async fn save_tasks(&self, tasks: &[Task]) -> Result<(), AppError> {
        let records: Vec<(String, &Task)> = tasks.iter().map(|task| (task.id.clone(), task)).collect();
        self.client.upsert_many(Collection::Tasks, &records).await
    }

    pub async fn save_kpis(&self, kpis: &[KpiRecord]) -> Result<(), AppError> {
        let records: Vec<(String, &KpiRecord)> = kpis.iter().map(|kpi| (kpi.id.clone(), kpi)).collect();
        self.client.upsert_many(Collection::Kpis, &records).await
    }

    pub async fn remove(&self, collection: Collection, id: &str) {
        self.client.delete(collection, id).await
    }
}
