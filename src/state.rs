use std::sync::Arc;

use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, Backend, Collection, LocalCache, PersistenceClient};
use crate::errors::AppError;
use crate::models::unit::Unit;
use crate::models::user::{Role, User, SYSTEM_ADMIN_CODE};
use crate::services::admin::generate_unit_code;
use crate::store::EntityStore;
use crate::utils::jwt::JwtKeys;
use crate::utils::password::PasswordHasher;

/// Shared application state, handed to every handler through `web::Data`.
pub struct AppState {
    pub config: Config,
    pub store: EntityStore,
    pub hasher: PasswordHasher,
    pub jwt: JwtKeys,
}

impl AppState {
    pub async fn from_config(config: Config) -> Result<Self, AppError> {
        let backend = db::create_backend(&config).await?;
        Self::with_backend(config, backend).await
    }

    pub async fn with_backend(config: Config, backend: Arc<dyn Backend>) -> Result<Self, AppError> {
        let cache = match &config.cache_path {
            Some(path) => LocalCache::open(path.clone()).await,
            None => LocalCache::in_memory(),
        };
        let store = EntityStore::load(PersistenceClient::new(backend, cache)).await;

        let state = AppState {
            hasher: PasswordHasher::new(&config.hashing)?,
            jwt: JwtKeys::new(&config.jwt_secret),
            store,
            config,
        };
        state.seed_defaults().await?;
        Ok(state)
    }

    /// On an empty user set, creates a root unit (if none exists) and the
    /// system administrator with the default password.
    async fn seed_defaults(&self) -> Result<(), AppError> {
        if self.store.loaded_from_cache(Collection::Users) {
            log::warn!("Users were not read from the backend, skipping default seeding");
            return Ok(());
        }
        let mut entities = self.store.write().await;
        if !entities.users.is_empty() {
            return Ok(());
        }

        let existing_root = entities.units.iter().find(|unit| unit.is_root()).cloned();
        let root = match existing_root {
            Some(root) => root,
            None => {
                let root = Unit {
                    id: generate_unit_code(&entities.units, &mut rand::thread_rng())?,
                    parent_id: None,
                    name: self.config.root_unit_name.clone(),
                    manager_ids: Vec::new(),
                    address: None,
                    phone: None,
                    level: 0,
                };
                entities.units.push(root.clone());
                self.store.save_unit(&root).await?;
                root
            }
        };

        let admin = User {
            id: Uuid::new_v4().to_string(),
            hrm_code: SYSTEM_ADMIN_CODE.to_string(),
            full_name: "System Administrator".to_string(),
            title: Role::Director,
            unit_id: root.id.clone(),
            username: SYSTEM_ADMIN_CODE.to_lowercase(),
            password: self.hasher.hash(&self.config.default_password)?,
            is_first_login: true,
            can_manage_users: true,
            avatar: None,
        };
        entities.users.push(admin.clone());
        self.store.save_user(&admin).await?;
        log::info!("Seeded system administrator '{}' in unit {}", admin.username, root.id);
        Ok(())
    }
}
