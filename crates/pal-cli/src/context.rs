use std::path::PathBuf;

use anyhow::{Context, Result};
use pal_services::Services;
use pal_store::Store;
use pal_types::PalConfig;

/// Everything a handler needs: configuration resolved from file + env +
/// flags, and a service layer over the opened store.
pub struct CliContext {
    pub services: Services,
}

impl CliContext {
    pub fn new(db: Option<&str>, project_root: Option<&str>) -> Result<Self> {
        let mut config = PalConfig::load();
        if let Some(root) = project_root {
            config.project_root = Some(PathBuf::from(root));
        }
        if let Some(db) = db {
            config.db_path = Some(PathBuf::from(db));
        }

        let db_path = config.resolve_db_path();
        let store = Store::open(&db_path)
            .with_context(|| format!("cannot open database at {}", db_path.display()))?;

        Ok(Self {
            services: Services::new(store, config),
        })
    }
}
