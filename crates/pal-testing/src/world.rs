use std::path::{Path, PathBuf};

use anyhow::Result;
use assert_cmd::Command;
use chrono::{Duration, Utc};
use pal_services::{Services, StartSessionOptions};
use pal_store::{queries, Store};
use pal_types::{PalConfig, Session, SessionType};
use tempfile::TempDir;

/// An isolated pal installation for one test.
///
/// # Example
/// ```no_run
/// use pal_testing::TestWorld;
///
/// let world = TestWorld::new();
/// world.services().ports().create("P1", None, None, &[]).unwrap();
/// world.run(&["port", "list"]).unwrap().success();
/// ```
pub struct TestWorld {
    _temp_dir: TempDir,
    db_path: PathBuf,
    project_root: PathBuf,
    services: Services,
}

impl TestWorld {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let project_root = temp_dir.path().join("project");
        std::fs::create_dir_all(&project_root).expect("project dir");
        let db_path = project_root.join(".pal").join("pal.db");

        let mut config = PalConfig::default();
        config.project_root = Some(project_root.clone());
        config.db_path = Some(db_path.clone());

        let store = Store::open(&db_path).expect("open store");
        let services = Services::new(store, config);

        Self {
            _temp_dir: temp_dir,
            db_path,
            project_root,
            services,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Run the pal binary against this world's database.
    pub fn run(&self, args: &[&str]) -> Result<assert_cmd::assert::Assert> {
        let mut command = Command::cargo_bin("pal")?;
        command
            .arg("--db")
            .arg(&self.db_path)
            .arg("--project-root")
            .arg(&self.project_root)
            .args(args)
            // keep the host environment out of config resolution
            .env_remove("DB_PATH")
            .env_remove("PROJECT_ROOT")
            .env_remove("TOKEN_BUDGET");
        Ok(command.assert())
    }

    /// Start a running session owned by this world's project.
    pub fn start_session(&self, id: &str, session_type: SessionType) -> Session {
        let mut opts = StartSessionOptions::new(
            session_type,
            self.project_root.display().to_string(),
            self.project_root.display().to_string(),
        );
        opts.id = Some(id.to_string());
        self.services.sessions().start(opts).expect("start session")
    }

    /// Plant a running session that started `age_hours` ago, bypassing the
    /// service layer so zombie sweeps have something to find.
    pub fn plant_stale_session(&self, id: &str, age_hours: i64) {
        let started_at = Utc::now() - Duration::hours(age_hours);
        let session = Session {
            id: id.to_string(),
            session_type: SessionType::Single,
            status: pal_types::SessionStatus::Running,
            title: None,
            port_id: None,
            parent_session_id: None,
            root_session_id: id.to_string(),
            depth: 0,
            path: vec![],
            runtime_id: None,
            project_root: self.project_root.display().to_string(),
            cwd: self.project_root.display().to_string(),
            tty: None,
            parent_pid: None,
            fingerprint: pal_types::fingerprint(
                &self.project_root.display().to_string(),
                None,
                None,
                started_at,
            ),
            started_at,
            ended_at: None,
            usage: Default::default(),
            cost: 0.0,
            compact_count: 0,
            last_compact_at: None,
        };
        self.services
            .store()
            .write(|tx| queries::session::insert(tx, &session))
            .expect("insert stale session");
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
