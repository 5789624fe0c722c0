use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use pal_orchestrator::{OrchestrationSpec, Orchestrator, PortSpec};
use pal_services::DependencySpec;
use serde::Deserialize;

use crate::context::CliContext;

#[derive(Debug, Deserialize)]
struct SpecFile {
    id: String,
    name: String,
    project_root: Option<String>,
    #[serde(default)]
    ports: Vec<SpecPort>,
}

#[derive(Debug, Deserialize)]
struct SpecPort {
    id: String,
    title: Option<String>,
    file_path: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// `pal orchestrate <spec.toml>`: run one orchestration to its end state.
pub fn handle(context: &CliContext, spec_path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(spec_path)
        .with_context(|| format!("cannot read {}", spec_path))?;
    let file: SpecFile =
        toml::from_str(&raw).with_context(|| format!("bad orchestration spec {}", spec_path))?;

    let project_root = file
        .project_root
        .or_else(|| {
            context
                .services
                .config()
                .project_root
                .as_ref()
                .map(|p| p.display().to_string())
        })
        .unwrap_or_else(|| ".".to_string());

    let spec = OrchestrationSpec {
        id: file.id,
        name: file.name,
        project_root,
        ports: file
            .ports
            .into_iter()
            .map(|p| PortSpec {
                id: p.id,
                title: p.title,
                file_path: p.file_path,
                deps: p.depends_on.into_iter().map(DependencySpec::on).collect(),
            })
            .collect(),
    };

    println!(
        "orchestration {} ({} ports)",
        spec.id.bold(),
        spec.ports.len()
    );

    let orchestrator = Orchestrator::new(context.services.clone());
    let runtime = tokio::runtime::Runtime::new()?;
    let orchestration = runtime.block_on(orchestrator.run(spec))?;

    println!(
        "{} {} at {:.0}%",
        orchestration.id.bold(),
        orchestration.status.as_str(),
        orchestration.progress
    );
    Ok(())
}
