//! `redscope workflows`: list the workflow catalog.

use redscope_config::{AppConfig, RuntimeConfig};
use redscope_workflow::WorkflowCatalog;
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    let runtime = RuntimeConfig::load_from(&path)?;
    let catalog = WorkflowCatalog::builtin().with_custom(runtime.workflows)?;

    print_catalog(&catalog);
    Ok(())
}

pub fn print_catalog(catalog: &WorkflowCatalog) {
    println!();
    for (i, definition) in catalog.list().iter().enumerate() {
        println!("  {}. {} [{}]", i + 1, definition.name, definition.key);
        if !definition.description.is_empty() {
            println!("     {}", definition.description);
        }
        println!("     Steps: {}", definition.steps.len());
    }
    println!();
}
