use std::collections::HashMap;
use std::path::{Path, PathBuf};

use instinct_core::loader::{read_reflex_file, reflex_files};
use instinct_core::{ActionRegistry, InstinctConfig, InstinctError};
use serde::Serialize;

use crate::engine::{runtime, start_plugins};
use crate::output::{print_json, print_table};

#[derive(Debug, Serialize)]
struct ReflexReport {
    file: String,
    /// Empty when the file itself could not be parsed.
    name: String,
    valid: bool,
    errors: Vec<String>,
}

/// Validate every reflex file in `dir` (default: the configured reflex
/// directory). Fails if any reflex is invalid.
pub fn run(config: &InstinctConfig, dir: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let dir = dir.unwrap_or_else(|| config.reflex_dir.clone());

    let reports = runtime()?.block_on(async {
        let (plugins, registry) = start_plugins(config).await?;
        let reports = check_dir(&dir, &registry);
        plugins.shutdown().await;
        reports
    })?;

    let invalid = reports.iter().filter(|r| !r.valid).count();
    if json {
        print_json(&serde_json::json!({
            "dir": dir.display().to_string(),
            "valid": invalid == 0,
            "reflexes": reports,
        }))?;
    } else if reports.is_empty() {
        println!("No reflexes found in {}.", dir.display());
    } else {
        let rows: Vec<Vec<String>> = reports
            .iter()
            .map(|r| {
                vec![
                    r.file.clone(),
                    r.name.clone(),
                    if r.valid { "valid" } else { "invalid" }.to_string(),
                ]
            })
            .collect();
        print_table(&["FILE", "REFLEX", "STATUS"], &rows);
        for r in reports.iter().filter(|r| !r.valid) {
            println!();
            let label = if r.name.is_empty() { &r.file } else { &r.name };
            println!("{label}:");
            for e in &r.errors {
                println!("  - {e}");
            }
        }
        println!();
        println!("{} reflex(es) checked, {invalid} invalid", reports.len());
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} invalid reflex(es) in {}", dir.display());
    }
    Ok(())
}

fn check_dir(dir: &Path, registry: &ActionRegistry) -> anyhow::Result<Vec<ReflexReport>> {
    let mut reports = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();

    for path in reflex_files(dir)? {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let configs = match read_reflex_file(&path) {
            Ok(configs) => configs,
            Err(e) => {
                reports.push(ReflexReport {
                    file,
                    name: String::new(),
                    valid: false,
                    errors: vec![e.to_string()],
                });
                continue;
            }
        };

        for config in configs {
            let mut errors = match config.validate(registry) {
                Ok(()) => Vec::new(),
                Err(InstinctError::Multiple(errors)) => {
                    errors.iter().map(ToString::to_string).collect()
                }
                Err(e) => vec![e.to_string()],
            };
            if !config.name.is_empty() {
                if let Some(first) = seen.insert(config.name.clone(), file.clone()) {
                    errors.push(format!("name '{}' is already used in {first}", config.name));
                }
            }
            reports.push(ReflexReport {
                file: file.clone(),
                name: config.name,
                valid: errors.is_empty(),
                errors,
            });
        }
    }
    Ok(reports)
}
