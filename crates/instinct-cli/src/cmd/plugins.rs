use instinct_core::InstinctConfig;
use instinct_plugin::PluginHost;

use crate::engine::runtime;
use crate::output::{print_json, print_table};

/// Start every discoverable plugin, report what each one is, and stop them.
pub fn run(config: &InstinctConfig, json: bool) -> anyhow::Result<()> {
    runtime()?.block_on(async {
        let (host, failures) = PluginHost::start(config).await?;
        let plugins = host.list();
        host.shutdown().await;

        if json {
            let failed: Vec<_> = failures
                .iter()
                .map(|f| serde_json::json!({ "command": f.command.to_string(), "error": f.error.to_string() }))
                .collect();
            return print_json(&serde_json::json!({ "plugins": plugins, "failed": failed }));
        }

        if plugins.is_empty() && failures.is_empty() {
            println!("No plugins found in {}.", config.plugin_dir.display());
            return Ok(());
        }
        if !plugins.is_empty() {
            let rows: Vec<Vec<String>> = plugins
                .iter()
                .map(|p| {
                    vec![
                        p.action_type.clone(),
                        p.name.clone(),
                        match &p.error {
                            None => "valid".to_string(),
                            Some(e) => format!("invalid: {e}"),
                        },
                        p.command.clone(),
                    ]
                })
                .collect();
            print_table(&["TYPE", "NAME", "STATUS", "COMMAND"], &rows);
        }
        for f in &failures {
            println!("failed to start {}: {}", f.command, f.error);
        }
        Ok(())
    })
}
