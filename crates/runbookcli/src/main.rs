use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runbookcore::{ExecutionEvent, Severity};
use runbookruntime::{ComponentRegistry, ExecutionResult, RunbookRuntime, RuntimeConfig};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runbook")]
#[command(about = "Artifact pipeline runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a runbook file
    Run {
        /// Path to runbook YAML file
        #[arg(short, long)]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Write exported artifacts to this JSON file
        #[arg(short, long)]
        export: Option<PathBuf>,
    },

    /// Plan a runbook without executing it
    Validate {
        /// Path to runbook YAML file
        file: PathBuf,
    },

    /// List available components
    Components,

    /// Create a new example runbook
    Init {
        /// Output file path
        #[arg(short, long, default_value = "runbook.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    init_tracing(verbose);

    match cli.command {
        Commands::Run {
            file,
            verbose: _,
            export,
        } => {
            let result = run_runbook(&file, export.as_deref()).await?;
            if !result.errors().is_empty() || result.timed_out || result.cancelled {
                std::process::exit(1);
            }
        }

        Commands::Validate { file } => {
            validate_runbook(&file)?;
        }

        Commands::Components => {
            list_components();
        }

        Commands::Init { output } => {
            create_example_runbook(&output)?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise DEBUG with `--verbose`, INFO by default.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_runtime() -> RunbookRuntime {
    let mut registry = ComponentRegistry::new();
    runbooknodes::register_all(&mut registry);
    RunbookRuntime::with_registry(registry, RuntimeConfig::default())
}

async fn run_runbook(file: &Path, export: Option<&Path>) -> Result<ExecutionResult> {
    println!("🚀 Loading runbook from: {}", file.display());

    let mut runtime = build_runtime();
    let plan = runtime
        .plan(file)
        .with_context(|| format!("cannot plan {}", file.display()))?;

    println!("📋 Runbook: {}", plan.workflow().name);
    println!("   Artifacts: {}", plan.workflow().len());
    println!("   Depth: {}", plan.graph().depth()?);
    println!();

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { run_id, .. } => {
                    println!("▶️  Run {} started", run_id);
                }
                ExecutionEvent::ArtifactStarted {
                    artifact_id,
                    component_type,
                    ..
                } => {
                    println!("  ⚡ Starting artifact: {} ({})", artifact_id, component_type);
                }
                ExecutionEvent::ArtifactSucceeded {
                    artifact_id,
                    items,
                    duration_ms,
                    ..
                } => {
                    println!(
                        "  ✅ Artifact {} produced {} items in {}ms",
                        artifact_id, items, duration_ms
                    );
                }
                ExecutionEvent::ArtifactFailed {
                    artifact_id,
                    error,
                    severity,
                    ..
                } => match severity {
                    Severity::Warning => println!("  ⚠️  Optional artifact {} failed: {}", artifact_id, error),
                    Severity::Error => println!("  ❌ Artifact {} failed: {}", artifact_id, error),
                },
                ExecutionEvent::ArtifactSkipped {
                    artifact_id, reason, ..
                } => {
                    println!("  ⏭️  Skipped {}: {}", artifact_id, reason);
                }
                ExecutionEvent::RunCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Run finished with problems after {}ms", duration_ms);
                    }
                    break;
                }
            }
        }
    });

    // Ctrl-C abandons in-flight work and skips the rest
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = runtime.execute_with_cancel(&plan, cancel).await;
    let _ = event_task.await;

    print_summary(&result);

    if let Some(path) = export {
        let mut exported = serde_json::Map::new();
        for (id, message) in result.exported() {
            exported.insert(id.clone(), serde_json::to_value(message.as_ref())?);
        }
        let json = serde_json::to_string_pretty(&exported)?;
        std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
        println!("📤 Exported {} artifacts to {}", exported.len(), path.display());
    }

    Ok(result)
}

fn print_summary(result: &ExecutionResult) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", result.run_id);
    println!("   Succeeded: {}", result.completed().len());
    println!("   Failed: {}", result.failed().len());
    println!("   Skipped: {}", result.skipped.len());
    if result.timed_out {
        println!("   ⏰ Timed out");
    }
    if result.cancelled {
        println!("   🛑 Cancelled");
    }

    for id in result.errors() {
        if let Some(error) = result.artifacts.get(&id).and_then(|r| r.error()) {
            println!("   ❌ {}: {}", id, error);
        }
    }
    for id in result.warnings() {
        if let Some(error) = result.artifacts.get(&id).and_then(|r| r.error()) {
            println!("   ⚠️  {}: {}", id, error);
        }
    }
    for id in &result.skipped {
        if let Some(reason) = result.skip_reason(id) {
            println!("   ⏭️  {}: {}", id, reason);
        }
    }
}

fn validate_runbook(file: &Path) -> Result<()> {
    println!("🔍 Validating runbook: {}", file.display());

    let runtime = build_runtime();
    let plan = runtime.plan(file)?;

    println!("✅ Runbook is valid:");
    println!("   Name: {}", plan.workflow().name);
    println!("   Artifacts: {}", plan.workflow().len());
    println!();
    for id in plan.execution_order() {
        let Some(schemas) = plan.schemas(id) else {
            continue;
        };
        match &schemas.input {
            Some(input) => println!("   • {}: {} -> {}", id, input, schemas.output),
            None => println!("   • {}: {}", id, schemas.output),
        }
    }
    if !plan.aliases().is_empty() {
        println!();
        println!("   Child runbook aliases:");
        for (alias, target) in plan.aliases() {
            println!("   • {} => {}", alias, target);
        }
    }

    Ok(())
}

fn list_components() {
    println!("📦 Available Components:");
    println!();

    let mut registry = ComponentRegistry::new();
    runbooknodes::register_all(&mut registry);

    for info in registry.list_components() {
        println!(
            "  • {} [{}] ({})",
            info.component_type, info.kind, info.metadata.category
        );
        if !info.metadata.description.is_empty() {
            println!("    {}", info.metadata.description);
        }
        let schemas = |list: &[runbookcore::Schema]| {
            if list.is_empty() {
                "any".to_string()
            } else {
                list.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            }
        };
        println!("    inputs: {}", schemas(&info.input_schemas));
        println!("    outputs: {}", schemas(&info.output_schemas));
    }
}

const EXAMPLE_RUNBOOK: &str = r#"name: Example runbook
description: Merges two static sources and keeps the error lines
config:
  timeout: 30
  max_concurrency: 4

artifacts:
  app_logs:
    name: Application logs
    source:
      type: static
      properties:
        items: ["error: disk full", "request ok", "error: upstream timeout"]

  db_logs:
    name: Database logs
    source:
      type: static
      properties:
        items: ["checkpoint complete", "error: deadlock detected"]

  errors:
    inputs: [app_logs, db_logs]
    transform:
      type: select
      properties:
        contains: error
    output: true

  audit:
    inputs: errors
    transform:
      type: log
      properties:
        label: audit
    optional: true
"#;

fn create_example_runbook(output: &Path) -> Result<()> {
    std::fs::write(output, EXAMPLE_RUNBOOK)?;

    println!("✨ Created example runbook: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  runbook run --file {} --export results.json", output.display());

    Ok(())
}
