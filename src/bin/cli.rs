//! Backstop CLI - Main entry point for the `backstop` binary
//!
//! Backups, restores, retention and the audit log for a project directory.

use anyhow::{bail, Context, Result};
use backstop_lib::engine::{
    api::{create_router, ApiState},
    audit::{AuditFilter, AuditLogEntry},
    cli::formatter::{action_label, format_duration_ms, format_size, kind_label, CliFormatter},
    cli::{AuditAction, BackupAction, Cli, Commands, OutputFormat, SchedulerAction},
    config::Config,
    identity::{EnvIdentity, IdentityProvider},
    restore::RestoreReport,
    retention::{BackupManifest, RunOutcome},
    service::Backstop,
    snapshot::BackupKind,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("backstop=info,backstop_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let json = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init { ref name } => cmd_init(name, cli.project.as_deref(), json),
        Commands::Backup { ref action } => {
            let backstop = open(&cli.get_project_dir())?;
            cmd_backup(action, &backstop, json)
        }
        Commands::Audit { ref action } => {
            let backstop = open(&cli.get_project_dir())?;
            cmd_audit(action, &backstop, json)
        }
        Commands::Scheduler {
            action: SchedulerAction::RunOnce,
        } => {
            let backstop = open(&cli.get_project_dir())?;
            cmd_run_once(&backstop, json)
        }
        Commands::Serve {
            port,
            ref host,
            no_scheduler,
        } => {
            let project_dir = cli.get_project_dir();
            let config = Config::load(&project_dir)?;
            let host = host.clone().unwrap_or_else(|| config.api.host.clone());
            let port = port.unwrap_or(config.api.port);
            let backstop = Backstop::from_config(&project_dir, &config)?;

            tokio::runtime::Runtime::new()?.block_on(cmd_serve(
                backstop,
                &config.project.name,
                &host,
                port,
                !no_scheduler,
            ))
        }
    }
}

fn open(project_dir: &Path) -> Result<Backstop> {
    Backstop::open(project_dir)
        .with_context(|| format!("opening project at {}", project_dir.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(name: &str, project: Option<&Path>, json: bool) -> Result<()> {
    let project_dir = match project {
        Some(dir) => dir.to_path_buf(),
        None => dirs::home_dir()
            .context("Could not find home directory")?
            .join("Backstop")
            .join("projects")
            .join(name),
    };

    if project_dir.join(backstop_lib::engine::config::CONFIG_FILE).exists() {
        bail!("Project already initialized: {}", project_dir.display());
    }
    std::fs::create_dir_all(&project_dir)?;

    let config = Config::default_for_project(name);
    config.save(&project_dir)?;
    // Opening creates the database, catalog tables, audit store and backup dir
    Backstop::from_config(&project_dir, &config)?;

    if json {
        print_json(&serde_json::json!({
            "success": true,
            "project_dir": project_dir.display().to_string(),
            "name": name
        }))
    } else {
        CliFormatter::success(&format!("Created Backstop project: {}", name));
        CliFormatter::kv("Directory", &project_dir.display().to_string());
        CliFormatter::kv("Database", &config.database.path.display().to_string());
        CliFormatter::kv("Backups", &config.backups.dir.display().to_string());
        Ok(())
    }
}

fn cmd_backup(action: &BackupAction, backstop: &Backstop, json: bool) -> Result<()> {
    let actor = EnvIdentity.current_actor();

    match action {
        BackupAction::Create { out, store } => {
            if out.is_none() && !store {
                bail!("Nothing to do: pass --out FILE, --store, or both");
            }

            let snapshot = backstop.create_snapshot(BackupKind::Manual)?;
            let mut written = serde_json::Map::new();
            if let Some(path) = out {
                let bytes = snapshot.to_bytes()?;
                std::fs::write(path, &bytes)
                    .with_context(|| format!("writing {}", path.display()))?;
                written.insert("file".into(), path.display().to_string().into());
                if !json {
                    CliFormatter::success(&format!(
                        "Wrote {} ({})",
                        path.display(),
                        format_size(bytes.len() as u64)
                    ));
                }
            }
            if *store {
                let manifest = backstop
                    .backup_store()
                    .save_snapshot(BackupKind::Manual, &snapshot)?;
                if !json {
                    CliFormatter::success(&format!("Stored {}", manifest.filename));
                }
                written.insert("stored".into(), serde_json::to_value(&manifest)?);
            }

            if json {
                print_json(&written)?;
            }
            Ok(())
        }
        BackupAction::List { auto } => {
            let manifests = if *auto {
                backstop.list_auto_backups()?
            } else {
                backstop.list_backups()?
            };
            if json {
                print_json(&manifests)
            } else {
                print_manifests(&manifests);
                Ok(())
            }
        }
        BackupAction::Restore { source } => {
            let path = PathBuf::from(source);
            let restored = if path.is_file() {
                let bytes =
                    std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                backstop.restore_backup(&actor, &bytes)?
            } else {
                backstop.restore_from_store(&actor, source)?
            };

            if json {
                print_json(&serde_json::json!({
                    "report": restored.value,
                    "auditWarning": restored.warning,
                }))
            } else {
                print_report(&restored.value);
                if let Some(warning) = &restored.warning {
                    CliFormatter::warning(&warning.to_string());
                }
                Ok(())
            }
        }
        BackupAction::Verify { name } => {
            backstop.verify_backup(name)?;
            if json {
                print_json(&serde_json::json!({ "name": name, "valid": true }))
            } else {
                CliFormatter::success(&format!("{} matches its checksum", name));
                Ok(())
            }
        }
        BackupAction::Prune => {
            let pruned = backstop.prune_backups()?;
            if json {
                print_json(&serde_json::json!({ "pruned": pruned }))
            } else {
                if pruned.is_empty() {
                    CliFormatter::info("Nothing to prune");
                }
                for name in &pruned {
                    CliFormatter::item(&format!("deleted {}", name));
                }
                Ok(())
            }
        }
    }
}

fn cmd_audit(action: &AuditAction, backstop: &Backstop, json: bool) -> Result<()> {
    let AuditAction::List { limit, entity, id } = action;
    let filter = AuditFilter {
        entity_type: entity.clone(),
        entity_id: id.clone(),
        action: None,
        limit: Some(*limit),
    };
    let entries = backstop.query_audit_log(&filter)?;

    if json {
        print_json(&entries)
    } else {
        print_audit(&entries);
        Ok(())
    }
}

fn cmd_run_once(backstop: &Backstop, json: bool) -> Result<()> {
    let outcome = backstop.scheduler().run_once()?;
    match (&outcome, json) {
        (RunOutcome::Skipped, true) => print_json(&serde_json::json!({ "skipped": true })),
        (RunOutcome::Completed { manifest, pruned }, true) => print_json(&serde_json::json!({
            "skipped": false,
            "backup": manifest,
            "pruned": pruned,
        })),
        (RunOutcome::Skipped, false) => {
            CliFormatter::warning("Another run is in progress, skipped");
            Ok(())
        }
        (RunOutcome::Completed { manifest, pruned }, false) => {
            CliFormatter::success(&format!("Stored {}", manifest.filename));
            for name in pruned {
                CliFormatter::item(&format!("pruned {}", name));
            }
            Ok(())
        }
    }
}

async fn cmd_serve(
    backstop: Backstop,
    project_name: &str,
    host: &str,
    port: u16,
    with_scheduler: bool,
) -> Result<()> {
    let scheduler = with_scheduler.then(|| backstop.scheduler().spawn());

    let state = ApiState {
        backstop: Arc::new(backstop),
    };
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    CliFormatter::header("Backstop API Server");
    CliFormatter::kv("Project", project_name);
    CliFormatter::kv("Listening", &format!("http://{}", addr));
    CliFormatter::kv("Scheduler", if with_scheduler { "on" } else { "off" });
    CliFormatter::info("Press Ctrl+C to stop");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(handle) = scheduler {
        handle.shutdown().await;
    }
    Ok(())
}

fn print_manifests(manifests: &[BackupManifest]) {
    if manifests.is_empty() {
        CliFormatter::info("No backups");
        return;
    }
    let widths = [48, 6, 24, 10];
    CliFormatter::table_header(&["Name", "Kind", "Created", "Size"], &widths);
    for m in manifests {
        let created = m.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let size = format_size(m.size_bytes);
        CliFormatter::table_row(&[&m.filename, m.kind.slug(), &created, &size], &widths);
    }
    let auto = manifests
        .iter()
        .filter(|m| m.kind == BackupKind::Automatic)
        .count();
    println!(
        "\n  {} {} / {} {}",
        auto,
        kind_label(BackupKind::Automatic),
        manifests.len() - auto,
        kind_label(BackupKind::Manual)
    );
}

fn print_report(report: &RestoreReport) {
    CliFormatter::success(&format!(
        "Restored {} rows in {}",
        report.rows_written(),
        format_duration_ms(report.duration_ms)
    ));
    CliFormatter::kv("Snapshot", &report.snapshot_created_at.to_rfc3339());
    for stats in &report.entities {
        CliFormatter::item(&format!(
            "{}: {} inserted, {} replaced",
            stats.entity, stats.inserted, stats.replaced
        ));
    }
    if report.patched_fields > 0 {
        CliFormatter::kv("Deferred references patched", &report.patched_fields.to_string());
    }
}

fn print_audit(entries: &[AuditLogEntry]) {
    if entries.is_empty() {
        CliFormatter::info("No audit entries");
        return;
    }
    CliFormatter::header("Audit log");
    for e in entries {
        println!(
            "  {}  {:<14} {} {} by {} ({})",
            e.created_at.format("%Y-%m-%d %H:%M:%S"),
            action_label(e.action),
            e.entity_type,
            e.entity_id,
            e.user_name,
            e.user_id
        );
    }
}
