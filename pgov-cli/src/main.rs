use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use pgov_audit::{AuditLedger, ChangeRequest};
use pgov_core::{BackupType, ChangeType, OptimizationStrategy, RecoveryType};
use pgov_optimizer::{OptimizationContext, OptimizationOrchestrator};
use pgov_quality::{AssessmentContext, QualityScorer, ScorerConfig};
use pgov_storage::GovernanceStore;
use pgov_vault::{BackupVault, RetentionPolicy, VaultConfig};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgov")]
#[command(about = "Prompt governance CLI", long_about = None)]
struct Cli {
    /// Path to the governance database
    #[arg(long, default_value = "governance.db")]
    db: PathBuf,

    /// Source paths covered by backups and integrity checks
    #[arg(long = "source-path", default_value = "prompts")]
    source_paths: Vec<PathBuf>,

    /// Directory where backup archives are written
    #[arg(long, default_value = "backups")]
    backup_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score an artifact's text and print the assessment
    Assess {
        artifact_id: String,
        /// File holding the artifact text
        file: PathBuf,
        /// Expected topics, comma separated
        #[arg(long)]
        topics: Option<String>,
    },
    /// Record a change to an artifact in the audit ledger
    RecordChange {
        artifact_id: String,
        #[arg(long)]
        actor: String,
        /// create, update, delete, archive, restore, publish, unpublish, approve, reject
        #[arg(long, default_value = "update")]
        change_type: String,
        #[arg(long)]
        old_file: Option<PathBuf>,
        #[arg(long)]
        new_file: Option<PathBuf>,
        #[arg(long, default_value = "")]
        summary: String,
    },
    /// Manage backups
    Backup {
        #[command(subcommand)]
        action: BackupCommands,
    },
    /// Walk source paths and verify every file is intact
    Integrity,
    /// Rewrite an artifact with a strategy and record the outcome
    Optimize {
        artifact_id: String,
        /// File holding the artifact text
        file: PathBuf,
        /// performance, clarity, cost, quality, adaptive
        #[arg(long, default_value = "adaptive")]
        strategy: String,
        #[arg(long)]
        success_rate: Option<f64>,
        #[arg(long)]
        response_time: Option<f64>,
        #[arg(long)]
        cost_per_request: Option<f64>,
    },
    /// Audit reports
    Audit {
        #[command(subcommand)]
        action: AuditCommands,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Create a backup of the configured source paths
    Create {
        /// full, incremental, differential, manual
        #[arg(long, default_value = "full")]
        backup_type: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Restore files from a backup
    Restore {
        backup_id: String,
        /// full, selective, point_in_time, rollback
        #[arg(long, default_value = "full")]
        recovery_type: String,
        /// Target paths for a selective restore, comma separated
        #[arg(long)]
        targets: Option<String>,
    },
    /// Re-verify a backup archive against its stored checksum
    Verify { backup_id: String },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Aggregate change activity over the last N days
    Summary {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = GovernanceStore::open(&cli.db)
        .with_context(|| format!("failed to open database at {}", cli.db.display()))?;
    let vault = BackupVault::new(VaultConfig {
        source_paths: cli.source_paths.clone(),
        backup_dir: cli.backup_dir.clone(),
        retention: RetentionPolicy::default(),
    });

    match cli.command {
        Commands::Assess {
            artifact_id,
            file,
            topics,
        } => {
            let text = read_text(&file)?;
            let context = topics.map(|topics| AssessmentContext {
                expected_topics: split_list(&topics),
            });
            let scorer = QualityScorer::new(ScorerConfig::default());
            let assessment = scorer.assess(&store, &artifact_id, &text, context.as_ref())?;
            println!(
                "{}: {:.3} ({})",
                assessment.assessment_id,
                assessment.overall_score,
                assessment.level.as_str()
            );
            for (name, dimension) in &assessment.dimensions {
                println!("  {name}: {:.3}", dimension.score);
            }
            if !assessment.weaknesses.is_empty() {
                println!("weaknesses:");
                for weakness in &assessment.weaknesses {
                    println!("  - {weakness}");
                }
            }
            println!("remediation priority: {}", assessment.priority.as_str());
        }
        Commands::RecordChange {
            artifact_id,
            actor,
            change_type,
            old_file,
            new_file,
            summary,
        } => {
            let change_type: ChangeType = change_type.parse().map_err(|err: String| anyhow!(err))?;
            let old_value = old_file.as_deref().map(read_text).transpose()?;
            let new_value = new_file.as_deref().map(read_text).transpose()?;
            let ledger = AuditLedger::with_defaults();
            let change_id = ledger.record_change(
                &store,
                ChangeRequest {
                    artifact_id,
                    change_type: Some(change_type),
                    actor_id: actor,
                    old_value,
                    new_value,
                    summary,
                    metadata: Default::default(),
                },
            )?;
            let record = store
                .change_record(&change_id)?
                .ok_or_else(|| anyhow!("change not found after insert: {change_id}"))?;
            println!(
                "{change_id}: severity={} compliance={}",
                record.severity.as_str(),
                record.compliance_status.as_str()
            );
        }
        Commands::Backup { action } => match action {
            BackupCommands::Create {
                backup_type,
                description,
            } => {
                let backup_type: BackupType =
                    backup_type.parse().map_err(|err: String| anyhow!(err))?;
                let backup_id = vault.create_backup(&store, backup_type, description.as_deref())?;
                println!("created backup {backup_id}");
            }
            BackupCommands::Restore {
                backup_id,
                recovery_type,
                targets,
            } => {
                let recovery_type: RecoveryType =
                    recovery_type.parse().map_err(|err: String| anyhow!(err))?;
                let targets = targets.map(|targets| split_list(&targets));
                let recovery_id = vault.restore_from_backup(
                    &store,
                    &backup_id,
                    recovery_type,
                    targets.as_deref(),
                )?;
                let recovery = store
                    .recovery(&recovery_id)?
                    .ok_or_else(|| anyhow!("recovery not found after restore: {recovery_id}"))?;
                println!(
                    "{recovery_id}: {} files restored",
                    recovery.files_restored
                );
            }
            BackupCommands::Verify { backup_id } => {
                let verified = vault.verify_backup(&store, &backup_id)?;
                println!(
                    "{backup_id}: {}",
                    if verified { "verified" } else { "FAILED" }
                );
            }
        },
        Commands::Integrity => {
            let check = vault.check_data_integrity(&store)?;
            println!(
                "{}: score={:.3} total={} corrupted={} missing={}",
                check.check_id,
                check.integrity_score,
                check.total_files,
                check.corrupted_files,
                check.missing_files
            );
        }
        Commands::Optimize {
            artifact_id,
            file,
            strategy,
            success_rate,
            response_time,
            cost_per_request,
        } => {
            let strategy: OptimizationStrategy =
                strategy.parse().map_err(|err: String| anyhow!(err))?;
            let text = read_text(&file)?;
            let context = OptimizationContext {
                success_rate,
                response_time_secs: response_time,
                cost_per_request,
                expected_topics: Vec::new(),
            };
            let orchestrator = OptimizationOrchestrator::new(
                QualityScorer::new(ScorerConfig::default()),
                AuditLedger::with_defaults(),
                "cli",
            )
            .with_vault(vault);
            orchestrator.register_strategies(&store)?;
            let result = orchestrator.optimize(&store, &artifact_id, &text, &context, strategy)?;
            println!(
                "{}: improvement={:.3} confidence={:.3} score {:.3} -> {:.3}",
                result.record.optimization_id,
                result.record.improvement_score,
                result.record.confidence_score,
                result.score_before,
                result.score_after
            );
            if let Some(backup_id) = result.snapshot_backup_id {
                println!("snapshot: {backup_id}");
            }
            println!("---");
            println!("{}", result.record.optimized_text);
        }
        Commands::Audit { action } => match action {
            AuditCommands::Summary { days } => {
                let ledger = AuditLedger::with_defaults();
                let summary = ledger.audit_summary(&store, days, 10)?;
                println!("changes in the last {days} days: {}", summary.total_changes);
                println!("pending review: {}", summary.pending_review);
                println!("non-compliant: {}", summary.non_compliant);
                for (severity, count) in &summary.changes_by_severity {
                    println!("  severity {severity}: {count}");
                }
                for record in &summary.recent_changes {
                    println!(
                        "  {} {} {} by {}",
                        record.ts.to_rfc3339(),
                        record.change_id,
                        record.artifact_id,
                        record.actor_id
                    );
                }
            }
        },
    }

    Ok(())
}

fn read_text(path: &std::path::Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
