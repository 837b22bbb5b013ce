//! Checksummed backup and restore for the artifact store's files. Each
//! backup is one gzip-compressed tar archive holding every selected file
//! under its base name plus a `<stem>_metadata.json` sidecar per file. The
//! archive's own SHA-256 is stored and re-verified immediately after
//! creation; restores re-verify every file against its sidecar checksum
//! before anything is written back.

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pgov_core::ids::{generate_id, BACKUP_PREFIX, INTEGRITY_CHECK_PREFIX, RECOVERY_PREFIX};
use pgov_core::{sha256_hex, BackupStatus, BackupType, RecoveryStatus, RecoveryType};
use pgov_storage::{
    BackupRecord, GovernanceStore, IntegrityCheckRecord, RecoveryRecord, StorageError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{error, warn};
use walkdir::WalkDir;

const METADATA_SUFFIX: &str = "_metadata.json";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// How long backups of each class are kept. Incremental backups age out on
/// the daily policy, differential on the weekly one, full on the monthly
/// one; manual backups are never swept.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub daily_days: i64,
    pub weekly_weeks: i64,
    pub monthly_months: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily_days: 7,
            weekly_weeks: 4,
            monthly_months: 12,
        }
    }
}

impl RetentionPolicy {
    fn cutoff_for(&self, backup_type: BackupType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match backup_type {
            BackupType::Incremental => Some(now - Duration::days(self.daily_days)),
            BackupType::Differential => Some(now - Duration::weeks(self.weekly_weeks)),
            BackupType::Full => Some(now - Duration::days(self.monthly_months * 30)),
            BackupType::Manual => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub source_paths: Vec<PathBuf>,
    pub backup_dir: PathBuf,
    pub retention: RetentionPolicy,
}

/// Per-file sidecar written into the archive next to each file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileMetadata {
    original_path: String,
    size: u64,
    modified: DateTime<Utc>,
    checksum: String,
}

pub struct BackupVault {
    config: VaultConfig,
    // Backup creation and restore must never overlap.
    operation_lock: Mutex<()>,
}

impl BackupVault {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            operation_lock: Mutex::new(()),
        }
    }

    /// Create a backup archive, verify it, and sweep expired backups.
    pub fn create_backup(
        &self,
        store: &GovernanceStore,
        backup_type: BackupType,
        description: Option<&str>,
    ) -> Result<String, VaultError> {
        let _guard = self
            .operation_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let files = self.collect_source_files(store, backup_type)?;
        if files.is_empty() {
            warn!(
                backup_type = backup_type.as_str(),
                "backup rejected: no source files selected"
            );
            return Err(VaultError::Validation(
                "no source files selected for backup".to_string(),
            ));
        }
        reject_archive_name_collisions(&files)?;

        fs::create_dir_all(&self.config.backup_dir)?;
        let backup_id = generate_id(BACKUP_PREFIX);
        let archive_path = self.config.backup_dir.join(format!("{backup_id}.tar.gz"));

        self.write_archive(&archive_path, &files)?;

        let archive_bytes = fs::read(&archive_path)?;
        let checksum = sha256_hex(&archive_bytes);

        let record = BackupRecord {
            backup_id: backup_id.clone(),
            backup_type,
            ts: Utc::now(),
            size_bytes: archive_bytes.len() as i64,
            checksum: checksum.clone(),
            source_paths: files
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
            archive_path: archive_path.display().to_string(),
            // Re-open and re-hash before trusting the archive; the record is
            // written once, with its final status, so no in-progress row can
            // be stranded by a failure in between.
            status: if sha256_hex(&fs::read(&archive_path)?) == checksum {
                BackupStatus::Verified
            } else {
                BackupStatus::Failed
            },
            description: description.map(str::to_string),
        };
        store.insert_backup(&record)?;

        if record.status == BackupStatus::Failed {
            error!(backup_id, "archive checksum mismatch immediately after write");
            return Err(VaultError::Integrity(format!(
                "backup {backup_id}: archive checksum mismatch after write"
            )));
        }

        self.sweep_expired_backups(store)?;

        Ok(backup_id)
    }

    /// Re-hash a backup's archive against its stored checksum. On mismatch
    /// the backup is marked failed.
    pub fn verify_backup(
        &self,
        store: &GovernanceStore,
        backup_id: &str,
    ) -> Result<bool, VaultError> {
        let record = store
            .backup(backup_id)?
            .ok_or_else(|| VaultError::Validation(format!("unknown backup: {backup_id}")))?;
        let archive_bytes = match fs::read(&record.archive_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(backup_id, %err, "backup archive unreadable");
                store.set_backup_status(backup_id, BackupStatus::Failed)?;
                return Ok(false);
            }
        };
        let matches = sha256_hex(&archive_bytes) == record.checksum;
        if matches {
            store.set_backup_status(backup_id, BackupStatus::Verified)?;
        } else {
            warn!(backup_id, "archive checksum mismatch");
            store.set_backup_status(backup_id, BackupStatus::Failed)?;
        }
        Ok(matches)
    }

    /// Restore files from a backup. Every file's checksum is verified
    /// against its sidecar before anything is written; a mismatch aborts
    /// the whole restore.
    pub fn restore_from_backup(
        &self,
        store: &GovernanceStore,
        backup_id: &str,
        recovery_type: RecoveryType,
        target_paths: Option<&[String]>,
    ) -> Result<String, VaultError> {
        let _guard = self
            .operation_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let backup = store
            .backup(backup_id)?
            .ok_or_else(|| VaultError::Validation(format!("unknown backup: {backup_id}")))?;
        if matches!(recovery_type, RecoveryType::Selective)
            && target_paths.map_or(true, <[String]>::is_empty)
        {
            return Err(VaultError::Validation(
                "selective restore requires target paths".to_string(),
            ));
        }

        let recovery_id = generate_id(RECOVERY_PREFIX);
        let detail = match recovery_type {
            RecoveryType::PointInTime | RecoveryType::Rollback => {
                Some("executed as a full restore".to_string())
            }
            _ => None,
        };
        store.insert_recovery(&RecoveryRecord {
            recovery_id: recovery_id.clone(),
            backup_id: backup_id.to_string(),
            recovery_type,
            ts: Utc::now(),
            status: RecoveryStatus::InProgress,
            target_paths: target_paths.map(<[String]>::to_vec),
            files_restored: 0,
            detail: detail.clone(),
        })?;

        match self.run_restore(&backup, recovery_type, target_paths) {
            Ok(restored) => {
                store.finish_recovery(
                    &recovery_id,
                    RecoveryStatus::Completed,
                    restored as i64,
                    detail.as_deref(),
                )?;
                Ok(recovery_id)
            }
            Err(err) => {
                error!(recovery_id, backup_id, %err, "restore failed");
                store.finish_recovery(
                    &recovery_id,
                    RecoveryStatus::Failed,
                    0,
                    Some(&err.to_string()),
                )?;
                Err(err)
            }
        }
    }

    /// Walk every configured source path and verify each file is intact:
    /// SQLite databases get an internal consistency check, everything else
    /// a read pass. The result is persisted.
    pub fn check_data_integrity(
        &self,
        store: &GovernanceStore,
    ) -> Result<IntegrityCheckRecord, VaultError> {
        let mut total_files = 0i64;
        let mut corrupted_files = 0i64;
        let mut missing_files = 0i64;

        for source in &self.config.source_paths {
            if !source.exists() {
                missing_files += 1;
                continue;
            }
            for entry in WalkDir::new(source).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                total_files += 1;
                if !file_is_intact(entry.path()) {
                    warn!(path = %entry.path().display(), "corrupted file detected");
                    corrupted_files += 1;
                }
            }
        }

        let checksum_matches = total_files - corrupted_files;
        let record = IntegrityCheckRecord {
            check_id: generate_id(INTEGRITY_CHECK_PREFIX),
            ts: Utc::now(),
            total_files,
            corrupted_files,
            missing_files,
            checksum_matches,
            integrity_score: if total_files > 0 {
                checksum_matches as f64 / total_files as f64
            } else {
                1.0
            },
        };
        store.insert_integrity_check(&record)?;
        Ok(record)
    }

    fn collect_source_files(
        &self,
        store: &GovernanceStore,
        backup_type: BackupType,
    ) -> Result<Vec<PathBuf>, VaultError> {
        let modified_cutoff = match backup_type {
            BackupType::Full | BackupType::Manual => None,
            BackupType::Incremental => store
                .latest_verified_backup(None)?
                .map(|backup| backup.ts),
            BackupType::Differential => store
                .latest_verified_backup(Some(BackupType::Full))?
                .map(|backup| backup.ts),
        };

        let mut files = Vec::new();
        for source in &self.config.source_paths {
            if !source.exists() {
                warn!(path = %source.display(), "source path missing, skipped");
                continue;
            }
            for entry in WalkDir::new(source).sort_by_file_name().into_iter() {
                let entry = entry.map_err(|err| {
                    VaultError::Validation(format!("cannot walk source path: {err}"))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(cutoff) = modified_cutoff {
                    let metadata = entry
                        .metadata()
                        .map_err(|err| VaultError::Validation(format!("cannot stat file: {err}")))?;
                    let modified: DateTime<Utc> = metadata.modified()?.into();
                    if modified <= cutoff {
                        continue;
                    }
                }
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn write_archive(&self, archive_path: &Path, files: &[PathBuf]) -> Result<(), VaultError> {
        let archive_file = fs::File::create(archive_path)?;
        let encoder = GzEncoder::new(archive_file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for path in files {
            let bytes = fs::read(path)?;
            let metadata = fs::metadata(path)?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            let base_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    VaultError::Validation(format!("unrepresentable file name: {}", path.display()))
                })?
                .to_string();
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(&base_name);

            let sidecar = FileMetadata {
                original_path: path.display().to_string(),
                size: bytes.len() as u64,
                modified,
                checksum: sha256_hex(&bytes),
            };
            let sidecar_bytes = serde_json::to_vec_pretty(&sidecar)
                .map_err(|err| VaultError::Serialization(err.to_string()))?;

            append_entry(&mut builder, &base_name, &bytes, modified)?;
            append_entry(
                &mut builder,
                &format!("{stem}{METADATA_SUFFIX}"),
                &sidecar_bytes,
                modified,
            )?;
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    }

    fn run_restore(
        &self,
        backup: &BackupRecord,
        recovery_type: RecoveryType,
        target_paths: Option<&[String]>,
    ) -> Result<usize, VaultError> {
        let archive_bytes = fs::read(&backup.archive_path)?;
        if sha256_hex(&archive_bytes) != backup.checksum {
            return Err(VaultError::Integrity(format!(
                "backup {}: archive checksum mismatch",
                backup.backup_id
            )));
        }

        let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let decoder = GzDecoder::new(&archive_bytes[..]);
        let mut archive = tar::Archive::new(decoder);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.display().to_string();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            entries.insert(name, bytes);
        }

        let mut planned: Vec<(FileMetadata, Vec<u8>)> = Vec::new();
        for (name, bytes) in &entries {
            if !name.ends_with(METADATA_SUFFIX) {
                continue;
            }
            let sidecar: FileMetadata = serde_json::from_slice(bytes)
                .map_err(|err| VaultError::Serialization(err.to_string()))?;
            let original = PathBuf::from(&sidecar.original_path);
            let base_name = original
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    VaultError::Integrity(format!(
                        "sidecar with unusable original path: {}",
                        sidecar.original_path
                    ))
                })?;

            if matches!(recovery_type, RecoveryType::Selective) {
                let selected = target_paths.is_some_and(|targets| {
                    targets.iter().any(|target| {
                        target == &sidecar.original_path || target == base_name
                    })
                });
                if !selected {
                    continue;
                }
            }

            let data = entries.get(base_name).ok_or_else(|| {
                VaultError::Integrity(format!("archive entry missing for {base_name}"))
            })?;
            // Verify everything before writing anything.
            if sha256_hex(data) != sidecar.checksum {
                return Err(VaultError::Integrity(format!(
                    "checksum mismatch for {base_name} in backup {}",
                    backup.backup_id
                )));
            }
            planned.push((sidecar, data.clone()));
        }

        if matches!(recovery_type, RecoveryType::Selective) && planned.is_empty() {
            return Err(VaultError::Validation(
                "no archive entries matched the requested targets".to_string(),
            ));
        }

        for (sidecar, bytes) in &planned {
            let destination = PathBuf::from(&sidecar.original_path);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&destination, bytes)?;
        }

        Ok(planned.len())
    }

    fn sweep_expired_backups(&self, store: &GovernanceStore) -> Result<(), VaultError> {
        let now = Utc::now();
        for backup in store.backups()? {
            let Some(cutoff) = self.config.retention.cutoff_for(backup.backup_type, now) else {
                continue;
            };
            if backup.ts >= cutoff {
                continue;
            }
            let archive = Path::new(&backup.archive_path);
            if archive.exists() {
                if let Err(err) = fs::remove_file(archive) {
                    warn!(backup_id = %backup.backup_id, %err, "could not remove expired archive");
                    continue;
                }
            }
            store.delete_backup(&backup.backup_id)?;
        }
        Ok(())
    }
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    bytes: &[u8],
    modified: DateTime<Utc>,
) -> Result<(), VaultError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(modified.timestamp().max(0) as u64);
    header.set_cksum();
    builder.append_data(&mut header, name, bytes)?;
    Ok(())
}

/// The archive stores each file under its base name plus a
/// `<stem>_metadata.json` sidecar, so no two files in the backup set may
/// map to the same entry name. A collision would silently overwrite one of
/// them inside the archive.
fn reject_archive_name_collisions(files: &[PathBuf]) -> Result<(), VaultError> {
    let mut claimed: BTreeMap<String, &Path> = BTreeMap::new();
    for path in files {
        let base_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                VaultError::Validation(format!("unrepresentable file name: {}", path.display()))
            })?;
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(base_name);
        for entry in [base_name.to_string(), format!("{stem}{METADATA_SUFFIX}")] {
            if let Some(existing) = claimed.insert(entry.clone(), path) {
                warn!(entry = %entry, "backup rejected: archive entry name collision");
                return Err(VaultError::Validation(format!(
                    "archive entry name collision on {entry}: {} and {}",
                    existing.display(),
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

fn file_is_intact(path: &Path) -> bool {
    let is_sqlite = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "db" | "sqlite" | "sqlite3"));
    if is_sqlite {
        sqlite_quick_check(path)
    } else {
        fs::read(path).is_ok()
    }
}

fn sqlite_quick_check(path: &Path) -> bool {
    let Ok(conn) = rusqlite::Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    ) else {
        return false;
    };
    conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
        .map(|verdict| verdict == "ok")
        .unwrap_or(false)
}
