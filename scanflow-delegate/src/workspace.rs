//! Job workspaces
//!
//! Each delegate job owns a folder tree below the workspace root:
//!
//! ```text
//! {root}/{job uuid}/
//!     upload/                 raw uploads
//!     upload.pending/         uploads waiting for their metadata update
//!     extracted/sources/      staged sources
//!     extracted/binaries/     staged binaries
//!     output/result.txt       product result
//!     output/messages/        user messages
//!     output/system-out.log   process stdout
//!     output/system-error.log process stderr
//!     events/                 events for the launcher script
//!     metadata.txt
//! ```

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use scanflow_core::domain::delegate::{UserMessage, UserMessageKind};
use scanflow_core::product::SupportedDataType;

use crate::error::{DelegateError, Result};

pub const SOURCECODE_ZIP: &str = "sourcecode.zip";
pub const BINARIES_TAR: &str = "binaries.tar";
pub const CANCEL_REQUESTED_EVENT_FILE: &str = "cancel_requested.json";
pub const MAX_UPLOAD_FILE_NAME_LENGTH: usize = 40;

/// Creates and locates job workspaces
#[derive(Debug, Clone)]
pub struct WorkspaceService {
    root: PathBuf,
}

impl WorkspaceService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace of a job, without touching the filesystem
    pub fn workspace(&self, uuid: Uuid) -> JobWorkspace {
        JobWorkspace {
            uuid,
            folder: self.root.join(uuid.to_string()),
        }
    }

    /// Creates all workspace folders of a job
    pub async fn create(&self, uuid: Uuid) -> Result<JobWorkspace> {
        let workspace = self.workspace(uuid);
        for folder in [
            workspace.upload_folder(),
            workspace.sources_folder(),
            workspace.binaries_folder(),
            workspace.messages_folder(),
            workspace.events_folder(),
        ] {
            tokio::fs::create_dir_all(&folder).await?;
        }
        debug!("Created workspace {}", workspace.folder.display());
        Ok(workspace)
    }
}

/// Outcome of staging the uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreparationResult {
    pub has_sources: bool,
    pub has_binaries: bool,
}

/// Upload content that is written but not yet visible to [`JobWorkspace::prepare`]
#[derive(Debug)]
pub struct StagedUpload {
    pending: PathBuf,
    target: PathBuf,
    pub size: u64,
}

/// Folder tree of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    uuid: Uuid,
    folder: PathBuf,
}

impl JobWorkspace {
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn upload_folder(&self) -> PathBuf {
        self.folder.join("upload")
    }

    pub fn sources_folder(&self) -> PathBuf {
        self.folder.join("extracted").join("sources")
    }

    pub fn binaries_folder(&self) -> PathBuf {
        self.folder.join("extracted").join("binaries")
    }

    pub fn output_folder(&self) -> PathBuf {
        self.folder.join("output")
    }

    pub fn result_file(&self) -> PathBuf {
        self.output_folder().join("result.txt")
    }

    pub fn messages_folder(&self) -> PathBuf {
        self.output_folder().join("messages")
    }

    pub fn system_out_file(&self) -> PathBuf {
        self.output_folder().join("system-out.log")
    }

    pub fn system_error_file(&self) -> PathBuf {
        self.output_folder().join("system-error.log")
    }

    pub fn events_folder(&self) -> PathBuf {
        self.folder.join("events")
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.folder.join("metadata.txt")
    }

    pub fn pending_upload_folder(&self) -> PathBuf {
        self.folder.join("upload.pending")
    }

    /// Stores an upload and returns its size
    pub async fn store_upload(&self, file_name: &str, content: &[u8]) -> Result<u64> {
        let staged = self.stage_upload(file_name, content).await?;
        self.commit_upload(staged).await
    }

    /// Writes an upload to a pending file outside the upload folder
    pub async fn stage_upload(&self, file_name: &str, content: &[u8]) -> Result<StagedUpload> {
        validate_upload_file_name(file_name)?;
        let folder = self.pending_upload_folder();
        tokio::fs::create_dir_all(&folder).await?;

        let pending = folder.join(format!("{}-{}", Uuid::new_v4(), file_name));
        tokio::fs::write(&pending, content).await?;
        Ok(StagedUpload {
            pending,
            target: self.upload_folder().join(file_name),
            size: content.len() as u64,
        })
    }

    /// Moves a staged upload into the upload folder, replacing older content
    pub async fn commit_upload(&self, staged: StagedUpload) -> Result<u64> {
        tokio::fs::rename(&staged.pending, &staged.target).await?;
        debug!("Stored upload {} for job {}", staged.target.display(), self.uuid);
        Ok(staged.size)
    }

    pub async fn discard_upload(&self, staged: StagedUpload) -> Result<()> {
        match tokio::fs::remove_file(&staged.pending).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stages uploads into the extracted folders
    ///
    /// The source archive and other uploads go to the sources folder, the
    /// binaries archive to the binaries folder. Data types the product does
    /// not support are skipped.
    pub async fn prepare(&self, supported: &[SupportedDataType]) -> Result<PreparationResult> {
        let accepts_sources = supported.contains(&SupportedDataType::Source);
        let accepts_binaries = supported.contains(&SupportedDataType::Binary);

        let mut entries = tokio::fs::read_dir(self.upload_folder()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let is_binaries = name == BINARIES_TAR;

            let target_folder = match (is_binaries, accepts_sources, accepts_binaries) {
                (true, _, true) => self.binaries_folder(),
                (false, true, _) => self.sources_folder(),
                _ => {
                    debug!("Skipping upload {:?}, data type not supported", name);
                    continue;
                }
            };
            tokio::fs::copy(entry.path(), target_folder.join(&name)).await?;
        }

        Ok(PreparationResult {
            has_sources: has_entries(&self.sources_folder()).await?,
            has_binaries: has_entries(&self.binaries_folder()).await?,
        })
    }

    pub async fn write_metadata(&self, metadata: &str) -> Result<()> {
        tokio::fs::write(self.metadata_file(), metadata).await?;
        Ok(())
    }

    /// Content of the result file, `None` when the product wrote none
    pub async fn read_result(&self) -> Result<Option<String>> {
        read_optional(&self.result_file()).await
    }

    pub async fn read_system_out(&self) -> Result<Option<String>> {
        read_optional(&self.system_out_file()).await
    }

    pub async fn read_system_error(&self) -> Result<Option<String>> {
        read_optional(&self.system_error_file()).await
    }

    /// Reads all user messages, ordered by file name
    pub async fn collect_messages(&self) -> Result<Vec<UserMessage>> {
        let folder = self.messages_folder();
        let mut entries = match tokio::fs::read_dir(&folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut messages = Vec::with_capacity(files.len());
        for file in files {
            let name = file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let text = tokio::fs::read_to_string(&file).await?;
            messages.push(UserMessage {
                kind: UserMessageKind::from_file_name(&name),
                text: text.trim_end().to_string(),
            });
        }
        Ok(messages)
    }

    /// Tells the launcher script that a cancel was requested
    pub async fn send_cancel_event(&self) -> Result<()> {
        let event = serde_json::json!({
            "eventType": "CANCEL_REQUESTED",
            "creationTimeStamp": Utc::now().to_rfc3339(),
            "details": {},
        });
        tokio::fs::create_dir_all(self.events_folder()).await?;
        tokio::fs::write(self.events_folder().join(CANCEL_REQUESTED_EVENT_FILE), event.to_string())
            .await?;
        Ok(())
    }

    /// Removes the whole workspace
    pub async fn cleanup(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.folder).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to clean workspace {}: {}", self.folder.display(), e);
                Err(e.into())
            }
        }
    }
}

/// Checks an upload file name
pub fn validate_upload_file_name(file_name: &str) -> Result<()> {
    if file_name.is_empty() {
        return Err(DelegateError::Validation("Upload file name must not be empty".to_string()));
    }
    if file_name.chars().count() > MAX_UPLOAD_FILE_NAME_LENGTH {
        return Err(DelegateError::Validation(format!(
            "Upload file name exceeds {} characters: {}",
            MAX_UPLOAD_FILE_NAME_LENGTH, file_name
        )));
    }
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
        return Err(DelegateError::Validation(format!(
            "Upload file name must be a plain file name: {}",
            file_name
        )));
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn has_entries(folder: &Path) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(folder).await?;
    Ok(entries.next_entry().await?.is_some())
}
