//! Launcher environment
//!
//! Builds the complete environment of a product process. Launcher scripts
//! rely on the variable names below, they must never change.

use std::collections::BTreeMap;
use tracing::warn;

use scanflow_core::domain::delegate::DelegateJob;
use scanflow_core::parameter::ResolvedParameters;

use crate::workspace::{JobWorkspace, PreparationResult};

pub const SECHUB_JOB_UUID: &str = "SECHUB_JOB_UUID";
pub const PDS_JOB_UUID: &str = "PDS_JOB_UUID";
pub const PDS_JOB_WORKSPACE_LOCATION: &str = "PDS_JOB_WORKSPACE_LOCATION";
pub const PDS_JOB_EXTRACTED_SOURCES_FOLDER: &str = "PDS_JOB_EXTRACTED_SOURCES_FOLDER";
pub const PDS_JOB_HAS_EXTRACTED_SOURCES: &str = "PDS_JOB_HAS_EXTRACTED_SOURCES";
pub const PDS_JOB_EXTRACTED_BINARIES_FOLDER: &str = "PDS_JOB_EXTRACTED_BINARIES_FOLDER";
pub const PDS_JOB_HAS_EXTRACTED_BINARIES: &str = "PDS_JOB_HAS_EXTRACTED_BINARIES";
pub const PDS_JOB_RESULT_FILE: &str = "PDS_JOB_RESULT_FILE";
pub const PDS_JOB_USER_MESSAGES_FOLDER: &str = "PDS_JOB_USER_MESSAGES_FOLDER";
pub const PDS_JOB_EVENTS_FOLDER: &str = "PDS_JOB_EVENTS_FOLDER";
pub const PDS_JOB_METADATA_FILE: &str = "PDS_JOB_METADATA_FILE";

/// Builds the process environment
///
/// Order of precedence, later wins: script visible parameters, whitelisted
/// server variables, job contract variables. A parameter never takes the
/// name of a whitelisted variable, even when the server does not set it.
pub fn build_environment<I>(
    job: &DelegateJob,
    workspace: &JobWorkspace,
    preparation: PreparationResult,
    parameters: &ResolvedParameters,
    inherited: I,
    whitelist: &[String],
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let whitelisted = |name: &str| whitelist.iter().any(|allowed| allowed == name);

    let mut env: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in parameters.env_variables() {
        if whitelisted(&name) {
            warn!("Parameter variable {} shadows a server variable, skipped", name);
            continue;
        }
        env.insert(name, value);
    }

    env.extend(inherited.into_iter().filter(|(name, _)| whitelisted(name)));

    let path = |p: std::path::PathBuf| p.display().to_string();
    let contract = [
        (SECHUB_JOB_UUID, job.sechub_job_uuid.to_string()),
        (PDS_JOB_UUID, job.uuid.to_string()),
        (PDS_JOB_WORKSPACE_LOCATION, path(workspace.folder().to_path_buf())),
        (PDS_JOB_EXTRACTED_SOURCES_FOLDER, path(workspace.sources_folder())),
        (PDS_JOB_HAS_EXTRACTED_SOURCES, preparation.has_sources.to_string()),
        (PDS_JOB_EXTRACTED_BINARIES_FOLDER, path(workspace.binaries_folder())),
        (PDS_JOB_HAS_EXTRACTED_BINARIES, preparation.has_binaries.to_string()),
        (PDS_JOB_RESULT_FILE, path(workspace.result_file())),
        (PDS_JOB_USER_MESSAGES_FOLDER, path(workspace.messages_folder())),
        (PDS_JOB_EVENTS_FOLDER, path(workspace.events_folder())),
        (PDS_JOB_METADATA_FILE, path(workspace.metadata_file())),
    ];
    env.extend(contract.into_iter().map(|(name, value)| (name.to_string(), value)));

    env
}
