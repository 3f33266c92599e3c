//! Standard parameter keys

use super::ParameterKey;

pub const PRODUCT_IDENTIFIER: ParameterKey = ParameterKey::new(
    "pds.config.productidentifier",
    "Identifier of the product to execute on the delegate server",
)
.mark_mandatory()
.mark_send_to_pds();

pub const SECHUB_JOB_UUID: ParameterKey = ParameterKey::new(
    "pds.config.sechub.job.uuid",
    "UUID of the scheduler job this execution belongs to",
)
.mark_generated()
.mark_send_to_pds()
.mark_as_available_inside_script();

pub const SCAN_TARGET_URL: ParameterKey =
    ParameterKey::new("pds.scan.target.url", "Target URL of a web or infrastructure scan")
        .mark_generated()
        .mark_send_to_pds()
        .mark_as_available_inside_script();

pub const SCAN_TARGET_TYPE: ParameterKey = ParameterKey::new(
    "pds.scan.target.type",
    "Network type of the scan target, for example INTERNET or INTRANET",
)
.mark_send_to_pds()
.mark_as_available_inside_script();

pub const SCAN_CONFIGURATION: ParameterKey = ParameterKey::new(
    "pds.scan.configuration",
    "Job configuration reduced to the scan type of the product, as JSON",
)
.mark_generated()
.mark_send_to_pds()
.mark_as_available_inside_script();

pub const SUPPORTED_DATATYPES: ParameterKey = ParameterKey::new(
    "pds.config.supported.datatypes",
    "Comma separated data types the product can handle: source, binary, none",
)
.with_default("source,binary,none");

pub const USE_SECHUB_STORAGE: ParameterKey = ParameterKey::new(
    "pds.config.use.sechub.storage",
    "When true the delegate reads uploads from the shared storage",
)
.mark_send_to_pds()
.with_default("true")
.mark_default_recommended();

pub const PRODUCT_TIMEOUT_MINUTES: ParameterKey = ParameterKey::new(
    "pds.config.product.timeout.minutes",
    "Minutes to wait for the product before it is treated as timed out",
)
.mark_send_to_pds();

pub const CANCEL_MAXIMUM_WAITTIME_SECONDS: ParameterKey = ParameterKey::new(
    "pds.config.cancel.maximum.waittime.seconds",
    "Seconds a canceled process may take to end by itself before it is destroyed",
)
.mark_send_to_pds();

pub const CANCEL_EVENT_CHECKINTERVAL_MILLISECONDS: ParameterKey = ParameterKey::new(
    "pds.config.cancel.event.checkinterval.milliseconds",
    "Interval in which process liveness is checked while waiting",
)
.mark_send_to_pds();

pub const JOBSTORAGE_READ_RESILIENCE_RETRIES_MAX: ParameterKey = ParameterKey::new(
    "pds.config.jobstorage.read.resilience.retries.max",
    "Maximum retries when reading job storage fails",
)
.mark_send_to_pds()
.with_default("3");

pub const JOBSTORAGE_READ_RESILIENCE_RETRY_WAIT_SECONDS: ParameterKey = ParameterKey::new(
    "pds.config.jobstorage.read.resilience.retry.wait.seconds",
    "Seconds to wait between job storage read retries",
)
.mark_send_to_pds()
.with_default("2");

pub const SCRIPT_TRUSTALL_CERTIFICATES_ENABLED: ParameterKey = ParameterKey::new(
    "pds.config.script.trustall.certificates.enabled",
    "When true the launcher script may accept any certificate",
)
.mark_send_to_pds()
.mark_as_available_inside_script()
.with_default("false");

pub const FILEFILTER_INCLUDES: ParameterKey =
    ParameterKey::new("pds.config.filefilter.includes", "Comma separated include patterns")
        .mark_send_to_pds();

pub const FILEFILTER_EXCLUDES: ParameterKey =
    ParameterKey::new("pds.config.filefilter.excludes", "Comma separated exclude patterns")
        .mark_send_to_pds();

pub const DEBUG_ENABLED: ParameterKey =
    ParameterKey::new("pds.debug.enabled", "Enables debug output of the launcher script")
        .mark_send_to_pds()
        .mark_as_available_inside_script()
        .with_default("false");

pub const ADD_SCRIPTLOG_TO_PDSLOG_ENABLED: ParameterKey = ParameterKey::new(
    "pds.add.scriptlog.to.pdslog.enabled",
    "When true the process output is written to the delegate server log",
)
.mark_send_to_pds()
.with_default("false");

pub const MOCKING_DISABLED: ParameterKey = ParameterKey::new(
    "pds.mocking.disabled",
    "Disables product mocks inside launcher scripts",
)
.mark_for_testing_only()
.mark_send_to_pds()
.mark_as_available_inside_script()
.with_default("false");

/// All standard keys
pub static CATALOG: &[ParameterKey] = &[
    PRODUCT_IDENTIFIER,
    SECHUB_JOB_UUID,
    SCAN_TARGET_URL,
    SCAN_TARGET_TYPE,
    SCAN_CONFIGURATION,
    SUPPORTED_DATATYPES,
    USE_SECHUB_STORAGE,
    PRODUCT_TIMEOUT_MINUTES,
    CANCEL_MAXIMUM_WAITTIME_SECONDS,
    CANCEL_EVENT_CHECKINTERVAL_MILLISECONDS,
    JOBSTORAGE_READ_RESILIENCE_RETRIES_MAX,
    JOBSTORAGE_READ_RESILIENCE_RETRY_WAIT_SECONDS,
    SCRIPT_TRUSTALL_CERTIFICATES_ENABLED,
    FILEFILTER_INCLUDES,
    FILEFILTER_EXCLUDES,
    DEBUG_ENABLED,
    ADD_SCRIPTLOG_TO_PDSLOG_ENABLED,
    MOCKING_DISABLED,
];

/// Looks up a standard key by id
pub fn find(id: &str) -> Option<&'static ParameterKey> {
    CATALOG.iter().find(|key| key.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_ids_are_unique() {
        let ids: HashSet<_> = CATALOG.iter().map(|k| k.id).collect();
        assert_eq!(ids.len(), CATALOG.len());
    }

    #[test]
    fn test_generated_keys() {
        let generated: Vec<_> = CATALOG.iter().filter(|k| k.is_generated()).map(|k| k.id).collect();
        assert_eq!(
            generated,
            vec!["pds.config.sechub.job.uuid", "pds.scan.target.url", "pds.scan.configuration"]
        );
    }

    #[test]
    fn test_find() {
        assert_eq!(find("pds.debug.enabled"), Some(&DEBUG_ENABLED));
        assert!(find("unknown.key").is_none());
    }

    #[test]
    fn test_script_visible_env_names() {
        let names: Vec<_> = CATALOG
            .iter()
            .filter(|k| k.available_inside_script)
            .map(|k| k.env_name())
            .collect();
        assert!(names.contains(&"PDS_SCAN_TARGET_URL".to_string()));
        assert!(names.contains(&"PDS_CONFIG_SCRIPT_TRUSTALL_CERTIFICATES_ENABLED".to_string()));
        assert!(names.contains(&"PDS_MOCKING_DISABLED".to_string()));
    }
}
