//! Product setup
//!
//! Products are the executables a delegate server can launch. They are
//! defined in a JSON setup file which is loaded once at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::CoreError;
use crate::parameter::catalog::SUPPORTED_DATATYPES;

/// Fallback used when a product has no usable supported data types
pub const DEFAULT_SUPPORTED_DATATYPES: &str = "source,binary,none";

/// Root of a product setup file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSetupFile {
    pub server_id: String,
    #[serde(default)]
    pub products: Vec<ProductSetup>,
}

impl ProductSetupFile {
    pub fn find(&self, product_id: &str) -> Option<&ProductSetup> {
        self.products.iter().find(|p| p.id == product_id)
    }

    /// Storage location prefix used by this server
    pub fn storage_id(&self) -> String {
        format!("pds/{}", self.server_id)
    }

    /// Repairs known operator mistakes in all products
    ///
    /// Returns one warning per repair.
    pub fn auto_fix(&mut self) -> Vec<String> {
        self.products.iter_mut().flat_map(ProductSetup::auto_fix).collect()
    }
}

/// One launchable product
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSetup {
    pub id: String,
    /// Executable launched for each job
    pub path: String,
    pub scan_type: ScanType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: ProductParameterSetup,
    #[serde(default)]
    pub minutes_to_wait_for_product_result: Option<u64>,
    #[serde(default)]
    pub timeout_granularity_minutes: Option<u64>,
}

impl ProductSetup {
    /// Injects or repairs the supported data types parameter
    pub fn auto_fix(&mut self) -> Vec<String> {
        let key = SUPPORTED_DATATYPES.id;
        let mut warnings = Vec::new();

        let existing = self
            .parameters
            .mandatory
            .iter_mut()
            .chain(self.parameters.optional.iter_mut())
            .find(|p| p.key == key);

        match existing {
            None => {
                self.parameters.mandatory.push(ProductParameterDefinition {
                    key: key.to_string(),
                    description: Some("Added automatically".to_string()),
                    default: Some(DEFAULT_SUPPORTED_DATATYPES.to_string()),
                });
            }
            Some(definition) => {
                let valid = definition
                    .default
                    .as_deref()
                    .is_some_and(|value| parse_supported_data_types(value).is_ok());
                if !valid {
                    let message = format!(
                        "Product {}: invalid {} value {:?}, using {}",
                        self.id, key, definition.default, DEFAULT_SUPPORTED_DATATYPES
                    );
                    warn!("{}", message);
                    warnings.push(message);
                    definition.default = Some(DEFAULT_SUPPORTED_DATATYPES.to_string());
                }
            }
        }

        warnings
    }

    /// Data types the product accepts
    pub fn supported_data_types(&self) -> Vec<SupportedDataType> {
        self.parameters
            .default_for(SUPPORTED_DATATYPES.id)
            .and_then(|value| parse_supported_data_types(value).ok())
            .unwrap_or_else(|| vec![SupportedDataType::Source, SupportedDataType::Binary, SupportedDataType::None])
    }
}

/// Parameter definitions of a product
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductParameterSetup {
    #[serde(default)]
    pub mandatory: Vec<ProductParameterDefinition>,
    #[serde(default)]
    pub optional: Vec<ProductParameterDefinition>,
}

impl ProductParameterSetup {
    /// Default value for `key`; the mandatory list is checked first
    pub fn default_for(&self, key: &str) -> Option<&str> {
        fn lookup<'a>(list: &'a [ProductParameterDefinition], key: &str) -> Option<&'a str> {
            list.iter().find(|p| p.key == key).and_then(|p| p.default.as_deref())
        }
        lookup(&self.mandatory, key).or_else(|| lookup(&self.optional, key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductParameterDefinition {
    pub key: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanType {
    CodeScan,
    WebScan,
    InfraScan,
    LicenseScan,
    SecretScan,
    Analytics,
}

impl ScanType {
    /// Name of the configuration section holding this scan type
    pub fn configuration_section(self) -> &'static str {
        match self {
            ScanType::CodeScan => "codeScan",
            ScanType::WebScan => "webScan",
            ScanType::InfraScan => "infraScan",
            ScanType::LicenseScan => "licenseScan",
            ScanType::SecretScan => "secretScan",
            ScanType::Analytics => "analytics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedDataType {
    Source,
    Binary,
    None,
}

/// Parses a comma separated data type list like `source, binary`
pub fn parse_supported_data_types(value: &str) -> Result<Vec<SupportedDataType>, CoreError> {
    let mut types = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let data_type = match part.to_ascii_lowercase().as_str() {
            "source" => SupportedDataType::Source,
            "binary" => SupportedDataType::Binary,
            "none" => SupportedDataType::None,
            _ => return Err(CoreError::UnsupportedDataType(part.to_string())),
        };
        if !types.contains(&data_type) {
            types.push(data_type);
        }
    }
    if types.is_empty() {
        return Err(CoreError::UnsupportedDataType(value.to_string()));
    }
    Ok(types)
}

/// Loads a product setup file and runs the auto-fix pass
///
/// Returns the setup together with the auto-fix warnings.
pub fn load_product_setup_file(path: &Path) -> Result<(ProductSetupFile, Vec<String>), CoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| CoreError::ProductSetupIo {
        path: path.display().to_string(),
        source,
    })?;
    let mut setup: ProductSetupFile = serde_json::from_str(&content)?;
    let warnings = setup.auto_fix();
    Ok((setup, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETUP: &str = r#"{
        "serverId": "delegate-1",
        "products": [
            {
                "id": "PDS_CODESCAN",
                "path": "/opt/pds/codescan.sh",
                "scanType": "codeScan",
                "minutesToWaitForProductResult": 30,
                "parameters": {
                    "mandatory": [ { "key": "product.level", "default": "high" } ],
                    "optional": [ { "key": "product.level", "default": "low" } ]
                }
            },
            {
                "id": "PDS_WEBSCAN",
                "path": "/opt/pds/webscan.sh",
                "scanType": "webScan",
                "timeoutGranularityMinutes": 60,
                "parameters": {
                    "optional": [ { "key": "pds.config.supported.datatypes", "default": "sources;binaries" } ]
                }
            }
        ]
    }"#;

    #[test]
    fn test_load_product_setup_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.json");
        std::fs::write(&path, SETUP).unwrap();

        let (setup, warnings) = load_product_setup_file(&path).unwrap();

        assert_eq!(setup.storage_id(), "pds/delegate-1");
        assert_eq!(setup.products.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("PDS_WEBSCAN"));

        let codescan = setup.find("PDS_CODESCAN").unwrap();
        assert_eq!(codescan.minutes_to_wait_for_product_result, Some(30));
        assert_eq!(codescan.parameters.default_for("product.level"), Some("high"));
    }

    #[test]
    fn test_auto_fix_injects_missing_datatypes_as_mandatory() {
        let mut setup: ProductSetupFile = serde_json::from_str(SETUP).unwrap();
        setup.auto_fix();

        let codescan = setup.find("PDS_CODESCAN").unwrap();
        let injected = codescan
            .parameters
            .mandatory
            .iter()
            .find(|p| p.key == "pds.config.supported.datatypes")
            .unwrap();
        assert_eq!(injected.default.as_deref(), Some(DEFAULT_SUPPORTED_DATATYPES));
    }

    #[test]
    fn test_auto_fix_resets_unparsable_datatypes() {
        let mut setup: ProductSetupFile = serde_json::from_str(SETUP).unwrap();
        let warnings = setup.auto_fix();

        assert_eq!(warnings.len(), 1);
        let webscan = setup.find("PDS_WEBSCAN").unwrap();
        assert_eq!(
            webscan.parameters.default_for("pds.config.supported.datatypes"),
            Some(DEFAULT_SUPPORTED_DATATYPES)
        );
        assert_eq!(webscan.supported_data_types().len(), 3);
    }

    #[test]
    fn test_auto_fix_keeps_valid_datatypes() {
        let mut product: ProductSetup = serde_json::from_value(serde_json::json!({
            "id": "PDS_BIN",
            "path": "/opt/bin.sh",
            "scanType": "codeScan",
            "parameters": { "optional": [ { "key": "pds.config.supported.datatypes", "default": "binary" } ] }
        }))
        .unwrap();

        assert!(product.auto_fix().is_empty());
        assert_eq!(product.supported_data_types(), vec![SupportedDataType::Binary]);
    }

    #[test]
    fn test_parse_supported_data_types() {
        assert_eq!(
            parse_supported_data_types(" Source , binary,source").unwrap(),
            vec![SupportedDataType::Source, SupportedDataType::Binary]
        );
        assert!(parse_supported_data_types("").is_err());
        assert!(parse_supported_data_types("source,images").is_err());
    }

    #[test]
    fn test_missing_setup_file() {
        let err = load_product_setup_file(Path::new("/does/not/exist.json")).unwrap_err();
        assert!(matches!(err, CoreError::ProductSetupIo { .. }));
    }
}
