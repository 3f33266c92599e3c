//! Parameter catalog
//!
//! Typed configuration keys passed from the scheduler to a delegate server
//! and from there into the launched product process. A key is composed from
//! flags with a builder instead of one type per key:
//!
//! ```
//! use scanflow_core::parameter::ParameterKey;
//!
//! const DEBUG: ParameterKey = ParameterKey::new("pds.debug.enabled", "Enables debug output")
//!     .mark_send_to_pds()
//!     .mark_as_available_inside_script()
//!     .with_default("false");
//!
//! assert_eq!(DEBUG.env_name(), "PDS_DEBUG_ENABLED");
//! ```

pub mod catalog;
pub mod registry;

pub use catalog::CATALOG;
pub use registry::{ParameterRegistry, ResolvedParameters};

/// How a key gets its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Mandatory,
    Optional,
    /// Computed by the system, never supplied by a user
    Generated,
}

/// A configuration key definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterKey {
    pub id: &'static str,
    pub description: &'static str,
    pub kind: KeyKind,
    pub send_to_pds: bool,
    pub available_inside_script: bool,
    pub default: Option<&'static str>,
    pub default_recommended: bool,
    pub testing_only: bool,
}

impl ParameterKey {
    /// Creates an optional key without flags
    pub const fn new(id: &'static str, description: &'static str) -> Self {
        Self {
            id,
            description,
            kind: KeyKind::Optional,
            send_to_pds: false,
            available_inside_script: false,
            default: None,
            default_recommended: false,
            testing_only: false,
        }
    }

    pub const fn mark_mandatory(mut self) -> Self {
        self.kind = KeyKind::Mandatory;
        self
    }

    pub const fn mark_generated(mut self) -> Self {
        self.kind = KeyKind::Generated;
        self
    }

    pub const fn mark_send_to_pds(mut self) -> Self {
        self.send_to_pds = true;
        self
    }

    pub const fn mark_as_available_inside_script(mut self) -> Self {
        self.available_inside_script = true;
        self
    }

    pub const fn with_default(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    pub const fn mark_default_recommended(mut self) -> Self {
        self.default_recommended = true;
        self
    }

    pub const fn mark_for_testing_only(mut self) -> Self {
        self.testing_only = true;
        self
    }

    pub fn is_generated(&self) -> bool {
        self.kind == KeyKind::Generated
    }

    /// Environment variable name of this key
    pub fn env_name(&self) -> String {
        env_name(self.id)
    }
}

/// Maps a dotted key id to its environment variable name
///
/// Launcher scripts depend on these names, so the mapping must never change:
/// ASCII letters are upper-cased, `.` and `-` become `_`, everything else is kept.
pub fn env_name(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '.' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}
