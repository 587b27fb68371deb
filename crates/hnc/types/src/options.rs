//! Runtime options shared by every component
//!
//! [`HncSettings`] is the raw, serde-friendly form loaded from configuration;
//! [`HncOptions`] is the compiled form with regexes built and lists indexed.

use crate::keys;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid regex {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Raw options as they appear in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HncSettings {
    /// Namespaces HNC never manages
    #[serde(default = "default_excluded_namespaces")]
    pub excluded_namespaces: Vec<String>,

    /// Only namespaces matching this regex are managed
    #[serde(default = "default_included_namespace_regex")]
    pub included_namespace_regex: String,

    /// Regexes for label keys that may be set through hierarchy configurations
    #[serde(default)]
    pub managed_namespace_labels: Vec<String>,

    /// Regexes for annotation keys that may be set through hierarchy configurations
    #[serde(default)]
    pub managed_namespace_annotations: Vec<String>,

    /// Annotation keys stripped from propagated copies
    #[serde(default = "default_unpropagated_annotations")]
    pub unpropagated_annotations: Vec<String>,

    /// Identity of HNC's own writes; exempt from validation
    #[serde(default = "default_service_account")]
    pub service_account: String,

    /// Enables hierarchical resource quotas
    #[serde(default)]
    pub enable_hrq: bool,
}

impl Default for HncSettings {
    fn default() -> Self {
        Self {
            excluded_namespaces: default_excluded_namespaces(),
            included_namespace_regex: default_included_namespace_regex(),
            managed_namespace_labels: Vec::new(),
            managed_namespace_annotations: Vec::new(),
            unpropagated_annotations: default_unpropagated_annotations(),
            service_account: default_service_account(),
            enable_hrq: false,
        }
    }
}

fn default_excluded_namespaces() -> Vec<String> {
    ["kube-system", "kube-public", "kube-node-lease", "hnc-system"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_included_namespace_regex() -> String {
    ".*".to_string()
}

fn default_unpropagated_annotations() -> Vec<String> {
    vec!["kubectl.kubernetes.io/last-applied-configuration".to_string()]
}

fn default_service_account() -> String {
    "system:serviceaccount:hnc-system:default".to_string()
}

/// Compiled options
#[derive(Debug, Clone)]
pub struct HncOptions {
    excluded_namespaces: BTreeSet<String>,
    included_namespace: Regex,
    managed_labels: Vec<Regex>,
    managed_annotations: Vec<Regex>,
    unpropagated_annotations: BTreeSet<String>,
    service_account: String,
    enable_hrq: bool,
}

fn anchored(pattern: &str) -> Result<Regex, OptionsError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| OptionsError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

impl HncOptions {
    pub fn from_settings(settings: &HncSettings) -> Result<Self, OptionsError> {
        Ok(Self {
            excluded_namespaces: settings.excluded_namespaces.iter().cloned().collect(),
            included_namespace: anchored(&settings.included_namespace_regex)?,
            managed_labels: settings
                .managed_namespace_labels
                .iter()
                .map(|p| anchored(p))
                .collect::<Result<_, _>>()?,
            managed_annotations: settings
                .managed_namespace_annotations
                .iter()
                .map(|p| anchored(p))
                .collect::<Result<_, _>>()?,
            unpropagated_annotations: settings.unpropagated_annotations.iter().cloned().collect(),
            service_account: settings.service_account.clone(),
            enable_hrq: settings.enable_hrq,
        })
    }

    /// Excluded namespaces are invisible to every reconciler and hook
    pub fn is_excluded_namespace(&self, name: &str) -> bool {
        self.excluded_namespaces.contains(name) || !self.included_namespace.is_match(name)
    }

    pub fn is_managed_namespace(&self, name: &str) -> bool {
        !self.is_excluded_namespace(name)
    }

    /// May this label key be declared through a hierarchy configuration?
    ///
    /// HNC's own keys are never managed, whatever the patterns say.
    pub fn is_managed_label(&self, key: &str) -> bool {
        !keys::is_hnc_key(key) && self.managed_labels.iter().any(|re| re.is_match(key))
    }

    pub fn is_managed_annotation(&self, key: &str) -> bool {
        !keys::is_hnc_key(key) && self.managed_annotations.iter().any(|re| re.is_match(key))
    }

    /// Is this label copied onto propagated objects?
    pub fn propagates_label(&self, key: &str) -> bool {
        key != keys::LABEL_APP_MANAGED_BY && keys::depth_label_ancestor(key).is_none()
    }

    /// Is this annotation copied onto propagated objects?
    pub fn propagates_annotation(&self, key: &str) -> bool {
        !self.unpropagated_annotations.contains(key)
            && key != keys::ANNOTATION_MANAGED_BY
            && key != keys::ANNOTATION_INHERITED_FROM
            && key != keys::ANNOTATION_SOURCE_VERSION
    }

    pub fn is_hnc_service_account(&self, username: &str) -> bool {
        username == self.service_account
    }

    pub fn service_account(&self) -> &str {
        &self.service_account
    }

    pub fn hrq_enabled(&self) -> bool {
        self.enable_hrq
    }
}

impl Default for HncOptions {
    fn default() -> Self {
        Self::from_settings(&HncSettings::default()).expect("default settings compile")
    }
}
