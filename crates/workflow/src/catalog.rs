//! Built-in and configured workflow definitions.

use redscope_config::WorkflowConfig;
use redscope_core::error::WorkflowError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Replaced with the user-supplied target in every step template.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Substitute every occurrence of `{target}` in `template`.
pub fn substitute_target(template: &str, target: &str) -> String {
    template.replace(TARGET_PLACEHOLDER, target)
}

/// A named, ordered sequence of step templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable lookup key (e.g., "reconnaissance")
    pub key: String,

    /// Human-readable name
    pub name: String,

    pub description: String,

    /// Step templates, each normally containing `{target}`
    pub steps: Vec<String>,
}

impl WorkflowDefinition {
    fn builtin(key: &str, name: &str, description: &str, steps: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Step descriptions with the target filled in.
    pub fn resolved_steps(&self, target: &str) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| substitute_target(s, target))
            .collect()
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        let invalid = |reason: &str| WorkflowError::InvalidDefinition {
            key: self.key.clone(),
            reason: reason.to_string(),
        };
        if self.key.trim().is_empty() {
            return Err(invalid("key must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(invalid("at least one step is required"));
        }
        if self.steps.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid("steps must not be blank"));
        }
        Ok(())
    }
}

impl From<WorkflowConfig> for WorkflowDefinition {
    fn from(config: WorkflowConfig) -> Self {
        Self {
            name: if config.name.is_empty() {
                config.key.clone()
            } else {
                config.name
            },
            key: config.key,
            description: config.description,
            steps: config.steps,
        }
    }
}

/// The workflows offered to the user, in menu order.
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    definitions: Vec<WorkflowDefinition>,
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl WorkflowCatalog {
    pub fn builtin() -> Self {
        let definitions = vec![
            WorkflowDefinition::builtin(
                "reconnaissance",
                "Reconnaissance and Discovery",
                "Information gathering and attack-surface profiling",
                &[
                    "Gather public information and ownership details for {target}",
                    "Enumerate subdomains and DNS records of {target}",
                    "Identify open ports and listening services on {target}",
                    "Fingerprint the technology stack exposed by {target}",
                    "Search historical and archived content related to {target}",
                ],
            ),
            WorkflowDefinition::builtin(
                "web_application",
                "Web Application Security Assessment",
                "Testing of a web application's common weakness classes",
                &[
                    "Discover directories and hidden content on {target}",
                    "Test the inputs of {target} for SQL injection",
                    "Scan {target} for web vulnerabilities and misconfigurations",
                    "Review the TLS configuration of {target}",
                    "Test authentication and session handling on {target}",
                    "Check {target} for file inclusion and unsafe uploads",
                ],
            ),
            WorkflowDefinition::builtin(
                "network_infrastructure",
                "Network Infrastructure Assessment",
                "Host discovery, service enumeration and exposure review of a network",
                &[
                    "Discover live hosts and services in {target}",
                    "Enumerate service versions across {target}",
                    "Match discovered services in {target} against known vulnerabilities",
                    "Look for service misconfigurations in {target}",
                    "Verify exploitability of confirmed weaknesses in {target}",
                    "Assess segmentation and access controls around {target}",
                ],
            ),
            WorkflowDefinition::builtin(
                "full_penetration_test",
                "Full Penetration Test",
                "End-to-end assessment from discovery to remediation advice",
                &[
                    "Phase 1: quick port scan of {target}",
                    "Phase 2: version detection on the open ports of {target}",
                    "Phase 3: web service discovery and content enumeration on {target}",
                    "Phase 4: focused vulnerability scanning of the services on {target}",
                    "Phase 5: controlled exploitation of confirmed findings on {target}",
                    "Phase 6: post-exploitation enumeration on {target} if access was gained",
                    "Phase 7: consolidate findings and remediation advice for {target}",
                ],
            ),
        ];
        Self { definitions }
    }

    /// Add configured workflows after the built-ins. A configured workflow
    /// with a built-in's key replaces it in place.
    pub fn with_custom(
        mut self,
        custom: impl IntoIterator<Item = WorkflowConfig>,
    ) -> Result<Self, WorkflowError> {
        for config in custom {
            let definition = WorkflowDefinition::from(config);
            definition.validate()?;

            match self.definitions.iter_mut().find(|d| d.key == definition.key) {
                Some(existing) => {
                    info!(workflow = %definition.key, "Configured workflow replaces built-in");
                    *existing = definition;
                }
                None => self.definitions.push(definition),
            }
        }
        Ok(self)
    }

    pub fn list(&self) -> &[WorkflowDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&WorkflowDefinition> {
        self.definitions.iter().find(|d| d.key == key)
    }

    /// Lookup by 1-based menu position.
    pub fn by_index(&self, index: usize) -> Option<&WorkflowDefinition> {
        index.checked_sub(1).and_then(|i| self.definitions.get(i))
    }

    /// Lookup by key, or by menu number when `selector` is numeric.
    pub fn resolve(&self, selector: &str) -> Result<&WorkflowDefinition, WorkflowError> {
        let selector = selector.trim();
        let found = match selector.parse::<usize>() {
            Ok(index) => self.by_index(index),
            Err(_) => self.get(selector),
        };
        found.ok_or_else(|| WorkflowError::UnknownWorkflow(selector.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_shape() {
        let catalog = WorkflowCatalog::builtin();
        let shape: Vec<_> = catalog
            .list()
            .iter()
            .map(|d| (d.key.as_str(), d.steps.len()))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("reconnaissance", 5),
                ("web_application", 6),
                ("network_infrastructure", 6),
                ("full_penetration_test", 7),
            ]
        );
    }

    #[test]
    fn every_builtin_step_mentions_target() {
        for definition in WorkflowCatalog::builtin().list() {
            definition.validate().unwrap();
            for step in &definition.steps {
                assert!(step.contains(TARGET_PLACEHOLDER), "{}: {step}", definition.key);
            }
        }
    }

    #[test]
    fn substitution_replaces_every_occurrence() {
        assert_eq!(
            substitute_target("scan {target} then report on {target}", "10.0.0.0/24"),
            "scan 10.0.0.0/24 then report on 10.0.0.0/24"
        );
        assert_eq!(substitute_target("no placeholder", "x"), "no placeholder");
    }

    #[test]
    fn resolved_steps_contain_target() {
        let catalog = WorkflowCatalog::builtin();
        let steps = catalog.get("reconnaissance").unwrap().resolved_steps("example.com");
        assert_eq!(steps.len(), 5);
        assert!(steps.iter().all(|s| s.contains("example.com") && !s.contains("{target}")));
    }

    #[test]
    fn lookup_by_key_index_and_selector() {
        let catalog = WorkflowCatalog::builtin();
        assert_eq!(catalog.by_index(1).unwrap().key, "reconnaissance");
        assert_eq!(catalog.by_index(4).unwrap().key, "full_penetration_test");
        assert!(catalog.by_index(0).is_none());
        assert!(catalog.by_index(5).is_none());

        assert_eq!(catalog.resolve("2").unwrap().key, "web_application");
        assert_eq!(catalog.resolve(" network_infrastructure ").unwrap().key, "network_infrastructure");
        assert_eq!(
            catalog.resolve("wifi").unwrap_err(),
            WorkflowError::UnknownWorkflow("wifi".into())
        );
    }

    #[test]
    fn custom_workflows_append_or_replace() {
        let catalog = WorkflowCatalog::builtin()
            .with_custom(vec![
                WorkflowConfig {
                    key: "cloud".into(),
                    name: "Cloud Review".into(),
                    description: String::new(),
                    steps: vec!["List storage buckets of {target}".into()],
                },
                WorkflowConfig {
                    key: "reconnaissance".into(),
                    name: String::new(),
                    description: "short".into(),
                    steps: vec!["Whois {target}".into()],
                },
            ])
            .unwrap();

        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.by_index(1).unwrap().steps, vec!["Whois {target}"]);
        assert_eq!(catalog.by_index(1).unwrap().name, "reconnaissance");
        assert_eq!(catalog.by_index(5).unwrap().key, "cloud");
    }

    #[test]
    fn custom_workflow_without_steps_is_rejected() {
        let err = WorkflowCatalog::builtin()
            .with_custom(vec![WorkflowConfig {
                key: "empty".into(),
                name: "Empty".into(),
                description: String::new(),
                steps: vec![],
            }])
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidDefinition { ref key, .. } if key == "empty"));
    }
}
