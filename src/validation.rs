use crate::block::BlockKind;
use crate::registry::BRANCH;
use crate::tree::Tree;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use ulid::Ulid;

/// Validation severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValidationSeverity {
    Info,    // nothing wrong, worth a look
    Warning, // the engine may misbehave
    Error,   // the tree breaks a structural rule
}

/// Validation issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
    pub affected_blocks: Vec<Ulid>,
    pub issue_type: ValidationIssueType,
}

/// Types of validation issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationIssueType {
    /// `run(upto)` addresses blocks by name
    DuplicateName,
    EmptyBranch,
    DisallowedChild,
    OverCapacity,
    MissingFile,
}

/// Complete validation result
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    pub fn add_issue(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == ValidationSeverity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == ValidationSeverity::Warning)
    }

    fn with_severity(&self, severity: ValidationSeverity) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == severity)
            .collect()
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.with_severity(ValidationSeverity::Error)
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.with_severity(ValidationSeverity::Warning)
    }

    pub fn info(&self) -> Vec<&ValidationIssue> {
        self.with_severity(ValidationSeverity::Info)
    }

    /// Check if validation passed (no errors)
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }
}

/// Structural and content checks over a receipe
pub struct Validator;

impl Validator {
    /// Run all validations on a tree
    pub fn validate(tree: &Tree) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::check_duplicate_names(tree, &mut result);

        for (_, id) in tree.walk() {
            let Some(block) = tree.get(id) else {
                continue;
            };

            if block.type_name == BRANCH && block.children().is_empty() {
                result.add_issue(ValidationIssue {
                    severity: ValidationSeverity::Info,
                    message: format!(
                        "Branch {:?} of a split is empty and passes data through unchanged",
                        block.branch_spec()
                    ),
                    affected_blocks: vec![id],
                    issue_type: ValidationIssueType::EmptyBranch,
                });
            }

            if block.is_singular() && block.children().len() > 1 {
                result.add_issue(ValidationIssue {
                    severity: ValidationSeverity::Error,
                    message: format!(
                        "'{}' holds {} children but takes only one",
                        block.name,
                        block.children().len()
                    ),
                    affected_blocks: vec![id],
                    issue_type: ValidationIssueType::OverCapacity,
                });
            }

            if let BlockKind::List { children, .. } = &block.kind {
                let rejected: Vec<Ulid> = children
                    .iter()
                    .copied()
                    .filter(|child| !tree.child_type_matches(id, *child).unwrap_or(false))
                    .collect();
                if !rejected.is_empty() {
                    let mut affected = vec![id];
                    affected.extend(&rejected);
                    result.add_issue(ValidationIssue {
                        severity: ValidationSeverity::Error,
                        message: format!(
                            "'{}' holds {} block(s) of a type it does not accept",
                            block.name,
                            rejected.len()
                        ),
                        affected_blocks: affected,
                        issue_type: ValidationIssueType::DisallowedChild,
                    });
                }
            }

            if let Some(property) = block.file_property() {
                let missing = match block.value(property) {
                    None | Some(Value::Null) => true,
                    Some(Value::String(s)) => s.trim().is_empty(),
                    Some(_) => false,
                };
                if missing {
                    result.add_issue(ValidationIssue {
                        severity: ValidationSeverity::Warning,
                        message: format!("'{}' has no {} set", block.name, property),
                        affected_blocks: vec![id],
                        issue_type: ValidationIssueType::MissingFile,
                    });
                }
            }
        }

        result
    }

    fn check_duplicate_names(tree: &Tree, result: &mut ValidationResult) {
        let mut by_name: HashMap<&str, Vec<Ulid>> = HashMap::new();
        let mut order = Vec::new();
        for (_, id) in tree.walk() {
            let Some(block) = tree.get(id) else {
                continue;
            };
            if block.is_internal() {
                continue;
            }
            let ids = by_name.entry(block.name.as_str()).or_default();
            if ids.is_empty() {
                order.push(block.name.as_str());
            }
            ids.push(id);
        }

        for name in order {
            let ids = &by_name[name];
            if ids.len() > 1 {
                result.add_issue(ValidationIssue {
                    severity: ValidationSeverity::Warning,
                    message: format!(
                        "{} blocks are named '{}'; running up to it is ambiguous",
                        ids.len(),
                        name
                    ),
                    affected_blocks: ids.clone(),
                    issue_type: ValidationIssueType::DuplicateName,
                });
            }
        }
    }
}

/// Extension trait for Tree to add validation
pub trait ValidatedTree {
    fn validate(&self) -> ValidationResult;

    /// Highest severity reported per block
    fn blocks_with_issues(&self, result: &ValidationResult) -> HashMap<Ulid, ValidationSeverity>;
}

impl ValidatedTree for Tree {
    fn validate(&self) -> ValidationResult {
        Validator::validate(self)
    }

    fn blocks_with_issues(&self, result: &ValidationResult) -> HashMap<Ulid, ValidationSeverity> {
        let mut blocks = HashMap::new();

        for issue in &result.issues {
            for id in &issue.affected_blocks {
                blocks
                    .entry(*id)
                    .and_modify(|severity: &mut ValidationSeverity| {
                        if issue.severity > *severity {
                            *severity = issue.severity;
                        }
                    })
                    .or_insert(issue.severity);
            }
        }

        blocks
    }
}
