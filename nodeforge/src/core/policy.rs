//! Validation rules and the per-role mutation-safety table.
//!
//! `POLICIES` is the single source for both the instruction text handed to the
//! generator and the enforcement performed by the validator.

use std::fmt;

use serde::Serialize;

use crate::core::schema::{FileRole, MANIFEST_PATH};

/// Validator checks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Check {
    Completeness,
    Placement,
    Auxiliary,
    MutationSafety,
}

impl Check {
    pub const ORDER: [Check; 4] = [
        Check::Completeness,
        Check::Placement,
        Check::Auxiliary,
        Check::MutationSafety,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Check::Completeness => "completeness",
            Check::Placement => "placement",
            Check::Auxiliary => "auxiliary",
            Check::MutationSafety => "mutation-safety",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single violated rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    MissingRequiredFile,

    UnsafePath,
    UnrecognizedPath,
    UnknownFileRole,
    DuplicatePath,
    WrongVersion,
    UnplannedArtifact,
    NonConformingIdentifier,
    MalformedJson,
    StrayLabel,

    MissingLabel,
    MalformedLabel,
    MissingManifest,
    UndeclaredDependency,

    SignatureChanged,
    InputRemoved,
    InputRetyped,
    InputMadeRequired,
    RequiredInputAdded,
    OutputRemoved,
    OutputRetyped,
    StepRemoved,
    StepReferenceChanged,
    StepVersionIncompatible,
    TriggerKindChanged,
    DependencyRemoved,
}

impl Rule {
    pub fn as_str(self) -> &'static str {
        match self {
            Rule::MissingRequiredFile => "missing-required-file",
            Rule::UnsafePath => "unsafe-path",
            Rule::UnrecognizedPath => "unrecognized-path",
            Rule::UnknownFileRole => "unknown-file-role",
            Rule::DuplicatePath => "duplicate-path",
            Rule::WrongVersion => "wrong-version",
            Rule::UnplannedArtifact => "unplanned-artifact",
            Rule::NonConformingIdentifier => "non-conforming-identifier",
            Rule::MalformedJson => "malformed-json",
            Rule::StrayLabel => "stray-label",
            Rule::MissingLabel => "missing-label",
            Rule::MalformedLabel => "malformed-label",
            Rule::MissingManifest => "missing-manifest",
            Rule::UndeclaredDependency => "undeclared-dependency",
            Rule::SignatureChanged => "signature-changed",
            Rule::InputRemoved => "input-removed",
            Rule::InputRetyped => "input-retyped",
            Rule::InputMadeRequired => "input-made-required",
            Rule::RequiredInputAdded => "required-input-added",
            Rule::OutputRemoved => "output-removed",
            Rule::OutputRetyped => "output-retyped",
            Rule::StepRemoved => "step-removed",
            Rule::StepReferenceChanged => "step-reference-changed",
            Rule::StepVersionIncompatible => "step-version-incompatible",
            Rule::TriggerKindChanged => "trigger-kind-changed",
            Rule::DependencyRemoved => "dependency-removed",
        }
    }

    /// Check this rule belongs to.
    pub fn check(self) -> Check {
        match self {
            Rule::MissingRequiredFile => Check::Completeness,
            Rule::UnsafePath
            | Rule::UnrecognizedPath
            | Rule::UnknownFileRole
            | Rule::DuplicatePath
            | Rule::WrongVersion
            | Rule::UnplannedArtifact
            | Rule::NonConformingIdentifier
            | Rule::MalformedJson
            | Rule::StrayLabel => Check::Placement,
            Rule::MissingLabel
            | Rule::MalformedLabel
            | Rule::MissingManifest
            | Rule::UndeclaredDependency => Check::Auxiliary,
            Rule::SignatureChanged
            | Rule::InputRemoved
            | Rule::InputRetyped
            | Rule::InputMadeRequired
            | Rule::RequiredInputAdded
            | Rule::OutputRemoved
            | Rule::OutputRetyped
            | Rule::StepRemoved
            | Rule::StepReferenceChanged
            | Rule::StepVersionIncompatible
            | Rule::TriggerKindChanged
            | Rule::DependencyRemoved => Check::MutationSafety,
        }
    }

    /// Instruction phrasing of the prohibition, for mutation-safety rules.
    pub fn prohibition(self) -> &'static str {
        match self {
            Rule::SignatureChanged => {
                "change the exported entry function's parameter count, parameter types or return type"
            }
            Rule::InputRemoved => "remove or rename an existing input",
            Rule::InputRetyped => "change the type of an existing input",
            Rule::InputMadeRequired => "make an existing optional input required",
            Rule::RequiredInputAdded => "add a new required input (new inputs must be optional)",
            Rule::OutputRemoved => "remove or rename an existing output",
            Rule::OutputRetyped => "change the type of an existing output",
            Rule::StepRemoved => "remove or rename an existing step",
            Rule::StepReferenceChanged => "point an existing step at a different node",
            Rule::StepVersionIncompatible => {
                "move a step to a different major version or downgrade it"
            }
            Rule::TriggerKindChanged => "change the kind of an existing trigger",
            Rule::DependencyRemoved => "remove an existing dependency",
            _ => self.as_str(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a mutation policy governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Role(FileRole),
    Manifest,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Role(role) => write!(f, "{} ({})", role.file_name(), role),
            Subject::Manifest => f.write_str(MANIFEST_PATH),
        }
    }
}

/// Mutation-safety policy for one file role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationPolicy {
    pub subject: Subject,
    /// Changes that are explicitly permitted.
    pub allowed: &'static str,
    /// Rules that reject a change. Empty means unrestricted.
    pub forbidden: &'static [Rule],
}

impl MutationPolicy {
    pub fn forbids(&self, rule: Rule) -> bool {
        self.forbidden.contains(&rule)
    }
}

pub const POLICIES: &[MutationPolicy] = &[
    MutationPolicy {
        subject: Subject::Role(FileRole::Main),
        allowed: "body logic and destructured parameter names",
        forbidden: &[Rule::SignatureChanged],
    },
    MutationPolicy {
        subject: Subject::Role(FileRole::InputsSchema),
        allowed: "adding optional inputs, editing descriptions and defaults",
        forbidden: &[
            Rule::InputRemoved,
            Rule::InputRetyped,
            Rule::InputMadeRequired,
            Rule::RequiredInputAdded,
        ],
    },
    MutationPolicy {
        subject: Subject::Role(FileRole::OutputsSchema),
        allowed: "adding outputs, editing descriptions",
        forbidden: &[Rule::OutputRemoved, Rule::OutputRetyped],
    },
    MutationPolicy {
        subject: Subject::Role(FileRole::Graph),
        allowed: "adding steps, editing step values, same-major version bumps",
        forbidden: &[
            Rule::StepRemoved,
            Rule::StepReferenceChanged,
            Rule::StepVersionIncompatible,
        ],
    },
    MutationPolicy {
        subject: Subject::Role(FileRole::Triggers),
        allowed: "adding triggers, editing schedules and paths",
        forbidden: &[Rule::TriggerKindChanged],
    },
    MutationPolicy {
        subject: Subject::Role(FileRole::Meta),
        allowed: "any change",
        forbidden: &[],
    },
    MutationPolicy {
        subject: Subject::Role(FileRole::FullSchema),
        allowed: "any change",
        forbidden: &[],
    },
    MutationPolicy {
        subject: Subject::Role(FileRole::Config),
        allowed: "any change",
        forbidden: &[],
    },
    MutationPolicy {
        subject: Subject::Manifest,
        allowed: "adding dependencies, bumping versions",
        forbidden: &[Rule::DependencyRemoved],
    },
];

/// Policy governing `subject`.
pub fn policy_for(subject: Subject) -> Option<&'static MutationPolicy> {
    POLICIES.iter().find(|policy| policy.subject == subject)
}
