//! Where a workflow's script text comes from.

use crate::cache::CodeSource;
use crate::error::DefinitionError;
use crate::execution::{FlowExecution, JobOwner};
use crate::policy::AccessPolicy;
use std::fs;
use std::path::{Path, PathBuf};

/// Class name every workflow script compiles under.
pub const SCRIPT_NAME: &str = "WorkflowScript";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDefinition {
    Inline {
        script: String,
        sandbox: bool,
    },
    /// A script file inside an already checked-out tree.
    FromFile {
        checkout_dir: PathBuf,
        script_path: PathBuf,
        sandbox: bool,
    },
}

impl FlowDefinition {
    pub fn inline(script: impl Into<String>, sandbox: bool) -> Self {
        FlowDefinition::Inline {
            script: script.into(),
            sandbox,
        }
    }

    pub fn from_file(checkout_dir: impl Into<PathBuf>, script_path: impl Into<PathBuf>, sandbox: bool) -> Self {
        FlowDefinition::FromFile {
            checkout_dir: checkout_dir.into(),
            script_path: script_path.into(),
            sandbox,
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        match self {
            FlowDefinition::Inline { sandbox, .. } | FlowDefinition::FromFile { sandbox, .. } => *sandbox,
        }
    }

    /// The policy scripts of this definition compile under.
    pub fn policy(&self, sandbox_policy: &AccessPolicy) -> AccessPolicy {
        if self.is_sandboxed() {
            sandbox_policy.clone()
        } else {
            AccessPolicy::unrestricted()
        }
    }

    pub fn code_source(&self) -> Result<CodeSource, DefinitionError> {
        match self {
            FlowDefinition::Inline { script, .. } => Ok(CodeSource::new(script.clone(), SCRIPT_NAME, true)),
            FlowDefinition::FromFile {
                checkout_dir,
                script_path,
                ..
            } => {
                let file = resolve_inside(checkout_dir, script_path)?;
                let text = fs::read_to_string(&file).map_err(|source| DefinitionError::Read {
                    path: file.clone(),
                    source,
                })?;
                Ok(CodeSource::new(text, SCRIPT_NAME, true))
            }
        }
    }

    /// A fresh execution for `owner` rooted at `root_dir`, plus the source it runs.
    pub fn create_execution(
        &self,
        owner: JobOwner,
        root_dir: impl Into<PathBuf>,
    ) -> Result<(FlowExecution, CodeSource), DefinitionError> {
        let source = self.code_source()?;
        let execution = FlowExecution::new(owner, root_dir);
        tracing::debug!(
            execution = %execution.id(),
            owner = %execution.owner().name(),
            sandbox = self.is_sandboxed(),
            "created flow execution"
        );
        Ok((execution, source))
    }
}

/// Canonical path of `script` relative to `checkout`, rejecting anything that
/// resolves outside the checkout (`..` segments, absolute paths, symlinks).
fn resolve_inside(checkout: &Path, script: &Path) -> Result<PathBuf, DefinitionError> {
    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DefinitionError::Read { path, source }
    };
    let root = checkout.canonicalize().map_err(read_err(checkout))?;
    let candidate = root.join(script);
    let file = candidate.canonicalize().map_err(read_err(&candidate))?;
    if !file.starts_with(&root) {
        return Err(DefinitionError::OutsideCheckout {
            script: script.to_path_buf(),
            checkout: root,
        });
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_flag_selects_the_policy() {
        let sandbox = AccessPolicy::new("sandbox").allow("Map.get");
        assert_eq!(FlowDefinition::inline("x", true).policy(&sandbox), sandbox);
        assert_eq!(FlowDefinition::inline("x", false).policy(&sandbox), AccessPolicy::unrestricted());
    }
}
