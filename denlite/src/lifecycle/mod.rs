//! Lifecycle phases and hook commands.
//!
//! A phase is a named point in the provisioning timeline at which hook
//! commands may run. Phases are not persisted anywhere; they exist only
//! as messages on the coordinator's event queue.

pub mod coordinator;

use serde::{Deserialize, Serialize};

/// The fixed set of lifecycle phases, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecyclePhase {
    /// Drain the feature-install graph (no hook command).
    FeatureInstall,
    /// Host-side setup, before any container exists.
    Initialize,
    /// First-creation setup inside the container.
    OnCreate,
    /// Content refresh inside the container.
    UpdateContent,
    /// Post-creation setup inside the container.
    PostCreate,
    /// Runs after every container start.
    PostStart,
    /// Sent by the terminal-attach task once interactive setup is done.
    PostAttach,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::FeatureInstall => "featureInstall",
            LifecyclePhase::Initialize => "initialize",
            LifecyclePhase::OnCreate => "onCreate",
            LifecyclePhase::UpdateContent => "updateContent",
            LifecyclePhase::PostCreate => "postCreate",
            LifecyclePhase::PostStart => "postStart",
            LifecyclePhase::PostAttach => "postAttach",
        }
    }

    /// True for phases whose hook runs on the host rather than inside the
    /// container.
    pub fn runs_on_host(&self) -> bool {
        matches!(self, LifecyclePhase::Initialize)
    }
}

impl std::str::FromStr for LifecyclePhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "featureInstall" => Ok(LifecyclePhase::FeatureInstall),
            "initialize" => Ok(LifecyclePhase::Initialize),
            "onCreate" => Ok(LifecyclePhase::OnCreate),
            "updateContent" => Ok(LifecyclePhase::UpdateContent),
            "postCreate" => Ok(LifecyclePhase::PostCreate),
            "postStart" => Ok(LifecyclePhase::PostStart),
            "postAttach" => Ok(LifecyclePhase::PostAttach),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A hook command bound to a lifecycle phase.
///
/// Shell commands go through `/bin/sh -c`; exec commands are passed to the
/// OS as-is without shell interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookCommand {
    Shell(String),
    Exec(Vec<String>),
}

impl HookCommand {
    /// The argv this hook resolves to.
    pub fn argv(&self) -> Vec<String> {
        match self {
            HookCommand::Shell(line) => {
                vec!["/bin/sh".to_string(), "-c".to_string(), line.clone()]
            }
            HookCommand::Exec(args) => args.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            HookCommand::Shell(line) => line.is_empty(),
            HookCommand::Exec(args) => args.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_phase_round_trip() {
        for phase in [
            LifecyclePhase::FeatureInstall,
            LifecyclePhase::Initialize,
            LifecyclePhase::OnCreate,
            LifecyclePhase::UpdateContent,
            LifecyclePhase::PostCreate,
            LifecyclePhase::PostStart,
            LifecyclePhase::PostAttach,
        ] {
            assert_eq!(LifecyclePhase::from_str(phase.as_str()), Ok(phase));
        }
        assert!(LifecyclePhase::from_str("preBuild").is_err());
    }

    #[test]
    fn test_shell_hook_argv() {
        let hook = HookCommand::Shell("npm install".into());
        assert_eq!(hook.argv(), vec!["/bin/sh", "-c", "npm install"]);

        let hook = HookCommand::Exec(vec!["npm".into(), "install".into()]);
        assert_eq!(hook.argv(), vec!["npm", "install"]);
    }
}
