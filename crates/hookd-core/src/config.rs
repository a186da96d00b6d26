//! Dispatcher configuration: bind address, shared credential, procedures.
//!
//! Loaded once at startup and validated eagerly — a malformed registry
//! refuses to start rather than surfacing undefined procedures at
//! request time. Reload requires a process restart.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::auth::AuthMethod;
use crate::error::{HookdError, Result};
use crate::procedure::ProcedureDefinition;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Bind address, host:port.
    #[serde(default = "default_listen")]
    pub listen: String,
    pub auth: AuthMethod,
    #[serde(default)]
    pub procedures: Vec<ProcedureDefinition>,
}

fn default_listen() -> String {
    "127.0.0.1:8787".to_string()
}

impl Config {
    /// Load and validate a config file. Any validation failure is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Eager startup validation: parseable listen address, non-empty
    /// credential, unique procedure ids, at least one step per procedure,
    /// no blank step commands.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.auth.credential().trim().is_empty() {
            return Err(HookdError::EmptyCredential);
        }

        let mut seen = HashSet::new();
        for def in &self.procedures {
            if !seen.insert(def.id.as_str()) {
                return Err(HookdError::DuplicateProcedure(def.id.clone()));
            }
            if def.steps.is_empty() {
                return Err(HookdError::NoSteps(def.id.clone()));
            }
            for (i, step) in def.steps.iter().enumerate() {
                if step.run.trim().is_empty() {
                    return Err(HookdError::EmptyCommand {
                        procedure: def.id.clone(),
                        step: i + 1,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|_| HookdError::InvalidListenAddr(self.listen.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
listen: "127.0.0.1:8787"
auth:
  method: token
  token: shared-secret
procedures:
  - id: infra-update
    timeout_secs: 30
    steps:
      - run: git -C /srv/infra pull --ff-only
      - run: docker compose -f /srv/infra/compose.yaml up -d
        workdir: /srv/infra
"#;

    #[test]
    fn valid_config_parses_and_validates() {
        let config: Config = serde_yaml::from_str(VALID).unwrap();
        config.validate().unwrap();
        assert_eq!(config.procedures.len(), 1);
        assert_eq!(config.procedures[0].id, "infra-update");
        assert_eq!(config.procedures[0].steps.len(), 2);
        assert!(config.procedures[0].steps[0].abort_on_failure);
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookd.yaml");
        std::fs::write(&path, VALID).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8787");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/hookd.yaml")).is_err());
    }

    #[test]
    fn duplicate_procedure_id_is_fatal() {
        let yaml = r#"
auth: { method: token, token: s }
procedures:
  - id: deploy
    steps: [{ run: "true" }]
  - id: deploy
    steps: [{ run: "true" }]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HookdError::DuplicateProcedure(id) if id == "deploy"));
    }

    #[test]
    fn empty_step_command_is_fatal() {
        let yaml = r#"
auth: { method: token, token: s }
procedures:
  - id: deploy
    steps: [{ run: "  " }]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            HookdError::EmptyCommand { procedure, step } if procedure == "deploy" && step == 1
        ));
    }

    #[test]
    fn procedure_without_steps_is_fatal() {
        let yaml = r#"
auth: { method: token, token: s }
procedures:
  - id: deploy
    steps: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            HookdError::NoSteps(id) if id == "deploy"
        ));
    }

    #[test]
    fn blank_credential_is_fatal() {
        let yaml = "auth: { method: token, token: \"  \" }\nprocedures: []\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            HookdError::EmptyCredential
        ));
    }

    #[test]
    fn bad_listen_address_is_fatal() {
        let yaml = "listen: not-an-addr\nauth: { method: token, token: s }\nprocedures: []\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            HookdError::InvalidListenAddr(_)
        ));
    }

    #[test]
    fn hmac_auth_parses() {
        let yaml = "auth: { method: hmac_sha256, secret: signing-key }\nprocedures: []\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.auth.name(), "hmac_sha256");
    }
}
