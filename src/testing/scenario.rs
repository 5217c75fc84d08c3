//! Scenario file types
//!
//! Defines the data structures for deserializing YAML scenarios.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::common::{Error, Result};
use crate::debugger::sim::{Behavior, SessionScript, SimPlan};

/// A complete simulated run loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario exercises
    pub description: Option<String>,
    /// Session count; the configured count applies when absent
    pub sessions: Option<usize>,
    /// Script for every session without an override
    #[serde(default)]
    pub default: ScriptSpec,
    /// Sessions that behave differently
    #[serde(default)]
    pub overrides: Vec<SessionOverride>,
}

/// How one session behaves
#[derive(Deserialize, Debug, Clone)]
pub struct ScriptSpec {
    #[serde(default)]
    pub behavior: Behavior,
    /// Delay before each state change, in milliseconds
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

impl Default for ScriptSpec {
    fn default() -> Self {
        Self {
            behavior: Behavior::Normal,
            latency_ms: default_latency_ms(),
        }
    }
}

impl ScriptSpec {
    fn to_script(&self) -> SessionScript {
        SessionScript::new(self.behavior, Duration::from_millis(self.latency_ms))
    }
}

fn default_latency_ms() -> u64 {
    5
}

/// Script for a single session identity
#[derive(Deserialize, Debug, Clone)]
pub struct SessionOverride {
    pub session: usize,
    #[serde(flatten)]
    pub script: ScriptSpec,
}

impl Scenario {
    /// Load a scenario from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse a scenario from YAML text
    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Self =
            serde_yaml::from_str(content).map_err(|e| Error::ScenarioParse(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        if let Some(sessions) = self.sessions {
            if let Some(stray) = self.overrides.iter().find(|o| o.session >= sessions) {
                return Err(Error::ScenarioParse(format!(
                    "override for session {} but only {} sessions",
                    stray.session, sessions
                )));
            }
        }
        Ok(())
    }

    /// Scripts for the simulated backend
    pub fn to_plan(&self) -> SimPlan {
        SimPlan {
            default: self.default.to_script(),
            overrides: self
                .overrides
                .iter()
                .map(|o| (o.session, o.script.to_script()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario_with_overrides() {
        let scenario = Scenario::parse(
            r#"
name: one-premature-exit
description: the middle session exits instead of reaching bar
sessions: 3
default:
  behavior: normal
overrides:
  - session: 1
    behavior: exits_early
    latency_ms: 40
"#,
        )
        .unwrap();

        assert_eq!(scenario.name, "one-premature-exit");
        assert_eq!(scenario.sessions, Some(3));

        let plan = scenario.to_plan();
        assert_eq!(plan.script_for(0).behavior, Behavior::Normal);
        assert_eq!(plan.script_for(0).latency, Duration::from_millis(5));
        assert_eq!(plan.script_for(1).behavior, Behavior::ExitsEarly);
        assert_eq!(plan.script_for(1).latency, Duration::from_millis(40));
        assert_eq!(plan.script_for(2).behavior, Behavior::Normal);
    }

    #[test]
    fn test_minimal_scenario() {
        let scenario = Scenario::parse("name: plain\n").unwrap();
        assert!(scenario.sessions.is_none());
        assert!(scenario.overrides.is_empty());
        assert_eq!(scenario.to_plan().default, SessionScript::default());
    }

    #[test]
    fn test_unknown_behavior_rejected() {
        let err = Scenario::parse("name: x\ndefault:\n  behavior: explode\n").unwrap_err();
        assert!(matches!(err, Error::ScenarioParse(_)));
    }

    #[test]
    fn test_override_out_of_range_rejected() {
        let err = Scenario::parse(
            "name: x\nsessions: 2\noverrides:\n  - session: 2\n    behavior: hang\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::ScenarioParse(_)));
    }

    #[test]
    fn test_bundled_scenarios_parse() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/scenarios");
        let mut count = 0;
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                Scenario::load(&path).unwrap();
                count += 1;
            }
        }
        assert!(count > 0);
    }
}
