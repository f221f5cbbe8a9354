//! Configuration module
//!
//! This module contains the planner configuration (polynomial order, minimized derivative,
//! physical constants and QP solver limits), the scenario keyframes and the output settings.
//! A scenario is loaded from a YAML file using the serde library. The planner configuration is
//! an immutable value passed explicitly to every planning call.

use std::time::Duration;

use crate::keyframe::Keyframe;
use crate::TrajectoryError;

/// Polynomial order of the quadrotor segment synthesized at each slack transition
pub const SLACK_QUAD_ORDER: usize = 7;
/// Minimized derivative order of the quadrotor segment synthesized at each slack transition
pub const SLACK_QUAD_DERIVATIVE: usize = 4;

#[derive(Clone, Debug, serde::Deserialize)]
/// Scenario file: planner configuration, keyframes and output settings
pub struct Config {
    /// Planner configuration
    #[serde(default)]
    pub planner: PlannerConfig,
    /// Keyframes of the scenario
    pub keyframes: Vec<Keyframe>,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for the hybrid planner
pub struct PlannerConfig {
    /// Polynomial order n of the load segments
    pub order: usize,
    /// Derivative order r whose squared integral is minimized
    pub minimized_derivative_order: usize,
    /// Weight applied to the smoothness cost
    pub cost_weight: f64,
    /// Tension magnitude at or below which the cable counts as slack (N)
    pub tension_epsilon: f64,
    /// Enforce derivative continuity between sub-segments of a taut run
    pub enforce_continuity: bool,
    /// Number of spatial dimensions, only 1 is supported
    pub dimensions: usize,
    /// Physical constants
    pub physics: PhysicsConfig,
    /// QP solver limits
    pub solver: SolverConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            order: 7,
            minimized_derivative_order: 4,
            cost_weight: 1.0,
            tension_epsilon: 1e-9,
            enforce_continuity: false,
            dimensions: 1,
            physics: PhysicsConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl PlannerConfig {
    /// Check the configuration for values the planner cannot work with
    /// # Errors
    /// * `Dimensionality` if more than one spatial dimension is requested
    /// * `InvalidInput` for non-positive physical constants or inconsistent orders
    /// # Example
    /// ```
    /// use hybrid_load_traj::config::PlannerConfig;
    /// let config = PlannerConfig { dimensions: 3, ..Default::default() };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), TrajectoryError> {
        if self.dimensions != 1 {
            return Err(TrajectoryError::Dimensionality(self.dimensions));
        }
        if self.minimized_derivative_order == 0 {
            return Err(TrajectoryError::InvalidInput(
                "Minimized derivative order must be at least 1".to_string(),
            ));
        }
        if self.order < self.minimized_derivative_order {
            return Err(TrajectoryError::InvalidInput(format!(
                "Polynomial order {} is below the minimized derivative order {}",
                self.order, self.minimized_derivative_order
            )));
        }
        if !(self.cost_weight > 0.0) || !(self.tension_epsilon >= 0.0) {
            return Err(TrajectoryError::InvalidInput(
                "Cost weight must be positive and tension epsilon non-negative".to_string(),
            ));
        }
        self.physics.validate()
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Physical constants of the quadrotor-cable-load system
pub struct PhysicsConfig {
    /// Gravity in m/s^2
    pub gravity: f64,
    /// Cable length in meters
    pub cable_length: f64,
    /// Mass of the load in kg
    pub load_mass: f64,
    /// Mass of the quadrotor in kg
    pub quad_mass: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        PhysicsConfig {
            gravity: 9.8,
            cable_length: 1.0,
            load_mass: 0.1,
            quad_mass: 1.0,
        }
    }
}

impl PhysicsConfig {
    fn validate(&self) -> Result<(), TrajectoryError> {
        let positive = [
            ("gravity", self.gravity),
            ("cable_length", self.cable_length),
            ("load_mass", self.load_mass),
            ("quad_mass", self.quad_mass),
        ];
        match positive.iter().find(|(_, v)| !(*v > 0.0 && v.is_finite())) {
            Some((name, value)) => Err(TrajectoryError::InvalidInput(format!(
                "{} must be positive and finite, got {}",
                name, value
            ))),
            None => Ok(()),
        }
    }

    /// Ratio of load mass to quadrotor mass
    pub fn mass_ratio(&self) -> f64 {
        self.load_mass / self.quad_mass
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Limits and tolerances of the active-set QP solver
pub struct SolverConfig {
    /// Maximum number of active-set iterations per QP
    pub max_iterations: usize,
    /// Wall-clock budget per QP in milliseconds
    pub timeout_ms: u64,
    /// Inequality violation tolerated before a constraint enters the working set
    pub feasibility_tolerance: f64,
    /// Relative singular value below which a KKT system is treated as singular
    pub rank_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            max_iterations: 100,
            timeout_ms: 1000,
            feasibility_tolerance: 1e-9,
            rank_tolerance: 1e-12,
        }
    }
}

impl SolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for trajectory export
pub struct OutputConfig {
    /// Path of the JSON export of the full trajectory
    pub json: Option<String>,
    /// Path of the CSV export of sampled states
    pub csv: Option<String>,
    /// Sampling period of the CSV export in seconds
    pub sample_dt: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            json: None,
            csv: None,
            sample_dt: 0.01,
        }
    }
}

/// Implementation of the Config struct
impl Config {
    /// Load a scenario from a YAML file.
    /// # Arguments
    /// * `filename` - The name of the file to load.
    /// # Returns
    /// * The scenario configuration.
    /// # Errors
    /// * If the file cannot be read or the YAML cannot be parsed.
    pub fn from_yaml(filename: &str) -> Result<Self, TrajectoryError> {
        let contents = std::fs::read_to_string(filename)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_config() {
        let config = Config::from_yaml("tests/testdata/scenario_a.yaml").unwrap();
        assert_eq!(config.planner.order, 7);
        assert_eq!(config.planner.minimized_derivative_order, 4);
        assert_eq!(config.planner.physics.gravity, 9.8);
        assert_eq!(config.planner.physics.cable_length, 1.0);
        assert_eq!(config.planner.physics.load_mass, 0.1);
        assert_eq!(config.planner.physics.quad_mass, 1.0);
        assert!(!config.planner.enforce_continuity);
        assert_eq!(config.keyframes.len(), 3);
        assert_eq!(config.keyframes[1].desired(0), Some(5.0));
        assert_eq!(config.keyframes[1].desired(1), None);
        assert!(config.keyframes[1].is_slack(config.planner.tension_epsilon));
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: Config = serde_yaml::from_str(
            r#"
            planner:
              physics:
                gravity: 9.81
            keyframes: []
            "#,
        )
        .unwrap();
        assert_eq!(config.planner.physics.gravity, 9.81);
        assert_eq!(config.planner.physics.quad_mass, 1.0);
        assert_eq!(config.planner.solver.max_iterations, 100);
        assert_eq!(config.output.sample_dt, 0.01);
        assert!(config.output.json.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(PlannerConfig::default().validate().is_ok());
        let config = PlannerConfig {
            dimensions: 2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrajectoryError::Dimensionality(2))
        ));
        let mut config = PlannerConfig::default();
        config.physics.quad_mass = 0.0;
        assert!(matches!(
            config.validate(),
            Err(TrajectoryError::InvalidInput(_))
        ));
        let config = PlannerConfig {
            order: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_yaml("tests/testdata/does_not_exist.yaml"),
            Err(TrajectoryError::Io(_))
        ));
    }
}
