use super::state::OptimizerState;
use crate::core::minimize::StepControl;
use crate::core::minimize::lbfgs::InitialHessianScale;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const MIN_ENERGY_TOLERANCE: f64 = 1e-10;
pub const MIN_FORCE_TOLERANCE: f64 = 1e-7;
pub const MIN_POSITION_TOLERANCE: f64 = 1e-7;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("{name} tolerance {value:e} is below the minimum of {minimum:e}")]
    ToleranceTooTight {
        name: &'static str,
        value: f64,
        minimum: f64,
    },

    #[error("{name} tolerance must be positive, got {value}")]
    NonPositiveTolerance { name: &'static str, value: f64 },

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Unknown optimization algorithm: '{0}'")]
    UnknownAlgorithm(String),

    #[error("Fixed atoms are not supported during cell optimization ({count} requested)")]
    FixedAtomsUnsupported { count: usize },

    #[error("Persisted '{field}' has size {found}, expected {expected}")]
    StateSizeMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Persisted state belongs to '{found}' but the configured algorithm is '{expected}'")]
    AlgorithmMismatch {
        expected: Algorithm,
        found: Algorithm,
    },

    #[error("Dense optimizer state of dimension {dimension} exceeds the limit of {limit}")]
    DenseStateTooLarge { dimension: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid optimizer configuration: {0}")]
    Invalid(#[from] ConfigError),
}

/// The minimization algorithm driving the joint position and cell update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    SteepestDescent,
    ConjugateGradient,
    Bfgs,
    #[default]
    Lbfgs,
    TrustRegion,
    /// Leaves the system untouched.
    Idle,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::SteepestDescent => "sd",
            Algorithm::ConjugateGradient => "cg",
            Algorithm::Bfgs => "bfgs",
            Algorithm::Lbfgs => "lbfgs",
            Algorithm::TrustRegion => "bfgstrm",
            Algorithm::Idle => "none",
        }
    }

    /// Whether the algorithm keeps an `n×n` matrix.
    pub fn is_dense(self) -> bool {
        matches!(self, Algorithm::Bfgs | Algorithm::TrustRegion)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sd" | "steepest_descent" => Ok(Algorithm::SteepestDescent),
            "cg" | "conjugate_gradient" => Ok(Algorithm::ConjugateGradient),
            "bfgs" => Ok(Algorithm::Bfgs),
            "lbfgs" | "l-bfgs" => Ok(Algorithm::Lbfgs),
            "bfgstrm" | "trm" | "trust_region" => Ok(Algorithm::TrustRegion),
            "none" | "idle" => Ok(Algorithm::Idle),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Exit criteria of a run. Every tolerance is strictly positive and above a floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    energy: f64,
    force: f64,
    position: f64,
}

impl Tolerances {
    pub fn new(energy: f64, force: f64, position: f64) -> Result<Self, ConfigError> {
        let tolerances = Self {
            energy,
            force,
            position,
        };
        tolerances.validate()?;
        Ok(tolerances)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_tolerance("energy", self.energy, MIN_ENERGY_TOLERANCE)?;
        check_tolerance("force", self.force, MIN_FORCE_TOLERANCE)?;
        check_tolerance("position", self.position, MIN_POSITION_TOLERANCE)
    }

    /// Largest accepted change of the effective potential per atom.
    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// Largest accepted generalized force component.
    pub fn force(&self) -> f64 {
        self.force
    }

    /// Largest accepted atomic displacement in one step.
    pub fn position(&self) -> f64 {
        self.position
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            energy: 1e-7,
            force: 1e-4,
            position: 1e-4,
        }
    }
}

fn check_tolerance(name: &'static str, value: f64, minimum: f64) -> Result<(), ConfigError> {
    if !(value > 0.0) {
        return Err(ConfigError::NonPositiveTolerance { name, value });
    }
    if value < minimum {
        return Err(ConfigError::ToleranceTooTight {
            name,
            value,
            minimum,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearchOptions {
    /// Scale applied to the energy tolerance to obtain the line-search resolution.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// First trial step of steepest-descent and conjugate-gradient line minimizations.
    pub initial_step: f64,
    /// Next trial step as a multiple of the last one taken; zero disables adaptation.
    pub adaptive: f64,
}

impl Default for LineSearchOptions {
    fn default() -> Self {
        Self {
            tolerance: 1.0,
            max_iterations: 100,
            initial_step: 1e-3,
            adaptive: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbfgsOptions {
    pub corrections: usize,
    pub scale: InitialHessianScale,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            corrections: 5,
            scale: InitialHessianScale::FirstStep,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub algorithm: Algorithm,
    pub max_step: f64,
    pub tolerances: Tolerances,
    pub line_search: LineSearchOptions,
    pub lbfgs: LbfgsOptions,
    pub external_pressure: f64,
    pub fixed_atoms: Vec<usize>,
    /// Upper bound on `n` for algorithms storing `n×n` matrices.
    pub max_dense_dimension: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            max_step: 100.0,
            tolerances: Tolerances::default(),
            line_search: LineSearchOptions::default(),
            lbfgs: LbfgsOptions::default(),
            external_pressure: 0.0,
            fixed_atoms: Vec::new(),
            max_dense_dimension: 10_000,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tolerances.validate()?;
        positive("max_step", self.max_step)?;
        positive("line_search.tolerance", self.line_search.tolerance)?;
        positive("line_search.initial_step", self.line_search.initial_step)?;
        if self.line_search.max_iterations == 0 {
            return Err(invalid("line_search.max_iterations", "must be at least 1"));
        }
        if !(self.line_search.adaptive >= 0.0) || !self.line_search.adaptive.is_finite() {
            return Err(invalid("line_search.adaptive", "must be a finite non-negative factor"));
        }
        if self.lbfgs.corrections == 0 {
            return Err(invalid("lbfgs.corrections", "must be at least 1"));
        }
        if !self.external_pressure.is_finite() {
            return Err(invalid("external_pressure", "must be finite"));
        }
        if !self.fixed_atoms.is_empty() {
            return Err(ConfigError::FixedAtomsUnsupported {
                count: self.fixed_atoms.len(),
            });
        }
        Ok(())
    }

    /// Limits handed to the minimization routines for one step.
    pub fn step_control(&self) -> StepControl {
        StepControl {
            max_step: self.max_step,
            tolerance: self.line_search.tolerance * self.tolerances.energy(),
            max_iterations: self.line_search.max_iterations,
        }
    }

    /// Checks that a persisted state belongs to the configured algorithm.
    pub fn check_state(&self, state: &OptimizerState) -> Result<(), ConfigError> {
        let found = state.algorithm();
        if found != self.algorithm {
            return Err(ConfigError::AlgorithmMismatch {
                expected: self.algorithm,
                found,
            });
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        parse_toml(content, "<inline>")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        parse_toml(&content, &path.to_string_lossy())
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(name, &format!("must be positive and finite, got {value}")))
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.to_string(),
    }
}

#[derive(Default)]
pub struct OptimizerConfigBuilder {
    algorithm: Option<Algorithm>,
    max_step: Option<f64>,
    energy_tolerance: Option<f64>,
    force_tolerance: Option<f64>,
    position_tolerance: Option<f64>,
    line_search_tolerance: Option<f64>,
    line_search_max_iterations: Option<usize>,
    initial_step: Option<f64>,
    adaptive_step: Option<f64>,
    lbfgs_corrections: Option<usize>,
    initial_hessian_scale: Option<InitialHessianScale>,
    external_pressure: Option<f64>,
    fixed_atoms: Option<Vec<usize>>,
    max_dense_dimension: Option<usize>,
}

impl OptimizerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }
    pub fn max_step(mut self, step: f64) -> Self {
        self.max_step = Some(step);
        self
    }
    pub fn energy_tolerance(mut self, tolerance: f64) -> Self {
        self.energy_tolerance = Some(tolerance);
        self
    }
    pub fn force_tolerance(mut self, tolerance: f64) -> Self {
        self.force_tolerance = Some(tolerance);
        self
    }
    pub fn position_tolerance(mut self, tolerance: f64) -> Self {
        self.position_tolerance = Some(tolerance);
        self
    }
    pub fn line_search_tolerance(mut self, scale: f64) -> Self {
        self.line_search_tolerance = Some(scale);
        self
    }
    pub fn line_search_max_iterations(mut self, iterations: usize) -> Self {
        self.line_search_max_iterations = Some(iterations);
        self
    }
    pub fn initial_step(mut self, step: f64) -> Self {
        self.initial_step = Some(step);
        self
    }
    pub fn adaptive_step(mut self, factor: f64) -> Self {
        self.adaptive_step = Some(factor);
        self
    }
    pub fn lbfgs_corrections(mut self, corrections: usize) -> Self {
        self.lbfgs_corrections = Some(corrections);
        self
    }
    pub fn initial_hessian_scale(mut self, scale: InitialHessianScale) -> Self {
        self.initial_hessian_scale = Some(scale);
        self
    }
    pub fn external_pressure(mut self, pressure: f64) -> Self {
        self.external_pressure = Some(pressure);
        self
    }
    pub fn fixed_atoms(mut self, atoms: Vec<usize>) -> Self {
        self.fixed_atoms = Some(atoms);
        self
    }
    pub fn max_dense_dimension(mut self, dimension: usize) -> Self {
        self.max_dense_dimension = Some(dimension);
        self
    }

    pub fn build(self) -> Result<OptimizerConfig, ConfigError> {
        let defaults = OptimizerConfig::default();
        let tolerances = Tolerances::new(
            self.energy_tolerance
                .unwrap_or(defaults.tolerances.energy()),
            self.force_tolerance.unwrap_or(defaults.tolerances.force()),
            self.position_tolerance
                .unwrap_or(defaults.tolerances.position()),
        )?;
        let config = OptimizerConfig {
            algorithm: self.algorithm.unwrap_or(defaults.algorithm),
            max_step: self.max_step.unwrap_or(defaults.max_step),
            tolerances,
            line_search: LineSearchOptions {
                tolerance: self
                    .line_search_tolerance
                    .unwrap_or(defaults.line_search.tolerance),
                max_iterations: self
                    .line_search_max_iterations
                    .unwrap_or(defaults.line_search.max_iterations),
                initial_step: self
                    .initial_step
                    .unwrap_or(defaults.line_search.initial_step),
                adaptive: self
                    .adaptive_step
                    .unwrap_or(defaults.line_search.adaptive),
            },
            lbfgs: LbfgsOptions {
                corrections: self
                    .lbfgs_corrections
                    .unwrap_or(defaults.lbfgs.corrections),
                scale: self
                    .initial_hessian_scale
                    .unwrap_or(defaults.lbfgs.scale),
            },
            external_pressure: self
                .external_pressure
                .unwrap_or(defaults.external_pressure),
            fixed_atoms: self.fixed_atoms.unwrap_or_default(),
            max_dense_dimension: self
                .max_dense_dimension
                .unwrap_or(defaults.max_dense_dimension),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    algorithm: Option<String>,
    max_step: Option<f64>,
    external_pressure: Option<f64>,
    fixed_atoms: Option<Vec<usize>>,
    max_dense_dimension: Option<usize>,
    tolerances: ToleranceSection,
    line_search: LineSearchSection,
    lbfgs: LbfgsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ToleranceSection {
    energy: Option<f64>,
    force: Option<f64>,
    position: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LineSearchSection {
    tolerance: Option<f64>,
    max_iterations: Option<usize>,
    initial_step: Option<f64>,
    adaptive: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LbfgsSection {
    corrections: Option<usize>,
    initial_hessian_scale: Option<InitialHessianScale>,
}

fn parse_toml(content: &str, path: &str) -> Result<OptimizerConfig, ConfigLoadError> {
    let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigLoadError::Toml {
        path: path.to_string(),
        source: e,
    })?;
    Ok(file.into_builder()?.build()?)
}

impl ConfigFile {
    fn into_builder(self) -> Result<OptimizerConfigBuilder, ConfigError> {
        let mut builder = OptimizerConfigBuilder::new();
        if let Some(name) = self.algorithm {
            builder = builder.algorithm(name.parse()?);
        }
        builder.max_step = self.max_step;
        builder.external_pressure = self.external_pressure;
        builder.fixed_atoms = self.fixed_atoms;
        builder.max_dense_dimension = self.max_dense_dimension;
        builder.energy_tolerance = self.tolerances.energy;
        builder.force_tolerance = self.tolerances.force;
        builder.position_tolerance = self.tolerances.position;
        builder.line_search_tolerance = self.line_search.tolerance;
        builder.line_search_max_iterations = self.line_search.max_iterations;
        builder.initial_step = self.line_search.initial_step;
        builder.adaptive_step = self.line_search.adaptive;
        builder.lbfgs_corrections = self.lbfgs.corrections;
        builder.initial_hessian_scale = self.lbfgs.initial_hessian_scale;
        Ok(builder)
    }
}
