//! Run configuration.
//!
//! One TOML file describes a run: how to match, how to merge and how to read
//! the secondary source. Every section has defaults, so an empty file is a
//! valid configuration.
//!
//! ```toml
//! interactive = false
//!
//! [matching]
//! strategy = "key_then_fuzzy"
//! fuzzy_threshold = 0.4
//! tolerance = 2
//!
//! [merge]
//! mode = "correct"
//! correct_parts = ["issue", "page_range"]
//!
//! [source]
//! name = "cpc"
//! fulltext_template = "https://example.org/{id}.pdf"
//!
//! [filter]
//! max_year = 2008
//! ```

use crate::error::{ReconError, Result};
use crate::loader::SourceProfile;
use crate::matcher::MatchConfig;
use crate::merge::MergeConfig;
use crate::schema::MergeMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Records to leave alone regardless of match quality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Skip records published in or after this year
    pub max_year: Option<i32>,
}

/// Complete configuration of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub matching: MatchConfig,
    pub merge: MergeConfig,
    pub source: SourceProfile,
    pub filter: FilterConfig,
    /// Allow an attached operator to settle ambiguous matches
    pub interactive: bool,
}

impl RunConfig {
    /// Parse and validate a TOML document.
    ///
    /// Thresholds outside `[0.0, 1.0]` are clamped rather than rejected.
    pub fn from_toml(input: &str) -> Result<Self> {
        let mut config: RunConfig = toml::from_str(input)?;
        config.clamp_thresholds();
        config.validate()?;
        Ok(config)
    }

    /// Read a config file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml(&text)
    }

    /// `<config dir>/bibrecon/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bibrecon").join("config.toml"))
    }

    fn clamp_thresholds(&mut self) {
        let matching = &mut self.matching;
        matching.fuzzy_threshold = matching.fuzzy_threshold.clamp(0.0, 1.0);
        matching.confirm_key_threshold = matching.confirm_key_threshold.map(|t| t.clamp(0.0, 1.0));
    }

    pub fn validate(&self) -> Result<()> {
        if self.matching.fuzzy_threshold.is_nan() {
            return Err(ReconError::Config("fuzzy_threshold must be a number".into()));
        }
        if self.matching.confirm_key_threshold.is_some_and(f64::is_nan) {
            return Err(ReconError::Config("confirm_key_threshold must be a number".into()));
        }

        if self.merge.mode == MergeMode::Correct && self.merge.correct_parts.is_empty() {
            return Err(ReconError::Config(
                "merge mode \"correct\" needs at least one entry in correct_parts".into(),
            ));
        }

        if self.source.name.trim().is_empty() {
            return Err(ReconError::Config("source name must not be empty".into()));
        }
        if !self.source.delimiter.is_ascii() {
            return Err(ReconError::Config(format!(
                "delimiter {:?} is not ASCII",
                self.source.delimiter
            )));
        }
        if self.source.columns.title.is_none() {
            return Err(ReconError::Config("source columns must name a title".into()));
        }

        Ok(())
    }
}
