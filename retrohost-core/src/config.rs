//! Frontend configuration.
//!
//! The runtime reads configuration through [`Config`]. [`Profile`] is the JSON-backed
//! implementation the binary loads from the command line:
//!
//! ```json
//! {
//!   "general": { "core": "cores/mednafen_psx_hw_libretro.so", "game": "games/ac1.cue", "fullscreen": false },
//!   "dirs": { "save": "saves", "system": "system", "autosave": "saves/auto" },
//!   "mouse": { "sensitivity_x": 4.0, "sensitivity_y": 2.5, "hack": "ac1" },
//!   "autosave": { "period_secs": 300 },
//!   "vars": { "beetle_psx_hw_renderer": "hardware" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::hacks::MouseHackProfile;

/// Read-only settings consumed by the runtime and the frontend.
pub trait Config {
    fn core_path(&self) -> &Path;
    fn game_path(&self) -> &Path;
    fn save_dir(&self) -> &Path;
    fn system_dir(&self) -> &Path;
    fn autosave_dir(&self) -> Option<&Path>;
    /// `None` disables periodic autosave.
    fn autosave_period(&self) -> Option<Duration>;
    fn fullscreen(&self) -> bool;
    /// Multipliers applied to relative mouse motion, `(x, y)`.
    fn mouse_sensitivity(&self) -> (f32, f32);
    fn mouse_hack(&self) -> MouseHackProfile;
    /// Core option value for `key`.
    fn variable(&self, key: &str) -> Option<&str>;
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile \"{}\": {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid profile: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("profile is missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct General {
    core: PathBuf,
    game: PathBuf,
    fullscreen: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Dirs {
    save: PathBuf,
    system: PathBuf,
    autosave: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Mouse {
    sensitivity_x: f32,
    sensitivity_y: f32,
    hack: MouseHackProfile,
}

impl Default for Mouse {
    fn default() -> Self {
        Self {
            sensitivity_x: 1.0,
            sensitivity_y: 1.0,
            hack: MouseHackProfile::None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Autosave {
    period_secs: u64,
}

/// JSON profile.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    general: General,
    dirs: Dirs,
    mouse: Mouse,
    autosave: Autosave,
    vars: BTreeMap<String, String>,
}

impl Profile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let profile = Self::from_json(&text)?;
        log::info!(
            "loaded profile \"{}\" ({} core variables)",
            path.display(),
            profile.vars.len()
        );
        Ok(profile)
    }

    pub fn from_json(text: &str) -> Result<Self, ProfileError> {
        let profile: Self = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<(), ProfileError> {
        let required = [
            ("general.core", &self.general.core),
            ("general.game", &self.general.game),
            ("dirs.save", &self.dirs.save),
            ("dirs.system", &self.dirs.system),
        ];
        match required.iter().find(|(_, path)| path.as_os_str().is_empty()) {
            Some((field, _)) => Err(ProfileError::MissingField(*field)),
            None => Ok(()),
        }
    }
}

impl Config for Profile {
    fn core_path(&self) -> &Path {
        &self.general.core
    }

    fn game_path(&self) -> &Path {
        &self.general.game
    }

    fn save_dir(&self) -> &Path {
        &self.dirs.save
    }

    fn system_dir(&self) -> &Path {
        &self.dirs.system
    }

    fn autosave_dir(&self) -> Option<&Path> {
        self.dirs.autosave.as_deref()
    }

    fn autosave_period(&self) -> Option<Duration> {
        match self.autosave.period_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn fullscreen(&self) -> bool {
        self.general.fullscreen
    }

    fn mouse_sensitivity(&self) -> (f32, f32) {
        (self.mouse.sensitivity_x, self.mouse.sensitivity_y)
    }

    fn mouse_hack(&self) -> MouseHackProfile {
        self.mouse.hack
    }

    fn variable(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}
