//! # World Configuration
//!
//! Capacity settings for new worlds.
//!
//! A process-wide default is kept behind a lock so that
//! [`set_default_size`] can be called at startup. Each world copies the
//! default exactly once, in [`World::new`](crate::World::new); changing the
//! default later never affects worlds that already exist.
//!
//! ```toml
//! default_size = 4096
//!
//! [capacity_policy]
//! kind = "grow"
//! max_capacity = 1048576
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{EcsError, EcsResult};

/// Capacity used when nothing else has been configured.
pub const DEFAULT_SIZE: usize = 100_000;

/// What a world does when allocation would exceed its capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Capacity never changes. Allocation past it fails with
    /// [`EcsError::CapacityExceeded`].
    #[default]
    Fixed,
    /// Capacity doubles on demand, up to `max_capacity`. Every column and
    /// bit-vector is reallocated and existing data is copied.
    Grow {
        /// Hard ceiling on growth.
        max_capacity: usize,
    },
}

/// Settings captured by a world at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Initial entity capacity.
    pub default_size: usize,
    /// Behavior when the capacity is reached.
    pub capacity_policy: CapacityPolicy,
}

impl WorldConfig {
    /// The built-in configuration.
    pub const DEFAULT: Self = Self {
        default_size: DEFAULT_SIZE,
        capacity_policy: CapacityPolicy::Fixed,
    };

    /// Creates a fixed-capacity configuration.
    #[must_use]
    pub const fn fixed(size: usize) -> Self {
        Self {
            default_size: size,
            capacity_policy: CapacityPolicy::Fixed,
        }
    }

    /// Creates a growable configuration.
    #[must_use]
    pub const fn growable(size: usize, max_capacity: usize) -> Self {
        Self {
            default_size: size,
            capacity_policy: CapacityPolicy::Grow { max_capacity },
        }
    }

    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if the text does not parse or
    /// the values are inconsistent.
    pub fn from_toml_str(text: &str) -> EcsResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| EcsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can back a world.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] when `default_size` is zero or
    /// exceeds the id space, or when a growth ceiling sits below it.
    pub fn validate(&self) -> EcsResult<()> {
        if self.default_size == 0 {
            return Err(EcsError::InvalidConfig(
                "default_size must be greater than zero".into(),
            ));
        }
        if self.default_size > u32::MAX as usize {
            return Err(EcsError::InvalidConfig(
                "default_size cannot exceed u32::MAX".into(),
            ));
        }
        if let CapacityPolicy::Grow { max_capacity } = self.capacity_policy {
            if max_capacity < self.default_size {
                return Err(EcsError::InvalidConfig(format!(
                    "max_capacity {max_capacity} is below default_size {}",
                    self.default_size
                )));
            }
            if max_capacity > u32::MAX as usize {
                return Err(EcsError::InvalidConfig(
                    "max_capacity cannot exceed u32::MAX".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

static DEFAULTS: RwLock<WorldConfig> = parking_lot::const_rwlock(WorldConfig::DEFAULT);

/// Sets the capacity used by worlds created after this call.
///
/// # Errors
///
/// Returns [`EcsError::InvalidConfig`] if `size` is zero or the resulting
/// configuration is inconsistent with the current growth ceiling.
pub fn set_default_size(size: usize) -> EcsResult<()> {
    let mut defaults = DEFAULTS.write();
    let candidate = WorldConfig {
        default_size: size,
        ..*defaults
    };
    candidate.validate()?;
    *defaults = candidate;
    Ok(())
}

/// Replaces the process-wide default configuration.
///
/// # Errors
///
/// Returns [`EcsError::InvalidConfig`] if the configuration fails validation.
pub fn set_default_config(config: WorldConfig) -> EcsResult<()> {
    config.validate()?;
    *DEFAULTS.write() = config;
    Ok(())
}

/// Returns a copy of the current process-wide default configuration.
#[must_use]
pub fn default_config() -> WorldConfig {
    *DEFAULTS.read()
}
