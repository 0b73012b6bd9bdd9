//! Tree and workload configuration.
//!
//! [`TreeConfig`] fixes the shape of one tree at construction. [`WorkloadConfig`]
//! drives the workload binary and is loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BPTREE_TASKS`: Number of concurrent tasks (default: `100`)
//! - `BPTREE_KEYS_PER_TASK`: Keys inserted by each task (default: `100`)
//! - `BPTREE_LEAF_SLOTS`: Maximum entries per leaf (default: `6`)
//! - `BPTREE_INNER_SLOTS`: Maximum children per inner node (default: `3`)
//! - `BPTREE_APPEND_MODE`: Optimise for increasing keys, `true/false/1/0` (default: `false`)
//!
//! # Invariants
//!
//! - `leaf_slots >= 2` and `inner_slots >= 3`, so every split leaves both halves non-empty

/// Shape of a tree.
///
/// # Post-conditions
///
/// When constructed via `new()`:
/// - `leaf_slots >= MIN_LEAF_SLOTS`
/// - `inner_slots >= MIN_INNER_SLOTS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum entries per leaf.
    leaf_slots: u16,
    /// Maximum children per inner node.
    inner_slots: u16,
    /// Check the last separator first and split right-biased at the end.
    append_mode: bool,
}

impl TreeConfig {
    pub const DEFAULT_LEAF_SLOTS: u16 = 256;
    pub const DEFAULT_INNER_SLOTS: u16 = 128;
    pub const MIN_LEAF_SLOTS: u16 = 2;
    pub const MIN_INNER_SLOTS: u16 = 3;

    /// Create a configuration with the given capacities and append mode off.
    ///
    /// # Errors
    ///
    /// Returns an error if a capacity is below its minimum.
    pub fn new(leaf_slots: u16, inner_slots: u16) -> Result<Self, ConfigError> {
        if leaf_slots < Self::MIN_LEAF_SLOTS {
            return Err(ConfigError::InvalidValue {
                name: "leaf_slots".to_string(),
                message: format!("{leaf_slots} is below the minimum of {}", Self::MIN_LEAF_SLOTS),
            });
        }
        if inner_slots < Self::MIN_INNER_SLOTS {
            return Err(ConfigError::InvalidValue {
                name: "inner_slots".to_string(),
                message: format!("{inner_slots} is below the minimum of {}", Self::MIN_INNER_SLOTS),
            });
        }
        Ok(Self {
            leaf_slots,
            inner_slots,
            append_mode: false,
        })
    }

    #[must_use]
    pub const fn with_append_mode(mut self, append_mode: bool) -> Self {
        self.append_mode = append_mode;
        self
    }

    #[must_use]
    pub const fn leaf_slots(&self) -> usize {
        self.leaf_slots as usize
    }

    #[must_use]
    pub const fn inner_slots(&self) -> usize {
        self.inner_slots as usize
    }

    #[must_use]
    pub const fn append_mode(&self) -> bool {
        self.append_mode
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            leaf_slots: Self::DEFAULT_LEAF_SLOTS,
            inner_slots: Self::DEFAULT_INNER_SLOTS,
            append_mode: false,
        }
    }
}

/// Workload driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    /// Number of concurrent insert tasks.
    pub tasks: usize,
    /// Keys inserted by each task, from a range disjoint from every other task.
    pub keys_per_task: usize,
    pub tree: TreeConfig,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl WorkloadConfig {
    pub const DEFAULT_TASKS: usize = 100;
    pub const DEFAULT_KEYS_PER_TASK: usize = 100;
    pub const DEFAULT_LEAF_SLOTS: u16 = 6;
    pub const DEFAULT_INNER_SLOTS: u16 = 3;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting tree shape is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Same as [`WorkloadConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tasks = load_number(&lookup, "BPTREE_TASKS", Self::DEFAULT_TASKS)?;
        let keys_per_task = load_number(&lookup, "BPTREE_KEYS_PER_TASK", Self::DEFAULT_KEYS_PER_TASK)?;
        let leaf_slots = load_number(&lookup, "BPTREE_LEAF_SLOTS", Self::DEFAULT_LEAF_SLOTS)?;
        let inner_slots = load_number(&lookup, "BPTREE_INNER_SLOTS", Self::DEFAULT_INNER_SLOTS)?;
        let append_mode = load_flag(&lookup, "BPTREE_APPEND_MODE")?;

        let tree = TreeConfig::new(leaf_slots, inner_slots)?.with_append_mode(append_mode);

        Ok(Self {
            tasks,
            keys_per_task,
            tree,
        })
    }

    /// Total number of keys the workload inserts.
    #[must_use]
    pub const fn total_keys(&self) -> usize {
        self.tasks.saturating_mul(self.keys_per_task)
    }
}

/// Parse a numeric variable, falling back to `default` when unset.
fn load_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a valid number"),
        }),
        None => Ok(default),
    }
}

/// Parse a boolean variable, `false` when unset.
fn load_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<bool, ConfigError> {
    match lookup(name).as_deref().map(str::trim) {
        None | Some("false" | "0") => Ok(false),
        Some("true" | "1") => Ok(true),
        Some(other) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{other}' is not one of true, false, 1, 0"),
        }),
    }
}
