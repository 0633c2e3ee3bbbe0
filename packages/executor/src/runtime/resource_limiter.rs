// packages/executor/src/runtime/resource_limiter.rs
//! Resource limits for execution containers
//!
//! Provides control over:
//! - Memory ceiling (engine size string, e.g. "512m", "2g")
//! - CPU quota (fractional CPUs)
//! - Network access (disabled for task containers)

use serde::{Deserialize, Serialize};

/// Resource limits applied to one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling
    /// Example: "2g" = 2 GiB hard limit
    pub memory: Option<String>,

    /// CPU quota in CPUs
    /// Example: 0.5 = half of one core
    pub cpus: Option<f64>,

    /// Run with `--network none`
    pub network_disabled: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: Some("2g".to_string()),
            cpus: Some(1.0),
            network_disabled: true,
        }
    }
}

impl ResourceLimits {
    /// Validate resource limits
    pub fn validate(&self) -> Result<(), String> {
        if let Some(memory) = &self.memory {
            let bytes = parse_memory_bytes(memory)
                .ok_or_else(|| format!("Invalid memory limit '{}'", memory))?;
            if bytes < 6 * 1024 * 1024 {
                // container engines refuse anything below 6MB
                return Err("Memory limit cannot be less than 6MB".to_string());
            }
        }

        if let Some(cpus) = self.cpus {
            if !(cpus > 0.0) {
                return Err("CPU limit must be positive".to_string());
            }
            if cpus > 64.0 {
                return Err("CPU limit cannot exceed 64 CPUs".to_string());
            }
        }

        Ok(())
    }

    /// Container engine flags for these limits
    pub fn to_engine_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(memory) = &self.memory {
            args.push("--memory".to_string());
            args.push(memory.clone());
            // no swap beyond the ceiling
            args.push("--memory-swap".to_string());
            args.push(memory.clone());
        }

        if let Some(cpus) = self.cpus {
            args.push("--cpus".to_string());
            args.push(format!("{}", cpus));
        }

        if self.network_disabled {
            args.push("--network".to_string());
            args.push("none".to_string());
        }

        args
    }
}

/// Parse an engine size string ("512m", "2g", "1024k", "1048576") into bytes
pub fn parse_memory_bytes(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let value = value.strip_suffix('b').unwrap_or(&value);

    let (digits, multiplier) = match value.chars().last()? {
        'k' => (&value[..value.len() - 1], 1024u64),
        'm' => (&value[..value.len() - 1], 1024 * 1024),
        'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        c if c.is_ascii_digit() => (value, 1),
        _ => return None,
    };

    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
