use serde::{Deserialize, Serialize};

/// Which concrete backend to initialize against. `Auto` prefers Vulkan and
/// falls back to OpenGL when instance creation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestedBackend {
    Auto,
    Vulkan,
    Gl,
}

impl Default for RequestedBackend {
    fn default() -> Self {
        RequestedBackend::Auto
    }
}

/// Engine-facing configuration, honored by the frame engine and the
/// backend driver. Matches the option set external collaborators are
/// expected to supply at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: RequestedBackend,
    pub enable_vsync: bool,
    pub adaptive_sync: bool,
    /// -1 = uncapped.
    pub frame_rate_limit: i32,
    pub msaa_samples: u8,
    pub anisotropy_level: u8,
    pub shadow_msaa_samples: u8,
    /// -1 = auto-detect from available cores.
    pub max_worker_threads: i32,
    pub use_pipeline_cache: bool,
    pub enable_api_debugging: bool,
    pub enable_api_best_practices: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: RequestedBackend::Auto,
            enable_vsync: true,
            adaptive_sync: false,
            frame_rate_limit: -1,
            msaa_samples: 0,
            anisotropy_level: 0,
            shadow_msaa_samples: 0,
            max_worker_threads: -1,
            use_pipeline_cache: true,
            enable_api_debugging: cfg!(debug_assertions),
            enable_api_best_practices: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.msaa_samples, 0 | 2 | 4 | 8) {
            return Err(format!("msaa_samples must be 0, 2, 4, or 8, got {}", self.msaa_samples));
        }
        if self.anisotropy_level > 16 {
            return Err(format!(
                "anisotropy_level must be 0..=16, got {}",
                self.anisotropy_level
            ));
        }
        if self.shadow_msaa_samples > 8 {
            return Err(format!(
                "shadow_msaa_samples must be 0..=8, got {}",
                self.shadow_msaa_samples
            ));
        }
        Ok(())
    }
}
