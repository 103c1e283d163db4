//! Brightness Hardware Abstraction Layer
//!
//! Unified access to three hardware signals on a laptop: ambient light,
//! display backlight and keyboard backlight. Each is served by a different
//! platform subsystem, two of them private and present only on some hardware
//! generations, so every backend is discovered and bound at runtime and can be
//! missing independently of the others.
//!
//! # Backends
//!
//! - [`AmbientLightBridge`] - private ambient-light client plus input events
//! - [`DisplayBrightnessBridge`] - public display parameter service
//! - [`KeyboardBrightnessBridge`] - private backlight-control client
//! - [`LmuAmbientBridge`], [`LmuKeyboardBridge`] - light sensor controller on
//!   older hardware, preferred over the two private clients when present
//!
//! Each bridge moves through `Uninitialized -> Ready | Unavailable` on
//! `init`, and back to `Uninitialized` on `shutdown`. Calls are expected from
//! a single thread per bridge; there is no internal locking.
//!
//! # Example
//!
//! ```no_run
//! use ambient_hal::Capabilities;
//!
//! let mut caps = Capabilities::detect();
//! if caps.sensor_available() {
//!     match caps.read_ambient() {
//!         Ok(level) => println!("Ambient: {}", level),
//!         Err(e) => println!("No sample: {}", e),
//!     }
//! }
//! caps.shutdown();
//! ```

pub mod ambient;
pub mod backend;
pub mod capabilities;
pub mod display;
pub mod keyboard;
pub mod lmu;
pub mod loader;
pub mod mock;
pub mod platform;

pub use ambient::{AmbientLightBridge, AmbientLightConfig};
pub use backend::{BackendError, BackendState, NormalizedValue, normalize_ambient};
pub use capabilities::{AmbientSensor, Capabilities, KeyboardBacklight, SensorBackend};
pub use display::{DisplayBrightnessBridge, DisplayParameters, DisplayService, DisplayServices};
pub use keyboard::{BacklightControl, KeyboardBinder, KeyboardBrightnessBridge, KeyboardConfig};
pub use lmu::{LmuAmbientBridge, LmuConnection, LmuKeyboardBridge, LmuService};
pub use loader::{LibraryLoader, ModuleLoader, ObjectRelease, ResolvedSymbol, ServiceHandle};
pub use platform::{Platform, SystemPlatform};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_imports() {
        // Simple smoke test to ensure all modules can be imported
        let _ = std::mem::size_of::<AmbientLightBridge<mock::MockPlatform>>();
        let _ = std::mem::size_of::<KeyboardBrightnessBridge>();
    }

    #[test]
    fn test_configs_serialize() {
        let ambient = AmbientLightConfig::default();
        let json = serde_json::to_string(&ambient).unwrap();
        let parsed: AmbientLightConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(ambient, parsed);

        let partial: KeyboardConfig = toml::from_str("keyboard_id = 2").unwrap();
        assert_eq!(partial.keyboard_id, 2);
        assert_eq!(partial.backlight_module, KeyboardConfig::default().backlight_module);
    }
}
