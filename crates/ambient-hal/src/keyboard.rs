//! Keyboard backlight
//!
//! Controls the keyboard backlight through the private backlight-control
//! module. The module is loaded at runtime and handed to a [`KeyboardBinder`],
//! which produces the [`BacklightControl`] the bridge talks to.

use crate::loader::{ModuleLoader, ServiceHandle};
use crate::platform::SystemPlatform;
use crate::{BackendError, BackendState, NormalizedValue};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Module locations and target keyboard for the backlight bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    /// Private backlight-control module
    pub backlight_module: PathBuf,
    /// Object runtime used to talk to the backlight client
    pub runtime_module: PathBuf,
    /// Keyboard identifier, 1 is the built-in keyboard
    pub keyboard_id: u64,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            backlight_module: PathBuf::from(
                "/System/Library/PrivateFrameworks/CoreBrightness.framework/CoreBrightness",
            ),
            runtime_module: PathBuf::from("/usr/lib/libobjc.A.dylib"),
            keyboard_id: 1,
        }
    }
}

/// Bound backlight entry points
pub trait BacklightControl {
    /// Current brightness, negative when the service cannot tell
    fn brightness(&self) -> f32;

    /// Apply a brightness, returning whether the service accepted it
    fn set_brightness(&self, value: f32) -> bool;
}

/// Binds backlight control out of a loaded backlight module
pub trait KeyboardBinder {
    /// The returned control is always dropped before `module`.
    fn bind_keyboard(
        &self,
        module: &ServiceHandle,
        config: &KeyboardConfig,
    ) -> Result<Box<dyn BacklightControl>, BackendError>;
}

// Control first, so it is released while its module is still loaded.
struct BacklightSession {
    control: Box<dyn BacklightControl>,
    #[allow(dead_code)] // held for its lifetime only
    module: ServiceHandle,
}

/// Keyboard backlight backend bridge
pub struct KeyboardBrightnessBridge<P = SystemPlatform>
where
    P: ModuleLoader + KeyboardBinder,
{
    platform: P,
    config: KeyboardConfig,
    state: BackendState,
    session: Option<BacklightSession>,
}

impl KeyboardBrightnessBridge<SystemPlatform> {
    /// Bridge bound to the running system with default module locations
    pub fn system() -> Self {
        Self::new(SystemPlatform, KeyboardConfig::default())
    }
}

impl<P> KeyboardBrightnessBridge<P>
where
    P: ModuleLoader + KeyboardBinder,
{
    pub fn new(platform: P, config: KeyboardConfig) -> Self {
        Self {
            platform,
            config,
            state: BackendState::Uninitialized,
            session: None,
        }
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    pub fn config(&self) -> &KeyboardConfig {
        &self.config
    }

    /// Bind the backlight. A no-op when already ready.
    pub fn init(&mut self) -> Result<(), BackendError> {
        if self.session.is_some() {
            return Ok(());
        }

        let result = self.platform.load(&self.config.backlight_module).and_then(|module| {
            let control = self.platform.bind_keyboard(&module, &self.config)?;
            Ok(BacklightSession { control, module })
        });

        match result {
            Ok(session) => {
                self.session = Some(session);
                self.state = BackendState::Ready;
                tracing::info!("Keyboard backlight {} ready", self.config.keyboard_id);
                Ok(())
            }
            Err(e) => {
                self.state = BackendState::Unavailable;
                tracing::warn!("Keyboard backlight unavailable: {}", e);
                Err(e)
            }
        }
    }

    /// Whether the backlight can be read right now.
    ///
    /// Only ever reads; never fails. False whenever the bridge is not ready.
    pub fn is_available(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.control.brightness() >= 0.0)
    }

    /// Current brightness as reported by the service
    pub fn get(&self) -> Result<NormalizedValue, BackendError> {
        let session = self.session.as_ref().ok_or(BackendError::NotInitialized)?;
        let value = session.control.brightness();
        if value < 0.0 || value.is_nan() {
            return Err(BackendError::NoData);
        }
        Ok(NormalizedValue::new(value))
    }

    /// Current brightness, or the `-1.0` sentinel when it cannot be read
    pub fn brightness_or_unavailable(&self) -> NormalizedValue {
        self.get().unwrap_or(NormalizedValue::UNAVAILABLE)
    }

    /// Apply `value` as-is. Keeping it within `[0, 1]` is up to the caller.
    pub fn set(&self, value: f32) -> Result<(), BackendError> {
        let session = self.session.as_ref().ok_or(BackendError::NotInitialized)?;
        if session.control.set_brightness(value) {
            tracing::debug!("Keyboard brightness set to {}", value);
            Ok(())
        } else {
            Err(BackendError::ParameterQueryFailed(format!(
                "keyboard {} rejected brightness {}",
                self.config.keyboard_id, value
            )))
        }
    }

    /// Release the control and the module. Always safe to call.
    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            tracing::info!("Keyboard backlight shut down");
        }
        self.state = BackendState::Uninitialized;
    }
}

impl<P> Drop for KeyboardBrightnessBridge<P>
where
    P: ModuleLoader + KeyboardBinder,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockPlatform};

    fn bridge(platform: &MockPlatform) -> KeyboardBrightnessBridge<MockPlatform> {
        KeyboardBrightnessBridge::new(platform.clone(), KeyboardConfig::default())
    }

    #[test]
    fn test_config_default() {
        let config = KeyboardConfig::default();
        assert_eq!(config.keyboard_id, 1);
        assert!(config.backlight_module.ends_with("CoreBrightness"));
    }

    #[test]
    fn test_get_and_set() {
        let platform = MockPlatform::new().with_keyboard_brightness(0.4);
        let mut keyboard = bridge(&platform);
        keyboard.init().unwrap();

        assert!(keyboard.is_available());
        assert!((keyboard.get().unwrap().value() - 0.4).abs() < f32::EPSILON);

        keyboard.set(0.8).unwrap();
        assert!((keyboard.get().unwrap().value() - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_set_does_not_clamp() {
        let platform = MockPlatform::new();
        let mut keyboard = bridge(&platform);
        keyboard.init().unwrap();

        keyboard.set(1.5).unwrap();
        assert!(platform.calls().contains(&MockCall::KeyboardSet(1.5)));
    }

    #[test]
    fn test_zero_brightness_is_not_unavailable() {
        let platform = MockPlatform::new().with_keyboard_brightness(0.0);
        let mut keyboard = bridge(&platform);
        keyboard.init().unwrap();

        assert_eq!(keyboard.get().unwrap().value(), 0.0);
        assert!(keyboard.brightness_or_unavailable().is_available());
    }

    #[test]
    fn test_negative_reading_is_no_data() {
        let platform = MockPlatform::new().with_keyboard_brightness(-1.0);
        let mut keyboard = bridge(&platform);
        keyboard.init().unwrap();

        assert!(!keyboard.is_available());
        assert_eq!(keyboard.get().unwrap_err(), BackendError::NoData);
    }

    #[test]
    fn test_rejected_set() {
        let platform = MockPlatform::new().with_rejected_keyboard_writes();
        let mut keyboard = bridge(&platform);
        keyboard.init().unwrap();

        let err = keyboard.set(0.5).unwrap_err();
        assert!(matches!(err, BackendError::ParameterQueryFailed(_)));
    }

    #[test]
    fn test_unavailable_module() {
        let config = KeyboardConfig::default();
        let platform = MockPlatform::new().without_module(&config.backlight_module);
        let mut keyboard = bridge(&platform);

        assert!(keyboard.init().is_err());
        assert_eq!(keyboard.state(), BackendState::Unavailable);
        assert!(!keyboard.is_available());
        assert_eq!(keyboard.get().unwrap_err(), BackendError::NotInitialized);
        assert_eq!(keyboard.brightness_or_unavailable(), NormalizedValue::UNAVAILABLE);
        assert_eq!(keyboard.set(0.5).unwrap_err(), BackendError::NotInitialized);
    }

    #[test]
    fn test_bind_failure_unloads_module() {
        let platform = MockPlatform::new().with_failing_keyboard_bind();
        let mut keyboard = bridge(&platform);

        let err = keyboard.init().unwrap_err();
        assert!(matches!(err, BackendError::SymbolResolutionFailed { .. }));
        assert_eq!(keyboard.state(), BackendState::Unavailable);
        assert_eq!(platform.outstanding(), 0);
    }

    #[test]
    fn test_shutdown_releases_control_before_module() {
        let platform = MockPlatform::new();
        let mut keyboard = bridge(&platform);
        keyboard.init().unwrap();
        platform.clear_calls();

        keyboard.shutdown();

        assert_eq!(
            platform.calls(),
            vec![
                MockCall::UnbindKeyboard,
                MockCall::UnloadModule(KeyboardConfig::default().backlight_module),
            ]
        );
        assert_eq!(keyboard.state(), BackendState::Uninitialized);
    }
}
