//! Capability discovery
//!
//! Probes each backend once and records whether it is usable, so callers
//! branch on an enum instead of poking at bridges that may not exist.
//!
//! Ambient light and keyboard backlight each have two sources. The light
//! sensor controller is tried first; when it is missing (or, for the
//! keyboard, has no LED) the private client bridges are used instead.

use crate::ambient::{AmbientLightBridge, AmbientLightConfig};
use crate::display::DisplayBrightnessBridge;
use crate::keyboard::{KeyboardBrightnessBridge, KeyboardConfig};
use crate::lmu::{LmuAmbientBridge, LmuKeyboardBridge};
use crate::platform::{Platform, SystemPlatform};
use crate::{BackendError, BackendState, NormalizedValue};

/// A backend that was either bound successfully or found missing
#[derive(Debug)]
pub enum SensorBackend<B> {
    Available(B),
    Unavailable(BackendError),
}

impl<B> SensorBackend<B> {
    pub fn is_available(&self) -> bool {
        matches!(self, SensorBackend::Available(_))
    }

    pub fn as_ref(&self) -> Option<&B> {
        match self {
            SensorBackend::Available(backend) => Some(backend),
            SensorBackend::Unavailable(_) => None,
        }
    }

    pub fn as_mut(&mut self) -> Option<&mut B> {
        match self {
            SensorBackend::Available(backend) => Some(backend),
            SensorBackend::Unavailable(_) => None,
        }
    }

    /// Why the backend is missing
    pub fn error(&self) -> Option<&BackendError> {
        match self {
            SensorBackend::Available(_) => None,
            SensorBackend::Unavailable(e) => Some(e),
        }
    }
}

/// Where ambient light readings come from
pub enum AmbientSensor<P: Platform> {
    /// Light sensor controller
    Lmu(LmuAmbientBridge<P>),
    /// Private ambient-light client over input events
    Hid(AmbientLightBridge<P>),
}

impl<P: Platform> AmbientSensor<P> {
    pub fn source(&self) -> &'static str {
        match self {
            AmbientSensor::Lmu(_) => "light sensor controller",
            AmbientSensor::Hid(_) => "ambient light service",
        }
    }

    pub fn state(&self) -> BackendState {
        match self {
            AmbientSensor::Lmu(sensor) => sensor.state(),
            AmbientSensor::Hid(sensor) => sensor.state(),
        }
    }

    pub fn read(&self) -> Result<NormalizedValue, BackendError> {
        match self {
            AmbientSensor::Lmu(sensor) => sensor.read(),
            AmbientSensor::Hid(sensor) => sensor.read(),
        }
    }

    pub fn shutdown(&mut self) {
        match self {
            AmbientSensor::Lmu(sensor) => sensor.shutdown(),
            AmbientSensor::Hid(sensor) => sensor.shutdown(),
        }
    }
}

/// Where keyboard backlight control comes from
pub enum KeyboardBacklight<P: Platform> {
    /// Keyboard LED on the light sensor controller
    Lmu(LmuKeyboardBridge<P>),
    /// Private backlight-control client
    CoreBrightness(KeyboardBrightnessBridge<P>),
}

impl<P: Platform> KeyboardBacklight<P> {
    pub fn source(&self) -> &'static str {
        match self {
            KeyboardBacklight::Lmu(_) => "light sensor controller",
            KeyboardBacklight::CoreBrightness(_) => "backlight service",
        }
    }

    pub fn state(&self) -> BackendState {
        match self {
            KeyboardBacklight::Lmu(keyboard) => keyboard.state(),
            KeyboardBacklight::CoreBrightness(keyboard) => keyboard.state(),
        }
    }

    /// Pure capability check, never changes the brightness
    pub fn is_available(&self) -> bool {
        match self {
            KeyboardBacklight::Lmu(keyboard) => keyboard.is_available(),
            KeyboardBacklight::CoreBrightness(keyboard) => keyboard.is_available(),
        }
    }

    pub fn get(&self) -> Result<NormalizedValue, BackendError> {
        match self {
            KeyboardBacklight::Lmu(keyboard) => keyboard.get(),
            KeyboardBacklight::CoreBrightness(keyboard) => keyboard.get(),
        }
    }

    pub fn brightness_or_unavailable(&self) -> NormalizedValue {
        self.get().unwrap_or(NormalizedValue::UNAVAILABLE)
    }

    pub fn set(&self, value: f32) -> Result<(), BackendError> {
        match self {
            KeyboardBacklight::Lmu(keyboard) => keyboard.set(value),
            KeyboardBacklight::CoreBrightness(keyboard) => keyboard.set(value),
        }
    }

    pub fn shutdown(&mut self) {
        match self {
            KeyboardBacklight::Lmu(keyboard) => keyboard.shutdown(),
            KeyboardBacklight::CoreBrightness(keyboard) => keyboard.shutdown(),
        }
    }
}

/// The set of backends found on this machine
pub struct Capabilities<P: Platform = SystemPlatform> {
    pub ambient: SensorBackend<AmbientSensor<P>>,
    pub keyboard: SensorBackend<KeyboardBacklight<P>>,
    pub display: DisplayBrightnessBridge<P>,
}

impl Capabilities<SystemPlatform> {
    /// Probe the running system with default module locations
    pub fn detect() -> Self {
        Self::probe(
            SystemPlatform,
            AmbientLightConfig::default(),
            KeyboardConfig::default(),
        )
    }
}

impl<P: Platform> Capabilities<P> {
    /// Initialize every backend once. Backends fail independently.
    pub fn probe(platform: P, ambient: AmbientLightConfig, keyboard: KeyboardConfig) -> Self {
        tracing::info!("Probing brightness backends...");

        let ambient = Self::probe_ambient(&platform, ambient);
        let keyboard = Self::probe_keyboard(&platform, keyboard);

        let mut display = DisplayBrightnessBridge::new(platform);
        // Always succeeds; the parameter service needs no binding
        let _ = display.init();

        let capabilities = Self {
            ambient,
            keyboard,
            display,
        };
        tracing::info!(
            "Ambient sensor: {}, keyboard backlight: {}",
            capabilities
                .ambient
                .as_ref()
                .map_or("unavailable", |sensor| sensor.source()),
            capabilities
                .keyboard
                .as_ref()
                .map_or("unavailable", |keyboard| keyboard.source()),
        );
        capabilities
    }

    /// Controller first, then the private ambient-light client
    fn probe_ambient(platform: &P, config: AmbientLightConfig) -> SensorBackend<AmbientSensor<P>> {
        let mut lmu = LmuAmbientBridge::new(platform.clone());
        match lmu.init() {
            Ok(()) => return SensorBackend::Available(AmbientSensor::Lmu(lmu)),
            Err(e) => tracing::debug!("No light sensor controller: {}", e),
        }

        let mut hid = AmbientLightBridge::new(platform.clone(), config);
        match hid.init() {
            Ok(()) => SensorBackend::Available(AmbientSensor::Hid(hid)),
            Err(e) => SensorBackend::Unavailable(e),
        }
    }

    /// Controller keyboard LED first, then the private backlight client
    fn probe_keyboard(
        platform: &P,
        config: KeyboardConfig,
    ) -> SensorBackend<KeyboardBacklight<P>> {
        let mut lmu = LmuKeyboardBridge::new(platform.clone());
        match lmu.init() {
            Ok(()) => return SensorBackend::Available(KeyboardBacklight::Lmu(lmu)),
            Err(e) => tracing::debug!("No controller keyboard LED: {}", e),
        }

        let mut keyboard = KeyboardBrightnessBridge::new(platform.clone(), config);
        match keyboard.init() {
            Ok(()) => SensorBackend::Available(KeyboardBacklight::CoreBrightness(keyboard)),
            Err(e) => SensorBackend::Unavailable(e),
        }
    }

    pub fn sensor_available(&self) -> bool {
        self.ambient.is_available()
    }

    /// Bound and currently readable
    pub fn keyboard_available(&self) -> bool {
        self.keyboard.as_ref().is_some_and(|k| k.is_available())
    }

    /// One ambient sample, or `NotInitialized` when there is no sensor
    pub fn read_ambient(&self) -> Result<NormalizedValue, BackendError> {
        self.ambient
            .as_ref()
            .ok_or(BackendError::NotInitialized)?
            .read()
    }

    /// Shut down every available backend. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if let Some(ambient) = self.ambient.as_mut() {
            ambient.shutdown();
        }
        if let Some(keyboard) = self.keyboard.as_mut() {
            keyboard.shutdown();
        }
        self.display.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockPlatform};

    #[test]
    fn test_probe_all_available() {
        let platform = MockPlatform::new().with_sensor_value(Some(0.5));
        let caps = Capabilities::probe(
            platform.clone(),
            AmbientLightConfig::default(),
            KeyboardConfig::default(),
        );

        assert!(caps.sensor_available());
        assert!(caps.keyboard_available());
        assert_eq!(caps.read_ambient().unwrap().value(), 0.5);
        assert_eq!(caps.display.state(), BackendState::Ready);
    }

    #[test]
    fn test_backends_fail_independently() {
        let ambient = AmbientLightConfig::default();
        let platform = MockPlatform::new().without_module(&ambient.sensor_module);
        let caps = Capabilities::probe(platform.clone(), ambient, KeyboardConfig::default());

        assert!(!caps.sensor_available());
        assert!(matches!(
            caps.ambient.error(),
            Some(BackendError::ModuleLoadFailed { .. })
        ));
        assert_eq!(caps.read_ambient().unwrap_err(), BackendError::NotInitialized);
        assert!(caps.keyboard_available());
    }

    #[test]
    fn test_keyboard_unavailable_only() {
        let platform = MockPlatform::new().with_failing_keyboard_bind();
        let caps = Capabilities::probe(
            platform.clone(),
            AmbientLightConfig::default(),
            KeyboardConfig::default(),
        );

        assert!(caps.sensor_available());
        assert!(!caps.keyboard_available());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let platform = MockPlatform::new();
        let mut caps = Capabilities::probe(
            platform.clone(),
            AmbientLightConfig::default(),
            KeyboardConfig::default(),
        );
        assert!(platform.outstanding() > 0);

        caps.shutdown();
        assert_eq!(platform.outstanding(), 0);

        caps.shutdown();
        assert_eq!(platform.outstanding(), 0);
    }

    #[test]
    fn test_controller_preferred_for_both() {
        let platform = MockPlatform::new()
            .with_lmu(1000, 1000)
            .with_lmu_keyboard(4095);
        let caps = Capabilities::probe(
            platform.clone(),
            AmbientLightConfig::default(),
            KeyboardConfig::default(),
        );

        assert!(matches!(caps.ambient, SensorBackend::Available(AmbientSensor::Lmu(_))));
        assert!(matches!(caps.keyboard, SensorBackend::Available(KeyboardBacklight::Lmu(_))));
        assert_eq!(caps.read_ambient().unwrap().value(), 0.5);
        assert_eq!(caps.keyboard.as_ref().unwrap().get().unwrap().value(), 1.0);

        // Neither private client is touched
        let calls = platform.calls();
        assert!(!calls.iter().any(|c| matches!(c, MockCall::LoadModule(_))));
    }

    #[test]
    fn test_controller_without_led_falls_back_for_keyboard() {
        let platform = MockPlatform::new()
            .with_lmu(0, 0)
            .with_keyboard_brightness(0.3);
        let caps = Capabilities::probe(
            platform.clone(),
            AmbientLightConfig::default(),
            KeyboardConfig::default(),
        );

        assert!(matches!(caps.ambient, SensorBackend::Available(AmbientSensor::Lmu(_))));
        let keyboard = caps.keyboard.as_ref().unwrap();
        assert!(matches!(keyboard, KeyboardBacklight::CoreBrightness(_)));
        assert!((keyboard.get().unwrap().value() - 0.3).abs() < f32::EPSILON);
        assert!(platform.calls().contains(&MockCall::BindKeyboard(1)));
    }

    #[test]
    fn test_no_controller_uses_private_clients() {
        let platform = MockPlatform::new().with_sensor_value(Some(0.75));
        let caps = Capabilities::probe(
            platform.clone(),
            AmbientLightConfig::default(),
            KeyboardConfig::default(),
        );

        let sensor = caps.ambient.as_ref().unwrap();
        assert!(matches!(sensor, AmbientSensor::Hid(_)));
        assert_eq!(sensor.source(), "ambient light service");
        assert_eq!(sensor.read().unwrap().value(), 0.75);
        assert!(matches!(
            caps.keyboard,
            SensorBackend::Available(KeyboardBacklight::CoreBrightness(_))
        ));
        assert!(!platform.calls().contains(&MockCall::OpenLmu));
    }

    #[test]
    fn test_nothing_present() {
        let ambient = AmbientLightConfig::default();
        let keyboard = KeyboardConfig::default();
        let platform = MockPlatform::new()
            .without_module(&ambient.sensor_module)
            .without_module(&keyboard.backlight_module);
        let caps = Capabilities::probe(platform.clone(), ambient, keyboard);

        assert!(!caps.sensor_available());
        assert!(!caps.keyboard_available());
        // The last backend tried is the one reported
        assert!(matches!(
            caps.ambient.error(),
            Some(BackendError::ModuleLoadFailed { .. })
        ));
        assert_eq!(platform.outstanding(), 0);
    }

    #[test]
    fn test_controller_shutdown_releases_everything() {
        let platform = MockPlatform::new().with_lmu(0, 0).with_lmu_keyboard(0);
        let mut caps = Capabilities::probe(
            platform.clone(),
            AmbientLightConfig::default(),
            KeyboardConfig::default(),
        );
        assert_eq!(platform.outstanding(), 2);

        caps.shutdown();
        assert_eq!(platform.outstanding(), 0);
        assert_eq!(
            caps.ambient.as_ref().map(|sensor| sensor.state()),
            Some(BackendState::Uninitialized)
        );
    }
}
