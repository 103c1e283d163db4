//! Light sensor controller
//!
//! Older machines expose the ambient light sensor and the keyboard LED through
//! a single controller service driven by scalar method calls. When the
//! controller is present it is preferred over the input-event sensor and the
//! backlight-control client; see [`crate::Capabilities::probe`].
//!
//! Sensor readings are two raw channels (left and right) with
//! [`LMU_SENSOR_FULL_SCALE`] as full brightness. The keyboard LED is a 12-bit
//! register.

use crate::platform::SystemPlatform;
use crate::{BackendError, BackendState, NormalizedValue};

/// Controller service class
pub const LMU_SERVICE_CLASS: &str = "AppleLMUController";

/// Scalar method selectors
pub const LMU_GET_SENSOR_READING: u32 = 0;
pub const LMU_GET_LED_BRIGHTNESS: u32 = 1;
pub const LMU_SET_LED_BRIGHTNESS: u32 = 2;

/// Sensor channel value read as full brightness
pub const LMU_SENSOR_FULL_SCALE: f32 = 2000.0;

/// LED register value for full brightness
pub const LMU_LED_FULL_SCALE: f32 = 4095.0;

/// LED index of the built-in keyboard
const KEYBOARD_LED: u64 = 0;

/// Open connection to the controller, closed when dropped
pub trait LmuConnection {
    /// Call a scalar method. Returns at most `output_count` outputs.
    fn call_scalar(
        &self,
        selector: u32,
        inputs: &[u64],
        output_count: usize,
    ) -> Result<Vec<u64>, BackendError>;
}

/// Opens connections to the controller service
pub trait LmuService {
    /// Fails when the controller is not present on this machine.
    fn open_lmu(&self) -> Result<Box<dyn LmuConnection>, BackendError>;
}

/// Average of both sensor channels, clamped to `[0.0, 1.0]`
pub fn normalize_lmu_reading(left: u64, right: u64) -> f32 {
    let left = left as f32 / LMU_SENSOR_FULL_SCALE;
    let right = right as f32 / LMU_SENSOR_FULL_SCALE;
    ((left + right) / 2.0).clamp(0.0, 1.0)
}

/// Brightness fraction for an LED register value
pub fn led_to_level(raw: u64) -> f32 {
    raw as f32 / LMU_LED_FULL_SCALE
}

/// LED register value for a brightness fraction.
///
/// The register is integral, so the fraction is clamped to `[0.0, 1.0]`
/// before scaling. NaN maps to 0.
pub fn level_to_led(value: f32) -> u64 {
    (value.clamp(0.0, 1.0) * LMU_LED_FULL_SCALE) as u64
}

fn read_led(connection: &dyn LmuConnection) -> Result<f32, BackendError> {
    let outputs = connection.call_scalar(LMU_GET_LED_BRIGHTNESS, &[KEYBOARD_LED], 1)?;
    outputs
        .first()
        .map(|&raw| led_to_level(raw))
        .ok_or(BackendError::NoData)
}

/// Connection and lifecycle shared by both controller bridges
struct LmuLink<P: LmuService> {
    platform: P,
    state: BackendState,
    connection: Option<Box<dyn LmuConnection>>,
}

impl<P: LmuService> LmuLink<P> {
    fn new(platform: P) -> Self {
        Self {
            platform,
            state: BackendState::Uninitialized,
            connection: None,
        }
    }

    /// Open the controller and keep the connection if `check` accepts it
    fn open(
        &mut self,
        name: &str,
        check: impl FnOnce(&dyn LmuConnection) -> Result<(), BackendError>,
    ) -> Result<(), BackendError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let opened = self.platform.open_lmu().and_then(|connection| {
            check(&*connection)?;
            Ok(connection)
        });

        match opened {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = BackendState::Ready;
                tracing::info!("{} ready", name);
                Ok(())
            }
            Err(e) => {
                self.state = BackendState::Unavailable;
                tracing::debug!("{} unavailable: {}", name, e);
                Err(e)
            }
        }
    }

    fn connection(&self) -> Result<&dyn LmuConnection, BackendError> {
        self.connection
            .as_deref()
            .ok_or(BackendError::NotInitialized)
    }

    fn close(&mut self, name: &str) {
        if self.connection.take().is_some() {
            tracing::info!("{} shut down", name);
        }
        self.state = BackendState::Uninitialized;
    }
}

/// Ambient light through the sensor controller
pub struct LmuAmbientBridge<P: LmuService = SystemPlatform> {
    link: LmuLink<P>,
}

impl LmuAmbientBridge<SystemPlatform> {
    pub fn system() -> Self {
        Self::new(SystemPlatform)
    }
}

impl<P: LmuService> LmuAmbientBridge<P> {
    const NAME: &'static str = "Light sensor controller";

    pub fn new(platform: P) -> Self {
        Self {
            link: LmuLink::new(platform),
        }
    }

    pub fn state(&self) -> BackendState {
        self.link.state
    }

    /// Open the controller. A no-op when already ready.
    pub fn init(&mut self) -> Result<(), BackendError> {
        self.link.open(Self::NAME, |_| Ok(()))
    }

    /// One sample, normalized to `[0.0, 1.0]`
    pub fn read(&self) -> Result<NormalizedValue, BackendError> {
        let connection = self.link.connection()?;
        let outputs = connection.call_scalar(LMU_GET_SENSOR_READING, &[], 2)?;
        match outputs[..] {
            [left, right, ..] => {
                let value = normalize_lmu_reading(left, right);
                tracing::trace!("Controller channels {}/{} -> {}", left, right, value);
                Ok(NormalizedValue::new(value))
            }
            _ => Err(BackendError::NoData),
        }
    }

    /// Close the connection. Always safe to call.
    pub fn shutdown(&mut self) {
        self.link.close(Self::NAME);
    }
}

/// Keyboard LED through the sensor controller
pub struct LmuKeyboardBridge<P: LmuService = SystemPlatform> {
    link: LmuLink<P>,
}

impl LmuKeyboardBridge<SystemPlatform> {
    pub fn system() -> Self {
        Self::new(SystemPlatform)
    }
}

impl<P: LmuService> LmuKeyboardBridge<P> {
    const NAME: &'static str = "Controller keyboard LED";

    pub fn new(platform: P) -> Self {
        Self {
            link: LmuLink::new(platform),
        }
    }

    pub fn state(&self) -> BackendState {
        self.link.state
    }

    /// Open the controller and check it drives a keyboard LED.
    ///
    /// Controllers without one fail here, so callers can fall back to
    /// another backlight backend.
    pub fn init(&mut self) -> Result<(), BackendError> {
        self.link
            .open(Self::NAME, |connection| read_led(connection).map(|_| ()))
    }

    /// Whether the LED can be read right now. Only ever reads.
    pub fn is_available(&self) -> bool {
        self.link
            .connection()
            .is_ok_and(|connection| read_led(connection).is_ok())
    }

    pub fn get(&self) -> Result<NormalizedValue, BackendError> {
        let level = read_led(self.link.connection()?)?;
        Ok(NormalizedValue::new(level))
    }

    /// Current brightness, or the `-1.0` sentinel when it cannot be read
    pub fn brightness_or_unavailable(&self) -> NormalizedValue {
        self.get().unwrap_or(NormalizedValue::UNAVAILABLE)
    }

    /// Write the LED. Values outside `[0, 1]` are clamped to fit the register.
    pub fn set(&self, value: f32) -> Result<(), BackendError> {
        let connection = self.link.connection()?;
        let raw = level_to_led(value);
        connection.call_scalar(LMU_SET_LED_BRIGHTNESS, &[KEYBOARD_LED, raw], 1)?;
        tracing::debug!("Keyboard LED set to {}", raw);
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.link.close(Self::NAME);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockPlatform};

    #[test]
    fn test_normalize_lmu_reading() {
        assert_eq!(normalize_lmu_reading(0, 0), 0.0);
        assert_eq!(normalize_lmu_reading(1000, 1000), 0.5);
        assert_eq!(normalize_lmu_reading(2000, 0), 0.5);
        assert_eq!(normalize_lmu_reading(4000, 4000), 1.0);
        assert_eq!(normalize_lmu_reading(u64::MAX, u64::MAX), 1.0);
    }

    #[test]
    fn test_led_conversion() {
        assert_eq!(led_to_level(0), 0.0);
        assert_eq!(led_to_level(4095), 1.0);
        assert_eq!(level_to_led(1.0), 4095);
        assert_eq!(level_to_led(0.5), 2047);
        assert_eq!(level_to_led(1.5), 4095);
        assert_eq!(level_to_led(-0.2), 0);
        assert_eq!(level_to_led(f32::NAN), 0);
    }

    #[test]
    fn test_ambient_read() {
        let platform = MockPlatform::new().with_lmu(500, 1500);
        let mut sensor = LmuAmbientBridge::new(platform.clone());

        sensor.init().unwrap();
        assert_eq!(sensor.state(), BackendState::Ready);
        assert_eq!(sensor.read().unwrap().value(), 0.5);
        assert!(
            platform
                .calls()
                .contains(&MockCall::LmuCall(LMU_GET_SENSOR_READING, vec![]))
        );
    }

    #[test]
    fn test_ambient_absent_controller() {
        let platform = MockPlatform::new();
        let mut sensor = LmuAmbientBridge::new(platform.clone());

        assert!(sensor.init().unwrap_err().is_unavailable());
        assert_eq!(sensor.state(), BackendState::Unavailable);
        assert_eq!(sensor.read().unwrap_err(), BackendError::NotInitialized);
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_init_is_idempotent_and_shutdown_closes() {
        let platform = MockPlatform::new().with_lmu(0, 0);
        let mut sensor = LmuAmbientBridge::new(platform.clone());

        sensor.init().unwrap();
        sensor.init().unwrap();
        assert_eq!(platform.calls(), vec![MockCall::OpenLmu]);

        sensor.shutdown();
        sensor.shutdown();
        assert_eq!(platform.calls(), vec![MockCall::OpenLmu, MockCall::CloseLmu]);
        assert_eq!(sensor.state(), BackendState::Uninitialized);
    }

    #[test]
    fn test_keyboard_get_and_set() {
        let platform = MockPlatform::new().with_lmu(0, 0).with_lmu_keyboard(4095);
        let mut keyboard = LmuKeyboardBridge::new(platform.clone());

        keyboard.init().unwrap();
        assert!(keyboard.is_available());
        assert_eq!(keyboard.get().unwrap().value(), 1.0);

        keyboard.set(0.5).unwrap();
        assert!(
            platform
                .calls()
                .contains(&MockCall::LmuCall(LMU_SET_LED_BRIGHTNESS, vec![0, 2047]))
        );
        assert!((keyboard.get().unwrap().value() - 2047.0 / 4095.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_keyboard_without_led_closes_connection() {
        let platform = MockPlatform::new().with_lmu(0, 0);
        let mut keyboard = LmuKeyboardBridge::new(platform.clone());

        assert!(keyboard.init().is_err());
        assert_eq!(keyboard.state(), BackendState::Unavailable);
        assert!(!keyboard.is_available());
        assert_eq!(keyboard.brightness_or_unavailable(), NormalizedValue::UNAVAILABLE);
        assert_eq!(platform.outstanding(), 0);
    }

    #[test]
    fn test_keyboard_probe_is_pure() {
        let platform = MockPlatform::new().with_lmu(0, 0).with_lmu_keyboard(1000);
        let mut keyboard = LmuKeyboardBridge::new(platform.clone());
        keyboard.init().unwrap();

        let before = keyboard.get().unwrap();
        for _ in 0..5 {
            assert!(keyboard.is_available());
        }
        assert_eq!(keyboard.get().unwrap(), before);
        assert!(
            !platform
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::LmuCall(LMU_SET_LED_BRIGHTNESS, _)))
        );
    }

    #[test]
    fn test_keyboard_requires_init() {
        let platform = MockPlatform::new().with_lmu(0, 0).with_lmu_keyboard(1000);
        let keyboard = LmuKeyboardBridge::new(platform.clone());

        assert_eq!(keyboard.get().unwrap_err(), BackendError::NotInitialized);
        assert_eq!(keyboard.set(0.2).unwrap_err(), BackendError::NotInitialized);
        assert!(platform.calls().is_empty());
    }
}
