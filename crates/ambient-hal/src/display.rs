//! Display backlight
//!
//! Gets and sets display brightness through the public display-parameter
//! service. Displays are addressed by caller-owned service handles; values
//! are passed through exactly as the service reports or accepts them.

use crate::platform::SystemPlatform;
use crate::{BackendError, BackendState, NormalizedValue};
use std::fmt;

/// Parameter key for display brightness
pub const BRIGHTNESS_KEY: &str = "brightness";

/// Opaque handle to one display-connection service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayService(pub u32);

impl fmt::Display for DisplayService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display service {:#x}", self.0)
    }
}

/// Display parameter service
pub trait DisplayParameters {
    fn get_float_parameter(&self, service: DisplayService, key: &str) -> Result<f32, BackendError>;

    fn set_float_parameter(
        &self,
        service: DisplayService,
        key: &str,
        value: f32,
    ) -> Result<(), BackendError>;

    /// Display-connection services currently attached. Each returned handle
    /// holds a reference that must be given back with [`Self::release_service`].
    fn display_services(&self) -> Result<Vec<DisplayService>, BackendError>;

    fn release_service(&self, service: DisplayService);
}

/// Display services owned by the caller, released on drop
pub struct DisplayServices<'a, P: DisplayParameters> {
    platform: &'a P,
    services: Vec<DisplayService>,
}

impl<'a, P: DisplayParameters> DisplayServices<'a, P> {
    /// Enumerate the attached displays
    pub fn matching(platform: &'a P) -> Result<Self, BackendError> {
        let services = platform.display_services()?;
        tracing::debug!("Found {} display service(s)", services.len());
        Ok(Self { platform, services })
    }

    pub fn iter(&self) -> impl Iterator<Item = DisplayService> + '_ {
        self.services.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl<P: DisplayParameters> Drop for DisplayServices<'_, P> {
    fn drop(&mut self) {
        for service in self.services.drain(..) {
            self.platform.release_service(service);
        }
    }
}

/// Display brightness backend bridge
pub struct DisplayBrightnessBridge<P: DisplayParameters = SystemPlatform> {
    platform: P,
    state: BackendState,
}

impl DisplayBrightnessBridge<SystemPlatform> {
    pub fn system() -> Self {
        Self::new(SystemPlatform)
    }
}

impl<P: DisplayParameters> DisplayBrightnessBridge<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            state: BackendState::Uninitialized,
        }
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Nothing to bind; the parameter service is always linked.
    pub fn init(&mut self) -> Result<(), BackendError> {
        self.state = BackendState::Ready;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), BackendError> {
        match self.state {
            BackendState::Ready => Ok(()),
            _ => Err(BackendError::NotInitialized),
        }
    }

    /// Brightness of one display, as reported by the service
    pub fn get(&self, service: DisplayService) -> Result<NormalizedValue, BackendError> {
        self.ensure_ready()?;
        let value = self.platform.get_float_parameter(service, BRIGHTNESS_KEY)?;
        Ok(NormalizedValue::new(value))
    }

    /// Write brightness to one display. Out of range values are passed
    /// through and the service decides what to do with them.
    pub fn set(&self, service: DisplayService, value: f32) -> Result<(), BackendError> {
        self.ensure_ready()?;
        self.platform.set_float_parameter(service, BRIGHTNESS_KEY, value)?;
        tracing::debug!("Brightness of {} set to {}", service, value);
        Ok(())
    }

    /// Brightness of the first display that answers
    pub fn get_first<Q: DisplayParameters>(
        &self,
        services: &DisplayServices<'_, Q>,
    ) -> Result<NormalizedValue, BackendError> {
        self.ensure_ready()?;
        let mut last_error = BackendError::NoData;
        for service in services.iter() {
            match self.get(service) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!("{}: {}", service, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Write brightness to every display. Succeeds if any display took it.
    pub fn set_all<Q: DisplayParameters>(
        &self,
        services: &DisplayServices<'_, Q>,
        value: f32,
    ) -> Result<usize, BackendError> {
        self.ensure_ready()?;
        let mut applied = 0;
        let mut last_error = BackendError::NoData;
        for service in services.iter() {
            match self.set(service, value) {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::debug!("{}: {}", service, e);
                    last_error = e;
                }
            }
        }
        if applied > 0 {
            Ok(applied)
        } else {
            Err(last_error)
        }
    }

    pub fn shutdown(&mut self) {
        self.state = BackendState::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockPlatform};

    #[test]
    fn test_get_and_set() {
        let platform = MockPlatform::new().with_display(1, 0.6);
        let mut display = DisplayBrightnessBridge::new(platform.clone());
        display.init().unwrap();

        let service = DisplayService(1);
        assert!((display.get(service).unwrap().value() - 0.6).abs() < f32::EPSILON);

        display.set(service, 0.3).unwrap();
        assert!((display.get(service).unwrap().value() - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_set_passes_out_of_range_through() {
        let platform = MockPlatform::new().with_display(1, 0.6);
        let mut display = DisplayBrightnessBridge::new(platform.clone());
        display.init().unwrap();

        display.set(DisplayService(1), 1.7).unwrap();
        assert_eq!(display.get(DisplayService(1)).unwrap().value(), 1.7);
    }

    #[test]
    fn test_unknown_service_fails() {
        let platform = MockPlatform::new();
        let mut display = DisplayBrightnessBridge::new(platform.clone());
        display.init().unwrap();

        let err = display.get(DisplayService(9)).unwrap_err();
        assert!(matches!(err, BackendError::ParameterQueryFailed(_)));
    }

    #[test]
    fn test_requires_init() {
        let platform = MockPlatform::new().with_display(1, 0.6);
        let display = DisplayBrightnessBridge::new(platform.clone());

        assert_eq!(display.get(DisplayService(1)).unwrap_err(), BackendError::NotInitialized);
        assert_eq!(display.set(DisplayService(1), 0.1).unwrap_err(), BackendError::NotInitialized);
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_services_released_on_drop() {
        let platform = MockPlatform::new().with_display(1, 0.2).with_display(2, 0.4);
        {
            let services = DisplayServices::matching(&platform).unwrap();
            assert_eq!(services.len(), 2);
        }
        let calls = platform.calls();
        assert!(calls.contains(&MockCall::ReleaseDisplayService(DisplayService(1))));
        assert!(calls.contains(&MockCall::ReleaseDisplayService(DisplayService(2))));
    }

    #[test]
    fn test_get_first_skips_failing_display() {
        let platform = MockPlatform::new().with_display(1, 0.2).with_display(2, 0.4);
        platform.fail_display(DisplayService(1));
        let mut display = DisplayBrightnessBridge::new(platform.clone());
        display.init().unwrap();

        let services = DisplayServices::matching(&platform).unwrap();
        assert!((display.get_first(&services).unwrap().value() - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_set_all() {
        let platform = MockPlatform::new().with_display(1, 0.2).with_display(2, 0.4);
        platform.fail_display(DisplayService(2));
        let mut display = DisplayBrightnessBridge::new(platform.clone());
        display.init().unwrap();

        let services = DisplayServices::matching(&platform).unwrap();
        assert_eq!(display.set_all(&services, 0.9).unwrap(), 1);
        assert!((display.get(DisplayService(1)).unwrap().value() - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_no_displays() {
        let platform = MockPlatform::new();
        let mut display = DisplayBrightnessBridge::new(platform.clone());
        display.init().unwrap();

        let services = DisplayServices::matching(&platform).unwrap();
        assert!(services.is_empty());
        assert_eq!(display.get_first(&services).unwrap_err(), BackendError::NoData);
        assert_eq!(display.set_all(&services, 0.5).unwrap_err(), BackendError::NoData);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut display = DisplayBrightnessBridge::new(MockPlatform::new());
        display.shutdown();
        display.init().unwrap();
        display.shutdown();
        display.shutdown();
        assert_eq!(display.state(), BackendState::Uninitialized);
    }
}
