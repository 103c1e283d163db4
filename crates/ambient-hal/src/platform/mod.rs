//! Production platform bindings
//!
//! [`SystemPlatform`] binds the bridges to the running operating system.
//! Only macOS has the services the bridges talk to; elsewhere every module
//! load fails normally and every bridge reports itself unavailable.

#[cfg(target_os = "macos")]
mod macos;

use crate::BackendError;
use crate::display::{DisplayParameters, DisplayService};
use crate::keyboard::{BacklightControl, KeyboardBinder, KeyboardConfig};
use crate::lmu::{LmuConnection, LmuService};
use crate::loader::{LibraryLoader, ModuleLoader, ObjectRelease, ServiceHandle};
use std::ffi::c_void;
use std::path::Path;
use std::ptr::NonNull;

/// Everything a full set of bridges needs from the platform
pub trait Platform:
    ModuleLoader + ObjectRelease + KeyboardBinder + DisplayParameters + LmuService + Clone
{
}

impl<T> Platform for T where
    T: ModuleLoader + ObjectRelease + KeyboardBinder + DisplayParameters + LmuService + Clone
{
}

/// The running system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl ModuleLoader for SystemPlatform {
    fn load(&self, path: &Path) -> Result<ServiceHandle, BackendError> {
        LibraryLoader.load(path)
    }
}

impl ObjectRelease for SystemPlatform {
    #[cfg(target_os = "macos")]
    unsafe fn release(&self, object: NonNull<c_void>) {
        // SAFETY: forwarded from the caller
        unsafe { macos::cf_release(object) }
    }

    #[cfg(not(target_os = "macos"))]
    unsafe fn release(&self, object: NonNull<c_void>) {
        tracing::warn!("No object release protocol on this platform, leaking {:p}", object);
    }
}

impl KeyboardBinder for SystemPlatform {
    #[cfg(target_os = "macos")]
    fn bind_keyboard(
        &self,
        module: &ServiceHandle,
        config: &KeyboardConfig,
    ) -> Result<Box<dyn BacklightControl>, BackendError> {
        macos::bind_keyboard(module, config)
    }

    #[cfg(not(target_os = "macos"))]
    fn bind_keyboard(
        &self,
        _module: &ServiceHandle,
        _config: &KeyboardConfig,
    ) -> Result<Box<dyn BacklightControl>, BackendError> {
        Err(BackendError::symbol("KeyboardBrightnessClient"))
    }
}

impl LmuService for SystemPlatform {
    #[cfg(target_os = "macos")]
    fn open_lmu(&self) -> Result<Box<dyn LmuConnection>, BackendError> {
        macos::open_lmu()
    }

    #[cfg(not(target_os = "macos"))]
    fn open_lmu(&self) -> Result<Box<dyn LmuConnection>, BackendError> {
        Err(BackendError::ClientAcquisitionFailed(
            "light sensor controller is not available on this platform".into(),
        ))
    }
}

#[cfg(target_os = "macos")]
impl DisplayParameters for SystemPlatform {
    fn get_float_parameter(&self, service: DisplayService, key: &str) -> Result<f32, BackendError> {
        macos::get_float_parameter(service, key)
    }

    fn set_float_parameter(
        &self,
        service: DisplayService,
        key: &str,
        value: f32,
    ) -> Result<(), BackendError> {
        macos::set_float_parameter(service, key, value)
    }

    fn display_services(&self) -> Result<Vec<DisplayService>, BackendError> {
        macos::display_services()
    }

    fn release_service(&self, service: DisplayService) {
        macos::release_service(service)
    }
}

#[cfg(not(target_os = "macos"))]
impl DisplayParameters for SystemPlatform {
    fn get_float_parameter(&self, _service: DisplayService, _key: &str) -> Result<f32, BackendError> {
        Err(unsupported())
    }

    fn set_float_parameter(
        &self,
        _service: DisplayService,
        _key: &str,
        _value: f32,
    ) -> Result<(), BackendError> {
        Err(unsupported())
    }

    fn display_services(&self) -> Result<Vec<DisplayService>, BackendError> {
        Ok(Vec::new())
    }

    fn release_service(&self, _service: DisplayService) {}
}

#[cfg(not(target_os = "macos"))]
fn unsupported() -> BackendError {
    BackendError::ParameterQueryFailed("display parameters are not supported on this platform".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AmbientLightBridge, AmbientLightConfig, BackendState};
    use std::path::PathBuf;

    #[test]
    fn test_absent_module_is_unavailable() {
        let config = AmbientLightConfig {
            sensor_module: PathBuf::from("/nonexistent/BezelServices.framework/BezelServices"),
            ..AmbientLightConfig::default()
        };
        let mut sensor = AmbientLightBridge::new(SystemPlatform, config);

        let err = sensor.init().unwrap_err();
        assert!(matches!(err, BackendError::ModuleLoadFailed { .. }));
        assert_eq!(sensor.state(), BackendState::Unavailable);
        assert_eq!(sensor.read().unwrap_err(), BackendError::NotInitialized);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_no_controller_off_macos() {
        assert!(SystemPlatform.open_lmu().err().unwrap().is_unavailable());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_no_displays_off_macos() {
        assert!(SystemPlatform.display_services().unwrap().is_empty());
        assert!(SystemPlatform.get_float_parameter(DisplayService(1), "brightness").is_err());
    }
}
