//! Ambient light sensor
//!
//! Reads the ambient light level through the private ambient-light service
//! client and the input-event module. Both modules are bound at runtime; on
//! machines where either is missing the bridge reports itself unavailable.

use crate::backend::normalize_ambient;
use crate::loader::{ModuleLoader, ObjectRelease, ResolvedSymbol, RetainedObject, ServiceHandle};
use crate::platform::SystemPlatform;
use crate::{BackendError, BackendState, NormalizedValue};
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::path::PathBuf;

/// Input event category produced by ambient light sensors
pub const AMBIENT_LIGHT_SENSOR_EVENT: i64 = 12;

/// Event field holding the sensor level
pub const AMBIENT_LIGHT_LEVEL_FIELD: i32 = (AMBIENT_LIGHT_SENSOR_EVENT as i32) << 16;

/// Event copy options and timestamp; zero asks for the latest event
const SENSOR_EVENT_OPTIONS: i32 = 0;
const SENSOR_EVENT_TIMESTAMP: i64 = 0;

pub const COPY_CLIENT_SYMBOL: &str = "ALCALSCopyALSServiceClient";
pub const COPY_EVENT_SYMBOL: &str = "IOHIDServiceClientCopyEvent";
pub const GET_FLOAT_VALUE_SYMBOL: &str = "IOHIDEventGetFloatValue";

pub(crate) type CopyClientFn = unsafe extern "C" fn() -> *const c_void;
pub(crate) type CopyEventFn = unsafe extern "C" fn(*const c_void, i64, i32, i64) -> *const c_void;
pub(crate) type GetFloatValueFn = unsafe extern "C" fn(*const c_void, i32) -> f64;

/// Module locations for the ambient light bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientLightConfig {
    /// Private module exporting the sensor service client
    pub sensor_module: PathBuf,
    /// Input-event module exporting event copy and value extraction
    pub input_module: PathBuf,
}

impl Default for AmbientLightConfig {
    fn default() -> Self {
        Self {
            sensor_module: PathBuf::from(
                "/System/Library/PrivateFrameworks/BezelServices.framework/BezelServices",
            ),
            input_module: PathBuf::from("/System/Library/Frameworks/IOKit.framework/IOKit"),
        }
    }
}

/// Everything held while the bridge is ready.
///
/// Fields drop in declaration order, which is the reverse of acquisition:
/// input module, then the client, then the sensor module the client came from.
struct SensorSession<R: ObjectRelease> {
    copy_event: ResolvedSymbol<CopyEventFn>,
    get_float_value: ResolvedSymbol<GetFloatValueFn>,
    _input_module: ServiceHandle,
    client: RetainedObject<R>,
    _sensor_module: ServiceHandle,
}

/// Ambient light backend bridge
pub struct AmbientLightBridge<P = SystemPlatform>
where
    P: ModuleLoader + ObjectRelease + Clone,
{
    platform: P,
    config: AmbientLightConfig,
    state: BackendState,
    session: Option<SensorSession<P>>,
}

impl AmbientLightBridge<SystemPlatform> {
    /// Bridge bound to the running system with default module locations
    pub fn system() -> Self {
        Self::new(SystemPlatform, AmbientLightConfig::default())
    }
}

impl<P> AmbientLightBridge<P>
where
    P: ModuleLoader + ObjectRelease + Clone,
{
    pub fn new(platform: P, config: AmbientLightConfig) -> Self {
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

    pub fn config(&self) -> &AmbientLightConfig {
        &self.config
    }

    /// Bind the sensor. A no-op when already ready.
    pub fn init(&mut self) -> Result<(), BackendError> {
        if self.session.is_some() {
            return Ok(());
        }

        match self.open_session() {
            Ok(session) => {
                self.session = Some(session);
                self.state = BackendState::Ready;
                tracing::info!("Ambient light sensor ready");
                Ok(())
            }
            Err(e) => {
                self.state = BackendState::Unavailable;
                tracing::warn!("Ambient light sensor unavailable: {}", e);
                Err(e)
            }
        }
    }

    fn open_session(&self) -> Result<SensorSession<P>, BackendError> {
        let sensor_module = self.platform.load(&self.config.sensor_module)?;

        // SAFETY: CopyClientFn matches the exported signature
        let copy_client = unsafe { sensor_module.resolve::<CopyClientFn>(COPY_CLIENT_SYMBOL)? };

        // SAFETY: takes no arguments, returns a +1 client or null
        let raw_client = unsafe { (copy_client.get())() };
        let client = unsafe {
            RetainedObject::from_retained(raw_client, self.platform.clone(), "sensor client")
        }
        .ok_or_else(|| {
            BackendError::ClientAcquisitionFailed("ambient light service returned no client".into())
        })?;

        let input_module = self.platform.load(&self.config.input_module)?;

        // SAFETY: signatures match the exported input-event functions
        let copy_event = unsafe { input_module.resolve::<CopyEventFn>(COPY_EVENT_SYMBOL)? };
        let get_float_value =
            unsafe { input_module.resolve::<GetFloatValueFn>(GET_FLOAT_VALUE_SYMBOL)? };

        Ok(SensorSession {
            copy_event,
            get_float_value,
            _input_module: input_module,
            client,
            _sensor_module: sensor_module,
        })
    }

    /// Take one sample, normalized to `[0.0, 1.0]`.
    ///
    /// Fails with [`BackendError::NotInitialized`] unless ready, and with
    /// [`BackendError::NoData`] when the sensor produced no event this time.
    pub fn read(&self) -> Result<NormalizedValue, BackendError> {
        let session = self.session.as_ref().ok_or(BackendError::NotInitialized)?;

        // SAFETY: the client and both entry points stay valid while the
        // session holds the modules they came from
        let raw_event = unsafe {
            (session.copy_event.get())(
                session.client.as_ptr(),
                AMBIENT_LIGHT_SENSOR_EVENT,
                SENSOR_EVENT_OPTIONS,
                SENSOR_EVENT_TIMESTAMP,
            )
        };
        let event =
            unsafe { RetainedObject::from_retained(raw_event, self.platform.clone(), "sensor event") }
                .ok_or(BackendError::NoData)?;

        let raw = unsafe { (session.get_float_value.get())(event.as_ptr(), AMBIENT_LIGHT_LEVEL_FIELD) };
        drop(event);

        let value = normalize_ambient(raw);
        tracing::trace!("Ambient raw {} -> {}", raw, value);
        Ok(NormalizedValue::new(value))
    }

    /// Release the client and both modules. Always safe to call.
    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            tracing::info!("Ambient light sensor shut down");
        }
        self.state = BackendState::Uninitialized;
    }
}

impl<P> Drop for AmbientLightBridge<P>
where
    P: ModuleLoader + ObjectRelease + Clone,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
