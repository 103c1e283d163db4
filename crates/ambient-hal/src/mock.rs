//! Mock platform for testing without the private services
//!
//! [`MockPlatform`] stands in for the module loader, the object release
//! protocol, the keyboard binder and the display parameter service. Every
//! acquire and release is appended to an ordered call log, so tests can check
//! both that nothing leaks and that teardown runs in the right order.
//!
//! The fake sensor entry points are real `extern "C"` functions handed out
//! through the normal symbol resolution path. Clients and events carry the
//! state of the mock they came from, so any number of mocks can be used side
//! by side on one thread.
//!
//! # Usage
//!
//! ```
//! use ambient_hal::mock::MockPlatform;
//! use ambient_hal::{AmbientLightBridge, AmbientLightConfig};
//!
//! let platform = MockPlatform::new().with_sensor_value(Some(200.0));
//! let mut sensor = AmbientLightBridge::new(platform.clone(), AmbientLightConfig::default());
//!
//! sensor.init().unwrap();
//! assert_eq!(sensor.read().unwrap().value(), 0.5);
//!
//! sensor.shutdown();
//! assert_eq!(platform.outstanding(), 0);
//! ```

use crate::BackendError;
use crate::ambient::{COPY_CLIENT_SYMBOL, COPY_EVENT_SYMBOL, GET_FLOAT_VALUE_SYMBOL};
use crate::display::{DisplayParameters, DisplayService};
use crate::keyboard::{BacklightControl, KeyboardBinder, KeyboardConfig};
use crate::lmu::{
    LMU_GET_LED_BRIGHTNESS, LMU_GET_SENSOR_READING, LMU_SET_LED_BRIGHTNESS, LmuConnection,
    LmuService,
};
use crate::loader::{LoadedModule, ModuleLoader, ObjectRelease, ServiceHandle};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// One interaction with the mock platform
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    LoadModule(PathBuf),
    UnloadModule(PathBuf),
    CopyClient,
    /// The service was asked for a client and returned none
    NoClient,
    ReleaseClient,
    CopyEvent {
        event_type: i64,
        options: i32,
        timestamp: i64,
    },
    /// The sensor was asked for an event and produced none
    NoEvent,
    /// Value extraction with the requested field
    GetFloatValue(i32),
    ReleaseEvent,
    BindKeyboard(u64),
    UnbindKeyboard,
    KeyboardGet,
    KeyboardSet(f32),
    DisplayGet(DisplayService),
    DisplaySet(DisplayService, f32),
    ReleaseDisplayService(DisplayService),
    OpenLmu,
    CloseLmu,
    /// Scalar method call on the controller: selector and inputs
    LmuCall(u32, Vec<u64>),
}

impl MockCall {
    /// Takes ownership of something that must later be released
    pub fn is_acquire(&self) -> bool {
        matches!(
            self,
            MockCall::LoadModule(_)
                | MockCall::CopyClient
                | MockCall::CopyEvent { .. }
                | MockCall::BindKeyboard(_)
                | MockCall::OpenLmu
        )
    }

    pub fn is_release(&self) -> bool {
        matches!(
            self,
            MockCall::UnloadModule(_)
                | MockCall::ReleaseClient
                | MockCall::ReleaseEvent
                | MockCall::UnbindKeyboard
                | MockCall::CloseLmu
        )
    }
}

/// Objects handed across the fake C boundary, each tied to its mock
enum MockObject {
    Client(SharedState),
    Event { raw: f64, state: SharedState },
}

impl MockObject {
    fn state(&self) -> &SharedState {
        match self {
            MockObject::Client(state) => state,
            MockObject::Event { state, .. } => state,
        }
    }
}

/// Shared mock state
#[derive(Debug)]
pub struct MockState {
    /// Module paths that fail to load
    pub missing_modules: HashSet<PathBuf>,
    /// Entry points no module exports
    pub missing_symbols: HashSet<String>,
    /// Whether the sensor service hands out a client
    pub client_available: bool,
    /// Queued raw sensor readings, consumed front first; `None` is a missed event
    pub sensor_samples: VecDeque<Option<f64>>,
    /// Raw reading once the queue is empty; `None` means no event
    pub sensor_value: Option<f64>,
    /// Whether binding the keyboard backlight fails
    pub keyboard_bind_fails: bool,
    /// Whether the backlight rejects writes
    pub keyboard_rejects_writes: bool,
    /// Keyboard backlight level, negative for unknown
    pub keyboard_brightness: f32,
    /// Attached displays and their brightness
    pub displays: BTreeMap<DisplayService, f32>,
    /// Displays whose parameter calls fail
    pub failing_displays: HashSet<DisplayService>,
    /// Whether the light sensor controller is present
    pub lmu_present: bool,
    /// Raw left and right controller sensor channels
    pub lmu_sensor: (u64, u64),
    /// Controller keyboard LED register; `None` when there is no LED
    pub lmu_led: Option<u64>,
    /// Ordered call log
    pub calls: Vec<MockCall>,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            missing_modules: HashSet::new(),
            missing_symbols: HashSet::new(),
            client_available: true,
            sensor_samples: VecDeque::new(),
            sensor_value: Some(0.5),
            keyboard_bind_fails: false,
            keyboard_rejects_writes: false,
            keyboard_brightness: 0.5,
            displays: BTreeMap::new(),
            failing_displays: HashSet::new(),
            lmu_present: false,
            lmu_sensor: (0, 0),
            lmu_led: None,
            calls: Vec::new(),
        }
    }

    fn next_sample(&mut self) -> Option<f64> {
        self.sensor_samples.pop_front().unwrap_or(self.sensor_value)
    }
}

impl Default for MockState {
    fn default() -> Self {
        Self::new()
    }
}

type SharedState = Arc<RwLock<MockState>>;

thread_local! {
    static ACTIVE: RefCell<Option<SharedState>> = const { RefCell::new(None) };
}

fn lock(state: &SharedState) -> RwLockWriteGuard<'_, MockState> {
    state.write().unwrap_or_else(|e| e.into_inner())
}

/// Route the argument-less client entry point on this thread to `state`
fn activate(state: &SharedState) {
    ACTIVE.with(|active| *active.borrow_mut() = Some(Arc::clone(state)));
}

fn active() -> Option<SharedState> {
    ACTIVE.with(|active| active.borrow().clone())
}

/// Mock platform with an instrumented call log
#[derive(Debug, Clone)]
pub struct MockPlatform {
    state: SharedState,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::new())),
        }
    }

    /// Get shared state for manipulation in tests
    pub fn state(&self) -> Arc<RwLock<MockState>> {
        Arc::clone(&self.state)
    }

    fn update(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut lock(&self.state));
    }

    pub fn without_module(self, path: &Path) -> Self {
        self.update(|s| {
            s.missing_modules.insert(path.to_path_buf());
        });
        self
    }

    pub fn without_symbol(self, name: &str) -> Self {
        self.update(|s| {
            s.missing_symbols.insert(name.to_string());
        });
        self
    }

    pub fn without_client(self) -> Self {
        self.update(|s| s.client_available = false);
        self
    }

    pub fn with_sensor_value(self, raw: Option<f64>) -> Self {
        self.update(|s| s.sensor_value = raw);
        self
    }

    pub fn with_keyboard_brightness(self, value: f32) -> Self {
        self.update(|s| s.keyboard_brightness = value);
        self
    }

    pub fn with_failing_keyboard_bind(self) -> Self {
        self.update(|s| s.keyboard_bind_fails = true);
        self
    }

    pub fn with_rejected_keyboard_writes(self) -> Self {
        self.update(|s| s.keyboard_rejects_writes = true);
        self
    }

    pub fn with_display(self, id: u32, brightness: f32) -> Self {
        self.update(|s| {
            s.displays.insert(DisplayService(id), brightness);
        });
        self
    }

    /// Make the light sensor controller present with these sensor channels
    pub fn with_lmu(self, left: u64, right: u64) -> Self {
        self.update(|s| {
            s.lmu_present = true;
            s.lmu_sensor = (left, right);
        });
        self
    }

    /// Give the controller a keyboard LED at `raw`
    pub fn with_lmu_keyboard(self, raw: u64) -> Self {
        self.update(|s| s.lmu_led = Some(raw));
        self
    }

    /// Queue one raw sensor reading; `None` makes that read produce no event
    pub fn push_sample(&self, raw: Option<f64>) {
        self.update(|s| s.sensor_samples.push_back(raw));
    }

    /// Make every parameter call on `service` fail
    pub fn fail_display(&self, service: DisplayService) {
        self.update(|s| {
            s.failing_displays.insert(service);
        });
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        self.update(|s| s.calls.clear());
    }

    /// Number of acquisitions in the log
    pub fn acquired(&self) -> usize {
        lock(&self.state).calls.iter().filter(|c| c.is_acquire()).count()
    }

    /// Number of releases in the log
    pub fn released(&self) -> usize {
        lock(&self.state).calls.iter().filter(|c| c.is_release()).count()
    }

    /// Resources acquired and not yet released
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }

    fn record(&self, call: MockCall) {
        self.update(|s| s.calls.push(call));
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

struct MockModule {
    path: PathBuf,
    state: SharedState,
}

impl LoadedModule for MockModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        if lock(&self.state).missing_symbols.contains(name) {
            return None;
        }
        let address = match name {
            COPY_CLIENT_SYMBOL => {
                // The client entry point takes no arguments to find its mock by
                activate(&self.state);
                fake_copy_client as *mut c_void
            }
            COPY_EVENT_SYMBOL => fake_copy_event as *mut c_void,
            GET_FLOAT_VALUE_SYMBOL => fake_get_float_value as *mut c_void,
            _ => return None,
        };
        NonNull::new(address)
    }
}

impl Drop for MockModule {
    fn drop(&mut self) {
        lock(&self.state).calls.push(MockCall::UnloadModule(self.path.clone()));
    }
}

impl ModuleLoader for MockPlatform {
    fn load(&self, path: &Path) -> Result<ServiceHandle, BackendError> {
        if lock(&self.state).missing_modules.contains(path) {
            return Err(BackendError::ModuleLoadFailed {
                path: path.to_path_buf(),
                reason: "image not found".into(),
            });
        }
        self.record(MockCall::LoadModule(path.to_path_buf()));
        Ok(ServiceHandle::new(Box::new(MockModule {
            path: path.to_path_buf(),
            state: Arc::clone(&self.state),
        })))
    }
}

impl ObjectRelease for MockPlatform {
    unsafe fn release(&self, object: NonNull<c_void>) {
        // SAFETY: every object this mock hands out is a boxed MockObject
        let object = unsafe { Box::from_raw(object.as_ptr() as *mut MockObject) };
        let call = match *object {
            MockObject::Client(_) => MockCall::ReleaseClient,
            MockObject::Event { .. } => MockCall::ReleaseEvent,
        };
        lock(object.state()).calls.push(call);
    }
}

fn into_raw(object: MockObject) -> *const c_void {
    Box::into_raw(Box::new(object)) as *const c_void
}

/// # Safety
///
/// `object` must be null or come from [`into_raw`] and not yet be released.
unsafe fn object_ref<'a>(object: *const c_void) -> Option<&'a MockObject> {
    // SAFETY: upheld by the caller
    unsafe { (object as *const MockObject).as_ref() }
}

unsafe extern "C" fn fake_copy_client() -> *const c_void {
    let Some(state) = active() else {
        return ptr::null();
    };
    let mut s = lock(&state);
    if s.client_available {
        s.calls.push(MockCall::CopyClient);
        into_raw(MockObject::Client(Arc::clone(&state)))
    } else {
        s.calls.push(MockCall::NoClient);
        ptr::null()
    }
}

unsafe extern "C" fn fake_copy_event(
    client: *const c_void,
    event_type: i64,
    options: i32,
    timestamp: i64,
) -> *const c_void {
    // SAFETY: clients come from fake_copy_client
    let Some(MockObject::Client(state)) = (unsafe { object_ref(client) }) else {
        return ptr::null();
    };
    let mut s = lock(state);
    match s.next_sample() {
        Some(raw) => {
            s.calls.push(MockCall::CopyEvent {
                event_type,
                options,
                timestamp,
            });
            into_raw(MockObject::Event {
                raw,
                state: Arc::clone(state),
            })
        }
        None => {
            s.calls.push(MockCall::NoEvent);
            ptr::null()
        }
    }
}

unsafe extern "C" fn fake_get_float_value(event: *const c_void, field: i32) -> f64 {
    // SAFETY: events come from fake_copy_event
    match unsafe { object_ref(event) } {
        Some(MockObject::Event { raw, state }) => {
            lock(state).calls.push(MockCall::GetFloatValue(field));
            *raw
        }
        _ => 0.0,
    }
}

struct MockBacklight {
    state: SharedState,
}

impl BacklightControl for MockBacklight {
    fn brightness(&self) -> f32 {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::KeyboardGet);
        state.keyboard_brightness
    }

    fn set_brightness(&self, value: f32) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::KeyboardSet(value));
        if state.keyboard_rejects_writes {
            return false;
        }
        state.keyboard_brightness = value;
        true
    }
}

impl Drop for MockBacklight {
    fn drop(&mut self) {
        lock(&self.state).calls.push(MockCall::UnbindKeyboard);
    }
}

impl KeyboardBinder for MockPlatform {
    fn bind_keyboard(
        &self,
        _module: &ServiceHandle,
        config: &KeyboardConfig,
    ) -> Result<Box<dyn BacklightControl>, BackendError> {
        if lock(&self.state).keyboard_bind_fails {
            return Err(BackendError::symbol("KeyboardBrightnessClient"));
        }
        self.record(MockCall::BindKeyboard(config.keyboard_id));
        Ok(Box::new(MockBacklight {
            state: Arc::clone(&self.state),
        }))
    }
}

impl DisplayParameters for MockPlatform {
    fn get_float_parameter(&self, service: DisplayService, _key: &str) -> Result<f32, BackendError> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::DisplayGet(service));
        if state.failing_displays.contains(&service) {
            return Err(BackendError::ParameterQueryFailed(format!("{} unsupported", service)));
        }
        state
            .displays
            .get(&service)
            .copied()
            .ok_or_else(|| BackendError::ParameterQueryFailed(format!("no {}", service)))
    }

    fn set_float_parameter(
        &self,
        service: DisplayService,
        _key: &str,
        value: f32,
    ) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::DisplaySet(service, value));
        if state.failing_displays.contains(&service) {
            return Err(BackendError::ParameterQueryFailed(format!("{} unsupported", service)));
        }
        match state.displays.get_mut(&service) {
            Some(brightness) => {
                *brightness = value;
                Ok(())
            }
            None => Err(BackendError::ParameterQueryFailed(format!("no {}", service))),
        }
    }

    fn display_services(&self) -> Result<Vec<DisplayService>, BackendError> {
        Ok(lock(&self.state).displays.keys().copied().collect())
    }

    fn release_service(&self, service: DisplayService) {
        self.record(MockCall::ReleaseDisplayService(service));
    }
}

struct MockLmuConnection {
    state: SharedState,
}

impl LmuConnection for MockLmuConnection {
    fn call_scalar(
        &self,
        selector: u32,
        inputs: &[u64],
        output_count: usize,
    ) -> Result<Vec<u64>, BackendError> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::LmuCall(selector, inputs.to_vec()));
        let no_led = || BackendError::ParameterQueryFailed("controller has no keyboard LED".into());

        let outputs = match selector {
            LMU_GET_SENSOR_READING => vec![state.lmu_sensor.0, state.lmu_sensor.1],
            LMU_GET_LED_BRIGHTNESS => vec![state.lmu_led.ok_or_else(no_led)?],
            LMU_SET_LED_BRIGHTNESS => {
                let led = state.lmu_led.as_mut().ok_or_else(no_led)?;
                *led = inputs.get(1).copied().unwrap_or(0);
                vec![*led]
            }
            _ => {
                return Err(BackendError::ParameterQueryFailed(format!(
                    "unknown selector {}",
                    selector
                )));
            }
        };
        Ok(outputs.into_iter().take(output_count).collect())
    }
}

impl Drop for MockLmuConnection {
    fn drop(&mut self) {
        lock(&self.state).calls.push(MockCall::CloseLmu);
    }
}

impl LmuService for MockPlatform {
    fn open_lmu(&self) -> Result<Box<dyn LmuConnection>, BackendError> {
        if !lock(&self.state).lmu_present {
            return Err(BackendError::ClientAcquisitionFailed(
                "no light sensor controller".into(),
            ));
        }
        self.record(MockCall::OpenLmu);
        Ok(Box::new(MockLmuConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_module() {
        let platform = MockPlatform::new().without_module(Path::new("/mock/Missing"));
        assert!(platform.load(Path::new("/mock/Missing")).is_err());
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_module_load_unload_logged() {
        let platform = MockPlatform::new();
        let handle = platform.load(Path::new("/mock/Module")).unwrap();
        assert_eq!(platform.outstanding(), 1);

        drop(handle);
        assert_eq!(
            platform.calls(),
            vec![
                MockCall::LoadModule(PathBuf::from("/mock/Module")),
                MockCall::UnloadModule(PathBuf::from("/mock/Module")),
            ]
        );
        assert_eq!(platform.outstanding(), 0);
    }

    #[test]
    fn test_missing_symbol() {
        let platform = MockPlatform::new().without_symbol(COPY_EVENT_SYMBOL);
        let handle = platform.load(Path::new("/mock/Module")).unwrap();
        assert!(unsafe { handle.resolve::<crate::ambient::CopyEventFn>(COPY_EVENT_SYMBOL) }.is_err());
        assert!(unsafe { handle.resolve::<crate::ambient::CopyClientFn>(COPY_CLIENT_SYMBOL) }.is_ok());
    }

    #[test]
    fn test_call_classification() {
        assert!(MockCall::CopyClient.is_acquire());
        assert!(MockCall::OpenLmu.is_acquire());
        assert!(MockCall::CloseLmu.is_release());
        assert!(!MockCall::NoClient.is_acquire());
        assert!(MockCall::ReleaseEvent.is_release());
        assert!(!MockCall::KeyboardGet.is_release());
    }

    #[test]
    fn test_mocks_on_one_thread_stay_separate() {
        use crate::{AmbientLightBridge, AmbientLightConfig};

        let a = MockPlatform::new().with_sensor_value(Some(0.25));
        let b = MockPlatform::new().with_sensor_value(None);
        let mut sensor_a = AmbientLightBridge::new(a.clone(), AmbientLightConfig::default());
        let mut sensor_b = AmbientLightBridge::new(b.clone(), AmbientLightConfig::default());

        sensor_a.init().unwrap();
        sensor_b.init().unwrap();
        assert_eq!(sensor_a.read().unwrap().value(), 0.25);
        assert_eq!(sensor_b.read().unwrap_err(), BackendError::NoData);

        assert!(a.calls().contains(&MockCall::CopyClient));
        assert!(b.calls().contains(&MockCall::CopyClient));
        assert!(!a.calls().contains(&MockCall::NoEvent));
        assert!(b.calls().contains(&MockCall::NoEvent));

        sensor_a.shutdown();
        assert_eq!(a.acquired(), a.released());
        sensor_b.shutdown();
        assert_eq!(b.acquired(), b.released());
    }

    #[test]
    fn test_lmu_absent_by_default() {
        let platform = MockPlatform::new();
        assert!(platform.open_lmu().is_err());
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_lmu_connection_logged() {
        let platform = MockPlatform::new().with_lmu(10, 20);
        let connection = platform.open_lmu().unwrap();
        assert_eq!(
            connection.call_scalar(LMU_GET_SENSOR_READING, &[], 2).unwrap(),
            vec![10, 20]
        );
        assert!(connection.call_scalar(LMU_GET_LED_BRIGHTNESS, &[0], 1).is_err());
        assert_eq!(platform.outstanding(), 1);

        drop(connection);
        assert_eq!(platform.outstanding(), 0);
        assert_eq!(platform.calls().last(), Some(&MockCall::CloseLmu));
    }

    #[test]
    fn test_display_state_shared_between_clones() {
        let platform = MockPlatform::new().with_display(3, 0.1);
        let clone = platform.clone();
        clone.set_float_parameter(DisplayService(3), "brightness", 0.7).unwrap();
        assert_eq!(
            platform.get_float_parameter(DisplayService(3), "brightness").unwrap(),
            0.7
        );
    }
}
