//! macOS services: CoreFoundation release, IOKit display parameters, the
//! light sensor controller and the CoreBrightness keyboard client.

use crate::BackendError;
use crate::display::DisplayService;
use crate::keyboard::{BacklightControl, KeyboardConfig};
use crate::lmu::{LMU_SERVICE_CLASS, LmuConnection};
use crate::loader::{LibraryLoader, ModuleLoader, ServiceHandle};
use libc::{c_char, kern_return_t, mach_port_t};
use std::ffi::{CStr, CString, c_void};
use std::ptr::{self, NonNull};

const KERN_SUCCESS: kern_return_t = 0;
const IO_MAIN_PORT_DEFAULT: mach_port_t = 0;
const CF_STRING_ENCODING_UTF8: u32 = 0x0800_0100;

#[link(name = "CoreFoundation", kind = "framework")]
unsafe extern "C" {
    fn CFRelease(cf: *const c_void);
    fn CFStringCreateWithCString(
        allocator: *const c_void,
        c_str: *const c_char,
        encoding: u32,
    ) -> *const c_void;
}

#[link(name = "IOKit", kind = "framework")]
unsafe extern "C" {
    fn IODisplayGetFloatParameter(
        service: mach_port_t,
        options: u32,
        parameter_name: *const c_void,
        value: *mut f32,
    ) -> kern_return_t;
    fn IODisplaySetFloatParameter(
        service: mach_port_t,
        options: u32,
        parameter_name: *const c_void,
        value: f32,
    ) -> kern_return_t;
    fn IOServiceMatching(name: *const c_char) -> *mut c_void;
    fn IOServiceGetMatchingServices(
        main_port: mach_port_t,
        matching: *mut c_void,
        existing: *mut mach_port_t,
    ) -> kern_return_t;
    fn IOServiceGetMatchingService(main_port: mach_port_t, matching: *mut c_void) -> mach_port_t;
    fn IOIteratorNext(iterator: mach_port_t) -> mach_port_t;
    fn IOObjectRelease(object: mach_port_t) -> kern_return_t;
    fn IOServiceOpen(
        service: mach_port_t,
        owning_task: mach_port_t,
        connection_type: u32,
        connect: *mut mach_port_t,
    ) -> kern_return_t;
    fn IOServiceClose(connect: mach_port_t) -> kern_return_t;
    fn IOConnectCallScalarMethod(
        connection: mach_port_t,
        selector: u32,
        input: *const u64,
        input_count: u32,
        output: *mut u64,
        output_count: *mut u32,
    ) -> kern_return_t;
}

unsafe extern "C" {
    static mach_task_self_: mach_port_t;
}

pub(super) unsafe fn cf_release(object: NonNull<c_void>) {
    // SAFETY: caller owns one reference to a CoreFoundation object
    unsafe { CFRelease(object.as_ptr()) }
}

/// A CFString owned for the duration of one parameter call
struct CfString(NonNull<c_void>);

impl CfString {
    fn new(value: &str) -> Result<Self, BackendError> {
        let c_value = CString::new(value)
            .map_err(|_| BackendError::ParameterQueryFailed(format!("invalid key {:?}", value)))?;
        // SAFETY: c_value is a valid NUL-terminated string for the call
        let raw = unsafe {
            CFStringCreateWithCString(ptr::null(), c_value.as_ptr(), CF_STRING_ENCODING_UTF8)
        };
        NonNull::new(raw as *mut c_void)
            .map(CfString)
            .ok_or_else(|| BackendError::ParameterQueryFailed(format!("cannot create key {:?}", value)))
    }
}

impl Drop for CfString {
    fn drop(&mut self) {
        // SAFETY: created with a +1 reference in new
        unsafe { cf_release(self.0) }
    }
}

fn check(kr: kern_return_t, what: &str) -> Result<(), BackendError> {
    if kr == KERN_SUCCESS {
        Ok(())
    } else {
        Err(BackendError::ParameterQueryFailed(format!("{} returned {:#x}", what, kr)))
    }
}

pub(super) fn get_float_parameter(service: DisplayService, key: &str) -> Result<f32, BackendError> {
    let key = CfString::new(key)?;
    let mut value = 0.0f32;
    // SAFETY: key outlives the call, value is a valid out pointer
    let kr = unsafe { IODisplayGetFloatParameter(service.0, 0, key.0.as_ptr(), &mut value) };
    check(kr, "IODisplayGetFloatParameter")?;
    Ok(value)
}

pub(super) fn set_float_parameter(
    service: DisplayService,
    key: &str,
    value: f32,
) -> Result<(), BackendError> {
    let key = CfString::new(key)?;
    // SAFETY: key outlives the call
    let kr = unsafe { IODisplaySetFloatParameter(service.0, 0, key.0.as_ptr(), value) };
    check(kr, "IODisplaySetFloatParameter")
}

pub(super) fn display_services() -> Result<Vec<DisplayService>, BackendError> {
    // SAFETY: static NUL-terminated class name
    let matching = unsafe { IOServiceMatching(c"IODisplayConnect".as_ptr()) };
    if matching.is_null() {
        return Err(BackendError::ParameterQueryFailed(
            "cannot build IODisplayConnect matching dictionary".into(),
        ));
    }

    let mut iterator: mach_port_t = 0;
    // SAFETY: consumes the matching dictionary, iterator is a valid out pointer
    let kr = unsafe { IOServiceGetMatchingServices(IO_MAIN_PORT_DEFAULT, matching, &mut iterator) };
    check(kr, "IOServiceGetMatchingServices")?;

    let mut services = Vec::new();
    loop {
        // SAFETY: iterator is live until released below
        let service = unsafe { IOIteratorNext(iterator) };
        if service == 0 {
            break;
        }
        services.push(DisplayService(service));
    }
    // SAFETY: we own the iterator reference
    unsafe { IOObjectRelease(iterator) };

    Ok(services)
}

pub(super) fn release_service(service: DisplayService) {
    // SAFETY: handles come from display_services with a reference each
    unsafe { IOObjectRelease(service.0) };
}

/// Open user client on the light sensor controller
struct LmuPort(mach_port_t);

impl LmuConnection for LmuPort {
    fn call_scalar(
        &self,
        selector: u32,
        inputs: &[u64],
        output_count: usize,
    ) -> Result<Vec<u64>, BackendError> {
        let mut outputs = vec![0u64; output_count];
        let mut count = output_count as u32;
        let input = if inputs.is_empty() {
            ptr::null()
        } else {
            inputs.as_ptr()
        };
        // SAFETY: input and output buffers are sized by their counts
        let kr = unsafe {
            IOConnectCallScalarMethod(
                self.0,
                selector,
                input,
                inputs.len() as u32,
                outputs.as_mut_ptr(),
                &mut count,
            )
        };
        check(kr, "IOConnectCallScalarMethod")?;
        outputs.truncate(count as usize);
        Ok(outputs)
    }
}

impl Drop for LmuPort {
    fn drop(&mut self) {
        // SAFETY: opened by IOServiceOpen in open_lmu
        unsafe { IOServiceClose(self.0) };
    }
}

pub(super) fn open_lmu() -> Result<Box<dyn LmuConnection>, BackendError> {
    let class = CString::new(LMU_SERVICE_CLASS)
        .map_err(|_| BackendError::ClientAcquisitionFailed("invalid service class".into()))?;
    // SAFETY: NUL-terminated class name; the dictionary is consumed below
    let service = unsafe {
        IOServiceGetMatchingService(IO_MAIN_PORT_DEFAULT, IOServiceMatching(class.as_ptr()))
    };
    if service == 0 {
        return Err(BackendError::ClientAcquisitionFailed(format!(
            "{} not found",
            LMU_SERVICE_CLASS
        )));
    }

    let mut connect: mach_port_t = 0;
    // SAFETY: service is a live reference, connect is a valid out pointer
    let kr = unsafe { IOServiceOpen(service, mach_task_self_, 0, &mut connect) };
    // SAFETY: the matching reference is ours; the connection holds its own
    unsafe { IOObjectRelease(service) };

    if kr != KERN_SUCCESS {
        return Err(BackendError::ClientAcquisitionFailed(format!(
            "IOServiceOpen({}) returned {:#x}",
            LMU_SERVICE_CLASS, kr
        )));
    }
    tracing::debug!("Opened {}", LMU_SERVICE_CLASS);
    Ok(Box::new(LmuPort(connect)))
}

type Id = *mut c_void;
type Sel = *mut c_void;

type GetClassFn = unsafe extern "C" fn(*const c_char) -> Id;
type RegisterSelectorFn = unsafe extern "C" fn(*const c_char) -> Sel;
type SendFn = unsafe extern "C" fn(Id, Sel) -> Id;
type SendGetBrightnessFn = unsafe extern "C" fn(Id, Sel, u64) -> f32;
type SendSetBrightnessFn = unsafe extern "C" fn(Id, Sel, f32, u64) -> i8;

const KEYBOARD_CLIENT_CLASS: &CStr = c"KeyboardBrightnessClient";
const MSG_SEND_SYMBOL: &str = "objc_msgSend";

/// CoreBrightness keyboard client.
///
/// Holds the object runtime module, which is released after the client.
struct CoreBrightnessKeyboard {
    send: SendFn,
    send_get_brightness: SendGetBrightnessFn,
    send_set_brightness: SendSetBrightnessFn,
    brightness_selector: Sel,
    set_brightness_selector: Sel,
    release_selector: Sel,
    client: NonNull<c_void>,
    keyboard_id: u64,
    _runtime: ServiceHandle,
}

impl BacklightControl for CoreBrightnessKeyboard {
    fn brightness(&self) -> f32 {
        // SAFETY: brightnessForKeyboard: takes an unsigned long long, returns float
        unsafe {
            (self.send_get_brightness)(self.client.as_ptr(), self.brightness_selector, self.keyboard_id)
        }
    }

    fn set_brightness(&self, value: f32) -> bool {
        // SAFETY: setBrightness:forKeyboard: takes float and unsigned long long, returns BOOL
        let accepted = unsafe {
            (self.send_set_brightness)(
                self.client.as_ptr(),
                self.set_brightness_selector,
                value,
                self.keyboard_id,
            )
        };
        accepted != 0
    }
}

impl Drop for CoreBrightnessKeyboard {
    fn drop(&mut self) {
        // SAFETY: the client was returned +1 from alloc/init
        unsafe { (self.send)(self.client.as_ptr(), self.release_selector) };
    }
}

pub(super) fn bind_keyboard(
    _module: &ServiceHandle,
    config: &KeyboardConfig,
) -> Result<Box<dyn BacklightControl>, BackendError> {
    // Loading the backlight module registers its classes with the runtime;
    // everything else goes through the runtime itself.
    let runtime = LibraryLoader.load(&config.runtime_module)?;

    // SAFETY: each type matches the runtime entry point, with objc_msgSend
    // bound once per message signature we send
    let (get_class, register, send, send_get_brightness, send_set_brightness) = unsafe {
        (
            runtime.resolve::<GetClassFn>("objc_getClass")?,
            runtime.resolve::<RegisterSelectorFn>("sel_registerName")?,
            runtime.resolve::<SendFn>(MSG_SEND_SYMBOL)?,
            runtime.resolve::<SendGetBrightnessFn>(MSG_SEND_SYMBOL)?,
            runtime.resolve::<SendSetBrightnessFn>(MSG_SEND_SYMBOL)?,
        )
    };

    // SAFETY: static NUL-terminated class name
    let class = unsafe { (get_class.get())(KEYBOARD_CLIENT_CLASS.as_ptr()) };
    if class.is_null() {
        return Err(BackendError::symbol("KeyboardBrightnessClient"));
    }

    let selector = |name: &CStr| -> Sel {
        // SAFETY: NUL-terminated selector name
        unsafe { (register.get())(name.as_ptr()) }
    };

    // SAFETY: alloc/init on a class object; init may return nil
    let client = unsafe {
        let instance = (send.get())(class, selector(c"alloc"));
        if instance.is_null() {
            ptr::null_mut()
        } else {
            (send.get())(instance, selector(c"init"))
        }
    };
    let client = NonNull::new(client).ok_or_else(|| {
        BackendError::ClientAcquisitionFailed("KeyboardBrightnessClient init returned nil".into())
    })?;

    tracing::debug!("Bound KeyboardBrightnessClient for keyboard {}", config.keyboard_id);

    Ok(Box::new(CoreBrightnessKeyboard {
        send: send.get(),
        send_get_brightness: send_get_brightness.get(),
        send_set_brightness: send_set_brightness.get(),
        brightness_selector: selector(c"brightnessForKeyboard:"),
        set_brightness_selector: selector(c"setBrightness:forKeyboard:"),
        release_selector: selector(c"release"),
        client,
        keyboard_id: config.keyboard_id,
        _runtime: runtime,
    }))
}
