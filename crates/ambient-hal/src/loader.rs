//! Dynamic module binding
//!
//! Loads platform modules at runtime, resolves typed entry points from them
//! and owns retained platform objects. Every acquired resource is wrapped in
//! a guard that releases it on drop, so a bridge that bails out half way
//! through initialization releases what it already holds in reverse order.

use crate::BackendError;
use std::ffi::c_void;
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// A loaded dynamic module
pub trait LoadedModule {
    /// Location the module was loaded from
    fn path(&self) -> &Path;

    /// Look up an exported entry point by name
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Loads modules from well-known locations
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<ServiceHandle, BackendError>;
}

/// Releases retained platform objects (sensor clients, events, strings)
pub trait ObjectRelease {
    /// Drop one reference to `object`.
    ///
    /// # Safety
    ///
    /// `object` must be a live object the caller holds a reference to, and
    /// must not be used after this call.
    unsafe fn release(&self, object: NonNull<c_void>);
}

/// Exclusive ownership of one loaded module.
///
/// The module is unloaded exactly once, when the handle is dropped.
pub struct ServiceHandle {
    module: Box<dyn LoadedModule>,
}

impl ServiceHandle {
    pub fn new(module: Box<dyn LoadedModule>) -> Self {
        tracing::debug!("Loaded module {}", module.path().display());
        Self { module }
    }

    pub fn path(&self) -> &Path {
        self.module.path()
    }

    /// Resolve `name` as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type whose signature
    /// matches the exported entry point. The returned symbol must not be
    /// called after this handle is dropped.
    pub unsafe fn resolve<F: Copy>(
        &self,
        name: &'static str,
    ) -> Result<ResolvedSymbol<F>, BackendError> {
        if mem::size_of::<F>() != mem::size_of::<*mut c_void>() {
            tracing::warn!("Refusing to bind {} to a non pointer-sized type", name);
            return Err(BackendError::symbol(name));
        }

        let address = self.module.symbol(name).ok_or_else(|| {
            tracing::debug!("{} not exported by {}", name, self.path().display());
            BackendError::symbol(name)
        })?;

        let raw = address.as_ptr();
        // SAFETY: sizes checked above, signature guaranteed by the caller
        let function = unsafe { mem::transmute_copy::<*mut c_void, F>(&raw) };
        tracing::debug!("Resolved {} from {}", name, self.path().display());

        Ok(ResolvedSymbol { name, function })
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("path", &self.path())
            .finish()
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        tracing::debug!("Unloading module {}", self.module.path().display());
    }
}

/// A typed entry point looked up at runtime
#[derive(Clone, Copy)]
pub struct ResolvedSymbol<F: Copy> {
    name: &'static str,
    function: F,
}

impl<F: Copy> ResolvedSymbol<F> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> F {
        self.function
    }
}

impl<F: Copy> fmt::Debug for ResolvedSymbol<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolvedSymbol").field(&self.name).finish()
    }
}

/// Scoped ownership of one retained platform object
pub struct RetainedObject<R: ObjectRelease> {
    object: NonNull<c_void>,
    releaser: R,
    kind: &'static str,
}

impl<R: ObjectRelease> RetainedObject<R> {
    /// Take ownership of a +1 retained object. Returns `None` for null.
    ///
    /// # Safety
    ///
    /// A non-null `object` must be retained on behalf of the caller and
    /// releasable through `releaser`.
    pub unsafe fn from_retained(object: *const c_void, releaser: R, kind: &'static str) -> Option<Self> {
        let object = NonNull::new(object as *mut c_void)?;
        tracing::trace!("Acquired {} {:p}", kind, object);
        Some(Self {
            object,
            releaser,
            kind,
        })
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.object.as_ptr()
    }
}

impl<R: ObjectRelease> fmt::Debug for RetainedObject<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedObject")
            .field("kind", &self.kind)
            .field("object", &self.object)
            .finish()
    }
}

impl<R: ObjectRelease> Drop for RetainedObject<R> {
    fn drop(&mut self) {
        tracing::trace!("Releasing {} {:p}", self.kind, self.object);
        // SAFETY: we own exactly one reference, taken in from_retained
        unsafe { self.releaser.release(self.object) };
    }
}

/// Module loader backed by the system dynamic linker
#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryLoader;

struct DynamicLibrary {
    path: PathBuf,
    library: libloading::Library,
}

impl LoadedModule for DynamicLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        // SAFETY: the address is only read, never dereferenced here
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        NonNull::new(*symbol)
    }
}

impl ModuleLoader for LibraryLoader {
    fn load(&self, path: &Path) -> Result<ServiceHandle, BackendError> {
        // System frameworks may live only in the shared cache, so no
        // existence check up front; the dynamic linker decides.
        // SAFETY: platform modules have no load-time initializers we depend on
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            BackendError::ModuleLoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        Ok(ServiceHandle::new(Box::new(DynamicLibrary {
            path: path.to_path_buf(),
            library,
        })))
    }
}
