//! Runtime side of [`declare_extension!`](crate::declare_extension).

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::Extension;

/// Entry-point type name and its constructor.
pub type Factory = (&'static str, fn() -> Box<dyn Extension>);

/// Resolve a type name against `factories` and hand the instance to the host.
///
/// Returns null for an unknown or non-UTF-8 name, and when the constructor
/// panics; unwinding must not cross the C boundary.
///
/// # Safety
///
/// `type_ptr` must be null or point to `type_len` readable bytes.
pub unsafe fn create(
    type_ptr: *const u8,
    type_len: usize,
    factories: &[Factory],
) -> *mut Box<dyn Extension> {
    if type_ptr.is_null() {
        return std::ptr::null_mut();
    }
    // Safety: guaranteed by the caller.
    let bytes = unsafe { std::slice::from_raw_parts(type_ptr, type_len) };
    let Ok(type_name) = std::str::from_utf8(bytes) else {
        return std::ptr::null_mut();
    };

    let Some((_, ctor)) = factories.iter().find(|(name, _)| *name == type_name) else {
        tracing::warn!(type_name = %type_name, "Unknown extension type requested");
        return std::ptr::null_mut();
    };

    match catch_unwind(AssertUnwindSafe(*ctor)) {
        Ok(extension) => Box::into_raw(Box::new(extension)),
        Err(_) => {
            tracing::error!(type_name = %type_name, "Extension constructor panicked");
            std::ptr::null_mut()
        }
    }
}
