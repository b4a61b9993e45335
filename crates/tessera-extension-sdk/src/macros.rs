//! Export macro for native extensions.

/// Generate the symbols the host looks up in a native extension library.
///
/// Each entry maps an entry-point type name (the manifest's
/// `entryPoint.type`) to a constructor returning the extension.
///
/// ```rust,ignore
/// declare_extension! {
///     "EchoExtension" => EchoExtension::new,
///     "EchoAdmin" => EchoAdmin::default,
/// }
/// ```
///
/// Expands to `tessera_extension_abi_version`,
/// `tessera_extension_core_version` and `tessera_extension_create`.
#[macro_export]
macro_rules! declare_extension {
    ( $( $type_name:literal => $ctor:path ),+ $(,)? ) => {
        #[no_mangle]
        pub extern "C" fn tessera_extension_abi_version() -> u32 {
            $crate::ABI_VERSION
        }

        #[no_mangle]
        pub extern "C" fn tessera_extension_core_version() -> *const ::std::ffi::c_char {
            $crate::CORE_VERSION_NUL.as_ptr().cast()
        }

        /// # Safety
        ///
        /// `type_ptr` must point to `type_len` readable bytes.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn tessera_extension_create(
            type_ptr: *const u8,
            type_len: usize,
        ) -> *mut ::std::boxed::Box<dyn $crate::Extension> {
            let factories: &[$crate::export::Factory] = &[
                $( ($type_name, || -> ::std::boxed::Box<dyn $crate::Extension> {
                    ::std::boxed::Box::new($ctor())
                }), )+
            ];
            // Safety: forwarded from the caller.
            unsafe { $crate::export::create(type_ptr, type_len, factories) }
        }
    };
}
