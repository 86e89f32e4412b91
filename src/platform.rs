//! Global V8 platform initialization.
//!
//! V8 can only be initialized once per process. Every slot interpreter goes
//! through [`get_platform`] before creating its isolate.

use std::sync::OnceLock;

static PLATFORM: OnceLock<v8::SharedRef<v8::Platform>> = OnceLock::new();

/// Get the global V8 platform, initializing it if necessary.
pub fn get_platform() -> &'static v8::SharedRef<v8::Platform> {
    PLATFORM.get_or_init(|| {
        // Pool slots run short entry points; incremental marking only adds pauses
        v8::V8::set_flags_from_string("--noincremental-marking");

        #[cfg(target_os = "macos")]
        v8::V8::set_flags_from_string("--single-threaded-gc");

        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform.clone());
        v8::V8::initialize();

        tracing::info!("V8 platform initialized (v8 {})", v8::V8::get_version());
        platform
    })
}
