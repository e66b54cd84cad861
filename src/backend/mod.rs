//! Backend abstraction layer
//!
//! Provides common traits and types that the wgpu, Vulkan and recording
//! backends implement.

pub mod any;
pub mod readback;
pub mod recording;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

// Vulkan backend is only available on native platforms
#[cfg(not(target_arch = "wasm32"))]
pub mod vulkan;

pub use any::AnyBackend;
pub use recording::{RecordedCommand, RecordedPass, RecordingBackend};
pub use traits::*;
pub use types::*;
