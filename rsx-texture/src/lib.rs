pub mod api;
pub mod backend;
pub mod binder;
pub mod cache;
pub mod descriptor;
pub mod format;
pub mod heap;
pub mod memory;
pub mod remap;
pub mod staging;
pub mod upload;

pub use api::{TextureCacheConfig, TextureError, TextureResult};
pub use backend::GpuBackend;
pub use binder::{RenderTargetPool, TextureBinder, TextureBindings, UploadStats};
pub use descriptor::{TextureDescriptor, TextureUnitRegisters};
pub use heap::FrameResources;
pub use memory::{GuestMemory, LinearGuestMemory, MemoryWatch};
