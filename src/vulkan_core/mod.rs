use std::ops::Range;
use std::time::Duration;

pub use ash::vk;

/// Evaluates a driver call returning `VkResult` and attaches the literal call
/// expression to the error.
macro_rules! vk_try {
    ($call:expr) => {
        $call.map_err(|result| $crate::vulkan_core::Error::Driver {
            call: stringify!($call),
            result,
        })
    };
}
pub(crate) use vk_try;

pub mod buffer;
pub mod command;
pub mod device;
pub mod fence;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;

pub use buffer::{Buffer, BufferInfo, MemoryLocation};
pub use command::{ClosedCommandList, CommandAllocator, CommandList, CommandQueue, Submission};
pub use device::{Device, FeatureLevel};
pub use fence::{Fence, WaitMode};
pub use instance::Instance;
pub use physical_device::Adapter;
pub use pipeline::{PipelineState, RootParameter, RootSignature, RootSignatureDesc};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("`{call}` failed with {result:?}")]
    Driver {
        call: &'static str,
        result: vk::Result,
    },
    #[error("Could not load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("No adapters found!")]
    NoAdapters,
    #[error("Adapter index {index} is out of range, only {count} adapters are available")]
    AdapterOutOfRange { index: usize, count: usize },
    #[error("Adapter {adapter:?} supports Vulkan {supported}, but feature level {requested} was requested")]
    UnsupportedFeatureLevel {
        adapter: String,
        supported: FeatureLevel,
        requested: FeatureLevel,
    },
    #[error("Adapter {adapter:?} does not support {feature}")]
    MissingFeature {
        adapter: String,
        feature: &'static str,
    },
    #[error("Could not find a Queue Family, supporting compute!")]
    QueueFamilyNotFound,
    #[error(transparent)]
    Shader(#[from] shader::Error),
    #[error(transparent)]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("Root parameter {index} is in space {space}, only space 0 can be bound directly")]
    UnsupportedRootParameter { index: usize, space: u32 },
    #[error("Root arguments can only be bound after the root signature is set")]
    RootSignatureNotSet,
    #[error("A dispatch has already been recorded into this command list")]
    DispatchAlreadyRecorded,
    #[error("Buffer memory is not host visible")]
    NotMappable,
    #[error("Range {range:?} exceeds the buffer size of {size} bytes")]
    MapOutOfRange { range: Range<usize>, size: usize },
    #[error("Timed out after {timeout:?} waiting for fence value {target}, completed value is {completed}")]
    WaitTimedOut {
        target: u64,
        completed: u64,
        timeout: Duration,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    fn create_fence_fails() -> Result<()> {
        let result: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        vk_try!(result)?;
        Ok(())
    }

    #[test]
    fn driver_error_names_call() {
        let err = create_fence_fails().unwrap_err();
        match &err {
            Error::Driver { call, result } => {
                assert_eq!(*call, "result");
                assert_eq!(*result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            _ => panic!("unexpected error {err:?}"),
        }
        insta::assert_snapshot!(err.to_string(), @"`result` failed with ERROR_OUT_OF_DEVICE_MEMORY");
    }

    #[test]
    fn wait_timeout_message() {
        let err = Error::WaitTimedOut {
            target: 1,
            completed: 0,
            timeout: Duration::from_millis(250),
        };
        insta::assert_snapshot!(err.to_string(), @"Timed out after 250ms waiting for fence value 1, completed value is 0");
    }
}
