//! The single-shot dispatch sequence.
//!
//! Every stage is a function consuming the previous stage's output, so the order
//! of the sequence is checked by the types rather than by convention. The first
//! failing stage ends the run; everything created up to that point is released
//! on the way out. A timed-out wait is the exception: the work may still be
//! running, so what it uses is leaked instead.

use std::fmt::Display;
use std::ops::Range;
use std::sync::Arc;

use bytesize::ByteSize;

use crate::config::RunConfig;
use crate::vulkan_core::shader::DISPATCH_SHADER;
use crate::vulkan_core::{
    self, Adapter, Buffer, BufferInfo, ClosedCommandList, CommandAllocator, CommandList,
    CommandQueue, Device, Fence, Instance, PipelineState, RootSignature, RootSignatureDesc,
    Submission,
};

pub const BUFFER_SIZE: usize = 256;
pub const READBACK_RANGE: Range<usize> = 0..64;
pub const THREAD_GROUPS: (u32, u32, u32) = (1, 1, 1);
pub const FENCE_VALUE: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Uninitialized,
    AdaptersEnumerated,
    DeviceReady,
    CommandInfraReady,
    PipelineReady,
    BufferReady,
    Recorded,
    Submitted,
    Completed,
    ReadBack,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Uninitialized,
        Stage::AdaptersEnumerated,
        Stage::DeviceReady,
        Stage::CommandInfraReady,
        Stage::PipelineReady,
        Stage::BufferReady,
        Stage::Recorded,
        Stage::Submitted,
        Stage::Completed,
        Stage::ReadBack,
    ];

    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self as usize + 1).copied()
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Uninitialized => "uninitialized",
            Stage::AdaptersEnumerated => "adapter enumeration",
            Stage::DeviceReady => "device setup",
            Stage::CommandInfraReady => "command infrastructure setup",
            Stage::PipelineReady => "pipeline setup",
            Stage::BufferReady => "resource setup",
            Stage::Recorded => "recording",
            Stage::Submitted => "submission",
            Stage::Completed => "synchronization",
            Stage::ReadBack => "readback",
        };
        f.write_str(name)
    }
}

/// A run that stopped before reaching `stage`; `reached` is the last stage
/// that completed.
#[derive(thiserror::Error, Debug)]
#[error("Dispatch failed during {stage}: {source}")]
pub struct RunError {
    pub stage: Stage,
    pub reached: Stage,
    #[source]
    pub source: vulkan_core::Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSummary {
    pub index: usize,
    pub description: String,
    pub dedicated_memory: u64,
}

impl From<&Adapter> for AdapterSummary {
    fn from(adapter: &Adapter) -> Self {
        Self {
            index: adapter.index,
            description: adapter.description(),
            dedicated_memory: adapter.dedicated_memory(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub adapters: Vec<AdapterSummary>,
    pub selected: usize,
    pub fence_value: u64,
    pub value: u32,
}

/// Output of adapter enumeration.
#[derive(Debug)]
pub struct Adapters {
    pub instance: Arc<Instance>,
    pub adapters: Vec<Adapter>,
}

#[derive(Debug)]
pub struct CommandInfra {
    pub queue: CommandQueue,
    pub allocator: Arc<CommandAllocator>,
    pub list: CommandList,
}

#[derive(Debug)]
pub struct Pipeline {
    pub root_signature: RootSignature,
    pub pipeline_state: PipelineState,
}

/// Tracks the furthest stage reached and tags failures with the stage being entered.
#[derive(Debug)]
struct Progress {
    reached: Stage,
}

impl Progress {
    fn advance<T>(
        &mut self,
        stage: Stage,
        f: impl FnOnce() -> vulkan_core::Result<T>,
    ) -> Result<T, RunError> {
        debug_assert_eq!(self.reached.next(), Some(stage));
        log::debug!("{} -> {}", self.reached, stage);
        match f() {
            Ok(value) => {
                self.reached = stage;
                Ok(value)
            }
            Err(source) => {
                log::error!("Stage {stage} failed: {source}");
                Err(RunError {
                    stage,
                    reached: self.reached,
                    source,
                })
            }
        }
    }
}

#[profiling::function]
pub fn enumerate_adapters(config: &RunConfig) -> vulkan_core::Result<Adapters> {
    let instance = Arc::new(Instance::create(config.validation)?);
    let adapters = instance.enumerate_adapters()?;
    for adapter in adapters.iter() {
        println!("{}", adapter.description());
        println!("{}", adapter.dedicated_memory());
        log::info!(
            "Adapter {}: {} with {} dedicated memory",
            adapter.index,
            adapter.description(),
            ByteSize(adapter.dedicated_memory())
        );
    }
    if adapters.is_empty() {
        return Err(vulkan_core::Error::NoAdapters);
    }
    Ok(Adapters { instance, adapters })
}

#[profiling::function]
pub fn create_device(adapters: &Adapters, config: &RunConfig) -> vulkan_core::Result<Arc<Device>> {
    let adapter = adapters
        .adapters
        .get(config.adapter)
        .ok_or(vulkan_core::Error::AdapterOutOfRange {
            index: config.adapter,
            count: adapters.adapters.len(),
        })?;
    Device::create(&adapters.instance, adapter, config.feature_level)
}

pub fn create_command_infra(device: &Arc<Device>) -> vulkan_core::Result<CommandInfra> {
    let queue = CommandQueue::create(device);
    let allocator = CommandAllocator::create(device)?;
    let list = CommandList::create(&allocator)?;
    Ok(CommandInfra {
        queue,
        allocator,
        list,
    })
}

#[profiling::function]
pub fn create_pipeline(device: &Arc<Device>) -> vulkan_core::Result<Pipeline> {
    let root_signature = RootSignature::create(device, &RootSignatureDesc::single_uav())?;
    let pipeline_state = PipelineState::create(device, &root_signature, DISPATCH_SHADER)?;
    Ok(Pipeline {
        root_signature,
        pipeline_state,
    })
}

pub fn create_buffer(device: &Arc<Device>) -> vulkan_core::Result<Buffer> {
    Buffer::create(device, BufferInfo::unordered_access(BUFFER_SIZE))
}

pub fn record(
    mut list: CommandList,
    pipeline: &Pipeline,
    buffer: &Buffer,
) -> vulkan_core::Result<ClosedCommandList> {
    list.set_compute_root_signature(&pipeline.root_signature);
    list.set_pipeline_state(&pipeline.pipeline_state);
    list.set_compute_root_unordered_access_view(0, buffer)?;
    let (x, y, z) = THREAD_GROUPS;
    list.dispatch(x, y, z)?;
    list.host_read_barrier();
    list.close()
}

pub fn submit(
    device: &Arc<Device>,
    queue: &CommandQueue,
    list: ClosedCommandList,
) -> vulkan_core::Result<Submission> {
    let fence = Fence::create(device, 0)?;
    queue.submit(list, fence, FENCE_VALUE)
}

pub fn wait(submission: &mut Submission, config: &RunConfig) -> vulkan_core::Result<u64> {
    submission.wait(config.wait, config.timeout)
}

pub fn read_back(buffer: &Buffer) -> vulkan_core::Result<u32> {
    let values = buffer.read_u32(READBACK_RANGE)?;
    Ok(values[0])
}

/// Runs the whole sequence, printing the adapters and the value read back.
pub fn run_with(config: &RunConfig) -> Result<RunReport, RunError> {
    let mut progress = Progress {
        reached: Stage::Uninitialized,
    };

    let adapters = progress.advance(Stage::AdaptersEnumerated, || enumerate_adapters(config))?;
    let device = progress.advance(Stage::DeviceReady, || create_device(&adapters, config))?;
    let CommandInfra {
        queue,
        allocator: _allocator,
        list,
    } = progress.advance(Stage::CommandInfraReady, || create_command_infra(&device))?;
    let pipeline = progress.advance(Stage::PipelineReady, || create_pipeline(&device))?;
    let buffer = progress.advance(Stage::BufferReady, || create_buffer(&device))?;
    let list = progress.advance(Stage::Recorded, || record(list, &pipeline, &buffer))?;
    let mut submission = progress.advance(Stage::Submitted, || submit(&device, &queue, list))?;
    let fence_value = progress.advance(Stage::Completed, || wait(&mut submission, config))?;
    let value = progress.advance(Stage::ReadBack, || read_back(&buffer))?;

    println!("{value}");
    log::info!("Read back {value} after fence reached {fence_value}");

    Ok(RunReport {
        adapters: adapters.adapters.iter().map(AdapterSummary::from).collect(),
        selected: config.adapter,
        fence_value,
        value,
    })
}

pub fn run() -> Result<(), RunError> {
    run_with(&RunConfig::default()).map(|_| ())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stages_form_a_chain() {
        let mut stage = Stage::Uninitialized;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited, Stage::ALL);
        assert_eq!(stage, Stage::ReadBack);
    }

    #[test]
    fn progress_stops_at_failing_stage() {
        let mut progress = Progress {
            reached: Stage::Uninitialized,
        };
        progress
            .advance(Stage::AdaptersEnumerated, || Ok(()))
            .unwrap();
        let err = progress
            .advance(Stage::DeviceReady, || -> vulkan_core::Result<()> {
                Err(vulkan_core::Error::NoAdapters)
            })
            .unwrap_err();
        assert_eq!(err.stage, Stage::DeviceReady);
        assert_eq!(err.reached, Stage::AdaptersEnumerated);
        assert_eq!(progress.reached, Stage::AdaptersEnumerated);
    }

    #[test]
    fn run_error_message() {
        let err = RunError {
            stage: Stage::DeviceReady,
            reached: Stage::AdaptersEnumerated,
            source: vulkan_core::Error::Driver {
                call: "instance.create_device(adapter.physical_device, &device_create_info, None)",
                result: vulkan_core::vk::Result::ERROR_INITIALIZATION_FAILED,
            },
        };
        insta::assert_snapshot!(err.to_string(), @"Dispatch failed during device setup: `instance.create_device(adapter.physical_device, &device_create_info, None)` failed with ERROR_INITIALIZATION_FAILED");
    }

    #[test]
    fn readback_covers_first_value() {
        assert!(READBACK_RANGE.end <= BUFFER_SIZE);
        assert!(READBACK_RANGE.len() >= std::mem::size_of::<u32>());
    }
}
