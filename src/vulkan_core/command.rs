use std::fmt::Debug;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use super::buffer::Buffer;
use super::device::Device;
use super::fence::{Fence, WaitMode};
use super::pipeline::{PipelineState, RootSignature};
use super::{vk_try, Error, Result};

/// The compute queue of the device's queue family.
#[derive(Debug)]
pub struct CommandQueue {
    device: Arc<Device>,
    queue: vk::Queue,
}

impl CommandQueue {
    pub fn create(device: &Arc<Device>) -> Self {
        let queue = unsafe { device.get_device_queue(device.queue_family_index, 0) };
        Self {
            device: device.clone(),
            queue,
        }
    }

    /// Submits `list` and signals `fence` to `value` once it has executed.
    #[profiling::function]
    pub fn submit(&self, list: ClosedCommandList, fence: Fence, value: u64) -> Result<Submission> {
        let command_buffers = [list.command_buffer];
        let signal_semaphores = [fence.vk()];
        let signal_values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            vk_try!(self.device.queue_submit(
                self.queue,
                std::slice::from_ref(&submit_info),
                vk::Fence::null()
            ))?;
        }
        log::debug!("Submitted command list, fence signals {value}");

        Ok(Submission {
            device: self.device.clone(),
            list: ManuallyDrop::new(list),
            fence: ManuallyDrop::new(fence),
            value,
            state: SubmissionState::Pending,
        })
    }
}

/// Backing memory for command lists, a command pool.
#[derive(Debug)]
pub struct CommandAllocator {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandAllocator {
    pub fn create(device: &Arc<Device>) -> Result<Arc<Self>> {
        let pool_create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(device.queue_family_index);
        let pool = unsafe { vk_try!(device.create_command_pool(&pool_create_info, None))? };
        Ok(Arc::new(Self {
            device: device.clone(),
            pool,
        }))
    }
}

impl Drop for CommandAllocator {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

struct CommandBuffer {
    allocator: Arc<CommandAllocator>,
    command_buffer: vk::CommandBuffer,
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.allocator
                .device
                .free_command_buffers(self.allocator.pool, &[self.command_buffer]);
        }
    }
}

/// A command list open for recording. It accepts exactly one dispatch and is
/// turned into a [`ClosedCommandList`] by [`CommandList::close`].
pub struct CommandList {
    inner: CommandBuffer,
    pipeline_layout: Option<vk::PipelineLayout>,
    dispatched: bool,
}
impl Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("command_buffer", &self.inner.command_buffer)
            .field("dispatched", &self.dispatched)
            .finish()
    }
}

impl CommandList {
    pub fn create(allocator: &Arc<CommandAllocator>) -> Result<Self> {
        let device = &allocator.device;
        let command_buffer_allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_buffer_count(1)
            .command_pool(allocator.pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        let command_buffer =
            unsafe { vk_try!(device.allocate_command_buffers(&command_buffer_allocate_info))?[0] };
        let inner = CommandBuffer {
            allocator: allocator.clone(),
            command_buffer,
        };

        let command_buffer_begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            vk_try!(device.begin_command_buffer(command_buffer, &command_buffer_begin_info))?;
        }

        Ok(Self {
            inner,
            pipeline_layout: None,
            dispatched: false,
        })
    }

    fn device(&self) -> &Device {
        &self.inner.allocator.device
    }

    pub fn set_compute_root_signature(&mut self, root_signature: &RootSignature) {
        self.pipeline_layout = Some(root_signature.pipeline_layout());
    }

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) {
        log::trace!("Binding Pipeline.");
        unsafe {
            self.device().cmd_bind_pipeline(
                self.inner.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.vk(),
            );
        }
    }

    /// Binds `buffer` as the UAV root argument at `register`, straight from the
    /// command list via a push descriptor.
    pub fn set_compute_root_unordered_access_view(
        &mut self,
        register: u32,
        buffer: &Buffer,
    ) -> Result<()> {
        let pipeline_layout = self.pipeline_layout.ok_or(Error::RootSignatureNotSet)?;
        let buffer_infos = [vk::DescriptorBufferInfo {
            buffer: buffer.vk(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_binding(register)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_infos);
        log::trace!("Pushing UAV {buffer:?} to register {register}.");
        unsafe {
            self.device().push_descriptor.cmd_push_descriptor_set(
                self.inner.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline_layout,
                0,
                std::slice::from_ref(&write),
            );
        }
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if self.dispatched {
            return Err(Error::DispatchAlreadyRecorded);
        }
        log::trace!("Dispatching ({x}, {y}, {z}).");
        unsafe {
            self.device().cmd_dispatch(self.inner.command_buffer, x, y, z);
        }
        self.dispatched = true;
        Ok(())
    }

    /// Makes shader writes visible to host reads once the list has executed.
    pub fn host_read_barrier(&mut self) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        unsafe {
            self.device().cmd_pipeline_barrier(
                self.inner.command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                std::slice::from_ref(&barrier),
                &[],
                &[],
            );
        }
    }

    pub fn close(self) -> Result<ClosedCommandList> {
        unsafe {
            vk_try!(self.device().end_command_buffer(self.inner.command_buffer))?;
        }
        Ok(ClosedCommandList {
            command_buffer: self.inner.command_buffer,
            _inner: self.inner,
            dispatched: self.dispatched,
        })
    }
}

/// A fully recorded command list, ready for submission.
pub struct ClosedCommandList {
    command_buffer: vk::CommandBuffer,
    _inner: CommandBuffer,
    dispatched: bool,
}
impl Debug for ClosedCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosedCommandList")
            .field("command_buffer", &self.command_buffer)
            .field("dispatched", &self.dispatched)
            .finish()
    }
}
impl ClosedCommandList {
    pub fn dispatched(&self) -> bool {
        self.dispatched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmissionState {
    Pending,
    Completed,
    /// The wait timed out, the GPU may never finish the work.
    Abandoned,
}

/// What dropping a submission does with the command list and fence.
#[derive(Debug, PartialEq, Eq)]
enum Teardown {
    Release,
    WaitIdleThenRelease,
    Leak,
}

impl SubmissionState {
    fn teardown(self) -> Teardown {
        match self {
            Self::Completed => Teardown::Release,
            Self::Pending => Teardown::WaitIdleThenRelease,
            Self::Abandoned => Teardown::Leak,
        }
    }
}

/// A submitted command list and the fence value marking its completion.
///
/// Dropping a submission that was not waited on blocks until the device is
/// idle, so the command list is never freed while in flight. A submission
/// whose wait timed out is abandoned instead: its command list and fence are
/// leaked and nothing waits on the device again.
pub struct Submission {
    device: Arc<Device>,
    list: ManuallyDrop<ClosedCommandList>,
    fence: ManuallyDrop<Fence>,
    value: u64,
    state: SubmissionState,
}
impl Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("list", &self.list)
            .field("fence", &self.fence)
            .field("value", &self.value)
            .field("state", &self.state)
            .finish()
    }
}

impl Submission {
    /// Waits for the fence value signaled on submission. A timeout abandons
    /// the submission.
    pub fn wait(&mut self, mode: WaitMode, timeout: Duration) -> Result<u64> {
        match self.fence.wait(self.value, mode, timeout) {
            Ok(completed) => {
                debug_assert!(completed >= self.value);
                self.state = SubmissionState::Completed;
                Ok(completed)
            }
            Err(err @ Error::WaitTimedOut { .. }) => {
                self.abandon();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Gives up on the work in flight. The device is marked so that no
    /// teardown waits on it or frees anything the work may still touch.
    pub fn abandon(&mut self) {
        log::error!("Abandoning submission of fence value {}", self.value);
        self.state = SubmissionState::Abandoned;
        self.device.abandon_in_flight_work();
    }

    pub fn is_abandoned(&self) -> bool {
        self.state == SubmissionState::Abandoned
    }
}

impl Drop for Submission {
    fn drop(&mut self) {
        match self.state.teardown() {
            Teardown::Leak => {
                log::warn!("Leaking the command list and fence of an abandoned submission");
                return;
            }
            Teardown::WaitIdleThenRelease => {
                log::warn!("Dropping a submission that was not waited for, waiting for idle");
                if let Err(result) = unsafe { self.device.device_wait_idle() } {
                    log::error!("Waiting for device idle failed with {result:?}");
                }
            }
            Teardown::Release => {}
        }
        unsafe {
            ManuallyDrop::drop(&mut self.list);
            ManuallyDrop::drop(&mut self.fence);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_pending_submissions_wait_for_idle() {
        assert_eq!(SubmissionState::Completed.teardown(), Teardown::Release);
        assert_eq!(SubmissionState::Pending.teardown(), Teardown::WaitIdleThenRelease);
    }

    #[test]
    fn abandoned_submission_leaks_without_waiting() {
        assert_eq!(SubmissionState::Abandoned.teardown(), Teardown::Leak);
    }
}
