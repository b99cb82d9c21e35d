use std::ffi::CStr;
use std::fmt::Debug;
use std::sync::Arc;

use ash::vk;

use super::device::Device;
use super::shader;
use super::{vk_try, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    All,
    Compute,
}
impl From<ShaderVisibility> for vk::ShaderStageFlags {
    fn from(value: ShaderVisibility) -> Self {
        match value {
            ShaderVisibility::All => vk::ShaderStageFlags::ALL,
            ShaderVisibility::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// A binding bound straight from the command list, without a descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootParameter {
    /// Unordered-access (read/write storage) buffer.
    Uav {
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
        /// Buffer contents may change up to execution, so nothing about them is cached.
        volatile: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
}

impl RootSignatureDesc {
    /// One volatile UAV at register 0, space 0, visible to every stage.
    pub fn single_uav() -> Self {
        Self {
            parameters: vec![RootParameter::Uav {
                register: 0,
                space: 0,
                visibility: ShaderVisibility::All,
                volatile: true,
            }],
        }
    }

    /// Bindings of the push descriptor set. Parameters map to set 0, so only
    /// space 0 is accepted.
    pub fn bindings(&self) -> Result<Vec<vk::DescriptorSetLayoutBinding<'static>>> {
        self.parameters
            .iter()
            .enumerate()
            .map(|(index, parameter)| match *parameter {
                RootParameter::Uav {
                    register,
                    space,
                    visibility,
                    ..
                } => {
                    if space != 0 {
                        return Err(Error::UnsupportedRootParameter { index, space });
                    }
                    Ok(vk::DescriptorSetLayoutBinding::default()
                        .binding(register)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .descriptor_count(1)
                        .stage_flags(visibility.into()))
                }
            })
            .collect()
    }
}

/// Binding contract of a pipeline: a push descriptor set layout and the
/// pipeline layout built from it.
pub struct RootSignature {
    device: Arc<Device>,
    desc: RootSignatureDesc,
    desc_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
}
impl Debug for RootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSignature")
            .field("desc", &self.desc)
            .field("pipeline_layout", &self.pipeline_layout)
            .finish()
    }
}

impl RootSignature {
    #[profiling::function]
    pub fn create(device: &Arc<Device>, desc: &RootSignatureDesc) -> Result<Self> {
        let bindings = desc.bindings()?;
        let desc_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&bindings);
        let desc_set_layout =
            unsafe { vk_try!(device.create_descriptor_set_layout(&desc_info, None))? };

        let set_layouts = [desc_set_layout];
        let pipeline_layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout =
            match unsafe { vk_try!(device.create_pipeline_layout(&pipeline_layout_info, None)) } {
                Ok(pipeline_layout) => pipeline_layout,
                Err(err) => {
                    unsafe { device.destroy_descriptor_set_layout(desc_set_layout, None) };
                    return Err(err);
                }
            };
        log::trace!("Created root signature {desc:?}");

        Ok(Self {
            device: device.clone(),
            desc: desc.clone(),
            desc_set_layout,
            pipeline_layout,
        })
    }
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }
}

impl Drop for RootSignature {
    fn drop(&mut self) {
        if self.device.has_abandoned_work() {
            return;
        }
        unsafe {
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_set_layout(self.desc_set_layout, None);
        }
    }
}

/// Compute pipeline: compiled shader linked against a root signature.
pub struct PipelineState {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}
impl Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl PipelineState {
    #[profiling::function]
    pub fn create(
        device: &Arc<Device>,
        root_signature: &RootSignature,
        src: &str,
    ) -> Result<Self> {
        let code = shader::compile_compute(src, shader::ENTRY_POINT)?;
        Self::from_spirv(device, root_signature, &code, shader::ENTRY_POINT)
    }

    pub fn from_spirv(
        device: &Arc<Device>,
        root_signature: &RootSignature,
        code: &[u32],
        entry_point: &CStr,
    ) -> Result<Self> {
        unsafe {
            let shader_info = vk::ShaderModuleCreateInfo::default().code(code);
            let shader = vk_try!(device.create_shader_module(&shader_info, None))?;

            let pipeline_shader_info = vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(shader)
                .name(entry_point);

            let compute_pipeline_info = vk::ComputePipelineCreateInfo::default()
                .stage(pipeline_shader_info)
                .layout(root_signature.pipeline_layout());
            let pipelines = device
                .create_compute_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&compute_pipeline_info),
                    None,
                )
                .map_err(|(_, result)| Error::Driver {
                    call: "device.create_compute_pipelines(vk::PipelineCache::null(), &[compute_pipeline_info], None)",
                    result,
                });

            // Destruct temporary elements
            device.destroy_shader_module(shader, None);

            let pipeline = pipelines?[0];
            log::trace!("Created compute pipeline {pipeline:?}");

            Ok(Self {
                device: device.clone(),
                pipeline,
            })
        }
    }

    pub fn vk(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        if self.device.has_abandoned_work() {
            return;
        }
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}
