use std::ffi::CStr;

/// Writes `1` into element 0 of the storage buffer bound at set 0, binding 0.
pub const DISPATCH_SHADER: &str = r#"#version 450
layout(local_size_x = 1, local_size_y = 1, local_size_z = 1) in;

layout(set = 0, binding = 0) buffer Value {
    uint g_value[];
};

void main() {
    g_value[0] = 1;
}
"#;

pub const ENTRY_POINT: &CStr = c"main";

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not create the shader compiler")]
    CompilerUnavailable,
    #[error("Shader compilation failed with {errors} error(s):\n{diagnostics}")]
    Compilation { errors: u32, diagnostics: String },
    #[error("Shader compiler failed: {0}")]
    Compiler(String),
    #[error("Compiled shader is not a SPIR-V module")]
    InvalidBinary,
}

impl From<shaderc::Error> for Error {
    fn from(value: shaderc::Error) -> Self {
        match value {
            shaderc::Error::CompilationError(errors, diagnostics) => {
                Self::Compilation { errors, diagnostics }
            }
            other => Self::Compiler(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Compiles GLSL compute `src` into Vulkan 1.2 SPIR-V words.
#[profiling::function]
pub fn compile_compute(src: &str, entry_point: &CStr) -> Result<Vec<u32>> {
    let compiler = shaderc::Compiler::new().ok_or(Error::CompilerUnavailable)?;
    let mut options = shaderc::CompileOptions::new().ok_or(Error::CompilerUnavailable)?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let artifact = compiler.compile_into_spirv(
        src,
        shaderc::ShaderKind::Compute,
        "dispatch.comp",
        &entry_point.to_string_lossy(),
        Some(&options),
    )?;
    if artifact.get_num_warnings() > 0 {
        log::warn!("Shader compiled with warnings:\n{}", artifact.get_warning_messages());
    }

    let binary = artifact.as_binary().to_vec();
    if binary.first() != Some(&SPIRV_MAGIC) {
        return Err(Error::InvalidBinary);
    }
    log::trace!("Compiled compute shader into {} words", binary.len());
    Ok(binary)
}
