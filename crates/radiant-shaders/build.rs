//! Build script to compile GLSL shaders to SPIR-V.

fn main() {
    // Rerun if shaders change
    println!("cargo:rerun-if-changed=shaders/");

    #[cfg(feature = "compile")]
    spirv::compile_all();
}

#[cfg(feature = "compile")]
mod spirv {
    use shaderc::{Compiler, IncludeType, ResolvedInclude, ShaderKind};
    use std::env;
    use std::fs;
    use std::path::{Path, PathBuf};

    pub fn compile_all() {
        let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
        let shader_dir = Path::new("shaders");

        let compiler = Compiler::new().expect("Failed to create shader compiler");

        // Compute fallback tracer
        compile_shader(
            &compiler,
            &shader_dir.join("path_trace.comp"),
            &out_dir.join("path_trace.spv"),
            ShaderKind::Compute,
        );

        // Vertex stage paired with generated material fragments
        compile_shader(
            &compiler,
            &shader_dir.join("material_mesh.vert"),
            &out_dir.join("material_mesh_vert.spv"),
            ShaderKind::Vertex,
        );

        #[cfg(feature = "ray_tracing")]
        {
            let rt_dir = shader_dir.join("rt");
            for (file, output, kind) in [
                ("path_trace.rgen", "path_trace_rgen.spv", ShaderKind::RayGeneration),
                ("path_trace.rmiss", "path_trace_rmiss.spv", ShaderKind::Miss),
                ("shadow.rmiss", "shadow_rmiss.spv", ShaderKind::Miss),
                ("path_trace.rchit", "path_trace_rchit.spv", ShaderKind::ClosestHit),
                ("shadow.rchit", "shadow_rchit.spv", ShaderKind::ClosestHit),
            ] {
                compile_shader(&compiler, &rt_dir.join(file), &out_dir.join(output), kind);
            }
        }
    }

    fn resolve_include(
        requested: &str,
        _include_type: IncludeType,
        requesting: &str,
        _depth: usize,
    ) -> Result<ResolvedInclude, String> {
        let base = Path::new(requesting).parent().unwrap_or_else(|| Path::new("."));
        let path = base.join(requested);
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("failed to include {}: {e}", path.display()))?;
        Ok(ResolvedInclude {
            resolved_name: path.to_string_lossy().into_owned(),
            content,
        })
    }

    fn compile_shader(compiler: &Compiler, input: &Path, output: &Path, kind: ShaderKind) {
        let source = fs::read_to_string(input)
            .unwrap_or_else(|e| panic!("Failed to read shader {}: {e}", input.display()));

        let mut options =
            shaderc::CompileOptions::new().expect("Failed to create compile options");
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_3 as u32,
        );
        options.set_target_spirv(shaderc::SpirvVersion::V1_6);
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
        options.set_include_callback(resolve_include);

        // The full relative path is the source name so includes resolve next to it
        let source_name = input.to_string_lossy();
        let result = compiler
            .compile_into_spirv(&source, kind, &source_name, "main", Some(&options))
            .unwrap_or_else(|e| panic!("Failed to compile shader {}: {e}", input.display()));

        if result.get_num_warnings() > 0 {
            println!(
                "cargo:warning=Shader warnings in {}: {}",
                input.display(),
                result.get_warning_messages()
            );
        }

        fs::write(output, bytemuck::cast_slice::<u32, u8>(result.as_binary()))
            .unwrap_or_else(|e| panic!("Failed to write shader {}: {e}", output.display()));
    }
}
