// SPDX-License-Identifier: CEPL-1.0
use std::error::Error;

const SHADERS: [&str; 4] = ["eye.vert", "eye.frag", "frame.vert", "frame.frag"];

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    for name in SHADERS {
        println!("cargo:rerun-if-changed=shaders/{name}");
    }
    #[cfg(feature = "compile-shaders")]
    compile::run()?;
    Ok(())
}

#[cfg(feature = "compile-shaders")]
mod compile {
    use std::error::Error;
    use std::path::{Path, PathBuf};
    use std::{env, fs};

    use super::SHADERS;

    pub fn run() -> Result<(), Box<dyn Error>> {
        let out = PathBuf::from(env::var("OUT_DIR")?).join("shaders");
        fs::create_dir_all(&out)?;

        let compiler = shaderc::Compiler::new()?;
        let mut opts = shaderc::CompileOptions::new()?;
        // gl_ViewIndex needs 1.1 semantics
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_1 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for name in SHADERS {
            let src_path = Path::new("shaders").join(name);
            let source = fs::read_to_string(&src_path)?;
            let kind = if name.ends_with(".vert") {
                shaderc::ShaderKind::Vertex
            } else {
                shaderc::ShaderKind::Fragment
            };
            let spirv = compiler.compile_into_spirv(&source, kind, name, "main", Some(&opts))?;
            if spirv.get_num_warnings() > 0 {
                println!("cargo:warning={name}: {}", spirv.get_warning_messages());
            }
            fs::write(out.join(format!("{name}.spv")), spirv.as_binary_u8())?;
        }

        println!("cargo:rustc-env=STEREO_SHADER_DIR={}", out.display());
        Ok(())
    }
}
