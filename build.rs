//! Compiles the bundled WGSL kernels in `shaders/` to SPIR-V at build time.
//!
//! The runtime never compiles shaders: it only consumes the `.spv` blobs
//! written to `OUT_DIR` here (see `src/shaders.rs`).

use std::path::Path;

const KERNELS: &[&str] = &["sum", "copy"];

fn compile_wgsl(name: &str, src: &str) -> Result<Vec<u32>, String> {
    let module = naga::front::wgsl::parse_str(src)
        .map_err(|e| format!("{name}.wgsl parse error: {}", e.emit_to_string(src)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| format!("{name}.wgsl validation error: {:?}", e))?;

    // SPIR-V 1.3 is core in Vulkan 1.1, which is what the context requests.
    naga::back::spv::write_vec(
        &module,
        &info,
        &naga::back::spv::Options {
            lang_version: (1, 3),
            flags: naga::back::spv::WriterFlags::empty(),
            ..naga::back::spv::Options::default()
        },
        None,
    )
    .map_err(|e| format!("{name}.wgsl SPIR-V export error: {:?}", e))
}

fn main() {
    println!("cargo:rerun-if-changed=shaders");

    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    for name in KERNELS {
        let path = Path::new("shaders").join(format!("{name}.wgsl"));
        println!("cargo:rerun-if-changed={}", path.display());

        let src = std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
        let words = compile_wgsl(name, &src).unwrap_or_else(|e| panic!("{e}"));
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        let dst = Path::new(&out_dir).join(format!("{name}.spv"));
        std::fs::write(&dst, bytes)
            .unwrap_or_else(|e| panic!("failed to write {}: {e}", dst.display()));
    }
}
