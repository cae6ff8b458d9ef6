//! SPIR-V kernels built from `shaders/*.wgsl` by the build script.
//!
//! Both use a workgroup size of 1 and bind one storage buffer per binding,
//! output last.

/// `result[i] = lhs[i] + rhs[i]` over bindings 0, 1 -> 2.
pub static SUM_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/sum.spv"));

/// `dst[i] = src[i]` over bindings 0 -> 1.
pub static COPY_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/copy.spv"));

/// `(file name, bytes)` for every bundled kernel.
pub fn bundled() -> [(&'static str, &'static [u8]); 2] {
    [("sum.spv", SUM_SPV), ("copy.spv", COPY_SPV)]
}
