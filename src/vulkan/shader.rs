//! Precompiled SPIR-V blobs.
//!
//! The binary is handed to the driver unchanged; the only thing read out of
//! it is the entry-point table, so a missing `main` is reported as an error
//! here instead of as an opaque `vkCreateComputePipelines` failure.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use crate::error::{ComputeError, Result};

const SPIRV_MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

const OP_ENTRY_POINT: u32 = 15;
const OP_EXECUTION_MODE: u32 = 16;
const EXECUTION_MODE_LOCAL_SIZE: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    Vertex,
    Fragment,
    GLCompute,
    Other(u32),
}

impl From<u32> for ExecutionModel {
    fn from(raw: u32) -> Self {
        match raw {
            0 => Self::Vertex,
            4 => Self::Fragment,
            5 => Self::GLCompute,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub execution_model: ExecutionModel,
    /// `[1, 1, 1]` unless an `OpExecutionMode LocalSize` says otherwise.
    pub local_size: [u32; 3],
}

#[derive(Debug, Clone)]
pub struct ShaderBinary {
    words: Vec<u32>,
    entry_points: Vec<EntryPoint>,
}

impl ShaderBinary {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| ComputeError::InvalidShader(e.to_string()))?;
        Self::from_words(words)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "shader binary loaded");
        Self::from_bytes(&bytes)
    }

    pub fn from_words(words: Vec<u32>) -> Result<Self> {
        if words.len() < HEADER_WORDS {
            return Err(ComputeError::InvalidShader(format!(
                "{} words is shorter than the module header",
                words.len()
            )));
        }
        if words[0] != SPIRV_MAGIC {
            return Err(ComputeError::InvalidShader(format!(
                "bad magic number {:#010x}",
                words[0]
            )));
        }

        let mut entries = Vec::new();
        let mut local_sizes: HashMap<u32, [u32; 3]> = HashMap::new();

        let mut at = HEADER_WORDS;
        while at < words.len() {
            let word_count = (words[at] >> 16) as usize;
            let opcode = words[at] & 0xffff;
            if word_count == 0 || at + word_count > words.len() {
                return Err(ComputeError::InvalidShader(format!(
                    "malformed instruction at word {at}"
                )));
            }
            let operands = &words[at + 1..at + word_count];

            match opcode {
                OP_ENTRY_POINT if operands.len() >= 3 => {
                    let name = decode_literal(&operands[2..]).ok_or_else(|| {
                        ComputeError::InvalidShader(format!("unterminated entry point name at word {at}"))
                    })?;
                    entries.push((operands[1], ExecutionModel::from(operands[0]), name));
                }
                OP_EXECUTION_MODE if operands.len() >= 5 && operands[1] == EXECUTION_MODE_LOCAL_SIZE => {
                    local_sizes.insert(operands[0], [operands[2], operands[3], operands[4]]);
                }
                _ => {}
            }
            at += word_count;
        }

        let entry_points = entries
            .into_iter()
            .map(|(id, execution_model, name)| EntryPoint {
                name,
                execution_model,
                local_size: local_sizes.get(&id).copied().unwrap_or([1, 1, 1]),
            })
            .collect();

        Ok(Self { words, entry_points })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    /// The compute entry point called `name`.
    pub fn entry_point(&self, name: &str) -> Result<&EntryPoint> {
        self.entry_points
            .iter()
            .find(|e| e.name == name && e.execution_model == ExecutionModel::GLCompute)
            .ok_or_else(|| ComputeError::MissingEntryPoint(name.to_string()))
    }
}

/// SPIR-V literal string: UTF-8, nul-terminated, packed little-endian into words.
fn decode_literal(words: &[u32]) -> Option<String> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let end = bytes.iter().position(|&b| b == 0)?;
    String::from_utf8(bytes[..end].to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const MAIN: [u32; 2] = [u32::from_le_bytes(*b"main"), 0];

    fn header() -> Vec<u32> {
        vec![SPIRV_MAGIC, 0x0001_0300, 0, 8, 0]
    }

    fn module(model: u32, local_size: Option<[u32; 3]>) -> Vec<u32> {
        let mut words = header();
        // OpCapability Shader
        words.extend([(2 << 16) | 17, 1]);
        words.extend([(5 << 16) | OP_ENTRY_POINT, model, 1]);
        words.extend(MAIN);
        if let Some([x, y, z]) = local_size {
            words.extend([(6 << 16) | OP_EXECUTION_MODE, 1, EXECUTION_MODE_LOCAL_SIZE, x, y, z]);
        }
        words
    }

    fn bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_finds_compute_entry_and_local_size() {
        let shader = ShaderBinary::from_bytes(&bytes(&module(5, Some([64, 1, 1])))).unwrap();
        let entry = shader.entry_point("main").unwrap();
        assert_eq!(entry.execution_model, ExecutionModel::GLCompute);
        assert_eq!(entry.local_size, [64, 1, 1]);
    }

    #[test]
    fn test_local_size_defaults_to_one() {
        let shader = ShaderBinary::from_words(module(5, None)).unwrap();
        assert_eq!(shader.entry_point("main").unwrap().local_size, [1, 1, 1]);
    }

    #[test]
    fn test_missing_entry_point() {
        let shader = ShaderBinary::from_words(module(5, None)).unwrap();
        let err = shader.entry_point("kernel").unwrap_err();
        assert!(matches!(err, ComputeError::MissingEntryPoint(ref n) if n == "kernel"));
        assert_eq!(err.kind(), ErrorKind::ApiFailure);
    }

    #[test]
    fn test_vertex_entry_is_not_compute() {
        let shader = ShaderBinary::from_words(module(0, None)).unwrap();
        assert_eq!(shader.entry_points().len(), 1);
        assert!(shader.entry_point("main").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            ShaderBinary::from_bytes(b"not a shader"),
            Err(ComputeError::InvalidShader(_))
        ));
        assert!(matches!(
            ShaderBinary::from_bytes(&[1, 2, 3]),
            Err(ComputeError::InvalidShader(_))
        ));
        assert!(matches!(
            ShaderBinary::from_words(vec![SPIRV_MAGIC, 0]),
            Err(ComputeError::InvalidShader(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_instruction() {
        let mut words = module(5, None);
        words.truncate(words.len() - 1);
        assert!(matches!(
            ShaderBinary::from_words(words),
            Err(ComputeError::InvalidShader(_))
        ));
    }

    #[test]
    fn test_bundled_kernels() {
        for blob in [crate::shaders::SUM_SPV, crate::shaders::COPY_SPV] {
            let shader = ShaderBinary::from_bytes(blob).unwrap();
            let entry = shader.entry_point("main").unwrap();
            assert_eq!(entry.local_size, [1, 1, 1]);
        }
    }
}
