//! Pipeline creation and shader-hot-reload (§4.12). A pipeline entry
//! stores a deep copy of everything needed to rebuild its Vulkan object
//! from scratch — state config plus the owning layout and shader hash —
//! so `recreate_pipelines_with_new_shader` can swap only the shader
//! stages and relink, keeping every other piece of fixed-function state
//! byte-identical.

use crate::error::{GfxError, GfxResult};
use crate::handles::PipelineLayoutHandle;
use crate::layout_cache::vk_shader_stage_flags;
use crate::reflection::ShaderReflection;
use crate::types::{
    BlendDesc, DepthStencilDesc, PrimitiveTopology, RasterizerDesc, VertexBufferBindingDesc, VertexFormat,
    VertexInputAttributeDesc,
};
use ash::vk;
use rustc_hash::FxHashMap;

/// Everything needed to (re)build one graphics pipeline. Kept verbatim
/// in [`PipelineEntry`] so a shader reload can reuse every field except
/// the shader stage modules.
#[derive(Clone)]
pub struct GfxPipelineDesc {
    pub shader: ShaderReflection,
    pub topology: PrimitiveTopology,
    pub vertex_bindings: Vec<VertexBufferBindingDesc>,
    pub vertex_attributes: Vec<VertexInputAttributeDesc>,
    pub descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    pub descriptor_set_layout_handles: Vec<crate::handles::DescriptorSetLayoutHandle>,
    pub push_constants: Vec<crate::types::PushConstantDesc>,
    pub rasterizer: RasterizerDesc,
    pub blend: BlendDesc,
    pub depth_stencil: DepthStencilDesc,
    pub render_pass: vk::RenderPass,
    pub capture_executable_statistics: bool,
}

/// A cached, rebuildable pipeline. `create_info` is a deep copy of the
/// last create-info used to build `raw` — not the live Vulkan struct,
/// which borrows from temporaries — so a shader reload can resubmit it
/// with only the stage array swapped.
pub struct PipelineEntry {
    pub raw: vk::Pipeline,
    pub layout: PipelineLayoutHandle,
    pub layout_raw: vk::PipelineLayout,
    pub shader_hash: u64,
    pub desc: GfxPipelineDesc,
}

fn vertex_format_to_vk(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::R32Float => vk::Format::R32_SFLOAT,
        VertexFormat::R32G32Float => vk::Format::R32G32_SFLOAT,
        VertexFormat::R32G32B32Float => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
    }
}

/// Validates CPU-side vertex attributes against the shader's reflected
/// attributes (§4.12 step 2). The one permitted mismatch: a `COLOR`
/// attribute may be CPU-side `R8G8B8A8_UNORM` while the shader declares
/// `R32G32B32A32_SFLOAT` — Vulkan happily unpacks the normalized bytes
/// into the shader's float4 input.
fn validate_vertex_attributes(shader: &ShaderReflection, attributes: &[VertexInputAttributeDesc]) -> GfxResult<()> {
    for attr in attributes {
        let reflected = shader
            .find_vertex_attribute(&attr.semantic, attr.semantic_index)
            .ok_or_else(|| GfxError::VertexAttributeMismatch {
                semantic: attr.semantic.clone(),
            })?;
        let color_exception = attr.semantic == "COLOR"
            && attr.format == VertexFormat::R8G8B8A8Unorm
            && reflected.format == VertexFormat::R32G32B32A32Float;
        if reflected.format != attr.format && !color_exception {
            return Err(GfxError::VertexAttributeMismatch {
                semantic: attr.semantic.clone(),
            });
        }
    }
    Ok(())
}

fn build_shader_module(device: &ash::Device, spirv: &[u32]) -> GfxResult<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(spirv);
    unsafe { device.create_shader_module(&info, None) }.map_err(Into::into)
}

fn stage_to_vk(stage: crate::types::ShaderStage) -> vk::ShaderStageFlags {
    vk_shader_stage_flags(stage)
}

/// Builds (or rebuilds) the Vulkan graphics pipeline for `desc` against
/// an already-created `layout_raw`. Shader modules are created and
/// destroyed within this call; Vulkan keeps its own copy once linked
/// into the pipeline.
pub fn build_pipeline(
    device: &ash::Device,
    layout: PipelineLayoutHandle,
    layout_raw: vk::PipelineLayout,
    desc: GfxPipelineDesc,
) -> GfxResult<PipelineEntry> {
    validate_vertex_attributes(&desc.shader, &desc.vertex_attributes)?;

    let mut modules = Vec::with_capacity(desc.shader.stages.len());
    let mut stage_infos = Vec::with_capacity(desc.shader.stages.len());
    let entry_names: Vec<std::ffi::CString> = desc
        .shader
        .stages
        .iter()
        .map(|s| std::ffi::CString::new(s.entry_name.as_str()).unwrap_or_default())
        .collect();
    for (stage, entry_name) in desc.shader.stages.iter().zip(entry_names.iter()) {
        let module = build_shader_module(device, &stage.spirv)?;
        modules.push(module);
        stage_infos.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage_to_vk(stage.stage))
                .module(module)
                .name(entry_name.as_c_str()),
        );
    }

    let bindings: Vec<vk::VertexInputBindingDescription> = desc
        .vertex_bindings
        .iter()
        .map(|b| {
            vk::VertexInputBindingDescription::default()
                .binding(b.binding)
                .stride(b.stride)
                .input_rate(match b.input_rate {
                    crate::types::VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
                    crate::types::VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
                })
        })
        .collect();
    let attributes: Vec<vk::VertexInputAttributeDescription> = desc
        .vertex_attributes
        .iter()
        .enumerate()
        .map(|(i, a)| {
            vk::VertexInputAttributeDescription::default()
                .location(i as u32)
                .binding(a.binding)
                .format(vertex_format_to_vk(a.format))
                .offset(a.offset)
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(desc.topology.to_vk())
        .primitive_restart_enable(false);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
    // Viewport/scissor counts must still be declared even though the
    // actual rects are supplied dynamically at draw time.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = &desc.rasterizer;
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(rasterizer.depth_clamp_enable)
        .rasterizer_discard_enable(false)
        .polygon_mode(if rasterizer.polygon_line { vk::PolygonMode::LINE } else { vk::PolygonMode::FILL })
        .cull_mode(match rasterizer.cull_mode {
            crate::types::CullMode::None => vk::CullModeFlags::NONE,
            crate::types::CullMode::Front => vk::CullModeFlags::FRONT,
            crate::types::CullMode::Back => vk::CullModeFlags::BACK,
            crate::types::CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
        })
        .front_face(match rasterizer.front_face {
            crate::types::FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            crate::types::FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        })
        .depth_bias_enable(rasterizer.depth_bias_enable)
        .depth_bias_constant_factor(rasterizer.depth_bias_constant_factor)
        .depth_bias_slope_factor(rasterizer.depth_bias_slope_factor)
        .line_width(rasterizer.line_width);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let ds = &desc.depth_stencil;
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(ds.depth_test_enable)
        .depth_write_enable(ds.depth_write_enable)
        .depth_compare_op(ds.depth_compare_op.to_vk())
        .stencil_test_enable(ds.stencil_test_enable);

    let default_attachment = crate::types::BlendAttachmentDesc::opaque();
    let attachment_count = desc.blend.attachments.len().max(1);
    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..attachment_count)
        .map(|i| {
            let a = desc.blend.attachments.get(i).unwrap_or(&default_attachment);
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(a.enable)
                .src_color_blend_factor(blend_factor_to_vk(a.src_color))
                .dst_color_blend_factor(blend_factor_to_vk(a.dst_color))
                .color_blend_op(blend_op_to_vk(a.color_op))
                .src_alpha_blend_factor(blend_factor_to_vk(a.src_alpha))
                .dst_alpha_blend_factor(blend_factor_to_vk(a.dst_alpha))
                .alpha_blend_op(blend_op_to_vk(a.alpha_op))
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        })
        .collect();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .attachments(&blend_attachments)
        .blend_constants(desc.blend.blend_constants);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stage_infos)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout_raw)
        .render_pass(desc.render_pass)
        .subpass(0);

    // SAFETY: all referenced state structs outlive this call; no pipeline cache is used.
    let raw = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
            .map_err(|(_, e)| e)?[0]
    };

    for module in modules {
        unsafe { device.destroy_shader_module(module, None) };
    }

    let shader_hash = desc.shader.hash;
    Ok(PipelineEntry {
        raw,
        layout,
        layout_raw,
        shader_hash,
        desc,
    })
}

fn blend_factor_to_vk(factor: crate::types::BlendFactor) -> vk::BlendFactor {
    use crate::types::BlendFactor as F;
    match factor {
        F::Zero => vk::BlendFactor::ZERO,
        F::One => vk::BlendFactor::ONE,
        F::SrcColor => vk::BlendFactor::SRC_COLOR,
        F::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        F::DstColor => vk::BlendFactor::DST_COLOR,
        F::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        F::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        F::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        F::DstAlpha => vk::BlendFactor::DST_ALPHA,
        F::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

fn blend_op_to_vk(op: crate::types::BlendOp) -> vk::BlendOp {
    use crate::types::BlendOp as O;
    match op {
        O::Add => vk::BlendOp::ADD,
        O::Subtract => vk::BlendOp::SUBTRACT,
        O::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        O::Min => vk::BlendOp::MIN,
        O::Max => vk::BlendOp::MAX,
    }
}

pub fn destroy_pipeline(device: &ash::Device, raw: vk::Pipeline) {
    unsafe { device.destroy_pipeline(raw, None) };
}

/// §4.12 step 5 / §4.16 persisted-state: dumps `VK_KHR_pipeline_executable_properties`
/// statistics for every executable in `pipeline` to a text file next to
/// the shader's source path, one line per statistic. Called only when
/// the device exposes the extension; best-effort otherwise (§6).
pub fn dump_executable_statistics(instance: &ash::Instance, device: &ash::Device, pipeline: vk::Pipeline, shader_source_path: &str) {
    let loader = ash::khr::pipeline_executable_properties::Device::new(instance, device);
    let pipeline_info = vk::PipelineInfoKHR::default().pipeline(pipeline);

    let executables = match unsafe { loader.get_pipeline_executable_properties(&pipeline_info) } {
        Ok(props) => props,
        Err(e) => {
            log::warn!("failed to query pipeline executable properties for {shader_source_path}: {e:?}");
            return;
        }
    };

    let mut out = String::new();
    for (index, exe) in executables.iter().enumerate() {
        let name = crate::reflection::cstr_to_string(&exe.name);
        let stage_info = vk::PipelineExecutableInfoKHR::default().pipeline(pipeline).executable_index(index as u32);
        let stats = match unsafe { loader.get_pipeline_executable_statistics(&stage_info) } {
            Ok(stats) => stats,
            Err(e) => {
                log::warn!("failed to query pipeline executable statistics for {shader_source_path}:{name}: {e:?}");
                continue;
            }
        };
        out.push_str(&format!("== executable {index} ({name}) ==\n"));
        for stat in &stats {
            let stat_name = crate::reflection::cstr_to_string(&stat.name);
            let value = match stat.format {
                vk::PipelineExecutableStatisticFormatKHR::BOOL32 => (unsafe { stat.value.b32 } != 0) as u64,
                vk::PipelineExecutableStatisticFormatKHR::INT64 => unsafe { stat.value.i64 } as u64,
                vk::PipelineExecutableStatisticFormatKHR::UINT64 => unsafe { stat.value.u64 },
                _ => unsafe { stat.value.f64 } as u64,
            };
            out.push_str(&format!("{stat_name} = {value}\n"));
        }
    }

    let dump_path = format!("{shader_source_path}.pipeline_stats.txt");
    if let Err(e) = std::fs::write(&dump_path, out) {
        log::warn!("failed to write pipeline executable statistics to {dump_path}: {e}");
    }
}

/// Maps a shader content hash to every pipeline handle built from it,
/// so a hot reload can find every dependent without scanning the whole
/// pipeline pool (§4.12 step 6).
#[derive(Default)]
pub struct ShaderDependents {
    by_hash: FxHashMap<u64, Vec<crate::handles::PipelineHandle>>,
}

impl ShaderDependents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, shader_hash: u64, pipeline: crate::handles::PipelineHandle) {
        self.by_hash.entry(shader_hash).or_default().push(pipeline);
    }

    pub fn unregister(&mut self, shader_hash: u64, pipeline: crate::handles::PipelineHandle) {
        if let Some(list) = self.by_hash.get_mut(&shader_hash) {
            list.retain(|h| *h != pipeline);
            if list.is_empty() {
                self.by_hash.remove(&shader_hash);
            }
        }
    }

    pub fn dependents(&self, shader_hash: u64) -> &[crate::handles::PipelineHandle] {
        self.by_hash.get(&shader_hash).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::{ShaderReflection, ShaderVertexAttributeRecord};

    fn reflection_with_color(format: VertexFormat) -> ShaderReflection {
        ShaderReflection {
            name: "test".into(),
            hash: 1,
            stages: vec![],
            params: vec![],
            vertex_attributes: vec![ShaderVertexAttributeRecord {
                name: "inColor".into(),
                semantic: "COLOR".into(),
                semantic_index: 0,
                location: 0,
                format,
            }],
        }
    }

    #[test]
    fn color_attribute_allows_unorm8_against_float4_shader() {
        let shader = reflection_with_color(VertexFormat::R32G32B32A32Float);
        let attrs = vec![VertexInputAttributeDesc {
            semantic: "COLOR".into(),
            semantic_index: 0,
            binding: 0,
            format: VertexFormat::R8G8B8A8Unorm,
            offset: 0,
        }];
        assert!(validate_vertex_attributes(&shader, &attrs).is_ok());
    }

    #[test]
    fn mismatched_non_color_attribute_is_rejected() {
        let shader = ShaderReflection {
            name: "test".into(),
            hash: 1,
            stages: vec![],
            params: vec![],
            vertex_attributes: vec![ShaderVertexAttributeRecord {
                name: "inPos".into(),
                semantic: "POSITION".into(),
                semantic_index: 0,
                location: 0,
                format: VertexFormat::R32G32B32Float,
            }],
        };
        let attrs = vec![VertexInputAttributeDesc {
            semantic: "POSITION".into(),
            semantic_index: 0,
            binding: 0,
            format: VertexFormat::R32G32Float,
            offset: 0,
        }];
        assert!(validate_vertex_attributes(&shader, &attrs).is_err());
    }

    fn dummy_pipeline_entry(shader_hash: u64, layout: PipelineLayoutHandle) -> PipelineEntry {
        PipelineEntry {
            raw: vk::Pipeline::default(),
            layout,
            layout_raw: vk::PipelineLayout::default(),
            shader_hash,
            desc: GfxPipelineDesc {
                shader: reflection_with_color(VertexFormat::R32G32B32A32Float),
                topology: PrimitiveTopology::TriangleList,
                vertex_bindings: vec![],
                vertex_attributes: vec![],
                descriptor_set_layouts: vec![],
                descriptor_set_layout_handles: vec![],
                push_constants: vec![],
                rasterizer: crate::types::RasterizerDesc::default(),
                blend: crate::types::BlendDesc::default(),
                depth_stencil: crate::types::DepthStencilDesc::default(),
                render_pass: vk::RenderPass::default(),
                capture_executable_statistics: false,
            },
        }
    }

    #[test]
    fn shader_dependents_tracks_and_clears() {
        use crate::layout_cache::PipelineLayoutEntry;
        let mut layouts: forge_core::HandlePool<PipelineLayoutEntry> = forge_core::HandlePool::new();
        let layout_handle = layouts.add(PipelineLayoutEntry {
            content_hash: 0,
            refcount: 1,
            descriptor_set_layouts: vec![],
            push_constants: vec![],
            raw: vk::PipelineLayout::default(),
        });

        let mut pipelines: forge_core::HandlePool<PipelineEntry> = forge_core::HandlePool::new();
        let h1 = pipelines.add(dummy_pipeline_entry(7, layout_handle));

        let mut deps = ShaderDependents::new();
        deps.register(7, h1);
        assert_eq!(deps.dependents(7), &[h1]);
        deps.unregister(7, h1);
        assert!(deps.dependents(7).is_empty());
    }
}
