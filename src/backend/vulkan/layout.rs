//! Image layout tracking for the Vulkan backend.
//!
//! Cubemaps are rendered one face and one mip at a time and then sampled as a
//! whole, so layouts are tracked per subresource rather than per image.

use ash::vk;

/// A contiguous block of mips and array layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    pub fn first() -> Self {
        Self {
            base_mip: 0,
            mip_count: 1,
            base_layer: 0,
            layer_count: 1,
        }
    }

    pub fn layer(layer: u32) -> Self {
        Self {
            base_layer: layer,
            ..Self::first()
        }
    }
}

/// A single subresource that needs a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutChange {
    pub mip: u32,
    pub layer: u32,
    pub old: vk::ImageLayout,
}

/// Current layout of every (mip, layer) of one image
#[derive(Debug, Clone)]
pub struct SubresourceLayouts {
    array_layers: u32,
    layouts: Vec<vk::ImageLayout>,
}

impl SubresourceLayouts {
    pub fn new(mip_levels: u32, array_layers: u32) -> Self {
        Self {
            array_layers,
            layouts: vec![vk::ImageLayout::UNDEFINED; (mip_levels * array_layers) as usize],
        }
    }

    fn index(&self, mip: u32, layer: u32) -> usize {
        (mip * self.array_layers + layer) as usize
    }

    pub fn get(&self, mip: u32, layer: u32) -> vk::ImageLayout {
        self.layouts
            .get(self.index(mip, layer))
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    /// Move `range` to `new_layout`, returning the subresources that were in
    /// a different layout. Subresources outside the image are ignored.
    pub fn transition(&mut self, range: SubresourceRange, new_layout: vk::ImageLayout) -> Vec<LayoutChange> {
        let mut changes = Vec::new();
        for mip in range.base_mip..range.base_mip + range.mip_count {
            for layer in range.base_layer..range.base_layer + range.layer_count {
                let index = self.index(mip, layer);
                let Some(current) = self.layouts.get_mut(index) else {
                    continue;
                };
                if *current != new_layout {
                    changes.push(LayoutChange {
                        mip,
                        layer,
                        old: *current,
                    });
                    *current = new_layout;
                }
            }
        }
        changes
    }
}

/// Access mask for a layout
pub fn access_mask(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        _ => vk::AccessFlags::empty(),
    }
}

/// Pipeline stage that touches an image in `layout`
pub fn stage_mask(layout: vk::ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        vk::ImageLayout::UNDEFINED => vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        vk::ImageLayout::PRESENT_SRC_KHR => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        _ => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

/// Record one barrier per changed subresource
pub fn record_barriers(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    changes: &[LayoutChange],
    new_layout: vk::ImageLayout,
) {
    if changes.is_empty() {
        return;
    }

    let mut src_stage = vk::PipelineStageFlags::empty();
    let barriers: Vec<vk::ImageMemoryBarrier> = changes
        .iter()
        .map(|change| {
            src_stage |= stage_mask(change.old);
            vk::ImageMemoryBarrier::default()
                .old_layout(change.old)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask,
                    base_mip_level: change.mip,
                    level_count: 1,
                    base_array_layer: change.layer,
                    layer_count: 1,
                })
                .src_access_mask(access_mask(change.old))
                .dst_access_mask(access_mask(new_layout))
        })
        .collect();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            stage_mask(new_layout),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &barriers,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_image_is_undefined() {
        let layouts = SubresourceLayouts::new(5, 6);
        assert_eq!(layouts.get(4, 5), vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_transition_reports_only_changed_subresources() {
        let mut layouts = SubresourceLayouts::new(2, 6);
        let face = SubresourceRange::layer(3);

        let changes = layouts.transition(face, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            changes,
            vec![LayoutChange {
                mip: 0,
                layer: 3,
                old: vk::ImageLayout::UNDEFINED
            }]
        );
        assert!(layouts
            .transition(face, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .is_empty());

        // Sampling the whole cube touches every other subresource too
        let whole = SubresourceRange {
            base_mip: 0,
            mip_count: 2,
            base_layer: 0,
            layer_count: 6,
        };
        let changes = layouts.transition(whole, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(changes.len(), 12);
        assert_eq!(layouts.get(1, 5), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_out_of_range_subresources_are_ignored() {
        let mut layouts = SubresourceLayouts::new(1, 1);
        let changes = layouts.transition(SubresourceRange::layer(4), vk::ImageLayout::GENERAL);
        assert!(changes.is_empty());
    }
}
