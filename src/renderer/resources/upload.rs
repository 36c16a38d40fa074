use ash::vk;
use crate::renderer::core::commands::CommandRecorder;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::resources::buffer::{align_to, Buffer};
use crate::renderer::resources::state::ResourceState;
use crate::renderer::resources::texture::{MipLevel, Texture};
use crate::renderer::resources::ResourceFactory;

pub const TEXTURE_ROW_PITCH_ALIGNMENT: u64 = 256;
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;
const BYTES_PER_PIXEL: u64 = 4;

/// Where one mip level lives inside the upload buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub mip_level: u32,
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    /// Padded bytes per row in the upload buffer
    pub row_pitch: u64,
    /// Unpadded bytes per row of the source pixels
    pub row_size: u64,
}

impl SubresourceFootprint {
    pub fn copy_region(&self, aspect: vk::ImageAspectFlags) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset: self.offset,
            buffer_row_length: (self.row_pitch / BYTES_PER_PIXEL) as u32,
            buffer_image_height: self.height,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: self.mip_level,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            },
        }
    }
}

/// Lays every mip out back to back; returns the footprints and the total byte size
pub fn plan_footprints(mips: &[MipLevel]) -> (Vec<SubresourceFootprint>, u64) {
    let mut offset = 0;
    let footprints = mips
        .iter()
        .enumerate()
        .map(|(level, mip)| {
            let row_size = mip.width as u64 * BYTES_PER_PIXEL;
            let row_pitch = align_to(row_size, TEXTURE_ROW_PITCH_ALIGNMENT);
            let footprint = SubresourceFootprint {
                mip_level: level as u32,
                offset: align_to(offset, TEXTURE_PLACEMENT_ALIGNMENT),
                width: mip.width,
                height: mip.height,
                row_pitch,
                row_size,
            };
            offset = footprint.offset + row_pitch * mip.height as u64;
            footprint
        })
        .collect();
    (footprints, offset)
}

/// Copies each mip's rows to their padded positions
pub fn pack_subresources(
    mips: &[MipLevel],
    footprints: &[SubresourceFootprint],
    total_size: u64,
) -> EngineResult<Vec<u8>> {
    let mut staging = vec![0u8; total_size as usize];
    for (mip, footprint) in mips.iter().zip(footprints) {
        if mip.width == 0 || mip.height == 0 {
            return Err(EngineError::Init(format!(
                "mip {} has an empty extent {}x{}",
                footprint.mip_level,
                mip.width,
                mip.height,
            )));
        }
        let row_size = footprint.row_size as usize;
        if mip.data.len() != row_size * mip.height as usize {
            return Err(EngineError::Init(format!(
                "mip {} holds {} bytes, expected {}",
                footprint.mip_level,
                mip.data.len(),
                row_size * mip.height as usize,
            )));
        }
        for (row, src) in mip.data.chunks_exact(row_size).enumerate() {
            let start = (footprint.offset + row as u64 * footprint.row_pitch) as usize;
            staging[start..start + row_size].copy_from_slice(src);
        }
    }
    Ok(staging)
}

/// The subset of command recording a texture upload needs
pub trait UploadEncoder {
    fn transition_texture(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
        before: ResourceState,
        after: ResourceState,
    );
    fn copy_buffer_to_texture(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        aspect: vk::ImageAspectFlags,
        footprint: &SubresourceFootprint,
    );
}

impl UploadEncoder for CommandRecorder<'_> {
    fn transition_texture(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.transition_image(image, aspect, mip_levels, before, after);
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        aspect: vk::ImageAspectFlags,
        footprint: &SubresourceFootprint,
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.cmd,
                src,
                dst,
                ResourceState::CopyDest.layout(),
                &[footprint.copy_region(aspect)],
            );
        }
    }
}

/// Records one copy per footprint, then moves the image to `GenericRead`
pub fn record_texture_upload(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
    staging: vk::Buffer,
    footprints: &[SubresourceFootprint],
    encoder: &mut impl UploadEncoder,
) {
    // Vulkan images start out undefined; this realises the copy-destination state
    encoder.transition_texture(
        image,
        aspect,
        mip_levels,
        ResourceState::Undefined,
        ResourceState::CopyDest,
    );
    for footprint in footprints {
        encoder.copy_buffer_to_texture(staging, image, aspect, footprint);
    }
    encoder.transition_texture(
        image,
        aspect,
        mip_levels,
        ResourceState::CopyDest,
        ResourceState::GenericRead,
    );
}

/// Stages `mips` through an upload buffer and records the copies into `encoder`.
///
/// The returned buffer backs the recorded copies and must stay alive until the
/// fence confirms the recording has executed.
pub fn upload_texture_data(
    texture: &mut Texture,
    mips: &[MipLevel],
    encoder: &mut impl UploadEncoder,
    factory: &ResourceFactory,
) -> EngineResult<Buffer> {
    if texture.state != ResourceState::CopyDest {
        return Err(EngineError::InvalidFrameState(format!(
            "texture upload expects CopyDest, found {:?}",
            texture.state,
        )));
    }
    if mips.len() != texture.metadata.mip_levels as usize {
        return Err(EngineError::Init(format!(
            "texture has {} mips, {} supplied",
            texture.metadata.mip_levels,
            mips.len(),
        )));
    }

    let (footprints, total_size) = plan_footprints(mips);
    let staging = pack_subresources(mips, &footprints, total_size)?;
    let mut upload_buffer = factory.create_buffer(total_size)?;
    upload_buffer.write(&staging)?;

    record_texture_upload(
        texture.image,
        texture.aspect,
        texture.metadata.mip_levels,
        upload_buffer.handle,
        &footprints,
        encoder,
    );
    texture.state = ResourceState::GenericRead;
    log::debug!("Recorded upload of {} mips ({} bytes)", mips.len(), total_size);

    Ok(upload_buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Op {
        Transition(ResourceState, ResourceState),
        Copy(u32),
    }

    #[derive(Default)]
    struct RecordingEncoder {
        ops: Vec<Op>,
    }

    impl UploadEncoder for RecordingEncoder {
        fn transition_texture(
            &mut self,
            _image: vk::Image,
            _aspect: vk::ImageAspectFlags,
            _mip_levels: u32,
            before: ResourceState,
            after: ResourceState,
        ) {
            self.ops.push(Op::Transition(before, after));
        }

        fn copy_buffer_to_texture(
            &mut self,
            _src: vk::Buffer,
            _dst: vk::Image,
            _aspect: vk::ImageAspectFlags,
            footprint: &SubresourceFootprint,
        ) {
            self.ops.push(Op::Copy(footprint.mip_level));
        }
    }

    fn solid_mips(width: u32, height: u32, count: u32) -> Vec<MipLevel> {
        (0..count)
            .map(|level| {
                let w = (width >> level).max(1);
                let h = (height >> level).max(1);
                MipLevel {
                    width: w,
                    height: h,
                    data: vec![level as u8 + 1; (w * h * 4) as usize],
                }
            })
            .collect()
    }

    fn record(footprints: &[SubresourceFootprint], mip_levels: u32) -> Vec<Op> {
        let mut encoder = RecordingEncoder::default();
        record_texture_upload(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            mip_levels,
            vk::Buffer::null(),
            footprints,
            &mut encoder,
        );
        encoder.ops
    }

    #[test]
    fn test_three_mips_issue_three_copies_before_readable() {
        let mips = solid_mips(4, 4, 3);
        let (footprints, _) = plan_footprints(&mips);
        let ops = record(&footprints, 3);

        let readable = ops
            .iter()
            .position(|op| *op == Op::Transition(ResourceState::CopyDest, ResourceState::GenericRead))
            .unwrap();
        let copies_before = ops[..readable]
            .iter()
            .filter(|op| matches!(op, Op::Copy(_)))
            .count();
        assert_eq!(copies_before, 3);
        assert_eq!(readable, ops.len() - 1);
        assert_eq!(ops[1..4], [Op::Copy(0), Op::Copy(1), Op::Copy(2)]);
    }

    #[test]
    fn test_footprints_are_aligned() {
        let mips = solid_mips(100, 30, 3);
        let (footprints, total) = plan_footprints(&mips);

        assert_eq!(footprints.len(), 3);
        for footprint in &footprints {
            assert_eq!(footprint.offset % TEXTURE_PLACEMENT_ALIGNMENT, 0);
            assert_eq!(footprint.row_pitch % TEXTURE_ROW_PITCH_ALIGNMENT, 0);
            assert!(footprint.row_pitch >= footprint.row_size);
        }
        // 100 px * 4 B = 400 B rows padded to 512, 30 rows
        assert_eq!(footprints[0].row_pitch, 512);
        assert_eq!(footprints[1].offset, 512 * 30);
        let last = footprints[2];
        assert_eq!(total, last.offset + last.row_pitch * last.height as u64);
    }

    #[test]
    fn test_pack_places_rows_at_pitch() {
        let mips = vec![MipLevel {
            width: 2,
            height: 2,
            data: vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4],
        }];
        let (footprints, total) = plan_footprints(&mips);
        let packed = pack_subresources(&mips, &footprints, total).unwrap();

        assert_eq!(packed.len(), 512);
        assert_eq!(&packed[0..8], &[1, 1, 1, 1, 2, 2, 2, 2]);
        assert!(packed[8..256].iter().all(|b| *b == 0));
        assert_eq!(&packed[256..264], &[3, 3, 3, 3, 4, 4, 4, 4]);
    }

    #[test]
    fn test_pack_rejects_short_mip() {
        let mips = vec![MipLevel { width: 2, height: 2, data: vec![0; 4] }];
        let (footprints, total) = plan_footprints(&mips);
        assert!(pack_subresources(&mips, &footprints, total).is_err());
    }

    #[test]
    fn test_pack_rejects_empty_extent() {
        for (width, height) in [(0, 4), (4, 0)] {
            let mips = vec![MipLevel { width, height, data: vec![] }];
            let (footprints, total) = plan_footprints(&mips);
            assert!(matches!(
                pack_subresources(&mips, &footprints, total),
                Err(EngineError::Init(_))
            ));
        }
    }

    #[test]
    fn test_copy_region_row_length_in_texels() {
        let mips = solid_mips(100, 30, 1);
        let (footprints, _) = plan_footprints(&mips);
        let region = footprints[0].copy_region(vk::ImageAspectFlags::COLOR);
        assert_eq!(region.buffer_row_length, 128);
        assert_eq!(region.image_extent.width, 100);
    }
}
