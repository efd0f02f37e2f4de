use crate::api::{TextureError, TextureResult};
use crate::backend::{
    GpuBackend, PlacedSubresource, ResourceState, ShaderResourceViewDesc, TextureAllocation,
};
use crate::descriptor::SamplerDesc;
use crate::format::{mip_dimension, HostFormat};
use std::cell::{Cell, Ref, RefCell};

#[derive(Debug)]
pub struct HeadlessTexture {
    id: u32,
    allocation: TextureAllocation,
    state: Cell<ResourceState>,
    mips: RefCell<Vec<Vec<u8>>>,
}

impl HeadlessTexture {
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn allocation(&self) -> &TextureAllocation {
        &self.allocation
    }

    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    /// Tightly packed contents of one mip level, in rows of blocks
    #[must_use]
    pub fn mip_data(&self, level: u32) -> Ref<'_, [u8]> {
        Ref::map(self.mips.borrow(), |mips| mips[level as usize].as_slice())
    }
}

fn tight_row_bytes(format: HostFormat, width: u32) -> usize {
    let (block_width, _, block_bytes) = format.block_size();
    (width.div_ceil(block_width) * block_bytes) as usize
}

fn block_rows(format: HostFormat, height: u32) -> usize {
    let (_, block_height, _) = format.block_size();
    height.div_ceil(block_height) as usize
}

#[derive(Debug)]
pub struct HeadlessBuffer {
    data: RefCell<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessView {
    pub texture_id: u32,
    pub desc: ShaderResourceViewDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedCommand {
    Transition { texture_id: u32, before: ResourceState, after: ResourceState },
    CopyRegion { texture_id: u32, mip_level: u32, placement: PlacedSubresource },
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_texture_id: u32,
    unsupported_formats: Vec<HostFormat>,
    commands: Vec<RecordedCommand>,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes texture creation fail for the given host formats, mimicking a device that lacks them.
    #[must_use]
    pub fn with_unsupported_formats(mut self, formats: &[HostFormat]) -> Self {
        self.unsupported_formats.extend_from_slice(formats);
        self
    }

    #[must_use]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    #[must_use]
    pub fn copy_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, RecordedCommand::CopyRegion { .. }))
            .count()
    }

    #[must_use]
    pub fn textures_created(&self) -> u32 {
        self.next_texture_id
    }
}

impl GpuBackend for HeadlessBackend {
    type Texture = HeadlessTexture;
    type Buffer = HeadlessBuffer;
    type View = HeadlessView;
    type Sampler = SamplerDesc;

    fn create_staging_buffer(&mut self, size: u64) -> TextureResult<Self::Buffer> {
        let size = usize::try_from(size).map_err(|_| TextureError::Backend {
            what: "staging buffer",
            message: format!("{size} bytes does not fit in host memory"),
        })?;
        Ok(HeadlessBuffer { data: RefCell::new(vec![0; size]) })
    }

    fn write_staging(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> TextureResult<()> {
        let mut buffer = buffer.data.borrow_mut();
        let start = offset as usize;
        let Some(dest) = buffer.get_mut(start..start + data.len()) else {
            return Err(TextureError::Backend {
                what: "staging write",
                message: format!("{} bytes at offset {offset} is out of bounds", data.len()),
            });
        };
        dest.copy_from_slice(data);
        Ok(())
    }

    fn create_texture(
        &mut self,
        allocation: &TextureAllocation,
        initial_state: ResourceState,
    ) -> TextureResult<Self::Texture> {
        if self.unsupported_formats.contains(&allocation.format) {
            return Err(TextureError::UnsupportedHostFormat(allocation.format));
        }

        let mips = (0..allocation.mip_levels)
            .map(|level| {
                let width = mip_dimension(allocation.width, level);
                let height = mip_dimension(allocation.height, level);
                let row_bytes = tight_row_bytes(allocation.format, width);
                vec![0; row_bytes * block_rows(allocation.format, height)]
            })
            .collect();

        let id = self.next_texture_id;
        self.next_texture_id += 1;

        Ok(HeadlessTexture {
            id,
            allocation: *allocation,
            state: Cell::new(initial_state),
            mips: RefCell::new(mips),
        })
    }

    fn transition(&mut self, texture: &Self::Texture, before: ResourceState, after: ResourceState) {
        assert_eq!(
            texture.state.get(),
            before,
            "texture {} transitioned from the wrong state",
            texture.id
        );
        texture.state.set(after);

        self.commands.push(RecordedCommand::Transition { texture_id: texture.id, before, after });
    }

    fn copy_to_subresource(
        &mut self,
        source: &Self::Buffer,
        placement: &PlacedSubresource,
        texture: &Self::Texture,
        mip_level: u32,
    ) {
        assert_eq!(
            texture.state.get(),
            ResourceState::CopyDestination,
            "copy into texture {} outside of copy destination state",
            texture.id
        );

        let source = source.data.borrow();
        let mut mips = texture.mips.borrow_mut();
        let dest = &mut mips[mip_level as usize];

        let row_bytes = tight_row_bytes(placement.format, placement.width);
        let dest_rows = dest.chunks_exact_mut(row_bytes).take(placement.rows as usize);
        for (row, dest_row) in dest_rows.enumerate() {
            let start = placement.offset as usize + row * placement.row_pitch as usize;
            dest_row.copy_from_slice(&source[start..start + row_bytes]);
        }

        self.commands.push(RecordedCommand::CopyRegion {
            texture_id: texture.id,
            mip_level,
            placement: *placement,
        });
    }

    fn create_shader_resource_view(
        &mut self,
        texture: &Self::Texture,
        desc: &ShaderResourceViewDesc,
    ) -> TextureResult<Self::View> {
        Ok(HeadlessView { texture_id: texture.id, desc: *desc })
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> TextureResult<Self::Sampler> {
        Ok(*desc)
    }
}
