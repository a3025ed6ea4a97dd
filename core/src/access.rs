use crate::hal;

bitflags::bitflags! {
    /// Memory access flags with Vulkan bit values.
    ///
    /// The top three bits are not device accesses. They mark image layout transitions
    /// and the presentation engine's use of swapchain images so that those can be
    /// tracked like any other access.
    #[derive(Default)]
    pub struct AccessFlags: u32 {
        /// Read of indirect command parameters.
        const INDIRECT_COMMAND_READ = 0x0000_0001;
        /// Read of an index buffer.
        const INDEX_READ = 0x0000_0002;
        /// Read of a vertex buffer.
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        /// Read of a uniform buffer.
        const UNIFORM_READ = 0x0000_0008;
        /// Read of an input attachment.
        const INPUT_ATTACHMENT_READ = 0x0000_0010;
        /// Read from a shader.
        const SHADER_READ = 0x0000_0020;
        /// Write from a shader.
        const SHADER_WRITE = 0x0000_0040;
        /// Read of a color attachment, blending and logic ops included.
        const COLOR_ATTACHMENT_READ = 0x0000_0080;
        /// Write of a color attachment.
        const COLOR_ATTACHMENT_WRITE = 0x0000_0100;
        /// Read of a depth-stencil attachment.
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x0000_0200;
        /// Write of a depth-stencil attachment.
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x0000_0400;
        /// Read by a transfer operation.
        const TRANSFER_READ = 0x0000_0800;
        /// Write by a transfer operation.
        const TRANSFER_WRITE = 0x0000_1000;
        /// Read by the host.
        const HOST_READ = 0x0000_2000;
        /// Write by the host.
        const HOST_WRITE = 0x0000_4000;
        /// Any read.
        const MEMORY_READ = 0x0000_8000;
        /// Any write.
        const MEMORY_WRITE = 0x0001_0000;
        /// Image layout transition performed by a barrier.
        const LAYOUT_TRANSITION = 0x2000_0000;
        /// Presentation engine releasing an image on acquire.
        const PRESENT_ACQUIRE_READ = 0x4000_0000;
        /// Image handed over to the presentation engine.
        const PRESENTED = 0x8000_0000;
    }
}

impl From<hal::buffer::Access> for AccessFlags {
    fn from(access: hal::buffer::Access) -> Self {
        AccessFlags::from_bits_truncate(access.bits())
    }
}

impl From<hal::image::Access> for AccessFlags {
    fn from(access: hal::image::Access) -> Self {
        AccessFlags::from_bits_truncate(access.bits())
    }
}

impl AccessFlags {
    /// Every device read bit.
    pub fn all_reads() -> Self {
        AccessFlags::INDIRECT_COMMAND_READ
            | AccessFlags::INDEX_READ
            | AccessFlags::VERTEX_ATTRIBUTE_READ
            | AccessFlags::UNIFORM_READ
            | AccessFlags::INPUT_ATTACHMENT_READ
            | AccessFlags::SHADER_READ
            | AccessFlags::COLOR_ATTACHMENT_READ
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | AccessFlags::TRANSFER_READ
            | AccessFlags::HOST_READ
    }

    /// Every device write bit.
    pub fn all_writes() -> Self {
        AccessFlags::SHADER_WRITE
            | AccessFlags::COLOR_ATTACHMENT_WRITE
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            | AccessFlags::TRANSFER_WRITE
            | AccessFlags::HOST_WRITE
    }

    /// Replace `MEMORY_READ` and `MEMORY_WRITE` with the bits they stand for.
    pub fn expand(self) -> Self {
        let mut access = self;
        if access.contains(AccessFlags::MEMORY_READ) {
            access |= AccessFlags::all_reads();
        }
        if access.contains(AccessFlags::MEMORY_WRITE) {
            access |= AccessFlags::all_writes();
        }
        access - (AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE)
    }

    /// Check if any bit is a write.
    ///
    /// Layout transitions and presentation count as writes.
    pub fn is_write(&self) -> bool {
        self.intersects(
            AccessFlags::all_writes()
                | AccessFlags::MEMORY_WRITE
                | AccessFlags::LAYOUT_TRANSITION
                | AccessFlags::PRESENTED,
        )
    }

    /// Check if all bits are reads.
    pub fn is_read(&self) -> bool {
        !self.is_empty() && !self.is_write()
    }

    /// Iterate over single-bit accesses set in this mask.
    pub fn iter_bits(self) -> impl Iterator<Item = AccessFlags> {
        let bits = self.bits();
        (0..32)
            .map(|index| 1u32 << index)
            .filter(move |bit| bits & bit != 0)
            .map(AccessFlags::from_bits_truncate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_bits_expand() {
        let access = (AccessFlags::MEMORY_READ | AccessFlags::TRANSFER_WRITE).expand();
        assert!(access.contains(AccessFlags::SHADER_READ));
        assert!(access.contains(AccessFlags::TRANSFER_WRITE));
        assert!(!access.contains(AccessFlags::SHADER_WRITE));
        assert!(!access.contains(AccessFlags::MEMORY_READ));
    }

    #[test]
    fn read_write_classification() {
        assert!(AccessFlags::TRANSFER_WRITE.is_write());
        assert!(AccessFlags::LAYOUT_TRANSITION.is_write());
        assert!(AccessFlags::PRESENT_ACQUIRE_READ.is_read());
        assert!(!AccessFlags::empty().is_read());
        assert!(!(AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE).is_read());
    }

    #[test]
    fn hal_access_converts() {
        let access: AccessFlags = hal::image::Access::COLOR_ATTACHMENT_WRITE.into();
        assert_eq!(access, AccessFlags::COLOR_ATTACHMENT_WRITE);
        let access: AccessFlags = hal::buffer::Access::TRANSFER_READ.into();
        assert_eq!(access, AccessFlags::TRANSFER_READ);
    }
}
