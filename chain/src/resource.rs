//! Immutable facts about resources and projection of their subresources
//! onto linear address ranges.

use {
    crate::error::SyncError,
    smallvec::SmallVec,
    std::ops::Range,
    syncval_core::{hal, BufferId, ImageId, ResourceKey},
};

/// Linear ranges produced for a single access.
pub type Ranges = SmallVec<[Range<u64>; 4]>;

/// Buffer facts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferInfo {
    /// Buffer identity.
    pub id: BufferId,

    /// Size in bytes.
    pub size: u64,
}

impl BufferInfo {
    /// Key of the buffer's access state map.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::Buffer(self.id)
    }

    /// Byte range starting at `offset` of `size` bytes, or to the end of the buffer.
    pub fn range(&self, offset: u64, size: Option<u64>) -> Result<Range<u64>, SyncError> {
        let end = match size {
            Some(size) => offset.checked_add(size),
            None => Some(self.size),
        };
        match end {
            Some(end) if offset < end && end <= self.size => Ok(offset..end),
            _ => Err(SyncError::InvalidBufferRange {
                buffer: self.id,
                range: offset..end.unwrap_or(u64::MAX),
                size: self.size,
            }),
        }
    }
}

/// Image facts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image identity.
    pub id: ImageId,

    /// Size of the top level in texels.
    pub extent: hal::image::Extent,

    /// Number of mip levels.
    pub levels: u32,

    /// Number of array layers.
    pub layers: u32,

    /// Aspects the format has.
    pub aspects: hal::format::Aspects,

    /// Bytes per texel.
    pub texel_size: u64,
}

/// Levels, layers and aspects of an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    /// Aspects.
    pub aspects: hal::format::Aspects,

    /// Mip levels.
    pub levels: Range<u32>,

    /// Array layers.
    pub layers: Range<u32>,
}

/// Box of texels inside each subresource of a range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageRegion {
    /// Offset of the box.
    pub offset: hal::image::Offset,

    /// Size of the box.
    pub extent: hal::image::Extent,
}

/// Mip chains of 32-bit extents have at most this many levels.
const MAX_LEVELS: u32 = 32;

static ASPECT_ORDER: [hal::format::Aspects; 3] = [
    hal::format::Aspects::COLOR,
    hal::format::Aspects::DEPTH,
    hal::format::Aspects::STENCIL,
];

impl ImageInfo {
    /// Key of the image's access state map.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::Image(self.id)
    }

    /// Every subresource of the image.
    pub fn full_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: self.aspects,
            levels: 0..self.levels,
            layers: 0..self.layers,
        }
    }

    fn level_extent(&self, level: u32) -> (u64, u64, u64) {
        let dim = |size: u32| u64::from((size >> level).max(1));
        (
            dim(self.extent.width),
            dim(self.extent.height),
            dim(self.extent.depth),
        )
    }

    /// Bytes spanned by every subresource. `None` if the facts describe no layout.
    pub fn byte_size(&self) -> Option<u64> {
        if self.levels == 0 || self.levels > MAX_LEVELS || self.layers == 0 || self.texel_size == 0 {
            return None;
        }
        let layer_size = (0..self.levels).try_fold(0u64, |sum, level| {
            let (width, height, depth) = self.level_extent(level);
            width
                .checked_mul(height)?
                .checked_mul(depth)?
                .checked_mul(self.texel_size)?
                .checked_add(sum)
        })?;
        let aspects = self.aspect_indices(self.aspects).count() as u64;
        layer_size
            .checked_mul(u64::from(self.layers))?
            .checked_mul(aspects)
    }

    // Callers run `check` first, which bounds every offset by `byte_size`.
    fn level_size(&self, level: u32) -> u64 {
        let (width, height, depth) = self.level_extent(level);
        width * height * depth * self.texel_size
    }

    fn layer_size(&self) -> u64 {
        (0..self.levels).map(|level| self.level_size(level)).sum()
    }

    fn level_offset(&self, level: u32) -> u64 {
        (0..level).map(|level| self.level_size(level)).sum()
    }

    /// Offset of the first byte of a subresource.
    fn subresource_offset(&self, aspect_index: u64, layer: u32, level: u32) -> u64 {
        let layer_size = self.layer_size();
        aspect_index * layer_size * u64::from(self.layers)
            + u64::from(layer) * layer_size
            + self.level_offset(level)
    }

    fn check(&self, range: &ImageSubresourceRange) -> Result<(), SyncError> {
        if self.byte_size().is_none() {
            return Err(SyncError::InvalidImage { image: self.id });
        }
        let valid = !range.aspects.is_empty()
            && self.aspects.contains(range.aspects)
            && range.levels.start < range.levels.end
            && range.levels.end <= self.levels
            && range.layers.start < range.layers.end
            && range.layers.end <= self.layers;

        if valid {
            Ok(())
        } else {
            Err(SyncError::InvalidSubresource { image: self.id })
        }
    }

    /// Linear ranges covering whole subresources.
    pub fn subresource_ranges(&self, range: &ImageSubresourceRange) -> Result<Ranges, SyncError> {
        self.check(range)?;
        let mut ranges = Ranges::new();
        for (aspect_index, _) in self.aspect_indices(range.aspects) {
            for layer in range.layers.clone() {
                let start = self.subresource_offset(aspect_index, layer, range.levels.start);
                let end = self.subresource_offset(aspect_index, layer, range.levels.end - 1)
                    + self.level_size(range.levels.end - 1);
                push_merged(&mut ranges, start..end);
            }
        }
        Ok(ranges)
    }

    /// Linear ranges covering a texel box in each subresource.
    pub fn region_ranges(
        &self,
        range: &ImageSubresourceRange,
        region: &ImageRegion,
    ) -> Result<Ranges, SyncError> {
        self.check(range)?;
        let mut ranges = Ranges::new();
        for (aspect_index, _) in self.aspect_indices(range.aspects) {
            for layer in range.layers.clone() {
                for level in range.levels.clone() {
                    let base = self.subresource_offset(aspect_index, layer, level);
                    self.push_region(&mut ranges, base, level, region)?;
                }
            }
        }
        Ok(ranges)
    }

    fn push_region(
        &self,
        ranges: &mut Ranges,
        base: u64,
        level: u32,
        region: &ImageRegion,
    ) -> Result<(), SyncError> {
        let (width, height, depth) = self.level_extent(level);
        let coord = |offset: i32| u64::from(offset.max(0) as u32);
        let (x, y, z) = (
            coord(region.offset.x),
            coord(region.offset.y),
            coord(region.offset.z),
        );
        let (w, h, d) = (
            u64::from(region.extent.width),
            u64::from(region.extent.height),
            u64::from(region.extent.depth),
        );

        if region.offset.x < 0
            || region.offset.y < 0
            || region.offset.z < 0
            || w == 0
            || h == 0
            || d == 0
            || x + w > width
            || y + h > height
            || z + d > depth
        {
            return Err(SyncError::InvalidImageRegion { image: self.id });
        }

        let texel = self.texel_size;
        for slice in z..z + d {
            for row in y..y + h {
                let start = base + ((slice * height + row) * width + x) * texel;
                push_merged(ranges, start..start + w * texel);
            }
        }
        Ok(())
    }

    fn aspect_indices(
        &self,
        aspects: hal::format::Aspects,
    ) -> impl Iterator<Item = (u64, hal::format::Aspects)> {
        let present = self.aspects;
        ASPECT_ORDER
            .iter()
            .filter(move |&&aspect| present.contains(aspect))
            .enumerate()
            .filter(move |(_, aspect)| aspects.contains(**aspect))
            .map(|(index, &aspect)| (index as u64, aspect))
    }
}

fn push_merged(ranges: &mut Ranges, range: Range<u64>) {
    if let Some(last) = ranges.last_mut() {
        if last.end == range.start {
            last.end = range.end;
            return;
        }
    }
    ranges.push(range);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageInfo {
        ImageInfo {
            id: ImageId(1),
            extent: hal::image::Extent {
                width: 4,
                height: 4,
                depth: 1,
            },
            levels: 2,
            layers: 2,
            aspects: hal::format::Aspects::COLOR,
            texel_size: 4,
        }
    }

    #[test]
    fn buffer_ranges_are_checked() {
        let buffer = BufferInfo {
            id: BufferId(1),
            size: 128,
        };
        assert_eq!(buffer.range(32, Some(64)), Ok(32..96));
        assert_eq!(buffer.range(32, None), Ok(32..128));
        assert!(buffer.range(100, Some(64)).is_err());
        assert!(buffer.range(0, Some(0)).is_err());
    }

    #[test]
    fn full_image_is_one_range() {
        let image = image();
        // level 0: 64 bytes, level 1: 16 bytes, two layers
        let ranges = image.subresource_ranges(&image.full_range()).unwrap();
        assert_eq!(ranges.as_slice(), &[0..160]);
    }

    #[test]
    fn single_level_of_each_layer() {
        let image = image();
        let range = ImageSubresourceRange {
            aspects: hal::format::Aspects::COLOR,
            levels: 1..2,
            layers: 0..2,
        };
        let ranges = image.subresource_ranges(&range).unwrap();
        assert_eq!(ranges.as_slice(), &[64..80, 144..160]);
    }

    #[test]
    fn region_produces_rows() {
        let image = image();
        let range = ImageSubresourceRange {
            aspects: hal::format::Aspects::COLOR,
            levels: 0..1,
            layers: 0..1,
        };
        let region = ImageRegion {
            offset: hal::image::Offset { x: 1, y: 1, z: 0 },
            extent: hal::image::Extent {
                width: 2,
                height: 2,
                depth: 1,
            },
        };
        let ranges = image.region_ranges(&range, &region).unwrap();
        assert_eq!(ranges.as_slice(), &[20..28, 36..44]);
    }

    #[test]
    fn out_of_bounds_subresource_is_rejected() {
        let image = image();
        let range = ImageSubresourceRange {
            aspects: hal::format::Aspects::COLOR,
            levels: 0..3,
            layers: 0..1,
        };
        assert_eq!(
            image.subresource_ranges(&range),
            Err(SyncError::InvalidSubresource { image: ImageId(1) })
        );
        let depth = ImageSubresourceRange {
            aspects: hal::format::Aspects::DEPTH,
            levels: 0..1,
            layers: 0..1,
        };
        assert!(image.subresource_ranges(&depth).is_err());
    }

    #[test]
    fn deep_mip_chain_is_rejected() {
        let image = ImageInfo {
            levels: 40,
            ..image()
        };
        assert_eq!(image.byte_size(), None);
        assert_eq!(
            image.subresource_ranges(&image.full_range()),
            Err(SyncError::InvalidImage { image: ImageId(1) })
        );
    }

    #[test]
    fn huge_extent_is_rejected() {
        let image = ImageInfo {
            extent: hal::image::Extent {
                width: u32::MAX,
                height: u32::MAX,
                depth: u32::MAX,
            },
            levels: 1,
            layers: 1,
            ..image()
        };
        assert_eq!(image.byte_size(), None);
        let region = ImageRegion {
            offset: hal::image::Offset { x: 0, y: 0, z: 0 },
            extent: hal::image::Extent {
                width: 1,
                height: 1,
                depth: 1,
            },
        };
        assert_eq!(
            image.region_ranges(&image.full_range(), &region),
            Err(SyncError::InvalidImage { image: ImageId(1) })
        );
    }

    #[test]
    fn texel_size_must_be_known() {
        let image = ImageInfo {
            texel_size: 0,
            ..image()
        };
        assert!(image.subresource_ranges(&image.full_range()).is_err());
        assert_eq!(self::image().byte_size(), Some(160));
    }
}
