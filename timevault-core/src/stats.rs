use serde::{Deserialize, Serialize};

/// Sizes recorded in the envelope after packing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub original_size: u64,
    pub compressed_size: u64,
    pub file_count: u32,
}

impl ArchiveStats {
    /// Packed size over original size; 1.0 for empty inputs.
    pub fn compression_ratio(&self) -> f32 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size as f32 / self.original_size as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_of_empty_input_is_one() {
        assert_eq!(ArchiveStats::default().compression_ratio(), 1.0);
        let stats = ArchiveStats {
            original_size: 400,
            compressed_size: 100,
            file_count: 2,
        };
        assert_eq!(stats.compression_ratio(), 0.25);
    }
}
