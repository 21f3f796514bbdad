use anyhow::ensure;
use serde::Deserialize;

use crate::sim::config::Config;
use super::addr::AddrLayout;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub num_banks: usize,
    pub sets_per_bank: usize,
    pub num_ways: usize,
    pub block_size_words: usize,
    pub word_size_bytes: usize,
    /// Entries per bank miss queue
    pub mshr_depth: usize,
    /// Cycles a miss entry ages before its bank may service it
    pub mshr_latency: u32,
    /// Cycles between a hit lookup and its `HitComplete`
    pub hit_latency: usize,
    /// Width of a miss id; the top bits name the bank
    pub uuid_bits: u32,
}

impl Config for CacheConfig {}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_banks: 2,
            sets_per_bank: 16,
            num_ways: 8,
            block_size_words: 32,
            word_size_bytes: 4,
            mshr_depth: 16,
            mshr_latency: 16,
            hit_latency: 2,
            uuid_bits: 8,
        }
    }
}

fn pow2_bits(name: &str, count: usize) -> anyhow::Result<u32> {
    ensure!(
        count > 0 && count.is_power_of_two(),
        "dcache.{} must be a non-zero power of two, got {}",
        name,
        count
    );
    Ok(count.trailing_zeros())
}

impl CacheConfig {
    /// Validate the geometry and derive the address field widths from it.
    pub fn layout(&self) -> anyhow::Result<AddrLayout> {
        ensure!(
            self.word_size_bytes == 4,
            "dcache.word_size_bytes must be 4 (32-bit words), got {}",
            self.word_size_bytes
        );
        ensure!(self.num_ways > 0, "dcache.num_ways must be > 0");
        ensure!(self.mshr_depth > 0, "dcache.mshr_depth must be > 0");
        ensure!(self.hit_latency > 0, "dcache.hit_latency must be > 0");

        let byte_offset_bits = pow2_bits("word_size_bytes", self.word_size_bytes)?;
        let block_offset_bits = pow2_bits("block_size_words", self.block_size_words)?;
        let bank_id_bits = pow2_bits("num_banks", self.num_banks)?;
        let set_index_bits = pow2_bits("sets_per_bank", self.sets_per_bank)?;
        let used = byte_offset_bits + block_offset_bits + bank_id_bits + set_index_bits;
        ensure!(
            used < 32,
            "dcache geometry uses {} index/offset bits, leaving no tag bits",
            used
        );
        ensure!(
            self.uuid_bits <= 32 && self.uuid_bits > bank_id_bits,
            "dcache.uuid_bits ({}) must exceed the bank id width ({}) and fit in 32 bits",
            self.uuid_bits,
            bank_id_bits
        );
        let local_bits = self.uuid_bits - bank_id_bits;
        ensure!(
            local_bits >= usize::BITS - 1 || self.mshr_depth < 1usize << local_bits,
            "dcache.mshr_depth ({}) must be below the {} ids a bank can hand out with uuid_bits = {}",
            self.mshr_depth,
            1u64 << local_bits,
            self.uuid_bits
        );

        Ok(AddrLayout {
            byte_offset_bits,
            block_offset_bits,
            bank_id_bits,
            set_index_bits,
            tag_bits: 32 - used,
        })
    }

    pub fn line_bytes(&self) -> usize {
        self.block_size_words * self.word_size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry() {
        let layout = CacheConfig::default().layout().expect("default config is valid");
        assert_eq!(layout.byte_offset_bits, 2);
        assert_eq!(layout.block_offset_bits, 5);
        assert_eq!(layout.bank_id_bits, 1);
        assert_eq!(layout.set_index_bits, 4);
        assert_eq!(layout.tag_bits, 20);
    }

    #[test]
    fn rejects_non_power_of_two_sets() {
        let config = CacheConfig {
            sets_per_bank: 12,
            ..CacheConfig::default()
        };
        let err = config.layout().unwrap_err();
        assert!(err.to_string().contains("sets_per_bank"), "{err}");
    }

    #[test]
    fn rejects_geometry_without_tag_bits() {
        let config = CacheConfig {
            sets_per_bank: 1 << 24,
            ..CacheConfig::default()
        };
        assert!(config.layout().is_err());
    }

    #[test]
    fn rejects_uuid_narrower_than_bank_id() {
        let config = CacheConfig {
            num_banks: 4,
            uuid_bits: 2,
            ..CacheConfig::default()
        };
        assert!(config.layout().is_err());
    }

    #[test]
    fn rejects_queue_deeper_than_the_id_space() {
        // one local id bit per bank cannot name 16 live misses
        let config = CacheConfig {
            uuid_bits: 2,
            ..CacheConfig::default()
        };
        let err = config.layout().unwrap_err();
        assert!(err.to_string().contains("mshr_depth"), "{err}");

        let config = CacheConfig {
            uuid_bits: 3,
            mshr_depth: 3,
            ..CacheConfig::default()
        };
        assert!(config.layout().is_ok());
    }

    #[test]
    fn parses_partial_section() {
        let section: toml::Value = toml::from_str("num_banks = 4\nhit_latency = 3").unwrap();
        let config = CacheConfig::from_section(Some(&section)).unwrap();
        assert_eq!(config.num_banks, 4);
        assert_eq!(config.hit_latency, 3);
        assert_eq!(config.num_ways, 8);
    }
}
