use std::collections::HashMap;
use crate::base::mem::HasMemory;

// a sparse word memory that reads anything never written as 0
#[derive(Debug, Default)]
pub struct ToyMemory {
    mem: HashMap<usize, u32>,
}

impl HasMemory for ToyMemory {
    fn read_impl(&self, addr: usize, n: usize) -> Result<Vec<u8>, anyhow::Error> {
        Ok((addr..addr + n)
            .step_by(4)
            .flat_map(|a| self.mem.get(&a).copied().unwrap_or(0).to_le_bytes())
            .collect())
    }

    fn write_impl(&mut self, addr: usize, data: &[u8]) -> Result<(), anyhow::Error> {
        for (i, word) in data.chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.mem.insert(addr + 4 * i, value);
        }
        Ok(())
    }
}

impl ToyMemory {
    pub fn reset(&mut self) {
        self.mem.clear();
    }

    /// Number of words ever written.
    pub fn footprint(&self) -> usize {
        self.mem.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_words_read_zero() {
        let mem = ToyMemory::default();
        assert_eq!(mem.read(0x1000, 8).unwrap(), vec![0; 8]);
    }

    #[test]
    fn line_write_then_word_read() {
        let mut mem = ToyMemory::default();
        let line: Vec<u8> = (0u32..4).flat_map(|w| (w + 10).to_le_bytes()).collect();
        mem.write(0x2000, &line).unwrap();
        assert_eq!(mem.read_word(0x2008).unwrap(), 12);
        assert_eq!(mem.footprint(), 4);
    }

    #[test]
    fn unaligned_access_is_rejected() {
        let mut mem = ToyMemory::default();
        assert!(mem.read(0x1002, 4).is_err());
        assert!(mem.write_word(0x1001, 5).is_err());
    }
}
