use anyhow::bail;

/// Trait for the simulated backing memories.
pub trait HasMemory {
    fn read_impl(&self, addr: usize, n: usize) -> Result<Vec<u8>, anyhow::Error>;
    fn read(&self, addr: usize, n: usize) -> Result<Vec<u8>, anyhow::Error> {
        // the cache only ever moves whole words or whole lines
        if n % 4 != 0 || n == 0 {
            bail!("word sized reads only, got {} bytes @ {:#010x}", n, addr);
        }
        if addr + n - 1 >= (1 << 32) {
            bail!("read of {} bytes @ {:#010x} leaves the 32-bit address range", n, addr);
        }
        if addr & 0x3 != 0 {
            bail!("unaligned memory read of size {} @ {:#010x}", n, addr);
        }

        self.read_impl(addr, n)
    }
    fn read_word(&self, addr: usize) -> Result<u32, anyhow::Error> {
        let bytes = self.read(addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_impl(&mut self, addr: usize, data: &[u8]) -> Result<(), anyhow::Error>;
    fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), anyhow::Error> {
        let n = data.len();
        if n % 4 != 0 || n == 0 {
            bail!("word sized writes only, got {} bytes @ {:#010x}", n, addr);
        }
        if addr + n - 1 >= (1 << 32) {
            bail!("write of {} bytes @ {:#010x} leaves the 32-bit address range", n, addr);
        }
        if addr & 0x3 != 0 {
            bail!("unaligned memory write of size {} @ {:#010x}", n, addr);
        }

        self.write_impl(addr, data)
    }
    fn write_word(&mut self, addr: usize, value: u32) -> Result<(), anyhow::Error> {
        self.write(addr, &value.to_le_bytes())
    }
}
