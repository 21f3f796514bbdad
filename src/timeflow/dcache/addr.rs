/// Field widths of a 32-bit byte address, MSB to LSB:
/// `[tag | set_index | bank_id | block_offset | byte_offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrLayout {
    pub byte_offset_bits: u32,
    pub block_offset_bits: u32,
    pub bank_id_bits: u32,
    pub set_index_bits: u32,
    pub tag_bits: u32,
}

/// A byte address split into its cache fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub raw: u32,
    pub tag: u32,
    pub set_index: usize,
    pub bank_id: usize,
    pub block_offset: usize,
    pub byte_offset: u32,
    /// `raw` with the block and byte offsets shifted out; the key for miss merging.
    pub block_address: u32,
}

fn mask(bits: u32) -> u32 {
    (1u32 << bits) - 1
}

impl AddrLayout {
    fn line_shift(&self) -> u32 {
        self.byte_offset_bits + self.block_offset_bits
    }

    fn bank_shift(&self) -> u32 {
        self.line_shift()
    }

    fn set_shift(&self) -> u32 {
        self.bank_shift() + self.bank_id_bits
    }

    fn tag_shift(&self) -> u32 {
        self.set_shift() + self.set_index_bits
    }

    pub fn decode(&self, raw: u32) -> Addr {
        Addr {
            raw,
            tag: raw >> self.tag_shift(),
            set_index: ((raw >> self.set_shift()) & mask(self.set_index_bits)) as usize,
            bank_id: ((raw >> self.bank_shift()) & mask(self.bank_id_bits)) as usize,
            block_offset: ((raw >> self.byte_offset_bits) & mask(self.block_offset_bits)) as usize,
            byte_offset: raw & mask(self.byte_offset_bits),
            block_address: raw >> self.line_shift(),
        }
    }

    /// Rebuild the base byte address of the line identified by `tag`, `set_index` and `bank_id`.
    pub fn compose(&self, tag: u32, set_index: usize, bank_id: usize) -> u32 {
        (tag << self.tag_shift())
            | ((set_index as u32) << self.set_shift())
            | ((bank_id as u32) << self.bank_shift())
    }

    /// `raw` rounded down to the start of its cache line.
    pub fn line_base(&self, raw: u32) -> u32 {
        raw & !mask(self.line_shift())
    }

    pub fn line_bytes(&self) -> u32 {
        1 << self.line_shift()
    }
}

impl Addr {
    /// Base byte address of the line holding this address.
    pub fn line_base(&self, layout: &AddrLayout) -> u32 {
        layout.line_base(self.raw)
    }
}
