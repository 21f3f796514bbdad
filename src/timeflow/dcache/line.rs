/// One way of one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLine {
    pub valid: bool,
    pub dirty: bool,
    pub tag: u32,
    pub words: Vec<u32>,
}

impl CacheLine {
    pub fn empty(block_size_words: usize) -> Self {
        Self {
            valid: false,
            dirty: false,
            tag: 0,
            words: vec![0; block_size_words],
        }
    }

    pub fn matches(&self, tag: u32) -> bool {
        self.valid && self.tag == tag
    }

    pub fn needs_writeback(&self) -> bool {
        self.valid && self.dirty
    }
}
