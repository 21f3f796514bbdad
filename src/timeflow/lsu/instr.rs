/// Lanes per warp.
pub const NUM_LANES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Load,
    Store,
    /// Flush the dcache and halt it
    Halt,
}

/// A warp-wide memory instruction as it travels from issue through writeback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemInstr {
    pub id: u64,
    pub op: MemOp,
    /// Predicate mask; bit `i` set means lane `i` takes part
    pub pred: u32,
    /// Per-lane base address register
    pub rdat1: [u32; NUM_LANES],
    pub imm: i32,
    /// Per-lane store data
    pub rdat2: [u32; NUM_LANES],
    /// Per-lane load results, filled by the load/store unit
    pub wdat: [Option<u32>; NUM_LANES],
}

impl MemInstr {
    fn new(id: u64, op: MemOp, rdat1: [u32; NUM_LANES], imm: i32, rdat2: [u32; NUM_LANES]) -> Self {
        Self {
            id,
            op,
            pred: u32::MAX,
            rdat1,
            imm,
            rdat2,
            wdat: [None; NUM_LANES],
        }
    }

    pub fn load(id: u64, rdat1: [u32; NUM_LANES], imm: i32) -> Self {
        Self::new(id, MemOp::Load, rdat1, imm, [0; NUM_LANES])
    }

    pub fn store(id: u64, rdat1: [u32; NUM_LANES], imm: i32, rdat2: [u32; NUM_LANES]) -> Self {
        Self::new(id, MemOp::Store, rdat1, imm, rdat2)
    }

    pub fn halt(id: u64) -> Self {
        Self::new(id, MemOp::Halt, [0; NUM_LANES], 0, [0; NUM_LANES])
    }

    pub fn with_pred(mut self, pred: u32) -> Self {
        self.pred = pred;
        self
    }

    pub fn is_active(&self, lane: usize) -> bool {
        self.op != MemOp::Halt && (self.pred >> lane) & 1 == 1
    }

    pub fn lane_addr(&self, lane: usize) -> u32 {
        self.rdat1[lane].wrapping_add_signed(self.imm)
    }

    pub fn active_lanes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NUM_LANES).filter(|&lane| self.is_active(lane))
    }
}
