use anyhow::bail;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::timeflow::lsu::NUM_LANES;
use crate::traffic::config::{TrafficConfig, TrafficPatternSpec};

const WORD_BYTES: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Read,
    Write,
}

impl PatternOp {
    pub fn is_store(self) -> bool {
        matches!(self, Self::Write)
    }

    fn short(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Write => "w",
        }
    }
}

#[derive(Debug, Clone)]
enum PatternKind {
    Strided {
        warp_stride: u64,
        lane_stride: u64,
    },
    Tiled {
        tile_m: u64,
        tile_n: u64,
        transpose: bool,
    },
    /// Word indices drawn up front, lane-major, from one stream per pattern
    Random { table: Vec<u64> },
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub name: String,
    pub op: PatternOp,
    pub lane_mask: u32,
    within_bytes: u64,
    kind: PatternKind,
}

impl CompiledPattern {
    fn offset_bytes(&self, instr_idx: u32, lane: usize, instrs: usize) -> u64 {
        let lane_u64 = lane as u64;
        let lanes = NUM_LANES as u64;
        match &self.kind {
            PatternKind::Strided {
                warp_stride,
                lane_stride,
            } => ((instr_idx as u64 * warp_stride) * lanes + lane_u64) * lane_stride * WORD_BYTES,
            PatternKind::Tiled {
                tile_m,
                tile_n,
                transpose,
            } => {
                let tile_elems = tile_m.saturating_mul(*tile_n).max(1);
                let elem_idx = instr_idx as u64 * lanes + lane_u64;
                let tile_idx = elem_idx / tile_elems;
                let idx_in_tile = elem_idx % tile_elems;
                let mut row = idx_in_tile / tile_n;
                let mut col = idx_in_tile % tile_n;
                if *transpose {
                    std::mem::swap(&mut row, &mut col);
                }
                (tile_idx * tile_elems + row * tile_n + col) * WORD_BYTES
            }
            PatternKind::Random { table } => {
                let idx = lane * instrs + instr_idx as usize;
                table.get(idx).copied().unwrap_or(0) * WORD_BYTES
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternEngine {
    patterns: Vec<CompiledPattern>,
    instrs_per_pattern: usize,
    base: u32,
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig) -> anyhow::Result<Self> {
        let instrs_per_pattern = config.instrs_per_pattern.max(1) as usize;
        let patterns = config
            .patterns
            .iter()
            .enumerate()
            .map(|(idx, spec)| compile_pattern(spec, idx, config, instrs_per_pattern))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            instrs_per_pattern,
            base: config.address.base,
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn instrs_per_pattern(&self) -> usize {
        self.instrs_per_pattern
    }

    pub fn pattern(&self, idx: usize) -> Option<&CompiledPattern> {
        self.patterns.get(idx)
    }

    /// Word-aligned byte address lane `lane` touches in instruction `instr_idx` of a pattern.
    pub fn lane_addr(&self, pattern_idx: usize, instr_idx: u32, lane: usize) -> Option<u32> {
        let pattern = self.patterns.get(pattern_idx)?;
        let offset = pattern.offset_bytes(instr_idx, lane, self.instrs_per_pattern);
        let wrapped = (offset % pattern.within_bytes) & !(WORD_BYTES - 1);
        Some(self.base.wrapping_add(wrapped as u32))
    }
}

fn compile_pattern(
    spec: &TrafficPatternSpec,
    index: usize,
    config: &TrafficConfig,
    instrs_per_pattern: usize,
) -> anyhow::Result<CompiledPattern> {
    let kind_key = spec.kind.trim().to_ascii_lowercase();
    let op = parse_op(&spec.op)?;
    let within_bytes = spec
        .within_bytes
        .unwrap_or(config.address.size_bytes)
        .max(WORD_BYTES as u32) as u64;

    let kind = match kind_key.as_str() {
        "strided" => PatternKind::Strided {
            warp_stride: spec.warp_stride.max(1) as u64,
            lane_stride: spec.lane_stride as u64,
        },
        "tiled" => PatternKind::Tiled {
            tile_m: spec.tile_m.max(1) as u64,
            tile_n: spec.tile_n.max(1) as u64,
            transpose: spec.transpose,
        },
        "random" | "random_access" => {
            let min = spec.random_min as u64;
            let max = if spec.random_max == 0 {
                (within_bytes / WORD_BYTES).max(min + 1)
            } else {
                spec.random_max as u64
            };
            let max = max.max(min + 1);
            let mut stream = StdRng::seed_from_u64(spec.seed);
            let table = (0..NUM_LANES * instrs_per_pattern)
                .map(|_| stream.gen_range(min..max))
                .collect();
            PatternKind::Random { table }
        }
        other => bail!(
            "unsupported traffic pattern kind '{}' at index {} (expected strided|tiled|random)",
            other,
            index
        ),
    };

    let name = if spec.name.is_empty() {
        default_pattern_name(spec, &kind, op)
    } else {
        spec.name.clone()
    };

    Ok(CompiledPattern {
        name,
        op,
        lane_mask: spec.lane_mask,
        within_bytes,
        kind,
    })
}

fn parse_op(op: &str) -> anyhow::Result<PatternOp> {
    match op.trim().to_ascii_lowercase().as_str() {
        "read" | "r" | "load" => Ok(PatternOp::Read),
        "write" | "w" | "store" => Ok(PatternOp::Write),
        other => bail!("unsupported traffic op '{}'; expected read/write", other),
    }
}

fn default_pattern_name(spec: &TrafficPatternSpec, kind: &PatternKind, op: PatternOp) -> String {
    let base = match kind {
        PatternKind::Strided {
            warp_stride,
            lane_stride,
        } => format!("strided({}, {})", warp_stride, lane_stride),
        PatternKind::Tiled {
            tile_m,
            tile_n,
            transpose,
        } => {
            let suffix = if *transpose { ".T" } else { "" };
            format!("tiled({}, {}){}", tile_m, tile_n, suffix)
        }
        PatternKind::Random { .. } => format!("random({})", spec.seed),
    };
    format!("{}_{}", base, op.short())
}
