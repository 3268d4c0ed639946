use abcvm_isa::BytecodeId;

use crate::error::ParseError;
use crate::leb128::{decode_uleb128_u32, encode_uleb128};

/// Try block of a method's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBlock {
    pub start_pc: u32,
    pub length: u32,
    pub catch_blocks: Vec<CatchBlock>,
}

impl TryBlock {
    /// Whether `pc` lies in `[start_pc, start_pc + length)`.
    pub fn covers(&self, pc: u32) -> bool {
        pc >= self.start_pc && pc - self.start_pc < self.length
    }
}

/// Catch block of a try block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchBlock {
    /// Type index + 1 (0 = catch-all).
    pub type_idx: u32,
    /// PC of the handler.
    pub handler_pc: u32,
    /// Handler code size.
    pub code_size: u32,
}

impl CatchBlock {
    pub fn is_catch_all(&self) -> bool {
        self.type_idx == 0
    }

    /// Id of the caught exception class, `None` for a catch-all.
    pub fn type_id(&self) -> Option<BytecodeId> {
        self.type_idx.checked_sub(1).map(BytecodeId::new)
    }
}

/// Code item of a method: register counts, instructions and try blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code {
    /// Number of local virtual registers (arguments excluded).
    pub num_vregs: u32,
    /// Number of declared arguments, `this` included.
    pub num_args: u32,
    pub instructions: Vec<u8>,
    pub try_blocks: Vec<TryBlock>,
}

/// Sequential ULEB128 reader over a code item.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn uleb(&mut self) -> Result<u32, ParseError> {
        let (value, consumed) = decode_uleb128_u32(self.data, self.pos)?;
        self.pos += consumed;
        Ok(value)
    }
}

impl Code {
    pub fn new(num_vregs: u32, num_args: u32, instructions: Vec<u8>) -> Self {
        Self {
            num_vregs,
            num_args,
            instructions,
            try_blocks: Vec::new(),
        }
    }

    pub fn with_try_block(mut self, block: TryBlock) -> Self {
        self.try_blocks.push(block);
        self
    }

    /// Parse a Code structure at the given offset.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self, ParseError> {
        let mut r = Reader {
            data,
            pos: offset as usize,
        };
        if r.pos > data.len() {
            return Err(ParseError::OffsetOutOfBounds(r.pos, data.len()));
        }

        let num_vregs = r.uleb()?;
        let num_args = r.uleb()?;
        let code_size = r.uleb()?;
        let tries_size = r.uleb()?;

        let insn_end = r.pos + code_size as usize;
        if insn_end > data.len() {
            return Err(ParseError::OffsetOutOfBounds(insn_end, data.len()));
        }
        let instructions = data[r.pos..insn_end].to_vec();
        r.pos = insn_end;

        let mut try_blocks = Vec::with_capacity(tries_size.min(64) as usize);
        for _ in 0..tries_size {
            let start_pc = r.uleb()?;
            let length = r.uleb()?;
            let num_catches = r.uleb()?;

            let mut catch_blocks = Vec::with_capacity(num_catches.min(64) as usize);
            for _ in 0..num_catches {
                catch_blocks.push(CatchBlock {
                    type_idx: r.uleb()?,
                    handler_pc: r.uleb()?,
                    code_size: r.uleb()?,
                });
            }

            try_blocks.push(TryBlock {
                start_pc,
                length,
                catch_blocks,
            });
        }

        Ok(Self {
            num_vregs,
            num_args,
            instructions,
            try_blocks,
        })
    }

    /// Serialize in the layout [`Code::parse`] reads.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.instructions.len() + 8);
        encode_uleb128(self.num_vregs as u64, &mut out);
        encode_uleb128(self.num_args as u64, &mut out);
        encode_uleb128(self.instructions.len() as u64, &mut out);
        encode_uleb128(self.try_blocks.len() as u64, &mut out);
        out.extend_from_slice(&self.instructions);
        for tb in &self.try_blocks {
            encode_uleb128(tb.start_pc as u64, &mut out);
            encode_uleb128(tb.length as u64, &mut out);
            encode_uleb128(tb.catch_blocks.len() as u64, &mut out);
            for cb in &tb.catch_blocks {
                encode_uleb128(cb.type_idx as u64, &mut out);
                encode_uleb128(cb.handler_pc as u64, &mut out);
                encode_uleb128(cb.code_size as u64, &mut out);
            }
        }
        out
    }

    /// Catch blocks guarding `pc`, in declaration order.
    pub fn catch_blocks_at(&self, pc: u32) -> impl Iterator<Item = &CatchBlock> {
        self.try_blocks
            .iter()
            .filter(move |tb| tb.covers(pc))
            .flat_map(|tb| tb.catch_blocks.iter())
    }
}
