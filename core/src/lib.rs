pub mod context;
pub mod dump;
pub mod excp;
pub mod ir_builder;
pub mod label;
pub mod op;
pub mod opcode;
pub mod serialize;
pub mod tb;
pub mod temp;
pub mod types;

pub use context::{Context, IrBody, MAX_INSNS};
pub use excp::ExceptionKind;
pub use label::Label;
pub use op::{Op, OpIdx, MAX_OP_ARGS};
pub use opcode::{OpDef, OpFlags, Opcode, IR_VERSION, OPCODE_DEFS};
pub use tb::{
    ExitEdge, JumpCache, TbId, TbJmp, TbKey, TranslationBlock,
    TB_EXIT_IDX0, TB_EXIT_IDX1, TB_EXIT_NOCHAIN, TB_JMP_CACHE_SIZE,
};
pub use temp::{Temp, TempIdx, TempKind};
pub use types::{mb, Cond, MemOp, RmwOp, Type};
