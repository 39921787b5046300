//! The SSA intermediate representation (spec components C1 and C2): value
//! model, instruction set, the owning module/arena, the builder facade,
//! dominance, textual printing, the verifier, and AST lowering.

pub mod builder;
pub mod dominance;
pub mod instruction;
pub mod lowering;
pub mod mem2reg;
pub mod module;
pub mod printer;
pub mod reader;
pub mod value;
pub mod verify;
