//! ARM-like MIR (spec §4.5): a closed per-architecture opcode enum, small
//! value-object operands (so they can key liveness sets), and one flat
//! per-function instruction list with `Label` pseudo-ops marking basic
//! block boundaries.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Mov,
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    And,
    Orr,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Cmp,
    Ldr,
    Str,
    B,
    Bcond,
    Bl,
    Bx,
    Push,
    Pop,
    /// Pseudo-op: marks a basic block boundary. Carries no operands; its
    /// `dest` holds the `Operand::Label` naming the block.
    Label,
    /// Prologue stub: frame size is a placeholder until C9 patches it.
    FuncBegin,
    /// Epilogue stub, paired one-to-one with `FuncBegin`.
    FuncEnd,
    /// A data word in a `.data`/`.rodata` section (globals).
    DataWord,
    /// A source comment, emitted verbatim, never affecting codegen.
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ult,
    Ule,
    Ugt,
    Uge,
    Al,
}

impl Condition {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Lt => "lt",
            Condition::Le => "le",
            Condition::Gt => "gt",
            Condition::Ge => "ge",
            Condition::Ult => "lo",
            Condition::Ule => "ls",
            Condition::Ugt => "hi",
            Condition::Uge => "hs",
            Condition::Al => "al",
        }
    }
}

/// A selector-minted virtual register: one per SSA value that needs to live
/// in a register (as opposed to a stack slot, for address-taken allocas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

/// A physical general-purpose register. Numbered the way the allocatable
/// pool is listed in `regalloc.rs`; `SP`/`LR`/`FP` are modeled as reserved
/// high numbers never handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(pub u8);

pub const SP: PhysReg = PhysReg(13);
pub const LR: PhysReg = PhysReg(14);
pub const FP: PhysReg = PhysReg(11);

impl PhysReg {
    pub fn name(self) -> String {
        match self.0 {
            13 => "sp".to_string(),
            14 => "lr".to_string(),
            15 => "pc".to_string(),
            n => format!("r{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Virtual(VReg),
    Physical(PhysReg),
    Imm(i64),
    /// A placeholder immediate patched by `emit::patch_frame_size` once the
    /// allocator has decided how many stack slots the function needs.
    FrameSize,
    /// A caller-pushed overflow argument (the 5th parameter onward),
    /// indexed from 0. Its concrete `[fp, #off]` offset depends on how many
    /// callee-saved registers the prologue ends up pushing, which is only
    /// known after register allocation; `emit::substitute` resolves it.
    StackArg(u32),
    Mem { base: Box<Operand>, offset: i64 },
    Label(String),
    Cond(Condition),
}

impl Operand {
    pub fn as_vreg(&self) -> Option<VReg> {
        match self {
            Operand::Virtual(v) => Some(*v),
            Operand::Mem { base, .. } => base.as_vreg(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MInst {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub dest: Option<Operand>,
    pub cond: Option<Condition>,
    pub comment: Option<String>,
}

impl MInst {
    pub fn new(opcode: Opcode, dest: Option<Operand>, operands: Vec<Operand>) -> MInst {
        MInst { opcode, dest, operands, cond: None, comment: None }
    }

    pub fn with_cond(mut self, cond: Condition) -> MInst {
        self.cond = Some(cond);
        self
    }

    /// Every operand slot this instruction reads from, for liveness (C7).
    pub fn uses(&self) -> Vec<VReg> {
        let mut out: Vec<VReg> = self.operands.iter().filter_map(Operand::as_vreg).collect();
        if self.opcode == Opcode::Str {
            if let Some(d) = &self.dest {
                if let Some(v) = d.as_vreg() {
                    out.push(v);
                }
            }
        }
        out
    }

    /// The virtual register this instruction defines, if any (C7's
    /// `var_kill`). `Str`'s `dest` is a memory operand it reads from, not a
    /// definition, so it is excluded here and picked up by `uses` instead.
    pub fn def(&self) -> Option<VReg> {
        if self.opcode == Opcode::Str {
            return None;
        }
        self.dest.as_ref().and_then(Operand::as_vreg)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.opcode, Opcode::B | Opcode::Bcond | Opcode::Bx)
    }

    pub fn label_target(&self) -> Option<&str> {
        match (&self.opcode, &self.dest) {
            (Opcode::B | Opcode::Bcond | Opcode::Bl, Some(Operand::Label(l))) => Some(l),
            _ => None,
        }
    }
}
