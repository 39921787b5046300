pub(crate) mod cfg;
pub(crate) mod emit;
pub(crate) mod mir;
pub(crate) mod regalloc;
pub(crate) mod select;

use crate::common::error::CompileError;
use crate::ir::module::Module;

/// Compiles every function and global in `module` to ARM-like assembly
/// text: select MIR per function (C6), build its CFG and live intervals
/// (C7), run linear-scan allocation (C8), then print cleaned-up assembly
/// (C9).
pub fn compile_to_asm(module: &Module) -> Result<String, CompileError> {
    let mut out = String::new();
    out.push_str("    .text\n");
    for func in module.functions() {
        if module.function_blocks(func).is_empty() {
            continue; // external declaration, nothing to emit
        }
        let selected = select::select_function(module, func);
        let fn_cfg = cfg::build_cfg(&selected.insts);
        let liveness = cfg::compute_liveness(&selected.insts, &fn_cfg);
        let intervals = cfg::compute_intervals(&selected.insts, &fn_cfg, &liveness);
        let alloc = regalloc::allocate(intervals)?;
        out.push_str(&emit::emit_function(&selected, &alloc));
        out.push('\n');
    }
    emit_globals(module, &mut out);
    Ok(out)
}

fn emit_globals(module: &Module, out: &mut String) {
    let mut any = false;
    for g in module.globals() {
        if !any {
            out.push_str("    .data\n");
            any = true;
        }
        let (name, linkage, init) = module.global_info(g);
        if linkage == crate::ir::value::Linkage::External {
            out.push_str(&format!("    .global {name}\n"));
        }
        out.push_str(&format!("{name}:\n"));
        match init {
            Some(v) => emit_initializer(module, v, out),
            None => {
                let pointee_size = module.ty(g).deref().map(|t| t.size()).unwrap_or(4);
                emit_zero_bytes(pointee_size, out);
            }
        }
    }
}

/// Recursively flattens a constant initializer into one `.word` per scalar
/// leaf, walking `ConstArray`/`ConstStruct` element lists so an aggregate
/// global keeps every element's data (and its true size) instead of
/// collapsing to a single word.
fn emit_initializer(module: &Module, value: crate::ir::value::ValueId, out: &mut String) {
    if let Some(elems) = module.const_aggregate_elems(value) {
        for &e in elems {
            emit_initializer(module, e, out);
        }
        return;
    }
    let size = module.ty(value).size();
    if size > 4 {
        // A `ConstZero` standing in for a whole zero-initialized aggregate.
        emit_zero_bytes(size, out);
        return;
    }
    let n = module.const_int_value(value).unwrap_or(0);
    out.push_str(&format!("    .word {n}\n"));
}

fn emit_zero_bytes(size: u32, out: &mut String) {
    if size > 0 {
        out.push_str(&format!("    .zero {size}\n"));
    }
}
