//! Dead global value elimination (spec §4.4): drop any top-level value with
//! no uses that is either a bodyless function declaration or has
//! Internal/Inline linkage.

use crate::ir::module::Module;
use crate::ir::value::{Linkage, ValueId};

pub fn run_module(module: &mut Module) -> bool {
    let mut changed = false;
    for id in module.top_level_snapshot() {
        if module.has_uses(id) {
            continue;
        }
        let removable = if module.is_block(id) {
            false
        } else if let Some(func) = as_function(module, id) {
            func.1.is_empty() || matches!(func.0, Linkage::Internal | Linkage::Inline)
        } else {
            let (_, linkage, _) = module.global_info(id);
            matches!(linkage, Linkage::Internal | Linkage::Inline)
        };
        if !removable {
            continue;
        }
        if has_defined_body(module, id) {
            log::warn!("removing unused definition '{}'", describe(module, id));
        }
        module.erase_top_level(id);
        changed = true;
    }
    changed
}

fn as_function(module: &Module, id: ValueId) -> Option<(Linkage, Vec<ValueId>)> {
    if module.functions().any(|f| f == id) {
        Some((module.function_linkage(id), module.function_blocks(id).to_vec()))
    } else {
        None
    }
}

fn has_defined_body(module: &Module, id: ValueId) -> bool {
    if module.functions().any(|f| f == id) {
        !module.function_blocks(id).is_empty()
    } else {
        let (_, _, init) = module.global_info(id);
        init.is_some()
    }
}

fn describe(module: &Module, id: ValueId) -> &str {
    if module.functions().any(|f| f == id) {
        module.function_name(id)
    } else {
        module.global_info(id).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use std::rc::Rc;

    #[test]
    fn removes_unused_internal_function() {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::Void) }));
        let f = m.add_function("helper", fty, Linkage::Internal, Span::dummy());
        m.add_block(f, "entry", Span::dummy());
        assert!(run_module(&mut m));
        assert!(!m.top_level.contains(&f));
    }

    #[test]
    fn keeps_unused_external_function() {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::Void) }));
        let f = m.add_function("api", fty, Linkage::External, Span::dummy());
        m.add_block(f, "entry", Span::dummy());
        assert!(!run_module(&mut m));
        assert!(m.top_level.contains(&f));
    }

    #[test]
    fn removes_bodyless_declaration_regardless_of_linkage() {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::Void) }));
        let f = m.add_function("extern_fn", fty, Linkage::External, Span::dummy());
        assert!(run_module(&mut m));
        assert!(!m.top_level.contains(&f));
    }
}
