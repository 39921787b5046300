//! Parses the textual form [`crate::ir::printer`] emits back into a
//! [`Module`] — the round-trip half of spec §6's `-emit-ir` support, and
//! what backs the printer/reader idempotence tests.
//!
//! Deliberately not a general assembler: it understands exactly the shapes
//! `print_module` produces (renumbered `%N`/`bbN` tokens, one instruction
//! per line) and reports anything else as [`CompileError::Parse`]. Types are
//! parsed by peeling postfix `*`/`[n]` suffixes off the right, the mirror
//! image of how [`crate::common::types::Type`]'s `Display` builds them up.

use crate::common::error::CompileError;
use crate::common::source::Span;
use crate::common::types::{FunctionSig, IntWidth, StructDef, Type};
use crate::ir::instruction::{BinOp, CastKind, Instruction, PhiEdge, UnOp};
use crate::ir::module::Module;
use crate::ir::value::{Linkage, ValueId};
use rustc_hash::FxHashMap;
use std::rc::Rc;

pub fn parse_module(text: &str, structs: &FxHashMap<String, Rc<StructDef>>) -> Result<Module, CompileError> {
    let mut module = Module::new();
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() {
            i += 1;
            continue;
        }
        if let Some(rest) = line.strip_prefix("global ") {
            parse_global(&mut module, rest, structs)?;
            i += 1;
        } else if let Some(rest) = line.strip_prefix("declare ") {
            parse_declare(&mut module, rest, structs)?;
            i += 1;
        } else if let Some(rest) = line.strip_prefix("function ") {
            let body_start = i + 1;
            let body_end = find_closing_brace(&lines, body_start)?;
            parse_function(&mut module, rest, &lines[body_start..body_end], structs)?;
            i = body_end + 1;
        } else {
            return Err(CompileError::Parse(format!("unrecognized top-level line: {}", line)));
        }
    }
    Ok(module)
}

fn find_closing_brace(lines: &[&str], from: usize) -> Result<usize, CompileError> {
    for (offset, l) in lines[from..].iter().enumerate() {
        if l.trim() == "}" {
            return Ok(from + offset);
        }
    }
    Err(CompileError::Parse("unterminated function body".to_string()))
}

fn parse_linkage(tok: &str) -> Result<Linkage, CompileError> {
    match tok {
        "external" => Ok(Linkage::External),
        "internal" => Ok(Linkage::Internal),
        "inline" => Ok(Linkage::Inline),
        "ctor" => Ok(Linkage::GlobalCtor),
        other => Err(CompileError::Parse(format!("unknown linkage '{}'", other))),
    }
}

fn parse_type(text: &str, structs: &FxHashMap<String, Rc<StructDef>>) -> Result<Type, CompileError> {
    let text = text.trim();
    if let Some(stripped) = text.strip_suffix('*') {
        return Ok(Type::Pointer(Box::new(parse_type(stripped, structs)?)));
    }
    if text.ends_with(']') {
        let open = text.rfind('[').ok_or_else(|| CompileError::Parse(format!("malformed array type '{}'", text)))?;
        let count: usize = text[open + 1..text.len() - 1]
            .parse()
            .map_err(|_| CompileError::Parse(format!("malformed array length in '{}'", text)))?;
        return Ok(Type::Array(Box::new(parse_type(&text[..open], structs)?), count));
    }
    match text {
        "void" => Ok(Type::Void),
        "i8" => Ok(Type::Int(IntWidth::W8, true)),
        "u8" => Ok(Type::Int(IntWidth::W8, false)),
        "i32" => Ok(Type::Int(IntWidth::W32, true)),
        "u32" => Ok(Type::Int(IntWidth::W32, false)),
        other => {
            if let Some(name) = other.strip_prefix("struct ") {
                structs.get(name).cloned().map(Type::Struct).ok_or_else(|| CompileError::Parse(format!("unknown struct type '{}'", name)))
            } else {
                Err(CompileError::Parse(format!("unrecognized type '{}'", text)))
            }
        }
    }
}

fn split_type_and_name(s: &str) -> Result<(&str, &str), CompileError> {
    let idx = s.rfind(char::is_whitespace).ok_or_else(|| CompileError::Parse(format!("expected '<type> <name>', got '{}'", s)))?;
    Ok((s[..idx].trim(), s[idx + 1..].trim()))
}

fn parse_global(module: &mut Module, rest: &str, structs: &FxHashMap<String, Rc<StructDef>>) -> Result<(), CompileError> {
    let (linkage_tok, rest) = rest.split_once(' ').ok_or_else(|| CompileError::Parse(format!("malformed global: {}", rest)))?;
    let linkage = parse_linkage(linkage_tok)?;
    let (decl, init_text) = rest.split_once(" = ").ok_or_else(|| CompileError::Parse(format!("global missing initializer: {}", rest)))?;
    let (ty_text, name) = split_type_and_name(decl)?;
    let pointee = parse_type(ty_text, structs)?;
    let init = if init_text.trim() == "zeroinitializer" {
        None
    } else {
        let n: i64 = init_text.trim().parse().map_err(|_| CompileError::Parse(format!("malformed global initializer '{}'", init_text)))?;
        Some(module.const_int(pointee.clone(), n))
    };
    module.add_global(name.to_string(), pointee, linkage, init, true, Span::dummy());
    Ok(())
}

fn parse_param_list_types(params_text: &str, structs: &FxHashMap<String, Rc<StructDef>>) -> Result<Vec<Type>, CompileError> {
    if params_text.trim().is_empty() {
        return Ok(Vec::new());
    }
    params_text.split(',').map(|p| parse_type(p.trim(), structs)).collect()
}

fn parse_name_and_params(rest: &str) -> Result<(&str, &str), CompileError> {
    let open = rest.find('(').ok_or_else(|| CompileError::Parse(format!("expected '(' in '{}'", rest)))?;
    let close = rest.rfind(')').ok_or_else(|| CompileError::Parse(format!("expected ')' in '{}'", rest)))?;
    Ok((&rest[..open], &rest[open + 1..close]))
}

fn parse_declare(module: &mut Module, rest: &str, structs: &FxHashMap<String, Rc<StructDef>>) -> Result<(), CompileError> {
    let (linkage_tok, rest) = rest.split_once(' ').ok_or_else(|| CompileError::Parse(format!("malformed declare: {}", rest)))?;
    let linkage = parse_linkage(linkage_tok)?;
    let (name, params_text) = parse_name_and_params(rest)?;
    let param_types = parse_param_list_types(params_text, structs)?;
    let sig = FunctionSig { params: param_types, ret: Box::new(Type::i32_ty()) };
    module.add_function(name.to_string(), Type::Function(Rc::new(sig)), linkage, Span::dummy());
    Ok(())
}

fn parse_function(module: &mut Module, header_rest: &str, body: &[&str], structs: &FxHashMap<String, Rc<StructDef>>) -> Result<(), CompileError> {
    let header_rest = header_rest.strip_suffix('{').map(|s| s.trim()).unwrap_or(header_rest.trim());
    let (linkage_tok, rest) = header_rest.split_once(' ').ok_or_else(|| CompileError::Parse(format!("malformed function header: {}", header_rest)))?;
    let linkage = parse_linkage(linkage_tok)?;
    let (name, params_text) = parse_name_and_params(rest)?;

    let mut param_entries = Vec::new();
    if !params_text.trim().is_empty() {
        for p in params_text.split(',') {
            let (ty_text, tok) = split_type_and_name(p.trim())?;
            param_entries.push((parse_type(ty_text, structs)?, tok.to_string()));
        }
    }
    let param_types = param_entries.iter().map(|(t, _)| t.clone()).collect();
    let sig = FunctionSig { params: param_types, ret: Box::new(Type::i32_ty()) };
    let func = module.add_function(name.to_string(), Type::Function(Rc::new(sig)), linkage, Span::dummy());

    let mut values: FxHashMap<String, ValueId> = FxHashMap::default();
    for (ty, tok) in param_entries {
        let p = module.add_param(func, ty, Span::dummy());
        values.insert(tok, p);
    }

    // Pre-create every block in appearance order so forward branches resolve.
    let mut blocks: FxHashMap<String, ValueId> = FxHashMap::default();
    for line in body {
        let line = line.trim();
        if let Some(label) = line.strip_suffix(':') {
            if !line.contains(' ') {
                let b = module.add_block(func, label.to_string(), Span::dummy());
                blocks.insert(label.to_string(), b);
            }
        }
    }

    let mut current_block: Option<ValueId> = None;
    for line in body {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(label) = line.strip_suffix(':') {
            if !line.contains(' ') {
                current_block = Some(*blocks.get(label).ok_or_else(|| CompileError::Parse(format!("unknown block label '{}'", label)))?);
                continue;
            }
        }
        let block = current_block.ok_or_else(|| CompileError::Parse("instruction outside any block".to_string()))?;
        parse_instruction(module, block, line, &mut values, &blocks, structs)?;
    }
    Ok(())
}

fn resolve(module: &mut Module, tok: &str, ty: &Type, values: &FxHashMap<String, ValueId>, blocks: &FxHashMap<String, ValueId>) -> Result<ValueId, CompileError> {
    let tok = tok.trim().trim_end_matches(',');
    if let Some(&b) = blocks.get(tok) {
        return Ok(b);
    }
    if let Some(&v) = values.get(tok) {
        return Ok(v);
    }
    if tok.starts_with('%') {
        return Err(CompileError::Parse(format!("reference to undefined value '{}'", tok)));
    }
    let n: i64 = tok.parse().map_err(|_| CompileError::Parse(format!("expected a value, block, or literal, got '{}'", tok)))?;
    Ok(module.const_int(ty.clone(), n))
}

fn binop_from_mnemonic(m: &str) -> Option<BinOp> {
    Some(match m {
        "add" => BinOp::Add,
        "sub" => BinOp::Sub,
        "mul" => BinOp::Mul,
        "sdiv" => BinOp::SDiv,
        "udiv" => BinOp::UDiv,
        "srem" => BinOp::SRem,
        "urem" => BinOp::URem,
        "and" => BinOp::And,
        "or" => BinOp::Or,
        "xor" => BinOp::Xor,
        "shl" => BinOp::Shl,
        "ashr" => BinOp::AShr,
        "lshr" => BinOp::LShr,
        _ => return None,
    })
}

fn icmp_from_cc(cc: &str) -> Option<BinOp> {
    Some(match cc {
        "eq" => BinOp::ICmpEq,
        "ne" => BinOp::ICmpNe,
        "slt" => BinOp::ICmpSlt,
        "sle" => BinOp::ICmpSle,
        "sgt" => BinOp::ICmpSgt,
        "sge" => BinOp::ICmpSge,
        "ult" => BinOp::ICmpUlt,
        "ule" => BinOp::ICmpUle,
        "ugt" => BinOp::ICmpUgt,
        "uge" => BinOp::ICmpUge,
        _ => return None,
    })
}

fn cast_from_mnemonic(m: &str) -> Option<CastKind> {
    Some(match m {
        "trunc" => CastKind::Trunc,
        "zext" => CastKind::ZExt,
        "sext" => CastKind::SExt,
        "ptrtoint" => CastKind::PtrToInt,
        "inttoptr" => CastKind::IntToPtr,
        "bitcast" => CastKind::Bitcast,
        _ => return None,
    })
}

fn parse_instruction(
    module: &mut Module,
    block: ValueId,
    line: &str,
    values: &mut FxHashMap<String, ValueId>,
    blocks: &FxHashMap<String, ValueId>,
    structs: &FxHashMap<String, Rc<StructDef>>,
) -> Result<(), CompileError> {
    if let Some(rest) = line.strip_prefix("store ") {
        let (value_tok, ptr_tok) = rest.split_once(',').ok_or_else(|| CompileError::Parse(format!("malformed store: {}", line)))?;
        let ptr = resolve(module, ptr_tok, &Type::i32_ty(), values, blocks)?;
        let pointee = module.ty(ptr).deref().unwrap_or(Type::i32_ty());
        let value = resolve(module, value_tok, &pointee, values, blocks)?;
        module.append_inst(block, Type::Void, Instruction::Store { ptr, value }, Span::dummy());
        return Ok(());
    }
    if let Some(rest) = line.strip_prefix("br ") {
        let parts: Vec<&str> = rest.split(',').map(|s| s.trim()).collect();
        if parts.len() == 1 {
            let target = resolve(module, parts[0], &Type::i32_ty(), values, blocks)?;
            module.append_inst(block, Type::Void, Instruction::Br { target }, Span::dummy());
        } else if parts.len() == 3 {
            let cond = resolve(module, parts[0], &Type::i32_ty(), values, blocks)?;
            let then_blk = resolve(module, parts[1], &Type::i32_ty(), values, blocks)?;
            let else_blk = resolve(module, parts[2], &Type::i32_ty(), values, blocks)?;
            module.append_inst(block, Type::Void, Instruction::CondBr { cond, then_blk, else_blk }, Span::dummy());
        } else {
            return Err(CompileError::Parse(format!("malformed branch: {}", line)));
        }
        return Ok(());
    }
    if let Some(rest) = line.strip_prefix("ret") {
        let rest = rest.trim();
        if rest == "void" || rest.is_empty() {
            module.append_inst(block, Type::Void, Instruction::Ret { value: None }, Span::dummy());
        } else {
            let value = resolve(module, rest, &Type::i32_ty(), values, blocks)?;
            module.append_inst(block, Type::Void, Instruction::Ret { value: Some(value) }, Span::dummy());
        }
        return Ok(());
    }

    let (name_tok, rhs) = line.split_once(" = ").ok_or_else(|| CompileError::Parse(format!("expected an assignment, got: {}", line)))?;
    let name_tok = name_tok.trim();
    let mut words = rhs.trim().splitn(2, ' ');
    let opcode = words.next().unwrap_or("");
    let operand_text = words.next().unwrap_or("").trim();

    let (inst, ty) = if let Some(op) = binop_from_mnemonic(opcode) {
        let (ty_text, args) = operand_text.split_once(' ').ok_or_else(|| CompileError::Parse(format!("malformed binary op: {}", line)))?;
        let ty = parse_type(ty_text, structs)?;
        let (l, r) = args.split_once(',').ok_or_else(|| CompileError::Parse(format!("binary op needs two operands: {}", line)))?;
        let lhs = resolve(module, l, &ty, values, blocks)?;
        let rhs = resolve(module, r, &ty, values, blocks)?;
        let result_ty = if op.is_comparison() { Type::i32_ty() } else { ty };
        (Instruction::Binary { op, lhs, rhs }, result_ty)
    } else if opcode == "icmp" {
        let mut rest_words = operand_text.splitn(3, ' ');
        let cc = rest_words.next().ok_or_else(|| CompileError::Parse(format!("malformed icmp: {}", line)))?;
        let ty_text = rest_words.next().ok_or_else(|| CompileError::Parse(format!("malformed icmp: {}", line)))?;
        let args = rest_words.next().ok_or_else(|| CompileError::Parse(format!("malformed icmp: {}", line)))?;
        let op = icmp_from_cc(cc).ok_or_else(|| CompileError::Parse(format!("unknown condition code '{}'", cc)))?;
        let ty = parse_type(ty_text, structs)?;
        let (l, r) = args.split_once(',').ok_or_else(|| CompileError::Parse(format!("icmp needs two operands: {}", line)))?;
        let lhs = resolve(module, l, &ty, values, blocks)?;
        let rhs = resolve(module, r, &ty, values, blocks)?;
        (Instruction::Binary { op, lhs, rhs }, Type::i32_ty())
    } else if opcode == "neg" || opcode == "not" {
        let (ty_text, operand_tok) = operand_text.split_once(' ').ok_or_else(|| CompileError::Parse(format!("malformed unary op: {}", line)))?;
        let ty = parse_type(ty_text, structs)?;
        let operand = resolve(module, operand_tok, &ty, values, blocks)?;
        let op = if opcode == "neg" { UnOp::Neg } else { UnOp::Not };
        (Instruction::Unary { op, operand }, ty)
    } else if opcode == "load" {
        let (ty_text, ptr_tok) = operand_text.split_once(',').ok_or_else(|| CompileError::Parse(format!("malformed load: {}", line)))?;
        let ty = parse_type(ty_text.trim(), structs)?;
        let ptr = resolve(module, ptr_tok, &Type::ptr(ty.clone()), values, blocks)?;
        (Instruction::Load { ptr }, ty)
    } else if let Some(kind) = cast_from_mnemonic(opcode) {
        let (operand_tok, ty_text) = operand_text.split_once(" to ").ok_or_else(|| CompileError::Parse(format!("malformed cast: {}", line)))?;
        let ty = parse_type(ty_text, structs)?;
        let operand = resolve(module, operand_tok, &Type::i32_ty(), values, blocks)?;
        (Instruction::Cast { kind, operand }, ty)
    } else if opcode == "alloca" {
        let allocated_ty = parse_type(operand_text, structs)?;
        let ptr_ty = Type::ptr(allocated_ty.clone());
        (Instruction::Alloca { allocated_ty }, ptr_ty)
    } else if opcode == "gep" {
        let parts: Vec<&str> = operand_text.split(',').map(|s| s.trim()).collect();
        if parts.is_empty() {
            return Err(CompileError::Parse(format!("malformed gep: {}", line)));
        }
        let base = resolve(module, parts[0], &Type::i32_ty(), values, blocks)?;
        let base_ty = module.ty(base).clone();
        let indices = parts[1..].iter().map(|p| resolve(module, p, &Type::i32_ty(), values, blocks)).collect::<Result<Vec<_>, _>>()?;
        (Instruction::Gep { base, indices }, base_ty)
    } else if opcode == "call" {
        let (ty_text, rest) = operand_text.split_once(' ').ok_or_else(|| CompileError::Parse(format!("malformed call: {}", line)))?;
        let ty = parse_type(ty_text, structs)?;
        let open = rest.find('(').ok_or_else(|| CompileError::Parse(format!("malformed call: {}", line)))?;
        let close = rest.rfind(')').ok_or_else(|| CompileError::Parse(format!("malformed call: {}", line)))?;
        let callee_tok = &rest[..open];
        let callee = resolve(module, callee_tok, &Type::i32_ty(), values, blocks)?;
        let args_text = &rest[open + 1..close];
        let args = if args_text.trim().is_empty() {
            Vec::new()
        } else {
            args_text.split(',').map(|a| resolve(module, a, &Type::i32_ty(), values, blocks)).collect::<Result<Vec<_>, _>>()?
        };
        (Instruction::Call { callee, args }, ty)
    } else if opcode == "phi" {
        let (ty_text, edges_text) = operand_text.split_once('[').ok_or_else(|| CompileError::Parse(format!("malformed phi: {}", line)))?;
        let ty = parse_type(ty_text.trim(), structs)?;
        let edges_text = edges_text.trim_end_matches(']');
        let mut incomings = Vec::new();
        if !edges_text.trim().is_empty() {
            for edge in edges_text.split(',') {
                let (v_tok, b_tok) = edge.split_once(':').ok_or_else(|| CompileError::Parse(format!("malformed phi edge: {}", edge)))?;
                let value = resolve(module, v_tok, &ty, values, blocks)?;
                let block_id = resolve(module, b_tok, &Type::i32_ty(), values, blocks)?;
                incomings.push(PhiEdge { block: block_id, value });
            }
        }
        (Instruction::Phi { incomings }, ty)
    } else {
        return Err(CompileError::Parse(format!("unknown opcode '{}' in line: {}", opcode, line)));
    };

    let id = module.append_inst(block, ty, inst, Span::dummy());
    values.insert(name_tok.to_string(), id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::printer::print_module;
    use crate::ir::value::Linkage as IrLinkage;

    #[test]
    fn round_trips_simple_arithmetic() {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![Type::i32_ty(), Type::i32_ty()], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("add_two", fty, IrLinkage::External, Span::dummy());
        let p0 = m.add_param(f, Type::i32_ty(), Span::dummy());
        let p1 = m.add_param(f, Type::i32_ty(), Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        let sum = m.append_inst(entry, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: p0, rhs: p1 }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Ret { value: Some(sum) }, Span::dummy());

        let text = print_module(&m);
        let structs = FxHashMap::default();
        let reparsed = parse_module(&text, &structs).expect("parses");
        let text2 = print_module(&reparsed);
        assert_eq!(text, text2);
    }

    #[test]
    fn round_trips_branching_function() {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![Type::i32_ty()], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("abs", fty, IrLinkage::External, Span::dummy());
        let p0 = m.add_param(f, Type::i32_ty(), Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        let then_b = m.add_block(f, "then", Span::dummy());
        let join = m.add_block(f, "join", Span::dummy());
        let zero = m.const_int(Type::i32_ty(), 0);
        let cmp = m.append_inst(entry, Type::i32_ty(), Instruction::Binary { op: BinOp::ICmpSlt, lhs: p0, rhs: zero }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::CondBr { cond: cmp, then_blk: then_b, else_blk: join }, Span::dummy());
        let neg = m.append_inst(then_b, Type::i32_ty(), Instruction::Unary { op: UnOp::Neg, operand: p0 }, Span::dummy());
        m.append_inst(then_b, Type::Void, Instruction::Br { target: join }, Span::dummy());
        let phi = m.append_inst(join, Type::i32_ty(), Instruction::Phi { incomings: vec![PhiEdge { block: entry, value: p0 }, PhiEdge { block: then_b, value: neg }] }, Span::dummy());
        m.append_inst(join, Type::Void, Instruction::Ret { value: Some(phi) }, Span::dummy());

        let text = print_module(&m);
        let structs = FxHashMap::default();
        let reparsed = parse_module(&text, &structs).expect("parses");
        assert_eq!(text, print_module(&reparsed));
    }
}
