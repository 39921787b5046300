mod cli;

pub use cli::Config;

use crate::backend::arm;
use crate::common::error::{CompileError, DiagnosticEngine};
use crate::common::source::SourceManager;
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::frontend::sema::SemanticAnalyzer;
use crate::ir::lowering::lower_translation_unit;
use crate::ir::mem2reg::promote_allocas;
use crate::ir::printer::print_module;
use crate::ir::verify::verify_module;
use crate::passes::{build_registry, PassManager, Stage};

/// Runs one translation unit through every phase named in §6: lex, parse,
/// analyze, lower, optimize, and either print IR or emit ARM-like assembly
/// text, depending on `config.mode`.
pub fn compile(config: &Config) -> Result<String, CompileError> {
    let source = std::fs::read_to_string(&config.input_file)
        .map_err(|e| CompileError::Io { path: config.input_file.clone(), source: e })?;

    let mut source_manager = SourceManager::new();
    let file_id = source_manager.add_file(config.input_file.clone(), source.clone());

    let mut lexer = Lexer::new(&source, file_id);
    let tokens = lexer.tokenize();
    log::debug!("lexed {} tokens from {}", tokens.len(), config.input_file);

    let mut diags = DiagnosticEngine::new();
    let parser = Parser::new(tokens, &mut diags);
    let (tu, structs) = parser.parse();

    if config.dump_ast {
        println!("{tu:#?}");
    }

    let mut sema = SemanticAnalyzer::new(&mut diags);
    sema.analyze(&tu, &structs);

    if diags.has_errors() {
        diags.print_all(&source_manager);
        return Err(CompileError::SourceErrors(diags.error_count()));
    }

    let mut module = lower_translation_unit(&tu, &structs, &mut diags);
    if diags.has_errors() {
        diags.print_all(&source_manager);
        return Err(CompileError::SourceErrors(diags.error_count()));
    }
    verify_module(&module)?;

    for func in module.functions().collect::<Vec<_>>() {
        if module.function_entry(func).is_some() {
            promote_allocas(&mut module, func);
        }
    }

    let registry = build_registry();
    if config.dump_passes {
        println!("{}", crate::passes::describe_registry(&registry));
    }
    let manager = PassManager::new(registry);
    manager.run_stage(&mut module, Stage::OPT, config.opt_level)?;
    manager.run_stage(&mut module, Stage::POST_OPT, config.opt_level)?;
    verify_module(&module)?;

    diags.print_all(&source_manager);

    match config.mode {
        OutputMode::EmitIr => Ok(print_module(&module)),
        OutputMode::Assembly => arm::compile_to_asm(&module),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Assembly,
    EmitIr,
}
