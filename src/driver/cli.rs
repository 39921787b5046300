//! Command-line surface (spec §6): `mmcc [-O<0..3>] [-S | -emit-ir]
//! [--dump-ast] [--dump-passes] [-o <out>] <input>`. Parsed by hand, the way
//! the rest of the ambient configuration in this crate is — there is no
//! subcommand structure or derive-macro CLI to reach for here.

use super::OutputMode;
use crate::common::error::CompileError;

#[derive(Debug, Clone)]
pub struct Config {
    pub input_file: String,
    pub output_file: Option<String>,
    pub opt_level: u32,
    pub mode: OutputMode,
    pub dump_ast: bool,
    pub dump_passes: bool,
    pub verbose: bool,
}

impl Config {
    pub fn parse(args: &[String]) -> Result<Config, CompileError> {
        let mut input_file = None;
        let mut output_file = None;
        let mut opt_level = 0u32;
        let mut mode = OutputMode::Assembly;
        let mut dump_ast = false;
        let mut dump_passes = false;
        let mut verbose = false;

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-o" => {
                    i += 1;
                    let path = args.get(i).ok_or_else(|| CompileError::Misconfiguration("-o requires an argument".to_string()))?;
                    output_file = Some(path.clone());
                }
                "-O0" => opt_level = 0,
                "-O1" => opt_level = 1,
                "-O2" => opt_level = 2,
                "-O3" => opt_level = 3,
                "-S" => mode = OutputMode::Assembly,
                "-emit-ir" => mode = OutputMode::EmitIr,
                "--dump-ast" => dump_ast = true,
                "--dump-passes" => dump_passes = true,
                "-v" | "--verbose" => verbose = true,
                arg if arg.starts_with('-') => {
                    return Err(CompileError::Misconfiguration(format!("unknown flag: {arg}")));
                }
                arg => {
                    if input_file.is_some() {
                        return Err(CompileError::Misconfiguration("only one input file is supported".to_string()));
                    }
                    input_file = Some(arg.to_string());
                }
            }
            i += 1;
        }

        let input_file = input_file.ok_or_else(|| CompileError::Misconfiguration("no input file".to_string()))?;
        Ok(Config { input_file, output_file, opt_level, mode, dump_ast, dump_passes, verbose })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn parses_opt_level_and_output_path() {
        let cfg = Config::parse(&args(&["-O2", "-o", "out.s", "main.c"])).unwrap();
        assert_eq!(cfg.opt_level, 2);
        assert_eq!(cfg.output_file.as_deref(), Some("out.s"));
        assert_eq!(cfg.input_file, "main.c");
    }

    #[test]
    fn defaults_to_assembly_output() {
        let cfg = Config::parse(&args(&["main.c"])).unwrap();
        assert_eq!(cfg.mode, OutputMode::Assembly);
        assert_eq!(cfg.opt_level, 0);
    }

    #[test]
    fn emit_ir_flag_switches_mode() {
        let cfg = Config::parse(&args(&["-emit-ir", "main.c"])).unwrap();
        assert_eq!(cfg.mode, OutputMode::EmitIr);
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(Config::parse(&args(&["--bogus", "main.c"])).is_err());
    }

    #[test]
    fn rejects_missing_input() {
        assert!(Config::parse(&args(&["-O1"])).is_err());
    }
}
