use mimic::driver::{self, Config};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match Config::parse(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mmcc: {e}");
            std::process::exit(e.exit_code());
        }
    };

    if config.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::init();
    }

    let output = match driver::compile(&config) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("mmcc: {e}");
            std::process::exit(e.exit_code());
        }
    };

    match &config.output_file {
        Some(path) => {
            if let Err(e) = std::fs::write(path, output) {
                eprintln!("mmcc: cannot write {path}: {e}");
                std::process::exit(1);
            }
        }
        None => print!("{output}"),
    }
}
