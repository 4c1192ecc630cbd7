use std::{env, fs, path::Path, process::ExitCode, time::Instant};

use jitlang::{GlobalContext, NoopTracer, StderrTracer, run_module};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let trace = args.iter().any(|a| a == "--trace");
    let file_path = args.iter().skip(1).find(|a| *a != "--trace").map_or("example.py", String::as_str);

    let source = match read_file(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let module_name = module_name_from_path(file_path);
    let mut global = GlobalContext::new(vec![]);

    let start = Instant::now();
    let result = if trace {
        run_module(&mut global, &module_name, source, &StderrTracer)
    } else {
        run_module(&mut global, &module_name, source, &NoopTracer)
    };
    let elapsed = start.elapsed();

    match result {
        Ok(()) => {
            eprintln!("success after: {elapsed:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after: {elapsed:?}\n{}", err.render(&module_name, global.modules.get(&module_name).and_then(|m| m.source.as_deref())));
            ExitCode::FAILURE
        }
    }
}

fn module_name_from_path(file_path: &str) -> String {
    Path::new(file_path).file_stem().and_then(|s| s.to_str()).unwrap_or("main").to_owned()
}

fn read_file(file_path: &str) -> Result<String, String> {
    eprintln!("Reading file: {file_path}");
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("Error: {file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("Error reading {file_path}: {err}"));
        }
    }
    fs::read_to_string(file_path).map_err(|err| format!("Error reading file: {err}"))
}
