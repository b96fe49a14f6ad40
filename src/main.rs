use clap::Parser;
use std::env;
use std::process;
use xform::XformError;
use xform::cli::{Args, run};

fn main() -> Result<(), XformError> {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "xform=warn,xform_model=warn");
        }
    }
    env_logger::init();

    let args = Args::parse();
    let report = run(&args)?;

    for error in &report.load_errors {
        eprintln!("load error: {}", error);
    }
    let mut failed = false;
    for (expr, result) in &report.results {
        match result {
            Ok(value) => println!("{} => {}", expr, value),
            Err(e) => {
                failed = true;
                eprintln!("{} failed: {}", expr, e);
            }
        }
    }
    match &report.record {
        Some(record) => println!("{}", record),
        None => process::exit(1),
    }
    if failed {
        process::exit(2);
    }
    Ok(())
}
