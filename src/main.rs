// src/main.rs

use std::process::ExitCode;

use proctor::{cli, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();

    if let Err(err) = logging::init(args.log_level, args.verbose) {
        eprintln!("proctor: {err}");
        return ExitCode::FAILURE;
    }

    match proctor::run(args).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            eprintln!("proctor: {err}");
            ExitCode::FAILURE
        }
    }
}
