use std::process::ExitCode;

fn main() -> ExitCode {
    match claude_usage_blocks::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
