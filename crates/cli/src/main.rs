use std::process::ExitCode;

fn main() -> ExitCode {
    toolrelay_cli::run()
}
