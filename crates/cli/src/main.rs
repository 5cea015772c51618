use std::process::ExitCode;

fn main() -> ExitCode {
    novaxa_cli::run()
}
