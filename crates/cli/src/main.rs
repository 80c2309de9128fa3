use std::process::ExitCode;

fn main() -> ExitCode {
    assetdesk_cli::run()
}
