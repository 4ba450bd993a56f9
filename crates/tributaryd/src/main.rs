use std::process::ExitCode;

fn main() -> ExitCode {
    match tributaryd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("tributaryd: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}
