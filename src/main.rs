use std::process::ExitCode;

fn main() -> ExitCode {
    match branchline::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            branchline::ui::output::error(format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
