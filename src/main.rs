use reader_cycler::cli::commands::run_cli;
use reader_cycler::CycleError;

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        // Every failure ends the run; the exit code names the failing call.
        let code = match err.downcast_ref::<CycleError>() {
            Some(cycle) => {
                eprintln!("ERROR! {} FAILED: {cycle}", cycle.site());
                cycle.exit_code()
            }
            None => {
                eprintln!("Error: {err:#}");
                1
            }
        };
        std::process::exit(code);
    }
}
