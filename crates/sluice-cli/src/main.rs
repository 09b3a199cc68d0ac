use sluice_core::logging;

mod cli;
mod http_source;

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = cli::run_from_args().await {
        eprintln!("sluice error: {:#}", err);
        std::process::exit(1);
    }
}
