//! `brk` binary entry point

#[tokio::main]
async fn main() {
    let code = brk::cli::run_cli().await;
    std::process::exit(code);
}
