use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = iptvctl::Cli::parse();
    if let Err(err) = iptvctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
