use clap::Parser;

fn main() {
    let cli = apilensctl::Cli::parse();
    if let Err(err) = apilensctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
