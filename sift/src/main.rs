use clap::Parser;

mod cli;

fn main() {
    let app = cli::App::parse();
    match cli::run(app) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sift: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            std::process::exit(1);
        },
    }
}
