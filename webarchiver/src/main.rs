use colored::Colorize;
use webarchiver::command_argument_builder;
use webarchiver::handlers::{handle_archive, print_banner};

#[tokio::main]
async fn main() {
    let matches = command_argument_builder().get_matches();

    if !matches.get_flag("quiet") {
        print_banner();
    }

    match handle_archive(&matches).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(2);
        }
    }
}
