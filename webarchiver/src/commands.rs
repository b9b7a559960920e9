use clap::{Arg, ArgAction, Command, arg};

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub fn command_argument_builder() -> Command {
    Command::new("webarchiver")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("webarchiver")
        .about("Mirror websites into browsable local directories, falling back to the Wayback Machine")
        .styles(CLAP_STYLING)
        .arg(
            Arg::new("targets")
                .value_name("URL")
                .num_args(0..)
                .help("URLs to archive. A trailing integer is taken as the link depth."),
        )
        .arg(
            arg!(-H --"hosts-file" <PATH>)
                .required(false)
                .help("Path to a newline-delimited file of URLs to archive")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            arg!(-d --"depth" <DEPTH>)
                .required(false)
                .help("How many links deep to follow from each URL (default: 0)")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            arg!(-o --"output" <PATH>)
                .required(false)
                .help("Directory to write mirrors into (default: $OUTPUT_DIR or ./downloads)"),
        )
        .arg(
            arg!(-t --"timeout" <SECONDS>)
                .required(false)
                .help("Per-request timeout in seconds (default: $HTTP_TIMEOUT or 30)")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            arg!(-w --"workers" <NUM_WORKERS>)
                .required(false)
                .help("Concurrent fetches per URL (default: $WORKERS or 8)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            arg!(--"all-snapshots")
                .visible_alias("as")
                .required(false)
                .help("When the live site fails, download every archived snapshot")
                .action(ArgAction::SetTrue)
                .conflicts_with("snapshot"),
        )
        .arg(
            arg!(-s --"snapshot" <TIMESTAMP>)
                .required(false)
                .help("Download one archived snapshot (format: YYYYMMDDHHMMSS)"),
        )
        .arg(
            arg!(--"manifest")
                .required(false)
                .help("Write a manifest.json next to each mirror")
                .action(ArgAction::SetTrue),
        )
        .arg(arg!(-q --"quiet" "Suppress banner, progress and informational logs").required(false))
}
