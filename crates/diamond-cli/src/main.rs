#![forbid(unsafe_code)]

fn main() {
    std::process::exit(diamond_cli::run());
}
