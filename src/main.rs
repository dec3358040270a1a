fn main() {
    if let Err(err) = dashfeed::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
