fn main() {
    if let Err(err) = cadence_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
