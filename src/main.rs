fn main() {
    if let Err(e) = scanroute_lib::run() {
        eprintln!("scanroute: {e}");
        std::process::exit(1);
    }
}
