fn main() {
    if let Err(err) = nsenso::cli::run() {
        nsenso::ui::eprintln_error(&err);
        std::process::exit(nsenso::exit::exit_code(&err));
    }
}
