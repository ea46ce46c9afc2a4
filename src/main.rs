fn main() {
    if let Err(err) = fedchecker::cli::run() {
        fedchecker::ui::eprintln_error(&err);
        std::process::exit(fedchecker::exit::exit_code(&err));
    }
}
