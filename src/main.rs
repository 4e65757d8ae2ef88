//! Entry point for the `rite` binary. All behavior lives in `lib.rs`.

/// Exit code for a fatal Heresy raised during a rite.
const EXIT_RUNTIME_ERROR: i32 = 1;

fn main() {
    if let Err(err) = rite::run() {
        eprintln!("{} {err}", "error:");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}
