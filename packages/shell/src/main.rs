use std::io::{self, Read, Write};
use std::process::ExitCode;

use relay_shell::parser::parse;

fn main() -> ExitCode {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        eprintln!("relay-shell: {e}");
        return ExitCode::FAILURE;
    }

    let input = input.trim();
    if input.is_empty() {
        let _ = io::stdout().write_all(b"null\n");
        return ExitCode::SUCCESS;
    }

    let statement = match parse(input) {
        Ok(statement) => statement,
        Err(e) => {
            eprintln!("relay-shell: {e}");
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string(&statement) {
        Ok(json) => {
            let _ = writeln!(io::stdout(), "{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("relay-shell: {e}");
            ExitCode::FAILURE
        }
    }
}
