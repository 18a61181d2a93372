//! Host emulator for the field sensor node.
//!
//! Runs the full node-core stack against simulated hardware and drives it
//! from the technician console grammar on stdin. Simulated time only moves
//! with the `advance` command, which makes schedule behavior reproducible
//! enough to script.

mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use session::Session;

fn transcript_path() -> Option<PathBuf> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--transcript" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

fn main() -> io::Result<()> {
    let mut session = Session::new(transcript_path())?;

    println!("field node emulator - 'help' lists commands, 'quit' exits");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        for output in session.handle_line(line)? {
            println!("{output}");
        }
    }

    Ok(())
}
