use std::{env, fs, process};

use mb6502::console::{FsStorage, TermConsole};
use mb6502::{Configuration, Interpreter};

fn main() {
    let mut verbosity: usize = 0;
    let mut file = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-v" => verbosity += 1,
            "-vv" => verbosity += 2,
            "-h" | "--help" => {
                println!("usage: mypet [-v] [program.bas]");
                return;
            }
            _ => file = Some(arg),
        }
    }
    stderrlog::new().verbosity(verbosity).init().ok();

    let mut basic = Interpreter::new(Configuration::default(), Box::new(TermConsole::new()));
    basic.attach_storage(Box::new(FsStorage));

    // A program file on the command line is typed in ahead of the REPL.
    if let Some(path) = file {
        match fs::read_to_string(&path) {
            Ok(text) => {
                for line in text.lines() {
                    basic.execute_line(line);
                }
            }
            Err(error) => {
                eprintln!("{}: {}", path, error);
                process::exit(1);
            }
        }
    }
    basic.run();
}
