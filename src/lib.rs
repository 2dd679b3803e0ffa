mod crunch;
mod eval;
mod float;
mod interpreter;
mod program;
mod strings;
mod tokens;
mod vars;
pub mod console;
pub mod errors;
pub mod memory;

pub use interpreter::Interpreter;

use memory::BUF;

pub struct Configuration {
    pub text_start: u16,
    pub memory_top: u16,
}

impl Default for Configuration {
    // The classic PET layout: program text at $0401, 31K of RAM.
    fn default() -> Self {
        Configuration { text_start: 0x0401, memory_top: 0x8000 }
    }
}

impl Interpreter {
    // The REPL. Reads lines until end of input; numbered lines edit the
    // program, everything else executes immediately out of the input
    // buffer.
    pub fn run(&mut self) {
        let free = self.mem.memsiz() - self.mem.vartab();
        self.console.write(
            format!("\n*** MB6502 BASIC 1.1 ***\n\n {} BYTES FREE\n\nREADY.\n", free).as_bytes(),
        );
        loop {
            let line = match self.console.read_line("") {
                Some(line) => line,
                None => return,
            };
            if self.execute_line(&line) {
                self.console.write(b"\nREADY.\n");
            }
        }
    }

    // Handle one typed line. Returns whether anything ran (an edit is
    // silent, like the original).
    pub fn execute_line(&mut self, line: &str) -> bool {
        let body = line.trim_end_matches(|c| c == '\r' || c == '\n');
        if body.trim().is_empty() {
            return false;
        }
        if let Some((number, rest)) = crunch::split_line_number(body) {
            if let Err(error) = self.edit(number, rest) {
                self.report_error(&error);
                return true;
            }
            return false;
        }
        match crunch::crunch(body) {
            Ok(tokens) => {
                self.mem.write_slice(BUF, &tokens);
                self.mem.write(BUF + tokens.len() as u16, 0);
                self.txtptr = BUF;
                self.curlin = None;
                if let Err(error) = self.main_loop() {
                    self.report_error(&error);
                }
            }
            Err(error) => self.report_error(&error),
        }
        true
    }

    // A program edit. Any edit invalidates frames, variables and the DATA
    // cursor, so it implies CLEAR.
    fn edit(&mut self, number: u32, body: &str) -> errors::Result<()> {
        if number > program::MAX_LINE as u32 {
            return Err(errors::Error::Syntax);
        }
        let tokens = crunch::crunch(body)?;
        program::store_line(&mut self.mem, number as u16, &tokens)?;
        self.clear_state();
        Ok(())
    }
}
