// The host boundary. The interpreter only ever talks to a Console for
// terminal traffic and a Storage for LOAD/SAVE; PETSCII translation, screen
// width policy and the filesystem all stay on this side of the line.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::{fs, thread, time};

use termion::async_stdin;
use termion::raw::IntoRawMode;
use termion::AsyncReader;

pub trait Console {
    // Must not drop or reorder bytes.
    fn write(&mut self, bytes: &[u8]);
    // Blocks for a full line; None means end of input.
    fn read_line(&mut self, prompt: &str) -> Option<String>;
    // Non-blocking single byte for GET.
    fn poll_char(&mut self) -> Option<u8>;
    // Current cursor column, 0-based.
    fn column(&self) -> usize;
    // Advisory break poll, checked between statements.
    fn break_requested(&mut self) -> bool {
        false
    }
}

pub trait Storage {
    fn load(&mut self, name: &str) -> io::Result<Vec<u8>>;
    fn save(&mut self, name: &str, bytes: &[u8]) -> io::Result<()>;
}

pub struct FsStorage;

impl Storage for FsStorage {
    fn load(&mut self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(name)
    }
    fn save(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        fs::write(name, bytes)
    }
}

// Terminal console. On a real tty, GET and break detection use termion's
// asynchronous stdin in raw mode; once that reader exists it owns stdin, so
// line input switches to a small raw-mode editor. With piped input
// everything degrades to plain blocking reads.
pub struct TermConsole {
    column: usize,
    tty: bool,
    asynch: Option<AsyncReader>,
    // keys drained while polling for break, still owed to GET
    pending: VecDeque<u8>,
    break_seen: bool,
}

impl TermConsole {
    pub fn new() -> Self {
        TermConsole {
            column: 0,
            tty: termion::is_tty(&io::stdin()),
            asynch: None,
            pending: VecDeque::new(),
            break_seen: false,
        }
    }

    fn track(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                b'\n' | b'\r' => self.column = 0,
                0x00 => {}
                _ => self.column += 1,
            }
        }
    }

    fn poll_async(&mut self) -> Option<u8> {
        if self.asynch.is_none() {
            self.asynch = Some(async_stdin());
        }
        let mut buf = [0u8; 1];
        match self.asynch.as_mut().unwrap().read(&mut buf) {
            Ok(1) => Some(buf[0]),
            _ => None,
        }
    }

    fn raw_read_line(&mut self) -> Option<String> {
        let _raw = io::stdout().into_raw_mode().ok();
        let mut line = String::new();
        loop {
            let next = self.pending.pop_front().or_else(|| self.poll_async());
            let byte = match next {
                Some(b) => b,
                None => {
                    thread::sleep(time::Duration::from_millis(10));
                    continue;
                }
            };
            match byte {
                b'\r' | b'\n' => {
                    self.write_raw(b"\r\n");
                    break;
                }
                0x03 => {
                    self.break_seen = true;
                    return None;
                }
                0x08 | 0x7f => {
                    if line.pop().is_some() {
                        self.write_raw(b"\x08 \x08");
                    }
                }
                b if b >= 0x20 && b < 0x7f => {
                    line.push(b as char);
                    self.write_raw(&[b]);
                }
                _ => {}
            }
        }
        self.column = 0;
        Some(line)
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        let _ = handle.write_all(bytes);
        let _ = handle.flush();
        self.track(bytes);
    }
}

impl Console for TermConsole {
    fn write(&mut self, bytes: &[u8]) {
        self.write_raw(bytes);
    }

    fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.write_raw(prompt.as_bytes());
        if self.tty && self.asynch.is_some() {
            return self.raw_read_line();
        }
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                self.column = 0;
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
        }
    }

    fn poll_char(&mut self) -> Option<u8> {
        if let Some(byte) = self.pending.pop_front() {
            return Some(byte);
        }
        if self.tty {
            let raw = io::stdout().into_raw_mode().ok();
            let byte = self.poll_async();
            drop(raw);
            if byte == Some(0x03) {
                self.break_seen = true;
                return None;
            }
            byte
        } else {
            let mut buf = [0u8; 1];
            match io::stdin().read(&mut buf) {
                Ok(1) => Some(buf[0]),
                _ => None,
            }
        }
    }

    fn column(&self) -> usize {
        self.column
    }

    fn break_requested(&mut self) -> bool {
        if self.tty && self.asynch.is_some() {
            while let Some(b) = {
                let raw = io::stdout().into_raw_mode().ok();
                let byte = self.poll_async();
                drop(raw);
                byte
            } {
                if b == 0x03 {
                    self.break_seen = true;
                } else {
                    self.pending.push_back(b);
                }
            }
        }
        std::mem::replace(&mut self.break_seen, false)
    }
}
